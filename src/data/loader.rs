// ============================================================
// Layer 4 — Treebank Loader / Writer
// ============================================================
// Reads and writes CoNLL-U treebanks.
//
// The CoNLL-U sentence layout:
//   # comment lines (kept verbatim — supervision markers live here)
//   1<TAB>form<TAB>lemma<TAB>upos<TAB>xpos<TAB>feats<TAB>head<TAB>deprel<TAB>deps<TAB>misc
//   ...
//   <blank line terminates the sentence>
//
// An optional eleventh column carries the semantic relation
// label used by enhanced treebanks; the writer emits it only
// when some token actually has one.
//
// Multiword-token ranges ("1-2") and empty nodes ("3.1") are
// skipped — the pipeline works on the basic token sequence.
//
// Trees receive sequential ids in input order; that id is what
// the prediction pipeline sorts by to restore caller ordering.
//
// Reference: CoNLL-U format specification (universaldependencies.org)
//            Rust Book §9 (Error Handling), §12 (I/O)

use std::{fs, path::Path};

use anyhow::{ensure, Context, Result};

use crate::domain::traits::{TreebankSink, TreebankSource};
use crate::domain::tree::{Token, Tree};

// ─── ConlluLoader ─────────────────────────────────────────────────────────────
/// Loads trees from a `.conllu` file, or from every `.conllu` file
/// in a directory. Implements the TreebankSource trait from Layer 3.
pub struct ConlluLoader {
    path: String,
}

impl ConlluLoader {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl TreebankSource for ConlluLoader {
    fn load_all(&self) -> Result<Vec<Tree>> {
        let path = Path::new(&self.path);

        // A missing path yields an empty treebank rather than an error —
        // downstream stages treat "no trees" as a legitimate no-op.
        if !path.exists() {
            tracing::warn!("Treebank path '{}' does not exist — returning no trees", self.path);
            return Ok(Vec::new());
        }

        let mut trees = Vec::new();
        if path.is_dir() {
            let mut files: Vec<_> = fs::read_dir(path)
                .with_context(|| format!("Cannot read directory '{}'", self.path))?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("conllu"))
                .collect();
            files.sort();

            for file in files {
                match load_single_file(&file, trees.len()) {
                    Ok(mut loaded) => {
                        tracing::debug!("Loaded {} trees from '{}'", loaded.len(), file.display());
                        trees.append(&mut loaded);
                    }
                    // Log a warning but continue — don't fail on one bad file
                    Err(e) => tracing::warn!("Skipping '{}': {}", file.display(), e),
                }
            }
        } else {
            trees = load_single_file(path, 0)?;
        }

        tracing::info!("Loaded {} trees from '{}'", trees.len(), self.path);
        Ok(trees)
    }
}

fn load_single_file(path: &Path, first_id: usize) -> Result<Vec<Tree>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    parse_conllu(&text, first_id)
}

/// Parse CoNLL-U text into trees, assigning ids starting at `first_id`.
pub fn parse_conllu(text: &str, first_id: usize) -> Result<Vec<Tree>> {
    let mut trees = Vec::new();
    let mut comments: Vec<String> = Vec::new();
    let mut tokens: Vec<Token> = Vec::new();

    let mut flush = |comments: &mut Vec<String>, tokens: &mut Vec<Token>, trees: &mut Vec<Tree>| {
        if !tokens.is_empty() {
            let words = tokens.iter().map(|t| t.form.clone()).collect();
            trees.push(Tree::new(
                first_id + trees.len(),
                std::mem::take(tokens),
                words,
                std::mem::take(comments),
            ));
        } else {
            // Comments without tokens belong to nothing — drop them
            comments.clear();
        }
    };

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            flush(&mut comments, &mut tokens, &mut trees);
        } else if let Some(comment) = line.strip_prefix('#') {
            comments.push(format!("#{}", comment));
        } else {
            let columns: Vec<&str> = line.split('\t').collect();
            ensure!(
                columns.len() >= 10,
                "line {}: expected at least 10 tab-separated columns, found {}",
                line_no + 1,
                columns.len(),
            );
            // Skip multiword ranges and empty nodes
            if columns[0].contains('-') || columns[0].contains('.') {
                continue;
            }
            tokens.push(Token {
                id:      columns[0].to_string(),
                form:    columns[1].to_string(),
                lemma:   columns[2].to_string(),
                upostag: columns[3].to_string(),
                xpostag: columns[4].to_string(),
                feats:   columns[5].to_string(),
                head:    columns[6].to_string(),
                deprel:  columns[7].to_string(),
                deps:    columns[8].to_string(),
                misc:    columns[9].to_string(),
                semrel:  columns.get(10).unwrap_or(&"_").to_string(),
            });
        }
    }
    flush(&mut comments, &mut tokens, &mut trees);

    Ok(trees)
}

// ─── ConlluWriter ─────────────────────────────────────────────────────────────
/// Writes trees back out as CoNLL-U. Implements TreebankSink.
pub struct ConlluWriter {
    path: String,
}

impl ConlluWriter {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl TreebankSink for ConlluWriter {
    fn write_all(&self, trees: &[Tree]) -> Result<()> {
        let text = format_conllu(trees);
        if let Some(parent) = Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Cannot create '{}'", parent.display()))?;
            }
        }
        fs::write(&self.path, text)
            .with_context(|| format!("Cannot write '{}'", self.path))?;
        tracing::info!("Wrote {} trees to '{}'", trees.len(), self.path);
        Ok(())
    }
}

/// Render trees as CoNLL-U text. The semrel column is emitted only
/// for trees where at least one token carries a value.
pub fn format_conllu(trees: &[Tree]) -> String {
    let mut out = String::new();
    for tree in trees {
        for comment in &tree.comments {
            out.push_str(comment);
            out.push('\n');
        }
        let with_semrel = tree.tokens.iter().any(|t| !t.semrel.is_empty() && t.semrel != "_");
        for token in &tree.tokens {
            let mut columns = vec![
                token.id.as_str(),
                token.form.as_str(),
                token.lemma.as_str(),
                token.upostag.as_str(),
                token.xpostag.as_str(),
                token.feats.as_str(),
                token.head.as_str(),
                token.deprel.as_str(),
                token.deps.as_str(),
                token.misc.as_str(),
            ];
            if with_semrel {
                columns.push(token.semrel.as_str());
            }
            out.push_str(&columns.join("\t"));
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# full_tree
# text = Dogs bark
1\tDogs\tdog\tNOUN\tNN\tNumber=Plur\t2\tnsubj\t_\t_
2\tbark\tbark\tVERB\tVB\t_\t0\troot\t_\t_

# partial_tree
1\tHi\thi\tINTJ\t_\t_\t0\troot\t_\t_
";

    #[test]
    fn test_parse_assigns_sequential_ids() {
        let trees = parse_conllu(SAMPLE, 0).unwrap();
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[0].id, 0);
        assert_eq!(trees[1].id, 1);
        assert_eq!(trees[0].token_count(), 2);
        assert_eq!(trees[0].words, vec!["Dogs", "bark"]);
    }

    #[test]
    fn test_parse_keeps_comments_in_order() {
        let trees = parse_conllu(SAMPLE, 0).unwrap();
        assert_eq!(trees[0].comments[0], "# full_tree");
        assert!(trees[0].has_comment("# full_tree"));
        assert!(trees[1].has_comment("# partial_tree"));
    }

    #[test]
    fn test_parse_skips_multiword_and_empty_nodes() {
        let text = "1-2\tcannot\t_\t_\t_\t_\t_\t_\t_\t_\n\
                    1\tcan\tcan\tAUX\t_\t_\t0\troot\t_\t_\n\
                    1.1\telided\t_\t_\t_\t_\t_\t_\t_\t_\n\
                    2\tnot\tnot\tPART\t_\t_\t1\tadvmod\t_\t_\n";
        let trees = parse_conllu(text, 0).unwrap();
        assert_eq!(trees[0].token_count(), 2);
    }

    #[test]
    fn test_parse_rejects_short_lines() {
        assert!(parse_conllu("1\tonly\tthree\n", 0).is_err());
    }

    #[test]
    fn test_format_roundtrips() {
        let trees = parse_conllu(SAMPLE, 0).unwrap();
        let rendered = format_conllu(&trees);
        let reparsed = parse_conllu(&rendered, 0).unwrap();
        assert_eq!(reparsed.len(), trees.len());
        assert_eq!(reparsed[0].tokens, trees[0].tokens);
        assert_eq!(reparsed[0].comments, trees[0].comments);
    }

    #[test]
    fn test_semrel_column_emitted_only_when_present() {
        let mut trees = parse_conllu(SAMPLE, 0).unwrap();
        assert!(!format_conllu(&trees).contains("\tAGENT"));
        trees[0].tokens[0].semrel = "AGENT".to_string();
        let rendered = format_conllu(&trees);
        let first_line = rendered.lines().find(|l| l.starts_with('1')).unwrap();
        assert_eq!(first_line.split('\t').count(), 11);
    }
}
