// ============================================================
// Layer 3 — Tree and Token Domain Types
// ============================================================
// The core data model of the parser: a Tree is one sentence
// with token-level annotations and sentence-level metadata.
//
// Mutation discipline:
//   Input trees are READ-ONLY for the whole pipeline. The only
//   code that produces modified tokens is the prediction
//   reassembler, and it always works on copies — a predicted
//   tree shares no mutable state with the tree it came from.
//
// The `id` field is assigned in input order by the loader and
// is what restores the caller's ordering after the pipeline
// has internally re-sorted trees by length.
//
// Reference: CoNLL-U format specification (universaldependencies.org)
//            Rust Book §5 (Structs and Methods)

use ndarray::ArrayD;

use anyhow::{bail, Result};

/// One word/unit within a tree, holding the ten CoNLL-U columns
/// plus the semantic-relation column used by enhanced treebanks.
///
/// Empty annotations carry the CoNLL-U placeholder `_`.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Token index within the sentence, as written in the treebank (1-based)
    pub id:      String,
    /// Surface form of the word
    pub form:    String,
    /// Lemma or stem
    pub lemma:   String,
    /// Universal part-of-speech tag
    pub upostag: String,
    /// Language-specific part-of-speech tag
    pub xpostag: String,
    /// Morphological features, `|`-separated `key=value` pairs
    pub feats:   String,
    /// Head of the current word: a token id, or 0 for the root
    pub head:    String,
    /// Universal dependency relation to the head
    pub deprel:  String,
    /// Enhanced dependency graph
    pub deps:    String,
    /// Any other annotation
    pub misc:    String,
    /// Semantic relation label (optional eleventh column)
    pub semrel:  String,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            id:      "_".to_string(),
            form:    "_".to_string(),
            lemma:   "_".to_string(),
            upostag: "_".to_string(),
            xpostag: "_".to_string(),
            feats:   "_".to_string(),
            head:    "_".to_string(),
            deprel:  "_".to_string(),
            deps:    "_".to_string(),
            misc:    "_".to_string(),
            semrel:  "_".to_string(),
        }
    }
}

impl Token {
    /// Read a field by its column name.
    /// Returns `None` for names that are not token fields (e.g. "sent").
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "id"      => Some(&self.id),
            "form"    => Some(&self.form),
            "lemma"   => Some(&self.lemma),
            "upostag" => Some(&self.upostag),
            "xpostag" => Some(&self.xpostag),
            "feats"   => Some(&self.feats),
            "head"    => Some(&self.head),
            "deprel"  => Some(&self.deprel),
            "deps"    => Some(&self.deps),
            "misc"    => Some(&self.misc),
            "semrel"  => Some(&self.semrel),
            _         => None,
        }
    }

    /// Write a field by its column name.
    /// Unknown names are an error — a silent no-op here would make a
    /// mistyped target name drop predictions on the floor.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        match name {
            "id"      => self.id = value,
            "form"    => self.form = value,
            "lemma"   => self.lemma = value,
            "upostag" => self.upostag = value,
            "xpostag" => self.xpostag = value,
            "feats"   => self.feats = value,
            "head"    => self.head = value,
            "deprel"  => self.deprel = value,
            "deps"    => self.deps = value,
            "misc"    => self.misc = value,
            "semrel"  => self.semrel = value,
            other     => bail!("'{}' is not a token field", other),
        }
        Ok(())
    }
}

/// A parsed sentence: tokens plus sentence-level metadata.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    /// Unique identifier, assigned in input order — the final
    /// prediction output is sorted by this field
    pub id: usize,

    /// The annotated tokens, in sentence order
    pub tokens: Vec<Token>,

    /// The raw word sequence (surface forms, in order)
    pub words: Vec<String>,

    /// Comment lines attached to the sentence, in order.
    /// Supervision-level markers ("full tree" / "partial tree")
    /// are carried here.
    pub comments: Vec<String>,

    /// Raw per-target probability arrays from prediction,
    /// retained only when the parser is configured to keep them
    pub probs: Option<Vec<ArrayD<f32>>>,

    /// Sentence-level embedding — input for the `sent` target
    /// during training, output of it during prediction
    pub emb: Option<Vec<f32>>,
}

impl Tree {
    /// Create a tree with no probabilities or embedding attached.
    pub fn new(id: usize, tokens: Vec<Token>, words: Vec<String>, comments: Vec<String>) -> Self {
        Self { id, tokens, words, comments, probs: None, emb: None }
    }

    /// Number of tokens — the "word count" every batching decision is based on.
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// True when one of the comment lines equals `marker` after trimming.
    /// Markers are matched as whole comments, not substrings.
    pub fn has_comment(&self, marker: &str) -> bool {
        self.comments.iter().any(|c| c.trim() == marker.trim())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_roundtrip() {
        let mut token = Token::default();
        token.set_field("deprel", "nsubj").unwrap();
        assert_eq!(token.field("deprel"), Some("nsubj"));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let mut token = Token::default();
        assert!(token.set_field("sent", "x").is_err());
        assert!(token.field("sent").is_none());
    }

    #[test]
    fn test_comment_marker_matching() {
        let tree = Tree::new(
            0,
            vec![Token::default()],
            vec!["_".to_string()],
            vec!["# full_tree".to_string(), "# text = Hi".to_string()],
        );
        assert!(tree.has_comment("# full_tree"));
        assert!(tree.has_comment("  # full_tree  "));
        // Substrings of a comment are not markers
        assert!(!tree.has_comment("# full"));
    }
}
