// ============================================================
// Layer 4 — Feature and Target Encoders
// ============================================================
// Converts tree tokens into raw numeric columns and model
// predictions back into field values.
//
// Column shapes (one cell per tree):
//   form    → [tokens+1]            word ids, rooted
//   char    → [tokens+1, word_len]  character ids, rooted
//   head    → [tokens+1]            head indices (0 = root)
//   deprel / lemma / upostag / xpostag / semrel
//           → [tokens+1]            vocabulary ids, rooted
//   feats   → [tokens+1, vocab]     multi-hot over feature items
//   sent    → [emb_dim]             the tree's sentence embedding
//
// Every token-level column carries a leading ROOT slot at
// position 0, so a head value (a 1-based token index, 0 for
// the root) always indexes inside the padded sequence — even
// for the longest tree of a batch.
//
// Vocabulary ids 0/1/2 are reserved for padding, unknown
// values, and the root slot. Padded positions therefore decode
// to `<pad>` and are never read back during reassembly.
//
// Reference: CoNLL-U format specification (universaldependencies.org)
//            Rust Book §8 (HashMaps)

use std::collections::HashMap;

use anyhow::{bail, ensure, Context, Result};
use ndarray::{Array1, Array2, ArrayD, Axis};
use serde::{Deserialize, Serialize};

use crate::domain::tree::Tree;

/// Feature names the feature encoders understand.
pub const KNOWN_FEATURES: [&str; 2] = ["form", "char"];

/// Target names the target encoders understand.
pub const KNOWN_TARGETS: [&str; 8] =
    ["head", "deprel", "lemma", "upostag", "xpostag", "feats", "semrel", "sent"];

// ─── Vocab ────────────────────────────────────────────────────────────────────
/// An index over the distinct values of one column.
///
/// Built once during `fit`, then frozen: unseen values encode
/// to the `<unk>` id at transform time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocab {
    items: Vec<String>,
    index: HashMap<String, usize>,
}

impl Vocab {
    pub const PAD: usize = 0;
    pub const UNK: usize = 1;
    pub const ROOT: usize = 2;

    /// Build a vocabulary from an iterator of raw values.
    /// Ids 0..=2 are reserved; real values start at 3, in first-seen order.
    pub fn fit<'a>(values: impl Iterator<Item = &'a str>) -> Self {
        let mut vocab = Self {
            items: vec!["<pad>".to_string(), "<unk>".to_string(), "<root>".to_string()],
            index: HashMap::new(),
        };
        for (id, item) in vocab.items.iter().enumerate() {
            vocab.index.insert(item.clone(), id);
        }
        for value in values {
            if !vocab.index.contains_key(value) {
                vocab.index.insert(value.to_string(), vocab.items.len());
                vocab.items.push(value.to_string());
            }
        }
        vocab
    }

    /// Encode one value; unseen values map to `<unk>`.
    pub fn encode(&self, value: &str) -> usize {
        self.index.get(value).copied().unwrap_or(Self::UNK)
    }

    /// Decode one id; out-of-range ids decode to `<unk>`.
    pub fn decode(&self, id: usize) -> &str {
        self.items.get(id).map(String::as_str).unwrap_or("<unk>")
    }

    /// Number of classes, including the reserved ids.
    pub fn size(&self) -> usize {
        self.items.len()
    }
}

// ─── FeatureEncoders ──────────────────────────────────────────────────────────
/// Turns trees into the raw feature columns the model consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureEncoders {
    names: Vec<String>,
    forms: Vocab,
    chars: Vocab,
}

impl FeatureEncoders {
    /// Create unfitted encoders. Unknown feature names are a
    /// configuration error and are rejected here, before any batching.
    pub fn new(names: &[String]) -> Result<Self> {
        for name in names {
            ensure!(
                KNOWN_FEATURES.contains(&name.as_str()),
                "unknown feature '{}' (known features: {})",
                name,
                KNOWN_FEATURES.join(", "),
            );
        }
        Ok(Self {
            names: names.to_vec(),
            forms: Vocab::fit(std::iter::empty()),
            chars: Vocab::fit(std::iter::empty()),
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Fit the word and character vocabularies on the full tree set.
    pub fn fit(&mut self, trees: &[&Tree]) -> Result<()> {
        let forms: Vec<&str> = trees
            .iter()
            .flat_map(|t| t.tokens.iter().map(|tok| tok.form.as_str()))
            .collect();
        self.forms = Vocab::fit(forms.iter().copied());

        let chars: Vec<String> = forms
            .iter()
            .flat_map(|f| f.chars())
            .map(|c| c.to_string())
            .collect();
        self.chars = Vocab::fit(chars.iter().map(String::as_str));

        tracing::debug!(
            "Fitted feature encoders: {} word forms, {} characters",
            self.forms.size(),
            self.chars.size(),
        );
        Ok(())
    }

    /// Produce raw columns: `result[column][tree]` is one cell.
    pub fn transform(&self, trees: &[&Tree]) -> Result<Vec<Vec<ArrayD<f32>>>> {
        let mut columns = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let cells = match name.as_str() {
                "form" => trees.iter().map(|t| self.form_cell(t)).collect(),
                "char" => trees.iter().map(|t| self.char_cell(t)).collect(),
                other  => bail!("unknown feature '{}'", other),
            };
            columns.push(cells);
        }
        Ok(columns)
    }

    fn form_cell(&self, tree: &Tree) -> ArrayD<f32> {
        let mut ids = Vec::with_capacity(tree.token_count() + 1);
        ids.push(Vocab::ROOT as f32);
        ids.extend(tree.tokens.iter().map(|t| self.forms.encode(&t.form) as f32));
        Array1::from(ids).into_dyn()
    }

    fn char_cell(&self, tree: &Tree) -> ArrayD<f32> {
        let width = tree
            .tokens
            .iter()
            .map(|t| t.form.chars().count())
            .max()
            .unwrap_or(0)
            .max(1);
        let mut cell = Array2::<f32>::zeros((tree.token_count() + 1, width));
        for (row, token) in tree.tokens.iter().enumerate() {
            for (col, ch) in token.form.chars().enumerate() {
                cell[[row + 1, col]] = self.chars.encode(&ch.to_string()) as f32;
            }
        }
        cell.into_dyn()
    }
}

// ─── TargetEncoders ───────────────────────────────────────────────────────────
/// How one named target is encoded and decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum TargetEncoder {
    /// Head indices pass through numerically — their class space is
    /// batch-local and the one-hot step happens during batching.
    Head,
    /// A single label per token, one-hot over a fitted vocabulary.
    Category(Vocab),
    /// `|`-separated feature items per token, encoded multi-hot.
    Feats(Vocab),
    /// The sentence embedding, taken from the tree as-is.
    Sentence,
}

/// One decoded prediction for one tree and one target.
#[derive(Debug, Clone, PartialEq)]
pub enum TreePrediction {
    /// A value per token, written into the token's field
    TokenFields(Vec<String>),
    /// A sentence-level vector, attached as the tree embedding
    SentenceEmbedding(Vec<f32>),
}

/// Turns trees into raw target columns and model outputs back
/// into per-token / per-tree values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetEncoders {
    names: Vec<String>,
    encoders: HashMap<String, TargetEncoder>,
}

impl TargetEncoders {
    /// Create unfitted encoders, rejecting unknown target names up front.
    pub fn new(names: &[String]) -> Result<Self> {
        let mut encoders = HashMap::new();
        for name in names {
            let encoder = match name.as_str() {
                "head" => TargetEncoder::Head,
                "sent" => TargetEncoder::Sentence,
                "feats" => TargetEncoder::Feats(Vocab::fit(std::iter::empty())),
                "deprel" | "lemma" | "upostag" | "xpostag" | "semrel" => {
                    TargetEncoder::Category(Vocab::fit(std::iter::empty()))
                }
                other => bail!(
                    "unknown target '{}' (known targets: {})",
                    other,
                    KNOWN_TARGETS.join(", "),
                ),
            };
            encoders.insert(name.clone(), encoder);
        }
        Ok(Self { names: names.to_vec(), encoders })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Vocabulary size for a categorical target.
    /// `head` has no fixed vocabulary — its class space is the padded
    /// length of whichever batch it lands in.
    pub fn vocab_size(&self, name: &str) -> Result<usize> {
        match self.encoder(name)? {
            TargetEncoder::Category(v) | TargetEncoder::Feats(v) => Ok(v.size()),
            TargetEncoder::Head => bail!("'head' has a batch-local class space, not a vocabulary"),
            TargetEncoder::Sentence => bail!("'sent' is a continuous target without a vocabulary"),
        }
    }

    fn encoder(&self, name: &str) -> Result<&TargetEncoder> {
        self.encoders
            .get(name)
            .with_context(|| format!("target '{}' is not configured", name))
    }

    /// Fit every categorical vocabulary on the full tree set.
    pub fn fit(&mut self, trees: &[&Tree]) -> Result<()> {
        for name in &self.names {
            let encoder = self
                .encoders
                .get_mut(name)
                .with_context(|| format!("target '{}' is not configured", name))?;
            match encoder {
                TargetEncoder::Head | TargetEncoder::Sentence => {}
                TargetEncoder::Category(vocab) => {
                    let values: Vec<&str> = trees
                        .iter()
                        .flat_map(|t| t.tokens.iter())
                        .filter_map(|tok| tok.field(name))
                        .collect();
                    *vocab = Vocab::fit(values.into_iter());
                }
                TargetEncoder::Feats(vocab) => {
                    let items: Vec<&str> = trees
                        .iter()
                        .flat_map(|t| t.tokens.iter())
                        .flat_map(|tok| feats_items(&tok.feats))
                        .collect();
                    *vocab = Vocab::fit(items.into_iter());
                }
            }
        }
        tracing::debug!("Fitted target encoders for [{}]", self.names.join(", "));
        Ok(())
    }

    /// Produce raw columns in configured target order:
    /// `result[column][tree]` is one cell.
    pub fn transform(&self, trees: &[&Tree]) -> Result<Vec<Vec<ArrayD<f32>>>> {
        let mut columns = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let encoder = self.encoder(name)?;
            let mut cells = Vec::with_capacity(trees.len());
            for tree in trees {
                cells.push(self.cell(name, encoder, tree)?);
            }
            columns.push(cells);
        }
        Ok(columns)
    }

    fn cell(&self, name: &str, encoder: &TargetEncoder, tree: &Tree) -> Result<ArrayD<f32>> {
        match encoder {
            TargetEncoder::Head => {
                let mut values = vec![0.0f32];
                for token in &tree.tokens {
                    // Unannotated heads ("_") train against the root class;
                    // their loss is masked by the weighting policy anyway.
                    values.push(token.head.parse::<f32>().unwrap_or(0.0));
                }
                Ok(Array1::from(values).into_dyn())
            }
            TargetEncoder::Category(vocab) => {
                let mut values = vec![0.0f32];
                for token in &tree.tokens {
                    let raw = token.field(name).unwrap_or("_");
                    values.push(vocab.encode(raw) as f32);
                }
                Ok(Array1::from(values).into_dyn())
            }
            TargetEncoder::Feats(vocab) => {
                let mut cell = Array2::<f32>::zeros((tree.token_count() + 1, vocab.size()));
                for (row, token) in tree.tokens.iter().enumerate() {
                    for item in feats_items(&token.feats) {
                        cell[[row + 1, vocab.encode(item)]] = 1.0;
                    }
                }
                Ok(cell.into_dyn())
            }
            TargetEncoder::Sentence => {
                let emb = tree.emb.as_ref().with_context(|| {
                    format!("tree {} has no sentence embedding but 'sent' is a target", tree.id)
                })?;
                Ok(Array1::from(emb.clone()).into_dyn())
            }
        }
    }

    /// Decode raw per-batch predictions back into per-tree, per-target
    /// values: `result[column][row]`.
    ///
    /// `probs` holds one array per configured target, each with the
    /// batch rows as its first axis; `trees` is the matching tree slice.
    pub fn inverse_transform(
        &self,
        probs: &[ArrayD<f32>],
        trees: &[&Tree],
    ) -> Result<Vec<Vec<TreePrediction>>> {
        ensure!(
            probs.len() == self.names.len(),
            "model produced {} output columns but {} targets are configured",
            probs.len(),
            self.names.len(),
        );

        let mut columns = Vec::with_capacity(self.names.len());
        for (name, col) in self.names.iter().zip(probs) {
            ensure!(
                col.shape()[0] == trees.len(),
                "output column '{}' has {} rows for {} trees",
                name,
                col.shape()[0],
                trees.len(),
            );
            let encoder = self.encoder(name)?;
            let mut rows = Vec::with_capacity(trees.len());
            for (row, tree) in trees.iter().enumerate() {
                rows.push(decode_row(name, encoder, col, row, tree)?);
            }
            columns.push(rows);
        }
        Ok(columns)
    }
}

/// Decode one tree's slice of one output column.
fn decode_row(
    name: &str,
    encoder: &TargetEncoder,
    col: &ArrayD<f32>,
    row: usize,
    tree: &Tree,
) -> Result<TreePrediction> {
    let slice = col.index_axis(Axis(0), row);

    if let TargetEncoder::Sentence = encoder {
        return Ok(TreePrediction::SentenceEmbedding(slice.iter().copied().collect()));
    }

    // Token-level targets: positions are rooted, so token t lives at t+1.
    ensure!(
        slice.shape()[0] > tree.token_count(),
        "output column '{}' covers {} positions for a {}-token tree",
        name,
        slice.shape()[0],
        tree.token_count(),
    );

    let mut values = Vec::with_capacity(tree.token_count());
    for position in 1..=tree.token_count() {
        let lane = slice.index_axis(Axis(0), position);
        let value = match encoder {
            TargetEncoder::Head => argmax(lane.iter().copied()).to_string(),
            TargetEncoder::Category(vocab) => {
                vocab.decode(argmax(lane.iter().copied())).to_string()
            }
            TargetEncoder::Feats(vocab) => {
                let mut items: Vec<&str> = Vec::new();
                for (id, &p) in lane.iter().enumerate() {
                    // Reserved ids never appear as feature items
                    if p > 0.5 && id > Vocab::ROOT {
                        items.push(vocab.decode(id));
                    }
                }
                if items.is_empty() { "_".to_string() } else { items.join("|") }
            }
            TargetEncoder::Sentence => unreachable!("handled above"),
        };
        values.push(value);
    }
    Ok(TreePrediction::TokenFields(values))
}

/// Index of the largest value; ties resolve to the earliest index.
fn argmax(values: impl Iterator<Item = f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (index, value) in values.enumerate() {
        if value > best_value {
            best = index;
            best_value = value;
        }
    }
    best
}

/// Split a feats annotation into its items, treating `_` as empty.
fn feats_items(feats: &str) -> impl Iterator<Item = &str> {
    feats.split('|').filter(|item| !item.is_empty() && *item != "_")
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tree::Token;
    use ndarray::IxDyn;

    fn tree_with(forms: &[&str], deprels: &[&str]) -> Tree {
        let tokens = forms
            .iter()
            .zip(deprels)
            .enumerate()
            .map(|(i, (form, deprel))| Token {
                id: (i + 1).to_string(),
                form: form.to_string(),
                deprel: deprel.to_string(),
                ..Token::default()
            })
            .collect();
        let words = forms.iter().map(|f| f.to_string()).collect();
        Tree::new(0, tokens, words, Vec::new())
    }

    #[test]
    fn test_unknown_target_name_fails_fast() {
        let err = TargetEncoders::new(&["deprel".to_string(), "colour".to_string()]);
        assert!(err.is_err());
    }

    #[test]
    fn test_unknown_feature_name_fails_fast() {
        assert!(FeatureEncoders::new(&["form".to_string(), "bigram".to_string()]).is_err());
    }

    #[test]
    fn test_form_cells_are_rooted() {
        let tree = tree_with(&["dogs", "bark"], &["nsubj", "root"]);
        let trees = [&tree];
        let mut enc = FeatureEncoders::new(&["form".to_string()]).unwrap();
        enc.fit(&trees).unwrap();

        let columns = enc.transform(&trees).unwrap();
        let cell = &columns[0][0];
        // 2 tokens + 1 root slot
        assert_eq!(cell.shape(), &[3]);
        assert_eq!(cell[IxDyn(&[0])], Vocab::ROOT as f32);
    }

    #[test]
    fn test_category_encode_decode_roundtrip() {
        let tree = tree_with(&["dogs", "bark"], &["nsubj", "root"]);
        let trees = [&tree];
        let mut enc = TargetEncoders::new(&["deprel".to_string()]).unwrap();
        enc.fit(&trees).unwrap();

        let columns = enc.transform(&trees).unwrap();
        let cell = &columns[0][0];
        assert_eq!(cell.shape(), &[3]);

        // Build a fake one-hot output over [rows=1, positions=3, classes]
        // from the encoded cell and check it decodes to the original labels.
        let classes = enc.vocab_size("deprel").unwrap();
        let mut probs = ArrayD::<f32>::zeros(IxDyn(&[1, 3, classes]));
        for position in 0..3 {
            probs[IxDyn(&[0, position, cell[IxDyn(&[position])] as usize])] = 1.0;
        }
        let decoded = enc.inverse_transform(&[probs], &trees).unwrap();
        assert_eq!(
            decoded[0][0],
            TreePrediction::TokenFields(vec!["nsubj".to_string(), "root".to_string()]),
        );
    }

    #[test]
    fn test_feats_multi_hot_and_decode() {
        let mut tree = tree_with(&["dogs"], &["root"]);
        tree.tokens[0].feats = "Number=Plur|Case=Nom".to_string();
        let trees = [&tree];
        let mut enc = TargetEncoders::new(&["feats".to_string()]).unwrap();
        enc.fit(&trees).unwrap();

        let columns = enc.transform(&trees).unwrap();
        let cell = &columns[0][0];
        let vocab_size = enc.vocab_size("feats").unwrap();
        assert_eq!(cell.shape(), &[2, vocab_size]);
        // Two items set on the token row, none on the root row
        assert_eq!(cell.index_axis(Axis(0), 1).sum(), 2.0);
        assert_eq!(cell.index_axis(Axis(0), 0).sum(), 0.0);

        let mut probs = ArrayD::<f32>::zeros(IxDyn(&[1, 2, vocab_size]));
        probs.assign(&cell.view().insert_axis(Axis(0)));
        let decoded = enc.inverse_transform(&[probs], &trees).unwrap();
        match &decoded[0][0] {
            TreePrediction::TokenFields(values) => {
                assert!(values[0].contains("Number=Plur"));
                assert!(values[0].contains("Case=Nom"));
            }
            other => panic!("unexpected prediction {:?}", other),
        }
    }

    #[test]
    fn test_sent_target_requires_embedding() {
        let tree = tree_with(&["dogs"], &["root"]);
        let trees = [&tree];
        let mut enc = TargetEncoders::new(&["sent".to_string()]).unwrap();
        enc.fit(&trees).unwrap();
        assert!(enc.transform(&trees).is_err());
    }

    #[test]
    fn test_unseen_value_encodes_to_unk() {
        let vocab = Vocab::fit(["nsubj"].into_iter());
        assert_eq!(vocab.encode("nsubj"), 3);
        assert_eq!(vocab.encode("obj"), Vocab::UNK);
        assert_eq!(vocab.decode(99), "<unk>");
    }
}
