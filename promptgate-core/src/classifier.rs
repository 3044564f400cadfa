//! Collaborator interfaces for local (L2) model inference.
//!
//! The core does not run model inference itself; it tokenizes text and hands
//! the id/mask vectors to a [`SequenceClassifier`] implementation supplied by
//! the embedding application.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";
pub const UNK_TOKEN: &str = "[UNK]";

pub const DEFAULT_MAX_SEQUENCE_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("inference timed out after {0} ms")]
    Timeout(u64),
    #[error("model produced no scores")]
    EmptyOutput,
}

/// A tokenized sequence ready for classifier inference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedInput {
    pub ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub length: usize,
}

/// Probability distribution over named labels.
pub type LabelScores = HashMap<String, f64>;

/// External sequence classifier (e.g. a fine-tuned BERT served locally).
#[async_trait]
pub trait SequenceClassifier: Send + Sync {
    async fn classify(&self, input: &TokenizedInput) -> Result<LabelScores, ClassifierError>;
}

/// Whitespace/punctuation tokenizer with a vocabulary-backed mode and a
/// hash-fallback mode for when no vocabulary file is loaded.
///
/// Vocabulary mode maps unknown words to the `[UNK]` id; fallback mode folds
/// a SHA-256 of the word into a fixed id space so that identical words always
/// produce identical ids.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: Option<HashMap<String, u32>>,
    max_sequence_len: usize,
    cls_id: u32,
    sep_id: u32,
    unk_id: u32,
    /// Size of the hash-folded id space in fallback mode.
    hash_space: u32,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::hash_fallback(DEFAULT_MAX_SEQUENCE_LEN)
    }
}

impl Tokenizer {
    /// Vocabulary-backed tokenizer. The vocabulary must contain the special
    /// tokens `[CLS]`, `[SEP]` and `[UNK]`; missing entries fall back to
    /// conventional BERT ids.
    pub fn with_vocab(vocab: HashMap<String, u32>, max_sequence_len: usize) -> Self {
        let cls_id = vocab.get(CLS_TOKEN).copied().unwrap_or(101);
        let sep_id = vocab.get(SEP_TOKEN).copied().unwrap_or(102);
        let unk_id = vocab.get(UNK_TOKEN).copied().unwrap_or(100);
        Self {
            vocab: Some(vocab),
            max_sequence_len: max_sequence_len.max(3),
            cls_id,
            sep_id,
            unk_id,
            hash_space: 0,
        }
    }

    /// Hash-fallback tokenizer for vocabulary-less deployments.
    pub fn hash_fallback(max_sequence_len: usize) -> Self {
        Self {
            vocab: None,
            max_sequence_len: max_sequence_len.max(3),
            cls_id: 101,
            sep_id: 102,
            unk_id: 100,
            hash_space: 30_000,
        }
    }

    pub fn max_sequence_len(&self) -> usize {
        self.max_sequence_len
    }

    /// Tokenize to `[CLS] words... [SEP]`, truncated to the configured
    /// maximum sequence length, with an all-ones attention mask.
    pub fn encode(&self, text: &str) -> TokenizedInput {
        let budget = self.max_sequence_len - 2;
        let mut ids = Vec::with_capacity(self.max_sequence_len);
        ids.push(self.cls_id);

        for word in split_words(text).take(budget) {
            ids.push(self.word_id(&word));
        }
        ids.push(self.sep_id);

        let length = ids.len();
        TokenizedInput {
            attention_mask: vec![1; length],
            ids,
            length,
        }
    }

    fn word_id(&self, word: &str) -> u32 {
        match &self.vocab {
            Some(vocab) => vocab.get(word).copied().unwrap_or(self.unk_id),
            None => {
                let digest = Sha256::digest(word.as_bytes());
                let folded = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
                // Reserve the low ids for special tokens.
                1000 + folded % self.hash_space
            }
        }
    }
}

/// Lowercased alphanumeric word segmentation.
fn split_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}
