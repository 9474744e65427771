//! Vocabulary built from one pass over the corpus.
//!
//! Besides the word ↔ index mapping this keeps what training needs per word:
//! the probability of keeping an occurrence under frequent-word down-sampling
//! and a cumulative `count^0.75` table for drawing negative samples.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Exponent applied to word counts in the noise distribution.
const NOISE_EXPONENT: f64 = 0.75;

/// Counts words across documents before pruning.
#[derive(Debug, Default)]
pub struct VocabBuilder {
    counts: HashMap<String, u64>,
    documents: usize,
}

impl VocabBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the tokens of one document.
    pub fn add<S: AsRef<str>>(&mut self, tokens: &[S]) {
        for token in tokens {
            *self.counts.entry(token.as_ref().to_string()).or_insert(0) += 1;
        }
        self.documents += 1;
    }

    /// Documents seen so far.
    pub fn documents(&self) -> usize {
        self.documents
    }

    /// Prune rare words and compute sampling tables.
    ///
    /// # Arguments
    ///
    /// * `min_count` - Words seen fewer times are dropped.
    /// * `sample` - Down-sampling threshold; `0.0` keeps every occurrence.
    ///
    /// # Returns
    ///
    /// * `Vocabulary` - Words sorted by descending count, ties broken alphabetically.
    pub fn finish(self, min_count: u64, sample: f64) -> Vocabulary {
        let mut entries: Vec<(String, u64)> = self
            .counts
            .into_iter()
            .filter(|(_, count)| *count >= min_count)
            .collect();
        entries.sort_by(|(wa, ca), (wb, cb)| cb.cmp(ca).then_with(|| wa.cmp(wb)));

        let (words, counts): (Vec<String>, Vec<u64>) = entries.into_iter().unzip();
        Vocabulary::from_counts(words, counts, sample)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredVocabulary", into = "StoredVocabulary")]
/// Pruned vocabulary with sampling tables.
///
/// # Fields
///
/// * `words` - Index to word mapping.
/// * `counts` - Corpus frequency of each word.
/// * `index` - Word to index mapping.
/// * `keep` - Probability of keeping an occurrence of each word.
/// * `noise` - Cumulative noise weights for negative sampling.
pub struct Vocabulary {
    words: Vec<String>,
    counts: Vec<u64>,
    index: HashMap<String, usize>,
    sample: f64,
    keep: Vec<f32>,
    noise: Vec<f64>,
}

/// On-disk form: only what cannot be recomputed.
#[derive(Serialize, Deserialize)]
pub(crate) struct StoredVocabulary {
    words: Vec<String>,
    counts: Vec<u64>,
    sample: f64,
}

impl TryFrom<StoredVocabulary> for Vocabulary {
    type Error = ModelError;

    fn try_from(stored: StoredVocabulary) -> Result<Self, Self::Error> {
        if stored.words.len() != stored.counts.len() {
            return Err(ModelError::invalid_config(format!(
                "vocabulary lists {} words but {} counts",
                stored.words.len(),
                stored.counts.len()
            )));
        }
        if !(stored.sample >= 0.0) {
            return Err(ModelError::invalid_config("vocabulary sample must not be negative"));
        }
        Ok(Vocabulary::from_counts(stored.words, stored.counts, stored.sample))
    }
}

impl From<Vocabulary> for StoredVocabulary {
    fn from(vocab: Vocabulary) -> Self {
        StoredVocabulary {
            words: vocab.words,
            counts: vocab.counts,
            sample: vocab.sample,
        }
    }
}

impl Vocabulary {
    fn from_counts(words: Vec<String>, counts: Vec<u64>, sample: f64) -> Self {
        let index = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i))
            .collect();

        let total: u64 = counts.iter().sum();
        let threshold = sample * total as f64;
        let keep = counts
            .iter()
            .map(|&count| {
                if sample <= 0.0 || count == 0 {
                    return 1.0;
                }
                let ratio = count as f64 / threshold;
                (((ratio.sqrt() + 1.0) / ratio).min(1.0)) as f32
            })
            .collect();

        let mut running = 0.0;
        let noise = counts
            .iter()
            .map(|&count| {
                running += (count as f64).powf(NOISE_EXPONENT);
                running
            })
            .collect();

        Self {
            words,
            counts,
            index,
            sample,
            keep,
            noise,
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Index of `word`, if it survived pruning.
    pub fn get(&self, word: &str) -> Option<usize> {
        self.index.get(word).copied()
    }

    pub fn word(&self, index: usize) -> &str {
        &self.words[index]
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn count(&self, index: usize) -> u64 {
        self.counts[index]
    }

    /// Total occurrences of in-vocabulary words.
    pub fn total_words(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Probability that an occurrence of word `index` is kept.
    pub fn keep_probability(&self, index: usize) -> f32 {
        self.keep[index]
    }

    /// Map tokens to indices, dropping unknown words and down-sampled occurrences.
    pub fn encode<S: AsRef<str>>(&self, tokens: &[S], rng: &mut fastrand::Rng) -> Vec<usize> {
        tokens
            .iter()
            .filter_map(|token| self.get(token.as_ref()))
            .filter(|&index| {
                let keep = self.keep[index];
                keep >= 1.0 || rng.f32() < keep
            })
            .collect()
    }

    /// Draw a word index from the `count^0.75` distribution.
    pub fn sample_noise(&self, rng: &mut fastrand::Rng) -> usize {
        let total = self.noise.last().copied().unwrap_or(0.0);
        let target = rng.f64() * total;
        self.noise
            .partition_point(|&cumulative| cumulative <= target)
            .min(self.words.len().saturating_sub(1))
    }
}
