//! Paragraph vector (Doc2Vec) model.
//!
//! Based on "Distributed Representations of Sentences and Documents" by
//! Quoc Le and Tomas Mikolov.
//!
//! https://arxiv.org/abs/1405.4053
//!
//! # Training modes
//!
//! * **PV-DM** - the mean of the document vector and the vectors of the words
//!   around a position predicts the word at that position. The error is not
//!   divided by the number of inputs: each of them receives it in full.
//! * **PV-DBOW** - the document vector alone predicts every word of the document.
//!
//! Both use negative sampling; there is no hierarchical softmax.
//!
//! # Training loop
//!
//! The model never holds the corpus. [`Doc2Vec::build_vocab`] consumes one pass
//! of a [`DocumentSource`]; [`Doc2Vec::train`] permutes the source and consumes
//! one pass per epoch. Documents are pulled in batches. Every document of a
//! batch is processed in parallel with Rayon against the weights as they were
//! when the batch started, collecting its changes locally; the changes are then
//! applied in document order. No locks guard the weights, and the result only
//! depends on the seed, not on the number of workers.
//!
//! # Persistence
//!
//! [`Doc2Vec::save`] and [`Doc2Vec::load`] write and read the model as JSON
//! using serde_json.
//!
//! # Examples
//!
//! ```no_run
//! use rust_doc2vec::corpus::DocumentSource;
//! use rust_doc2vec::doc2vec::{Doc2Vec, Doc2VecConfig};
//!
//! let mut source = DocumentSource::new("data/articles", None)?;
//! let mut model = Doc2Vec::new(Doc2VecConfig::default());
//! model.build_vocab(&source)?;
//! model.train(&mut source)?;
//! model.save("models/articles.d2v.json")?;
//! # Ok::<(), rust_doc2vec::error::ModelError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::corpus::{DocumentSource, TaggedDocument};
use crate::error::ModelError;
use crate::vocab::{StoredVocabulary, VocabBuilder, Vocabulary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Paragraph vector algorithm.
///
/// # Variants
///
/// * `Dm` - Distributed memory.
/// * `Dbow` - Distributed bag of words.
pub enum TrainingMode {
    Dm,
    Dbow,
}

impl FromStr for TrainingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dm" | "1" => Ok(TrainingMode::Dm),
            "dbow" | "0" => Ok(TrainingMode::Dbow),
            other => Err(format!("unknown training mode {other:?}, expected dm or dbow")),
        }
    }
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingMode::Dm => f.write_str("dm"),
            TrainingMode::Dbow => f.write_str("dbow"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Hyperparameters of a [`Doc2Vec`] model.
///
/// # Fields
///
/// * `mode` - PV-DM or PV-DBOW.
/// * `vector_size` - Dimensionality of word and document vectors.
/// * `window` - Maximum distance between the predicted word and a context word (PV-DM).
/// * `min_count` - Words with a lower corpus frequency are ignored.
/// * `sample` - Down-sampling threshold for frequent words; `0.0` disables it.
/// * `negative` - Noise words drawn per prediction.
/// * `alpha` - Initial learning rate.
/// * `min_alpha` - Learning rate reached at the end of training.
/// * `epochs` - Passes over the corpus.
/// * `workers` - Threads used per batch.
/// * `batch_size` - Documents pulled from the source per parallel step.
/// * `seed` - Seed for initialisation, sampling and context windows.
/// * `show_progress` - Draw a progress bar while training.
pub struct Doc2VecConfig {
    pub mode: TrainingMode,
    pub vector_size: usize,
    pub window: usize,
    pub min_count: u64,
    pub sample: f64,
    pub negative: usize,
    pub alpha: f32,
    pub min_alpha: f32,
    pub epochs: usize,
    pub workers: usize,
    pub batch_size: usize,
    pub seed: u64,
    pub show_progress: bool,
}

impl Default for Doc2VecConfig {
    fn default() -> Self {
        Self {
            mode: TrainingMode::Dm,
            vector_size: 30,
            window: 10,
            min_count: 1,
            sample: 1e-4,
            negative: 5,
            alpha: 0.025,
            min_alpha: 0.0001,
            epochs: 10,
            workers: num_cpus::get(),
            batch_size: 1000,
            seed: 1,
            show_progress: true,
        }
    }
}

impl Doc2VecConfig {
    /// Read a config from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ModelError::io(path, e))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the hyperparameters can be trained with.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.vector_size == 0 {
            return Err(ModelError::invalid_config("vector_size must be positive"));
        }
        if self.window == 0 {
            return Err(ModelError::invalid_config("window must be positive"));
        }
        if self.epochs == 0 {
            return Err(ModelError::invalid_config("epochs must be positive"));
        }
        if self.workers == 0 || self.batch_size == 0 {
            return Err(ModelError::invalid_config("workers and batch_size must be positive"));
        }
        if !(self.sample >= 0.0) {
            return Err(ModelError::invalid_config("sample must not be negative"));
        }
        if !(self.min_alpha > 0.0 && self.min_alpha <= self.alpha) {
            return Err(ModelError::invalid_config("expected 0 < min_alpha <= alpha"));
        }
        Ok(())
    }

    /// File name for a model trained on the corpus `stem` with these hyperparameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use rust_doc2vec::doc2vec::Doc2VecConfig;
    ///
    /// let name = Doc2VecConfig::default().model_file_name("articles");
    /// assert_eq!(name, "articles_dm_mc1_w10_s30_sample0.0001_neg5.d2v.json");
    /// ```
    pub fn model_file_name(&self, stem: &str) -> String {
        format!(
            "{stem}_{}_mc{}_w{}_s{}_sample{}_neg{}.d2v.json",
            self.mode, self.min_count, self.window, self.vector_size, self.sample, self.negative
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Summary of a [`Doc2Vec::train`] call.
pub struct TrainingReport {
    pub epochs: usize,
    pub documents: usize,
    pub effective_words: u64,
}

/// Trainable weights.
#[derive(Debug, Clone)]
struct Weights {
    words: Array2<f32>,   // Input word vectors, one row per vocabulary word
    docs: Array2<f32>,    // Document vectors, one row per tag in corpus order
    output: Array2<f32>,  // Negative-sampling output weights
}

impl Weights {
    fn empty() -> Self {
        Self {
            words: Array2::zeros((0, 0)),
            docs: Array2::zeros((0, 0)),
            output: Array2::zeros((0, 0)),
        }
    }
}

/// Changes produced by training on one document.
struct DocUpdate {
    doc: usize,
    doc_vector: Array1<f32>,
    word_deltas: HashMap<usize, Array1<f32>>,
    output_deltas: HashMap<usize, Array1<f32>>,
    words: usize,
}

/// Read-only view of a model while a batch is computed.
///
/// A `frozen` step only moves the document vector; word and output weights
/// neither change nor collect deltas.
struct Step<'a> {
    config: &'a Doc2VecConfig,
    vocab: &'a Vocabulary,
    weights: &'a Weights,
    frozen: bool,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn cosine(a: &ArrayView1<f32>, b: &ArrayView1<f32>) -> f32 {
    let norm = a.dot(a).sqrt() * b.dot(b).sqrt();
    if norm == 0.0 {
        0.0
    } else {
        a.dot(b) / norm
    }
}

impl Step<'_> {
    /// One negative-sampling prediction of `target` from `hidden`.
    ///
    /// Returns the error to propagate back into `hidden`. Unless the step is
    /// frozen, output weight changes are accumulated in `output_deltas`, which
    /// also shadow the shared weights for later predictions of the same document.
    fn predict(
        &self,
        hidden: &Array1<f32>,
        target: usize,
        alpha: f32,
        rng: &mut fastrand::Rng,
        output_deltas: &mut HashMap<usize, Array1<f32>>,
    ) -> Array1<f32> {
        let dim = hidden.len();
        let mut neu1e = Array1::<f32>::zeros(dim);
        for d in 0..=self.config.negative {
            let (word, label) = if d == 0 {
                (target, 1.0)
            } else {
                let word = self.vocab.sample_noise(rng);
                if word == target {
                    continue;
                }
                (word, 0.0)
            };

            let mut out = self.weights.output.row(word).to_owned();
            if let Some(delta) = output_deltas.get(&word) {
                out += delta;
            }
            let g = (label - sigmoid(hidden.dot(&out))) * alpha;
            neu1e.scaled_add(g, &out);
            if !self.frozen {
                output_deltas
                    .entry(word)
                    .or_insert_with(|| Array1::zeros(dim))
                    .scaled_add(g, hidden);
            }
        }
        neu1e
    }

    /// Train one document, starting from `doc_vector`.
    fn document(
        &self,
        doc: usize,
        mut doc_vector: Array1<f32>,
        words: &[usize],
        alpha: f32,
        rng: &mut fastrand::Rng,
    ) -> DocUpdate {
        let mut word_deltas: HashMap<usize, Array1<f32>> = HashMap::new();
        let mut output_deltas = HashMap::new();

        match self.config.mode {
            TrainingMode::Dbow => {
                for &word in words {
                    let neu1e = self.predict(&doc_vector, word, alpha, rng, &mut output_deltas);
                    doc_vector += &neu1e;
                }
            }
            TrainingMode::Dm => {
                for (pos, &word) in words.iter().enumerate() {
                    let span = self.config.window - rng.usize(0..self.config.window);
                    let start = pos.saturating_sub(span);
                    let end = (pos + span + 1).min(words.len());
                    let context: Vec<usize> =
                        (start..end).filter(|&i| i != pos).map(|i| words[i]).collect();

                    let mut hidden = doc_vector.clone();
                    for &c in &context {
                        hidden += &self.weights.words.row(c);
                        if let Some(delta) = word_deltas.get(&c) {
                            hidden += delta;
                        }
                    }
                    hidden /= (context.len() + 1) as f32;

                    let neu1e = self.predict(&hidden, word, alpha, rng, &mut output_deltas);
                    doc_vector += &neu1e;
                    if self.frozen {
                        continue;
                    }
                    for &c in &context {
                        word_deltas
                            .entry(c)
                            .or_insert_with(|| Array1::zeros(neu1e.len()))
                            .scaled_add(1.0, &neu1e);
                    }
                }
            }
        }

        DocUpdate {
            doc,
            doc_vector,
            word_deltas,
            output_deltas,
            words: words.len(),
        }
    }
}

/// A paragraph vector model.
pub struct Doc2Vec {
    config: Doc2VecConfig,
    vocab: Option<Vocabulary>,
    doc_tags: Vec<String>,
    doc_index: HashMap<String, usize>,
    weights: Weights,
}

#[derive(Serialize)]
/// Borrowed form written by [`Doc2Vec::save`].
struct SerializableDoc2Vec<'a> {
    config: &'a Doc2VecConfig,
    vocab: &'a Vocabulary,
    doc_tags: &'a [String],
    word_vectors: &'a Array2<f32>,
    doc_vectors: &'a Array2<f32>,
    output_weights: &'a Array2<f32>,
}

#[derive(Deserialize)]
/// Owned form read by [`Doc2Vec::load`].
struct Doc2VecFromFile {
    config: Doc2VecConfig,
    vocab: StoredVocabulary,
    doc_tags: Vec<String>,
    word_vectors: Array2<f32>,
    doc_vectors: Array2<f32>,
    output_weights: Array2<f32>,
}

impl Doc2Vec {
    /// Create an untrained model.
    pub fn new(config: Doc2VecConfig) -> Self {
        Self {
            config,
            vocab: None,
            doc_tags: Vec::new(),
            doc_index: HashMap::new(),
            weights: Weights::empty(),
        }
    }

    pub fn config(&self) -> &Doc2VecConfig {
        &self.config
    }

    pub fn vocab(&self) -> Option<&Vocabulary> {
        self.vocab.as_ref()
    }

    /// Tags with a document vector, in corpus order.
    pub fn doc_tags(&self) -> &[String] {
        &self.doc_tags
    }

    /// Build the vocabulary from one full pass and initialise all vectors.
    ///
    /// # Arguments
    ///
    /// * `source` - The corpus; its current order is used for the pass.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Vectors are ready for [`train`](Self::train).
    /// * `Err(ModelError::EmptyVocabulary)` - No word reaches `min_count`.
    pub fn build_vocab(&mut self, source: &DocumentSource) -> Result<(), ModelError> {
        self.config.validate()?;

        let mut builder = VocabBuilder::new();
        for document in source.iter()? {
            builder.add(&document?.tokens);
        }
        let vocab = builder.finish(self.config.min_count, self.config.sample);
        if vocab.is_empty() {
            return Err(ModelError::EmptyVocabulary {
                min_count: self.config.min_count,
            });
        }

        let size = self.config.vector_size;
        let mut rng = fastrand::Rng::with_seed(self.config.seed);
        let mut init = |_: (usize, usize)| (rng.f32() - 0.5) / size as f32;
        self.weights = Weights {
            words: Array2::from_shape_fn((vocab.len(), size), &mut init),
            docs: Array2::from_shape_fn((source.len(), size), &mut init),
            output: Array2::zeros((vocab.len(), size)),
        };

        self.doc_tags = source.tags().to_vec();
        self.doc_index = self
            .doc_tags
            .iter()
            .enumerate()
            .map(|(i, tag)| (tag.clone(), i))
            .collect();

        info!(
            "Built vocabulary: {} words ({} occurrences) over {} documents",
            vocab.len(),
            vocab.total_words(),
            self.doc_tags.len()
        );
        self.vocab = Some(vocab);
        Ok(())
    }

    /// Train for `config.epochs` passes, permuting the source before each.
    ///
    /// # Arguments
    ///
    /// * `source` - The corpus the vocabulary was built from.
    ///
    /// # Returns
    ///
    /// * `Ok(TrainingReport)` - Training finished.
    /// * `Err(ModelError::VocabularyNotBuilt)` - [`build_vocab`](Self::build_vocab) was not called.
    /// * `Err(ModelError::UnknownTag)` - The source yields a tag the model has no vector for.
    pub fn train(&mut self, source: &mut DocumentSource) -> Result<TrainingReport, ModelError> {
        self.config.validate()?;
        let vocab = self.vocab.as_ref().ok_or(ModelError::VocabularyNotBuilt)?;
        let config = &self.config;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build()
            .map_err(|e| {
                ModelError::invalid_config(format!("cannot start {} workers: {e}", config.workers))
            })?;

        let total = (config.epochs * source.len()).max(1);
        let pb = progress_bar(config.show_progress, total as u64);
        let mut processed = 0usize;
        let mut effective_words = 0u64;

        for epoch in 0..config.epochs {
            source.permute();
            let mut pass = source.iter()?;
            loop {
                let batch: Vec<TaggedDocument> = pass
                    .by_ref()
                    .take(config.batch_size)
                    .collect::<Result<_, _>>()?;
                if batch.is_empty() {
                    break;
                }
                let rows = batch
                    .iter()
                    .map(|document| {
                        self.doc_index
                            .get(&document.tag)
                            .copied()
                            .ok_or_else(|| ModelError::UnknownTag {
                                tag: document.tag.clone(),
                            })
                    })
                    .collect::<Result<Vec<usize>, _>>()?;

                let progress = processed as f32 / total as f32;
                let alpha = config.alpha - (config.alpha - config.min_alpha) * progress;

                let step = Step {
                    config,
                    vocab,
                    weights: &self.weights,
                    frozen: false,
                };
                let updates: Vec<DocUpdate> = pool.install(|| {
                    batch
                        .par_iter()
                        .zip(rows.par_iter())
                        .enumerate()
                        .map(|(k, (document, &row))| {
                            let seed = document_seed(config.seed, processed + k);
                            let mut rng = fastrand::Rng::with_seed(seed);
                            let words = vocab.encode(&document.tokens, &mut rng);
                            let start = step.weights.docs.row(row).to_owned();
                            step.document(row, start, &words, alpha, &mut rng)
                        })
                        .collect()
                });

                for update in updates {
                    effective_words += update.words as u64;
                    apply(&mut self.weights, update);
                }
                processed += batch.len();
                pb.inc(batch.len() as u64);
            }
            pb.set_message(format!("Epoch {}/{}", epoch + 1, config.epochs));
            info!("Finished epoch {}/{}", epoch + 1, config.epochs);
        }
        pb.finish_with_message("Training complete");

        Ok(TrainingReport {
            epochs: config.epochs,
            documents: processed,
            effective_words,
        })
    }

    /// Vector of a training document.
    pub fn doc_vector(&self, tag: &str) -> Option<ArrayView1<'_, f32>> {
        let &row = self.doc_index.get(tag)?;
        Some(self.weights.docs.row(row))
    }

    /// Input vector of a vocabulary word.
    pub fn word_vector(&self, word: &str) -> Option<ArrayView1<'_, f32>> {
        let row = self.vocab.as_ref()?.get(word)?;
        Some(self.weights.words.row(row))
    }

    /// The `topn` training documents closest to `tag` by cosine similarity.
    ///
    /// # Returns
    ///
    /// * `Some(Vec<(String, f32)>)` - Tags and similarities, most similar first, `tag` excluded.
    /// * `None` - `tag` is unknown.
    pub fn most_similar(&self, tag: &str, topn: usize) -> Option<Vec<(String, f32)>> {
        let vector = self.doc_vector(tag)?;
        let mut ranked = self.similar_by_vector(&vector, topn + 1);
        ranked.retain(|(other, _)| other != tag);
        ranked.truncate(topn);
        Some(ranked)
    }

    /// The `topn` training documents closest to an arbitrary vector.
    pub fn similar_by_vector(&self, vector: &ArrayView1<f32>, topn: usize) -> Vec<(String, f32)> {
        let mut ranked: Vec<(String, f32)> = self
            .doc_tags
            .iter()
            .enumerate()
            .map(|(row, tag)| (tag.clone(), cosine(vector, &self.weights.docs.row(row))))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(topn);
        ranked
    }

    /// Train a vector for an unseen document against the frozen model.
    ///
    /// # Arguments
    ///
    /// * `tokens` - The document's tokens, cleaned like the training corpus.
    /// * `epochs` - Passes over the tokens; `None` uses `config.epochs`.
    pub fn infer_vector<S: AsRef<str>>(
        &self,
        tokens: &[S],
        epochs: Option<usize>,
    ) -> Result<Array1<f32>, ModelError> {
        let vocab = self.vocab.as_ref().ok_or(ModelError::VocabularyNotBuilt)?;
        let epochs = epochs.unwrap_or(self.config.epochs).max(1);
        let size = self.config.vector_size;

        let mut rng = fastrand::Rng::with_seed(self.config.seed ^ tokens.len() as u64);
        let mut vector = Array1::from_shape_fn(size, |_| (rng.f32() - 0.5) / size as f32);
        let step = Step {
            config: &self.config,
            vocab,
            weights: &self.weights,
            frozen: true,
        };
        for epoch in 0..epochs {
            let progress = epoch as f32 / epochs as f32;
            let alpha = self.config.alpha - (self.config.alpha - self.config.min_alpha) * progress;
            let words = vocab.encode(tokens, &mut rng);
            vector = step.document(0, vector, &words, alpha, &mut rng).doc_vector;
        }
        Ok(vector)
    }

    /// Write the model as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let path = path.as_ref();
        let vocab = self.vocab.as_ref().ok_or(ModelError::VocabularyNotBuilt)?;
        let file = File::create(path).map_err(|e| ModelError::io(path, e))?;
        let mut writer = BufWriter::new(file);

        let model = SerializableDoc2Vec {
            config: &self.config,
            vocab,
            doc_tags: &self.doc_tags,
            word_vectors: &self.weights.words,
            doc_vectors: &self.weights.docs,
            output_weights: &self.weights.output,
        };
        serde_json::to_writer(&mut writer, &model)?;
        writer.flush().map_err(|e| ModelError::io(path, e))?;
        info!("Saved model to {}", path.display());
        Ok(())
    }

    /// Read a model written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ModelError::io(path, e))?;
        let stored: Doc2VecFromFile = serde_json::from_reader(BufReader::new(file))?;
        stored.config.validate()?;
        let vocab = Vocabulary::try_from(stored.vocab)?;

        let size = stored.config.vector_size;
        let consistent = stored.word_vectors.dim() == (vocab.len(), size)
            && stored.output_weights.dim() == (vocab.len(), size)
            && stored.doc_vectors.dim() == (stored.doc_tags.len(), size);
        if !consistent {
            return Err(ModelError::invalid_config(format!(
                "model file {} has vector shapes that do not match its vocabulary",
                path.display()
            )));
        }

        let doc_index = stored
            .doc_tags
            .iter()
            .enumerate()
            .map(|(i, tag)| (tag.clone(), i))
            .collect();
        debug!("Loaded model from {}", path.display());
        Ok(Self {
            config: stored.config,
            vocab: Some(vocab),
            doc_tags: stored.doc_tags,
            doc_index,
            weights: Weights {
                words: stored.word_vectors,
                docs: stored.doc_vectors,
                output: stored.output_weights,
            },
        })
    }
}

/// Seed for the `index`-th document processed in a training run.
fn document_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(index as u64)
}

fn apply(weights: &mut Weights, update: DocUpdate) {
    weights.docs.row_mut(update.doc).assign(&update.doc_vector);
    for (word, delta) in &update.word_deltas {
        weights.words.row_mut(*word).scaled_add(1.0, delta);
    }
    for (word, delta) in &update.output_deltas {
        weights.output.row_mut(*word).scaled_add(1.0, delta);
    }
}

fn progress_bar(visible: bool, len: u64) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
    {
        pb.set_style(style);
    }
    pb
}
