use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use log::info;

use rust_doc2vec::clean::CleaningChain;
use rust_doc2vec::logging::{Level, LevelFilter, LogConfig, Logger};
use rust_doc2vec::{Doc2Vec, Doc2VecConfig, DocumentSource, TrainingMode};

/// Macro to time the execution of a block of code
macro_rules! time_it {
    ($label:expr, $block:expr) => {{
        let start = Instant::now();
        let result = $block;
        info!("{} took {:.2?}", $label, start.elapsed());
        result
    }};
}

/// Train a Doc2Vec model over a corpus with one `<identifier> <text>` record per line.
#[derive(Debug, Parser)]
#[command(name = "rust-doc2vec", version)]
struct Cli {
    /// Corpus file
    #[arg(short, long, env = "DOC2VEC_CORPUS")]
    corpus: PathBuf,

    /// Directory the model file is written to
    #[arg(short, long, env = "DOC2VEC_OUTPUT_DIR", default_value = "models")]
    output_dir: PathBuf,

    /// JSON file with hyperparameters; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Training algorithm: dm or dbow
    #[arg(long)]
    mode: Option<TrainingMode>,

    /// Ignore words with a lower total frequency
    #[arg(long)]
    min_count: Option<u64>,

    /// Context window size
    #[arg(long)]
    window: Option<usize>,

    /// Vector dimensionality
    #[arg(long)]
    size: Option<usize>,

    /// Down-sampling threshold for frequent words
    #[arg(long)]
    sample: Option<f64>,

    /// Noise words per prediction
    #[arg(long)]
    negative: Option<usize>,

    #[arg(long)]
    epochs: Option<usize>,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Comma-separated cleaning transforms, applied in order ("none" for raw text)
    #[arg(long, value_delimiter = ',', default_value = "lowercase")]
    clean: Vec<String>,

    #[arg(long, env = "DOC2VEC_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[arg(long, env = "DOC2VEC_LOG_LEVEL", default_value = "info")]
    log_level: LevelFilter,

    /// Hide the training progress bar
    #[arg(long)]
    no_progress: bool,
}

impl Cli {
    /// Defaults, then the config file, then explicit flags.
    fn hyperparameters(&self) -> Result<Doc2VecConfig> {
        let mut config = match &self.config {
            Some(path) => Doc2VecConfig::from_file(path)
                .with_context(|| format!("cannot read config {}", path.display()))?,
            None => Doc2VecConfig::default(),
        };
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(min_count) = self.min_count {
            config.min_count = min_count;
        }
        if let Some(window) = self.window {
            config.window = window;
        }
        if let Some(size) = self.size {
            config.vector_size = size;
        }
        if let Some(sample) = self.sample {
            config.sample = sample;
        }
        if let Some(negative) = self.negative {
            config.negative = negative;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.no_progress {
            config.show_progress = false;
        }
        config.validate()?;
        Ok(config)
    }

    fn cleaning(&self) -> Result<CleaningChain> {
        let names: Vec<&str> = self
            .clean
            .iter()
            .map(String::as_str)
            .filter(|name| !name.is_empty() && *name != "none")
            .collect();
        Ok(CleaningChain::from_names(&names)?)
    }

    fn corpus_stem(&self) -> &str {
        self.corpus
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("corpus")
    }
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();
    let cli = Cli::parse();

    let logger = Logger::init(LogConfig::new(cli.log_file.clone(), cli.log_level))
        .context("cannot initialise logging")?;
    if let Some(log_file) = &logger.config().log_file {
        info!("Logging to {}", log_file.display());
    }
    let config = cli.hyperparameters()?;
    let cleaning = cli.cleaning()?;

    let mut source = time_it!("Corpus validation", DocumentSource::new(&cli.corpus, Some(cleaning)))
        .with_context(|| format!("cannot load corpus {}", cli.corpus.display()))?
        .with_seed(config.seed);

    let output = cli.output_dir.join(config.model_file_name(cli.corpus_stem()));
    let mut model = Doc2Vec::new(config);

    info!("Building vocabulary");
    time_it!("Vocabulary", model.build_vocab(&source))?;

    let report = time_it!("Training", model.train(&mut source))?;
    info!(
        "Trained {} epochs over {} documents ({} effective words)",
        report.epochs, report.documents, report.effective_words
    );

    std::fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("cannot create {}", cli.output_dir.display()))?;
    model.save(&output)?;
    logger.log_event(
        Level::Info,
        "Model written",
        Some(&output.display().to_string()),
        None,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "rust-doc2vec",
            "--corpus",
            "data/articles",
            "--mode",
            "dbow",
            "--size",
            "50",
            "--window",
            "5",
            "--clean",
            "strip_tags,lowercase",
            "--no-progress",
        ])
        .unwrap();

        let config = cli.hyperparameters().unwrap();
        assert_eq!(config.mode, TrainingMode::Dbow);
        assert_eq!(config.vector_size, 50);
        assert_eq!(config.window, 5);
        assert_eq!(config.negative, 5);
        assert!(!config.show_progress);
        assert_eq!(cli.cleaning().unwrap().names(), vec!["strip_tags", "lowercase"]);
        assert_eq!(cli.corpus_stem(), "articles");
        assert_eq!(
            config.model_file_name(cli.corpus_stem()),
            "articles_dbow_mc1_w5_s50_sample0.0001_neg5.d2v.json"
        );
    }

    #[test]
    fn none_disables_cleaning() {
        let cli = Cli::try_parse_from(["rust-doc2vec", "-c", "x.txt", "--clean", "none"]).unwrap();
        assert!(cli.cleaning().unwrap().is_empty());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(Cli::try_parse_from(["rust-doc2vec", "-c", "x", "--mode", "cbow"]).is_err());
        let cli = Cli::try_parse_from(["rust-doc2vec", "-c", "x", "--epochs", "0"]).unwrap();
        assert!(cli.hyperparameters().is_err());
        let cli = Cli::try_parse_from(["rust-doc2vec", "-c", "x", "--clean", "stem"]).unwrap();
        assert!(cli.cleaning().is_err());
    }
}
