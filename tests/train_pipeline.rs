//! End-to-end tests: corpus file -> document source -> trained model on disk.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::Result;
use pretty_assertions::assert_eq;
use rust_doc2vec::clean::{self, CleaningChain};
use rust_doc2vec::{CorpusError, Doc2Vec, Doc2VecConfig, DocumentSource, TrainingMode};
use tempfile::tempdir;

const ARTICLES: &str = "\
a1 The Rust compiler checks <b>ownership</b> at compile time.
a2 Borrowing rules prevent data races in Rust programs!
a3 Cargo builds, tests and documents Rust crates.
b1 The central bank raised interest rates again.
b2 Markets fell as interest rates climbed, said the bank.
b3 Bond yields follow the central bank's rate decisions.
";

fn write_corpus(dir: &Path, content: &str) -> Result<std::path::PathBuf> {
    let path = dir.join("articles.txt");
    fs::write(&path, content)?;
    Ok(path)
}

fn cleaning() -> CleaningChain {
    CleaningChain::new()
        .with(clean::strip_tags)
        .with(clean::lowercase)
        .with(clean::strip_punctuation)
}

#[test]
fn cleaned_documents_come_out_in_file_order() -> Result<()> {
    let dir = tempdir()?;
    let path = write_corpus(dir.path(), ARTICLES)?;
    let source = DocumentSource::new(&path, Some(cleaning()))?;

    let first = source.iter()?.next().unwrap()?;
    assert_eq!(first.tag, "DOC_a1");
    assert_eq!(
        first.tokens,
        vec!["the", "rust", "compiler", "checks", "ownership", "at", "compile", "time"]
    );
    let tags: Vec<String> = source.iter()?.map(|d| d.map(|d| d.tag)).collect::<Result<_, _>>()?;
    assert_eq!(tags, ["DOC_a1", "DOC_a2", "DOC_a3", "DOC_b1", "DOC_b2", "DOC_b3"]);
    Ok(())
}

#[test]
fn permutations_are_random_bijections() -> Result<()> {
    let dir = tempdir()?;
    let content: String = (0..40).map(|i| format!("{i} token{i}\n")).collect();
    let path = write_corpus(dir.path(), &content)?;
    let mut source = DocumentSource::new(&path, None)?;

    let mut orders = HashSet::new();
    orders.insert(source.order().to_vec());
    for _ in 0..20 {
        source.permute();
        let order = source.order().to_vec();
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..40).collect::<Vec<_>>());

        let pass: Vec<String> = source.iter()?.map(|d| d.map(|d| d.tag)).collect::<Result<_, _>>()?;
        let expected: Vec<String> = order.iter().map(|i| format!("DOC_{i}")).collect();
        assert_eq!(pass, expected);
        orders.insert(order);
    }
    // 21 orders of 40 elements: a repeat would mean the shuffle is broken.
    assert_eq!(orders.len(), 21);
    Ok(())
}

#[test]
fn invalid_corpora_fail_at_construction() -> Result<()> {
    let dir = tempdir()?;

    let path = write_corpus(dir.path(), "x1 first\nx2 second\nx1 third\n")?;
    let err = DocumentSource::new(&path, None).unwrap_err();
    assert!(matches!(err, CorpusError::Validation { first_line: 1, line: 3, .. }));

    let path = write_corpus(dir.path(), "x1 first\njusttext\n")?;
    let err = DocumentSource::new(&path, None).unwrap_err();
    assert!(matches!(err, CorpusError::MalformedRecord { line: 2, .. }));

    let path = dir.path().join("latin1.txt");
    fs::write(&path, b"x1 caf\xe9\n")?;
    let err = DocumentSource::new(&path, None).unwrap_err();
    assert!(matches!(err, CorpusError::Encoding { line: 1 }));
    Ok(())
}

#[test]
fn train_save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let path = write_corpus(dir.path(), ARTICLES)?;
    let mut source = DocumentSource::new(&path, Some(cleaning()))?.with_seed(4);

    let config = Doc2VecConfig {
        mode: TrainingMode::Dm,
        vector_size: 12,
        window: 4,
        sample: 0.0,
        epochs: 8,
        workers: 2,
        batch_size: 2,
        show_progress: false,
        ..Doc2VecConfig::default()
    };
    let mut model = Doc2Vec::new(config.clone());
    model.build_vocab(&source)?;
    let report = model.train(&mut source)?;
    assert_eq!(report.documents, 6 * 8);

    let output = dir.path().join("models").join(config.model_file_name("articles"));
    fs::create_dir_all(output.parent().unwrap())?;
    model.save(&output)?;
    assert!(output.ends_with("articles_dm_mc1_w4_s12_sample0_neg5.d2v.json"));

    let loaded = Doc2Vec::load(&output)?;
    assert_eq!(loaded.doc_tags(), model.doc_tags());
    assert_eq!(loaded.doc_vector("DOC_b2"), model.doc_vector("DOC_b2"));
    assert_eq!(loaded.most_similar("DOC_a1", 5).map(|v| v.len()), Some(5));

    let inferred = loaded.infer_vector(&["interest", "rates", "bank"], None)?;
    assert_eq!(inferred.len(), 12);
    Ok(())
}
