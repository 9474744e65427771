//! Out-of-core line corpus.
//!
//! A corpus file holds one document per line, `<identifier> <free-text>`.
//! [`DocumentSource`] validates the file once (every identifier must map to a
//! distinct tag), remembers where each line starts, and then serves any number
//! of passes over the documents without keeping the text in memory. Each pass
//! re-reads the lines it needs by seeking to their recorded offsets.
//!
//! The visiting order of a pass is the source's index permutation. It starts
//! as file order and is redrawn at random by [`DocumentSource::permute`], which
//! a trainer calls between epochs.
//!
//! # Examples
//!
//! ```no_run
//! use rust_doc2vec::clean::{self, CleaningChain};
//! use rust_doc2vec::corpus::DocumentSource;
//!
//! let mut source = DocumentSource::new(
//!     "data/articles",
//!     Some(CleaningChain::new().with(clean::lowercase)),
//! )?;
//! for doc in source.iter()? {
//!     let doc = doc?;
//!     println!("{} has {} tokens", doc.tag, doc.tokens.len());
//! }
//! source.permute();
//! # Ok::<(), rust_doc2vec::error::CorpusError>(())
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::clean::CleaningChain;
use crate::error::CorpusError;

/// Prefix prepended to every identifier to form its tag.
pub const TAG_PREFIX: &str = "DOC_";

/// Derive the tag of a record from its raw identifier.
///
/// Used both by the validation scan and when documents are emitted, so the
/// uniqueness checked at construction is the uniqueness of the emitted tags.
pub fn gen_id(identifier: &str) -> String {
    format!("{TAG_PREFIX}{identifier}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A document ready for training.
///
/// # Fields
///
/// * `tag` - The unique label of the document (`DOC_<identifier>`).
/// * `tokens` - The cleaned, whitespace-split text.
pub struct TaggedDocument {
    pub tag: String,
    pub tokens: Vec<String>,
}

/// Split a record line into `(identifier, text)` on its first whitespace.
///
/// `line` is the 1-based line number, used for error reporting. A line with
/// no separator or with an empty identifier is malformed; an identifier
/// followed only by whitespace yields empty text.
fn split_record(line: usize, content: &str) -> Result<(&str, &str), CorpusError> {
    match content.split_once(char::is_whitespace) {
        Some((identifier, text)) if !identifier.is_empty() => Ok((identifier, text)),
        _ => Err(CorpusError::MalformedRecord {
            line,
            content: content.to_string(),
        }),
    }
}

/// Read one line into `buf`, returning its byte length including the newline.
fn read_raw_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    buf.clear();
    reader.read_until(b'\n', buf)
}

/// Decode a raw line and strip its `\n` / `\r\n` terminator.
fn decode_line(line: usize, buf: &[u8]) -> Result<&str, CorpusError> {
    let text = std::str::from_utf8(buf).map_err(|_| CorpusError::Encoding { line })?;
    let text = text.strip_suffix('\n').unwrap_or(text);
    Ok(text.strip_suffix('\r').unwrap_or(text))
}

/// A line corpus that can be traversed repeatedly in any order.
///
/// Holds the tag list, the byte offset of each record and the current index
/// permutation; never the document text itself.
///
/// Not designed for concurrent use: a single owner permutes and iterates.
pub struct DocumentSource {
    path: PathBuf,
    cleaning: CleaningChain,
    tags: Vec<String>,          // Tag of record i, in file order
    offsets: Vec<u64>,          // Byte offset where record i starts
    order: Arc<[usize]>,        // Visiting order of the next pass
    rng: fastrand::Rng,
}

impl DocumentSource {
    /// Validate a corpus file and prepare it for iteration.
    ///
    /// Performs one streaming pass over the file, extracting every identifier,
    /// applying [`gen_id`] and recording line offsets.
    ///
    /// # Arguments
    ///
    /// * `path` - The corpus file.
    /// * `cleaning` - Transforms applied to each record's text, in order. `None` means identity.
    ///
    /// # Returns
    ///
    /// * `Ok(DocumentSource)` - The source, iterating in file order.
    /// * `Err(CorpusError::Validation)` - Two records share a tag.
    /// * `Err(CorpusError::MalformedRecord)` - A line has no identifier/text separator.
    /// * `Err(CorpusError::Io)` - The file cannot be read.
    pub fn new(path: impl AsRef<Path>, cleaning: Option<CleaningChain>) -> Result<Self, CorpusError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| CorpusError::io(&path, e))?;
        let mut reader = BufReader::new(file);

        let mut tags = Vec::new();
        let mut offsets = Vec::new();
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut buf = Vec::new();
        let mut offset = 0u64;

        loop {
            let read = read_raw_line(&mut reader, &mut buf).map_err(|e| CorpusError::io(&path, e))?;
            if read == 0 {
                break;
            }
            let line = tags.len() + 1;
            let content = decode_line(line, &buf)?;
            let (identifier, _) = split_record(line, content)?;
            let tag = gen_id(identifier);

            if let Some(&first_line) = first_seen.get(&tag) {
                return Err(CorpusError::Validation {
                    tag,
                    first_line,
                    line,
                });
            }
            first_seen.insert(tag.clone(), line);
            tags.push(tag);
            offsets.push(offset);
            offset += read as u64;
        }

        let cleaning = cleaning.unwrap_or_default();
        info!(
            "Validated corpus {}: {} documents, cleaning {:?}",
            path.display(),
            tags.len(),
            cleaning.names()
        );

        let order: Arc<[usize]> = (0..tags.len()).collect();
        Ok(Self {
            path,
            cleaning,
            tags,
            offsets,
            order,
            rng: fastrand::Rng::new(),
        })
    }

    /// Reseed the generator used by [`permute`](Self::permute).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    /// Replace the index permutation with a fresh uniformly random one.
    ///
    /// Passes already in progress keep the order they started with.
    pub fn permute(&mut self) {
        let mut order: Vec<usize> = (0..self.tags.len()).collect();
        self.rng.shuffle(&mut order);
        self.order = order.into();
        debug!("Permuted {} documents of {}", self.tags.len(), self.path.display());
    }

    /// Start a pass over every document in the current order.
    ///
    /// # Returns
    ///
    /// * `Ok(Documents)` - A lazy iterator yielding exactly `len()` documents.
    /// * `Err(CorpusError::Io)` - The file can no longer be opened.
    pub fn iter(&self) -> Result<Documents<'_>, CorpusError> {
        let lines = LineReader::open(&self.path)?;
        Ok(Documents {
            source: self,
            lines: Some(lines),
            order: Arc::clone(&self.order),
            cursor: 0,
            pending: None,
            done: false,
        })
    }

    /// Materialise one full pass in the current order.
    pub fn to_vec(&self) -> Result<Vec<TaggedDocument>, CorpusError> {
        self.iter()?.collect()
    }

    /// Number of records in the corpus.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Tags in file order.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// The order the next pass will visit records in.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cleaning(&self) -> &CleaningChain {
        &self.cleaning
    }

    /// Turn a raw record line into a tagged document.
    fn document(&self, index: usize, content: &str) -> Result<TaggedDocument, CorpusError> {
        let line = index + 1;
        let (identifier, text) = split_record(line, content)?;
        let tag = gen_id(identifier);
        if tag != self.tags[index] {
            return Err(CorpusError::CorpusChanged {
                line,
                expected: self.tags[index].clone(),
                found: tag,
            });
        }
        let tokens = self
            .cleaning
            .apply(text)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        Ok(TaggedDocument { tag, tokens })
    }
}

impl std::fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSource")
            .field("path", &self.path)
            .field("documents", &self.tags.len())
            .field("cleaning", &self.cleaning)
            .finish()
    }
}

impl<'a> IntoIterator for &'a DocumentSource {
    type Item = Result<TaggedDocument, CorpusError>;
    type IntoIter = Documents<'a>;

    /// Start a pass; an open failure surfaces as the first item.
    fn into_iter(self) -> Documents<'a> {
        self.iter().unwrap_or_else(|err| Documents {
            source: self,
            lines: None,
            order: Arc::clone(&self.order),
            cursor: 0,
            pending: Some(err),
            done: false,
        })
    }
}

/// Reads single lines at known byte offsets.
struct LineReader {
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,       // Byte offset the reader currently sits at
    buf: Vec<u8>,
}

impl LineReader {
    fn open(path: &Path) -> Result<Self, CorpusError> {
        let file = File::open(path).map_err(|e| CorpusError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            position: 0,
            buf: Vec::new(),
        })
    }

    /// Read the line starting at `offset`, terminator included. Empty at EOF.
    fn read_at(&mut self, offset: u64) -> Result<&[u8], CorpusError> {
        if offset != self.position {
            self.reader
                .seek(SeekFrom::Start(offset))
                .map_err(|e| CorpusError::io(&self.path, e))?;
        }
        let read = read_raw_line(&mut self.reader, &mut self.buf)
            .map_err(|e| CorpusError::io(&self.path, e))?;
        self.position = offset + read as u64;
        Ok(&self.buf)
    }
}

/// One pass over a [`DocumentSource`].
///
/// Captures the permutation at creation. Each item is fetched from disk by
/// seeking to the record's offset; sequential records skip the seek. After an
/// error the iterator is exhausted.
pub struct Documents<'a> {
    source: &'a DocumentSource,
    lines: Option<LineReader>,
    order: Arc<[usize]>,
    cursor: usize,
    pending: Option<CorpusError>,
    done: bool,
}

impl Documents<'_> {
    /// Records left in this pass.
    pub fn remaining(&self) -> usize {
        if self.done || self.lines.is_none() {
            0
        } else {
            self.order.len() - self.cursor
        }
    }
}

impl Iterator for Documents<'_> {
    type Item = Result<TaggedDocument, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending.take() {
            self.done = true;
            return Some(Err(err));
        }
        if self.done || self.cursor >= self.order.len() {
            return None;
        }
        let lines = self.lines.as_mut()?;
        let index = self.order[self.cursor];
        self.cursor += 1;

        let source = self.source;
        let line = index + 1;
        let result = lines.read_at(source.offsets[index]).and_then(|raw| {
            if raw.is_empty() {
                return Err(CorpusError::CorpusChanged {
                    line,
                    expected: source.tags[index].clone(),
                    found: String::new(),
                });
            }
            source.document(index, decode_line(line, raw)?)
        });
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let pending = usize::from(self.pending.is_some());
        (pending, Some(self.remaining() + pending))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    use super::*;
    use crate::clean;

    fn corpus(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn numbered(n: usize) -> NamedTempFile {
        let content: String = (0..n).map(|i| format!("{i} word{i} shared text\n")).collect();
        corpus(&content)
    }

    fn doc(tag: &str, tokens: &[&str]) -> TaggedDocument {
        TaggedDocument {
            tag: tag.to_string(),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn pass_tags(source: &DocumentSource) -> Vec<String> {
        source
            .iter()
            .unwrap()
            .map(|d| d.unwrap().tag)
            .collect()
    }

    #[test]
    fn first_pass_is_file_order_with_cleaning() {
        let file = corpus("1 Hello World\n2 Foo Bar\n");
        let source =
            DocumentSource::new(file.path(), Some(CleaningChain::new().with(clean::lowercase)))
                .unwrap();

        assert_eq!(source.len(), 2);
        assert_eq!(
            source.to_vec().unwrap(),
            vec![doc("DOC_1", &["hello", "world"]), doc("DOC_2", &["foo", "bar"])]
        );
    }

    #[test]
    fn default_cleaning_is_identity() {
        let file = corpus("a  Mixed   CASE, text\n");
        let source = DocumentSource::new(file.path(), None).unwrap();
        assert_eq!(
            source.to_vec().unwrap(),
            vec![doc("DOC_a", &["Mixed", "CASE,", "text"])]
        );
    }

    #[test]
    fn duplicate_identifiers_fail_validation() {
        let file = corpus("1 A\n1 B\n");
        let err = DocumentSource::new(file.path(), None).unwrap_err();
        assert!(matches!(
            err,
            CorpusError::Validation { ref tag, first_line: 1, line: 2 } if tag == "DOC_1"
        ));
        assert!(err.to_string().contains("prefixes non-unique"));
    }

    #[test]
    fn duplicate_far_from_original_is_detected() {
        let mut content: String = (0..100).map(|i| format!("id{i} text\n")).collect();
        content.push_str("id3 again\n");
        let file = corpus(&content);
        let err = DocumentSource::new(file.path(), None).unwrap_err();
        assert!(matches!(err, CorpusError::Validation { first_line: 4, line: 101, .. }));
    }

    #[test]
    fn line_without_separator_is_malformed() {
        let file = corpus("justtext\n");
        let err = DocumentSource::new(file.path(), None).unwrap_err();
        assert!(matches!(
            err,
            CorpusError::MalformedRecord { line: 1, ref content } if content == "justtext"
        ));
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let file = corpus("1 fine\n\n3 also fine\n");
        let err = DocumentSource::new(file.path(), None).unwrap_err();
        assert!(matches!(err, CorpusError::MalformedRecord { line: 2, .. }));

        let file = corpus(" leading space\n");
        let err = DocumentSource::new(file.path(), None).unwrap_err();
        assert!(matches!(err, CorpusError::MalformedRecord { line: 1, .. }));
    }

    #[test]
    fn identifier_with_empty_text_has_no_tokens() {
        let file = corpus("1 \n2 two\n");
        let source = DocumentSource::new(file.path(), None).unwrap();
        assert_eq!(
            source.to_vec().unwrap(),
            vec![doc("DOC_1", &[]), doc("DOC_2", &["two"])]
        );
    }

    #[test]
    fn crlf_and_missing_final_newline() {
        let file = corpus("x one two\r\ny three");
        let source = DocumentSource::new(file.path(), None).unwrap();
        assert_eq!(
            source.to_vec().unwrap(),
            vec![doc("DOC_x", &["one", "two"]), doc("DOC_y", &["three"])]
        );
    }

    #[test]
    fn empty_corpus_yields_nothing() {
        let file = corpus("");
        let mut source = DocumentSource::new(file.path(), None).unwrap();
        assert!(source.is_empty());
        source.permute();
        assert_eq!(source.iter().unwrap().count(), 0);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DocumentSource::new(dir.path().join("absent"), None).unwrap_err();
        assert!(matches!(err, CorpusError::Io { .. }));
    }

    #[test]
    fn every_pass_yields_all_tags() {
        let file = numbered(25);
        let mut source = DocumentSource::new(file.path(), None).unwrap().with_seed(7);
        let mut expected = source.tags().to_vec();
        expected.sort();

        for _ in 0..3 {
            let mut tags = pass_tags(&source);
            assert_eq!(tags.len(), 25);
            tags.sort();
            assert_eq!(tags, expected);
            source.permute();
        }
    }

    #[test]
    fn passes_without_permute_repeat_order() {
        let file = numbered(20);
        let mut source = DocumentSource::new(file.path(), None).unwrap().with_seed(3);
        assert_eq!(pass_tags(&source), pass_tags(&source));

        source.permute();
        assert_eq!(pass_tags(&source), pass_tags(&source));
    }

    #[test]
    fn permutation_is_a_fresh_bijection() {
        let file = numbered(30);
        let mut source = DocumentSource::new(file.path(), None).unwrap().with_seed(42);
        assert_eq!(source.order(), (0..30).collect::<Vec<_>>().as_slice());

        let mut previous = source.order().to_vec();
        for _ in 0..5 {
            source.permute();
            let order = source.order().to_vec();
            let distinct: HashSet<usize> = order.iter().copied().collect();
            assert_eq!(order.len(), 30);
            assert_eq!(distinct.len(), 30);
            assert!(order.iter().all(|&i| i < 30));
            assert_ne!(order, previous);
            previous = order;
        }
    }

    #[test]
    fn pass_follows_permutation() {
        let file = numbered(12);
        let mut source = DocumentSource::new(file.path(), None).unwrap().with_seed(9);
        source.permute();
        let expected: Vec<String> = source
            .order()
            .iter()
            .map(|&i| format!("DOC_{i}"))
            .collect();
        let docs = source.to_vec().unwrap();
        assert_eq!(docs.iter().map(|d| d.tag.clone()).collect::<Vec<_>>(), expected);
        for d in &docs {
            let i = &d.tag[TAG_PREFIX.len()..];
            assert_eq!(d.tokens, vec![format!("word{i}"), "shared".into(), "text".into()]);
        }
    }

    #[test]
    fn transforms_compose_in_order() {
        let file = corpus("1 Abc\n");
        let f = |t: &str| t.to_lowercase();
        let g = |t: &str| t.replace('a', "X ");
        let source =
            DocumentSource::new(file.path(), Some(CleaningChain::new().with(f).with(g))).unwrap();
        // g(f("Abc")) = "X bc"; f(g("Abc")) would be "abc"
        assert_eq!(source.to_vec().unwrap(), vec![doc("DOC_1", &["X", "bc"])]);
    }

    #[test]
    fn source_is_iterable_by_reference() {
        let file = corpus("1 a\n2 b\n3 c\n");
        let source = DocumentSource::new(file.path(), None).unwrap();
        let mut seen = Vec::new();
        for document in &source {
            seen.push(document.unwrap().tag);
        }
        assert_eq!(seen, vec!["DOC_1", "DOC_2", "DOC_3"]);
    }

    #[test]
    fn abandoned_pass_leaves_source_untouched() {
        let file = numbered(10);
        let source = DocumentSource::new(file.path(), None).unwrap();
        let mut pass = source.iter().unwrap();
        assert_eq!(pass.remaining(), 10);
        pass.next().unwrap().unwrap();
        assert_eq!(pass.remaining(), 9);
        drop(pass);
        assert_eq!(source.iter().unwrap().count(), 10);
    }

    #[test]
    fn rewritten_corpus_is_detected_and_pass_stops() {
        let mut file = corpus("1 a\n2 b\n3 c\n");
        let source = DocumentSource::new(file.path(), None).unwrap();

        file.as_file_mut().set_len(0).unwrap();
        file.as_file_mut().seek(SeekFrom::Start(0)).unwrap();
        file.write_all(b"1 a\n9 b\n3 c\n").unwrap();
        file.flush().unwrap();

        let mut pass = source.iter().unwrap();
        assert_eq!(pass.next().unwrap().unwrap().tag, "DOC_1");
        let err = pass.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            CorpusError::CorpusChanged { line: 2, ref found, .. } if found == "DOC_9"
        ));
        assert!(pass.next().is_none());
    }

    #[test]
    fn line_broken_after_validation_fails_the_pass() {
        let mut file = corpus("1 a\n2 b\n3 c\n");
        let source = DocumentSource::new(file.path(), None).unwrap();

        file.as_file_mut().set_len(0).unwrap();
        file.as_file_mut().seek(SeekFrom::Start(0)).unwrap();
        file.write_all(b"1 a\nxxx\n3 c\n").unwrap();
        file.flush().unwrap();

        let mut pass = source.iter().unwrap();
        assert_eq!(pass.next().unwrap().unwrap().tag, "DOC_1");
        let err = pass.next().unwrap().unwrap_err();
        assert!(matches!(err, CorpusError::MalformedRecord { line: 2, .. }));
        assert!(pass.next().is_none());
    }
}
