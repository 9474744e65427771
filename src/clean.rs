//! Text cleaning applied to each record before tokenization.
//!
//! A [`CleaningChain`] is an ordered list of `&str -> String` transforms run
//! left to right: given `[f, g]` the text that reaches the tokenizer is
//! `g(f(text))`. An empty chain leaves the text untouched.
//!
//! # Examples
//!
//! ```
//! use rust_doc2vec::clean::{self, CleaningChain};
//!
//! let chain = CleaningChain::new()
//!     .with(clean::lowercase)
//!     .with(clean::strip_punctuation);
//! assert_eq!(chain.apply("Hello, World!"), "hello world");
//! ```

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::CorpusError;

/// A boxed cleaning transform.
pub type Transform = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Names accepted by [`CleaningChain::from_names`].
pub const BUILTIN_TRANSFORMS: &[&str] = &[
    "lowercase",
    "strip_punctuation",
    "strip_digits",
    "strip_tags",
    "collapse_whitespace",
];

/// Ordered chain of text transforms.
#[derive(Default)]
pub struct CleaningChain {
    steps: Vec<(String, Transform)>,
}

impl CleaningChain {
    /// Create an empty (identity) chain.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a transform to the end of the chain.
    ///
    /// # Arguments
    ///
    /// * `transform` - Any `Fn(&str) -> String`; runs after every transform already in the chain.
    ///
    /// # Returns
    ///
    /// * `Self` - The extended chain.
    pub fn with<F>(self, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.with_named("custom", transform)
    }

    /// Append a transform under a display name.
    pub fn with_named<F>(mut self, name: &str, transform: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.steps.push((name.to_string(), Box::new(transform)));
        self
    }

    /// Build a chain from built-in transform names, in the given order.
    ///
    /// # Arguments
    ///
    /// * `names` - Names from [`BUILTIN_TRANSFORMS`]; surrounding whitespace is ignored.
    ///
    /// # Returns
    ///
    /// * `Ok(CleaningChain)` - The chain.
    /// * `Err(CorpusError::UnknownTransform)` - A name is not a built-in.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, CorpusError> {
        let mut chain = CleaningChain::new();
        for name in names {
            let name = name.as_ref().trim();
            chain = match name {
                "lowercase" => chain.with_named(name, lowercase),
                "strip_punctuation" => chain.with_named(name, strip_punctuation),
                "strip_digits" => chain.with_named(name, strip_digits),
                "strip_tags" => chain.with_named(name, strip_tags),
                "collapse_whitespace" => chain.with_named(name, collapse_whitespace),
                other => {
                    return Err(CorpusError::UnknownTransform {
                        name: other.to_string(),
                    })
                }
            };
        }
        Ok(chain)
    }

    /// Run every transform in order.
    pub fn apply(&self, text: &str) -> String {
        let mut current = text.to_string();
        for (_, step) in &self.steps {
            current = step(&current);
        }
        current
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the transforms, in application order.
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|(name, _)| name.as_str()).collect()
    }
}

impl fmt::Debug for CleaningChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleaningChain")
            .field("steps", &self.names())
            .finish()
    }
}

fn punctuation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s]").expect("Failed to compile punctuation regex"))
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("Failed to compile markup regex"))
}

/// Lowercase the text.
pub fn lowercase(text: &str) -> String {
    text.to_lowercase()
}

/// Remove every character that is neither a word character nor whitespace.
pub fn strip_punctuation(text: &str) -> String {
    punctuation_regex().replace_all(text, "").into_owned()
}

/// Remove decimal digits.
pub fn strip_digits(text: &str) -> String {
    text.chars().filter(|c| !c.is_ascii_digit()).collect()
}

/// Replace markup tags such as `<br/>` with a space.
pub fn strip_tags(text: &str) -> String {
    tag_regex().replace_all(text, " ").into_owned()
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
