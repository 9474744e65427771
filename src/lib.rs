//! Train paragraph vectors over a line corpus.
//!
//! * [`corpus`] - validated, out-of-core, permutable document source.
//! * [`clean`] - text cleaning chains applied before tokenization.
//! * [`vocab`] - vocabulary and sampling tables.
//! * [`doc2vec`] - the PV-DM / PV-DBOW trainer and model persistence.
//! * [`logging`] - logger setup for the command line tool.

pub mod clean;
pub mod corpus;
pub mod doc2vec;
pub mod error;
pub mod logging;
pub mod vocab;

pub use corpus::{gen_id, DocumentSource, TaggedDocument};
pub use doc2vec::{Doc2Vec, Doc2VecConfig, TrainingMode, TrainingReport};
pub use error::{CorpusError, ModelError};
