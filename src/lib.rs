//! Lectern - resilient retrieval-augmented question answering
//!
//! Answers natural-language questions against a bounded corpus of ingested
//! text chunks. Retrieval cascades from embedding search to a local TF-IDF
//! index to plain keyword matching; generation retries and fails over
//! between two providers, degrading to a canned reply instead of failing.

pub mod assistant;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod retrieval;
pub mod storage;

pub use corpus::DocumentId;
pub use error::{LecternError, Result};
