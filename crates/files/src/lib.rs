//! Uploaded documents for Afina.
//!
//! - [`store`]: where raw bytes live, keyed by conversation and file name
//! - [`extract`]: best-effort bytes-to-text conversion with placeholder markers
//! - [`cache`]: hash-based reconciliation of a conversation's referenced files

pub mod cache;
pub mod extract;
pub mod store;

pub use cache::{FileCache, Reconciled, sha256_hex};
pub use extract::{DefaultExtractor, Extractor, FormatHint};
pub use store::{DocumentStore, FsDocumentStore, MemoryDocumentStore, StoredFile, validate_name};
