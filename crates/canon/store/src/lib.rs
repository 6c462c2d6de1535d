//! Canon Store - the versioned body of approved knowledge.
//!
//! Items enter as EVIDENCE and only move up through approved promotion
//! decisions. Every mutation bumps the store version and appends a
//! revision, so any decision can name the exact canon state it used.

#![deny(unsafe_code)]

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{CanonStoreError, CanonStoreResult};
pub use memory::InMemoryCanonStore;
pub use traits::{CanonRevision, CanonStore};
