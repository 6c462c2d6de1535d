//! Canon Ledger - tamper-evident record of every decision.
//!
//! Events for one pointer form a singly linked SHA-256 chain. Writes go
//! through [`HashChainLedger::append`], a compare-and-append saga over two
//! stores:
//!
//! - a fast [`CacheStore`] holding the chain head, recent events, denial
//!   index entries and idempotency entries under TTLs;
//! - a durable [`LedgerStore`] archive that is authoritative and enforces
//!   `(pointer, seq)` uniqueness.
//!
//! [`verify_chain`] replays a chain and reports the exact seq of the first
//! fault. [`Reconciler`] detects and repairs fast/durable divergence.

#![deny(unsafe_code)]

pub mod chain;
pub mod error;
pub mod idempotency;
pub mod keys;
pub mod ledger;
pub mod memory;
pub mod model;
pub mod reconcile;
pub mod traits;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use chain::{verify_chain, ChainFault, ChainFaultKind, ChainReport};
pub use error::{LedgerError, LedgerResult, StoreKind};
pub use idempotency::{IdempotencyCache, IdempotencyKind, DEFAULT_IDEMPOTENCY_TTL};
pub use keys::CacheKeys;
pub use ledger::{HashChainLedger, LedgerConfig};
pub use memory::{InMemoryCacheStore, InMemoryLedgerStore};
pub use model::{EventDraft, LedgerEvent, LedgerEventType, LedgerHead, RecentItem};
pub use reconcile::{Divergence, DivergenceKind, ReconcileReport, Reconciler};
pub use traits::{CacheStore, LedgerStore};

#[cfg(feature = "postgres")]
pub use postgres::PostgresLedgerStore;
