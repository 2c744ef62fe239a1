//! In-memory search backend for triage-odm.
//!
//! This crate provides a thread-safe, in-memory implementation of the `SearchBackend`
//! trait. It is meant for development and tests: it behaves like a single-node search
//! engine, including the parts that make remote engines hard to test against.
//!
//! # Features
//!
//! - **Near-real-time visibility** - Writes are searchable only after a refresh
//! - **Optimistic concurrency** - Per-document versions checked on conditional writes
//! - **Full query support** - Filtering, sorting, pagination, projections and aggregations
//! - **Scroll cursors** - Paged point-in-time iteration over large result sets
//! - **Fault injection** - Transient transport failures, read-only indices and latency
//!
//! # Quick Start
//!
//! ```ignore
//! use triage_odm::{prelude::*, memory::InMemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> DatastoreResult<()> {
//!     let backend = InMemoryBackend::builder().build().await?;
//!     let store = Store::new(backend.clone(), registry);
//!
//!     store.sync_all().await?;
//!     backend.inject_failures(2, TransportErrorKind::ConnectionReset).await;
//!
//!     // retried transparently by the store's retry policy
//!     store.ping().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as triage_odm_memory;

mod evaluator;
pub mod store;

pub use store::{InMemoryBackend, InMemoryBackendBuilder};
