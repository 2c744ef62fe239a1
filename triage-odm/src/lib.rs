//! Main triage-odm crate providing a schema-driven document layer over a search engine.
//!
//! This crate is the primary entry point for users of triage-odm. It re-exports the core
//! types from the sub-crates and provides access to the bundled backends.
//!
//! # Features
//!
//! - **Validated documents** - Models declare typed fields and every write is checked against them
//! - **Boot-time extension** - Plugins attach namespaces to models before the schema is sealed
//! - **Search and aggregation** - Query strings, structured filters, facets, histograms, stats and grouping
//! - **Optimistic concurrency** - Versioned saves that never silently overwrite a concurrent write
//! - **Resilience** - Bounded retries for transient failures and per-operation timeouts
//!
//! # Quick Start
//!
//! ```ignore
//! use triage_odm::{prelude::*, memory::InMemoryBackend};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> DatastoreResult<()> {
//!     let howler = Model::builder("howler")
//!         .field("id", Field::keyword())
//!         .field("analytic", Field::keyword())
//!         .field("status", Field::enumeration(["open", "in-progress", "resolved"]))
//!         .build()?;
//!
//!     let mut schema = SchemaRegistry::new();
//!     schema.register(Model::builder("hit").field("howler", Field::compound(howler)))?;
//!
//!     let store = Store::new(InMemoryBackend::builder().build().await?, schema.seal()?);
//!     store.sync_all().await?;
//!
//!     let hits = store.collection("hit").await?;
//!     let (hit, _) = hits.model().from_raw(
//!         json!({"howler": {"id": "h1", "analytic": "A", "status": "open"}}),
//!         true,
//!     )?;
//!
//!     // First save creates version 1
//!     let version = hits.save("h1", &hit, None).await?;
//!
//!     // Writes become searchable after a commit
//!     hits.commit().await?;
//!
//!     let page = hits.search("howler.analytic:A AND howler.status:open").await?;
//!     println!("{} open hit(s), first saved at version {version}", page.total);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Plugins
//!
//! Plugins extend registered models with extra namespaces while the schema is still
//! open. A failing plugin is reported and skipped; it never aborts the boot.
//!
//! ```ignore
//! use triage_odm::prelude::*;
//!
//! struct Sentinel;
//!
//! impl OdmPlugin for Sentinel {
//!     fn name(&self) -> &str { "sentinel" }
//!
//!     fn modify_odm(&self, model_name: &str) -> DatastoreResult<Vec<Namespace>> {
//!         match model_name {
//!             "hit" => Ok(vec![Namespace::new("sentinel", Field::compound(sentinel_model()?))]),
//!             _ => Ok(Vec::new()),
//!         }
//!     }
//! }
//!
//! let report = schema.apply_plugins(&[Arc::new(Sentinel)]);
//! assert!(report.is_clean());
//! let registry = schema.seal()?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory search backend for development and testing

pub mod prelude;

pub use triage_odm_core::{
    backend, collection, config, document, error, field, mapping, model, parser, query, registry, result,
    retry, store,
};

/// In-memory search backend implementations.
pub mod memory {
    pub use triage_odm_memory::{InMemoryBackend, InMemoryBackendBuilder};
}
