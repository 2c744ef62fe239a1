//! Convenient re-exports of commonly used types from triage-odm.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use triage_odm::prelude::*;
//! ```
//!
//! This provides access to:
//! - Schema primitives and the registry
//! - The store, its collections and configuration
//! - Query construction and filtering
//! - Result and error types

pub use triage_odm_core::{
    backend::{SearchBackend, SearchBackendBuilder},
    collection::Collection,
    config::{RetryConfig, StoreConfig},
    document::Document,
    error::{DatastoreError, DatastoreResult, MultiKeyError, TransportErrorKind},
    field::{Field, FieldKind, HashKind},
    mapping::{IndexMapping, MappingDiff},
    model::{Model, ModelBuilder},
    parser::{LuceneQueryParser, QueryParser},
    query::{Expr, FieldOp, Filter, Query, QueryBuilder, QueryVisitor, Sort, SortDirection},
    registry::{BootReport, Namespace, OdmPlugin, Registry, SchemaRegistry},
    result::{BucketKey, GroupedItem, HistogramBucket, HistogramRange, SearchResult, Stats, Versioned},
    retry::{RetryPolicy, Sleeper, TokioSleeper},
    store::{Store, StoreBuilder, SyncOutcome},
};
