//! Search backend abstraction.
//!
//! [`SearchBackend`] is the boundary between collections and a concrete search/index
//! engine. It speaks in raw JSON objects and resolved [`SearchRequest`]s; schema
//! validation, pagination limits, retries and timeouts all live above it, in
//! [`Collection`](crate::collection::Collection).
//!
//! # Error Contract
//!
//! Implementations report:
//!
//! - [`DatastoreError::Transport`](crate::error::DatastoreError::Transport) for transient
//!   network faults (the only errors the default retry policy retries),
//! - [`DatastoreError::VersionConflict`](crate::error::DatastoreError::VersionConflict) when
//!   an expected version does not match the stored one,
//! - [`DatastoreError::Ilm`](crate::error::DatastoreError::Ilm) when the index cannot accept
//!   writes because of a lifecycle transition,
//! - [`DatastoreError::IndexNotFound`](crate::error::DatastoreError::IndexNotFound) for
//!   operations on a missing index.

use std::{collections::BTreeMap, fmt::Debug};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::{
    error::DatastoreResult,
    mapping::IndexMapping,
    query::{Expr, SearchRequest, Sort},
    result::{HistogramBucket, HistogramRange, Stats},
};

/// A stored document as returned by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub id: String,
    pub version: u64,
    pub source: Map<String, Value>,
}

/// One window of raw matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSearchResponse {
    /// Number of matches across all windows.
    pub total: u64,
    pub hits: Vec<RawHit>,
}

/// An aggregation over the matches of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Count of matches per distinct value. Arrays count once per element.
    Terms { field: String, min_count: u64 },
    /// Count of matches per fixed-width bucket of `range`.
    Histogram { field: String, range: HistogramRange, min_count: u64 },
    Stats { field: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationResult {
    Terms(BTreeMap<String, u64>),
    Histogram(Vec<HistogramBucket>),
    Stats(Stats),
}

/// Matches grouped by the value of one field.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRequest {
    pub field: String,
    pub filter: Expr,
    /// Offset into the list of groups.
    pub offset: usize,
    /// Number of groups to return.
    pub rows: usize,
    /// Matches kept per group.
    pub group_limit: usize,
    pub sort: Vec<Sort>,
    pub field_list: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawGroup {
    pub value: String,
    pub total: u64,
    pub hits: Vec<RawHit>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGroupedResponse {
    /// Number of groups across all windows.
    pub total: u64,
    pub groups: Vec<RawGroup>,
}

/// A page of a scroll cursor. `cursor` is `None` once the scroll is drained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollPage {
    pub cursor: Option<String>,
    pub hits: Vec<RawHit>,
}

/// Abstract interface for search/index engines.
///
/// Writes become visible to `get` immediately and to search, count, aggregation and
/// scroll only after [`refresh`](SearchBackend::refresh). All methods must be safe to
/// call concurrently.
#[async_trait]
pub trait SearchBackend: Send + Sync + Debug {
    /// Checks that the engine is reachable.
    async fn ping(&self) -> DatastoreResult<()>;

    async fn index_exists(&self, index: &str) -> DatastoreResult<bool>;

    /// Creates an index with the given mapping.
    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> DatastoreResult<()>;

    /// Drops an index and every document in it.
    async fn drop_index(&self, index: &str) -> DatastoreResult<()>;

    async fn list_indices(&self) -> DatastoreResult<Vec<String>>;

    async fn get_mapping(&self, index: &str) -> DatastoreResult<IndexMapping>;

    /// Replaces the index mapping. Callers only put mappings that extend the current one.
    async fn put_mapping(&self, index: &str, mapping: &IndexMapping) -> DatastoreResult<()>;

    async fn get_document(&self, index: &str, id: &str) -> DatastoreResult<Option<RawHit>>;

    /// Fetches several documents. Missing ids are left out of the result.
    async fn multi_get(&self, index: &str, ids: &[String]) -> DatastoreResult<Vec<RawHit>>;

    /// Creates or replaces a document and returns its new version.
    ///
    /// With `expected_version` set, the write only happens if the stored version equals
    /// it; a document that does not exist has no version and never matches.
    async fn index_document(
        &self,
        index: &str,
        id: &str,
        source: Map<String, Value>,
        expected_version: Option<u64>,
    ) -> DatastoreResult<u64>;

    /// Returns whether a document was removed.
    async fn delete_document(&self, index: &str, id: &str) -> DatastoreResult<bool>;

    async fn search(&self, index: &str, request: &SearchRequest) -> DatastoreResult<RawSearchResponse>;

    async fn count(&self, index: &str, filter: &Expr) -> DatastoreResult<u64>;

    /// Deletes every match of `filter`, visible or not, and returns how many were removed.
    async fn delete_by_query(&self, index: &str, filter: &Expr) -> DatastoreResult<u64>;

    /// Makes every completed write visible to search.
    async fn refresh(&self, index: &str) -> DatastoreResult<()>;

    async fn aggregate(
        &self,
        index: &str,
        filter: &Expr,
        aggregation: &Aggregation,
    ) -> DatastoreResult<AggregationResult>;

    /// Groups sorted matches by the value of `request.field`, in order of first
    /// appearance.
    async fn grouped_search(&self, index: &str, request: &GroupRequest) -> DatastoreResult<RawGroupedResponse>;

    /// Opens a point-in-time cursor over every match of `request` and returns its first page.
    async fn open_scroll(
        &self,
        index: &str,
        request: &SearchRequest,
        page_size: usize,
    ) -> DatastoreResult<ScrollPage>;

    async fn next_scroll(&self, cursor: &str) -> DatastoreResult<ScrollPage>;

    /// Releases a cursor. Clearing an unknown cursor is not an error.
    async fn clear_scroll(&self, cursor: &str) -> DatastoreResult<()>;
}

/// Factory for backend instances.
#[async_trait]
pub trait SearchBackendBuilder {
    type Backend: SearchBackend;

    async fn build(self) -> DatastoreResult<Self::Backend>;
}
