//! Model-bound collections.
//!
//! A [`Collection`] binds one model to one index and exposes typed CRUD, search,
//! aggregation and bulk mutation over a [`SearchBackend`]. Every backend round trip
//! goes through the store's [`RetryPolicy`] and, when configured, a timeout covering
//! the whole retry loop.
//!
//! # Example
//!
//! ```ignore
//! let hits = store.collection("hit").await?;
//!
//! let (hit, _) = hits.model().from_raw(json!({"howler": {"id": "h1", "analytic": "A"}}), true)?;
//! let version = hits.save("h1", &hit, None).await?;
//! hits.commit().await?;
//!
//! let page = hits.search("howler.analytic:A").await?;
//! assert_eq!(page.total, 1);
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::Arc,
    time::Duration,
};

use futures::{Stream, stream};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    backend::{Aggregation, AggregationResult, GroupRequest, RawHit, ScrollPage, SearchBackend},
    config::StoreConfig,
    document::Document,
    error::{DatastoreError, DatastoreResult, MultiKeyError},
    field::FieldKind,
    model::Model,
    parser::QueryParser,
    query::{Expr, Query, SearchRequest},
    result::{GroupedItem, HistogramBucket, HistogramRange, SearchResult, Stats, Versioned},
    retry::{RetryPolicy, within},
};

/// The documents of one model.
#[derive(Debug)]
pub struct Collection {
    model: Arc<Model>,
    index: String,
    backend: Arc<dyn SearchBackend>,
    parser: Arc<dyn QueryParser>,
    retry: RetryPolicy,
    config: Arc<StoreConfig>,
}

impl Collection {
    pub(crate) fn new(
        model: Arc<Model>,
        backend: Arc<dyn SearchBackend>,
        parser: Arc<dyn QueryParser>,
        retry: RetryPolicy,
        config: Arc<StoreConfig>,
    ) -> Self {
        Self { index: config.index_name(model.name()), model, backend, parser, retry, config }
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Name of the backing index.
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Fetches a document by id.
    pub async fn get(&self, id: &str) -> DatastoreResult<Option<Document>> {
        Ok(self.get_with_version(id).await?.map(|versioned| versioned.value))
    }

    /// Fetches a document together with its version, for a later conditional save.
    pub async fn get_with_version(&self, id: &str) -> DatastoreResult<Option<Versioned<Document>>> {
        let hit = self
            .execute("get", || self.backend.get_document(&self.index, id))
            .await?;

        hit.map(|hit| {
            Ok(Versioned { version: hit.version, value: self.load(hit.source)? })
        })
        .transpose()
    }

    pub async fn exists(&self, id: &str) -> DatastoreResult<bool> {
        Ok(self
            .execute("exists", || self.backend.get_document(&self.index, id))
            .await?
            .is_some())
    }

    /// Fetches several documents, in request order.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::MultiKey`] carrying the missing ids and every document
    /// that was found if any id does not resolve.
    pub async fn multi_get<S: AsRef<str>>(&self, ids: &[S]) -> DatastoreResult<Vec<Document>> {
        let ids = ids.iter().map(|id| id.as_ref().to_string()).collect::<Vec<_>>();
        let hits = self
            .execute("multi_get", || self.backend.multi_get(&self.index, &ids))
            .await?;

        let found = hits
            .into_iter()
            .map(|hit| Ok((hit.id, self.load(hit.source)?)))
            .collect::<DatastoreResult<HashMap<_, _>>>()?;

        let mut documents = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();

        for id in ids {
            match found.get(&id) {
                Some(document) => documents.push(document.clone()),
                None => missing.push(id),
            }
        }

        if missing.is_empty() {
            Ok(documents)
        } else {
            Err(MultiKeyError { keys: missing.into_iter().collect(), partial_output: documents }.into())
        }
    }

    /// Creates or replaces a document and returns its new version.
    ///
    /// With `expected_version` set, the write only happens if the stored version still
    /// equals it. The first write of an id yields version 1.
    ///
    /// # Errors
    ///
    /// - [`DatastoreError::VersionConflict`] if the stored version differs; nothing is written
    /// - [`DatastoreError::Ilm`] if the index does not accept writes
    /// - [`DatastoreError::Validation`] if the document belongs to another model
    pub async fn save(&self, id: &str, document: &Document, expected_version: Option<u64>) -> DatastoreResult<u64> {
        if document.model().name() != self.model.name() {
            return Err(DatastoreError::validation(
                "",
                format!(
                    "a '{}' document cannot be saved in the '{}' collection",
                    document.model().name(),
                    self.model.name()
                ),
            ));
        }

        let source = document.as_map();

        self.execute("save", || {
            self.backend
                .index_document(&self.index, id, source.clone(), expected_version)
        })
        .await
    }

    /// Deletes a document, returning whether it existed.
    pub async fn delete(&self, id: &str) -> DatastoreResult<bool> {
        self.execute("delete", || self.backend.delete_document(&self.index, id))
            .await
    }

    /// Deletes every match of `query`, ignoring its pagination.
    ///
    /// Deleted documents may still show up in searches until [`commit`](Self::commit).
    pub async fn delete_by_query(&self, query: impl Into<Query>) -> DatastoreResult<u64> {
        let filter = self.resolve_filter(&query.into())?;
        debug!(index = %self.index, ?filter, "delete by query");

        self.execute("delete_by_query", || self.backend.delete_by_query(&self.index, &filter))
            .await
    }

    /// Makes every completed write visible to search.
    pub async fn commit(&self) -> DatastoreResult<()> {
        self.execute("commit", || self.backend.refresh(&self.index))
            .await
    }

    /// Searches and returns validated documents.
    ///
    /// # Errors
    ///
    /// - [`DatastoreError::SearchDepth`] if `offset + rows` exceeds the result window
    /// - [`DatastoreError::InvalidQuery`] if the query string does not parse or a field
    ///   list is set (projected documents would not validate; use
    ///   [`search_raw`](Self::search_raw))
    pub async fn search(&self, query: impl Into<Query>) -> DatastoreResult<SearchResult<Document>> {
        let query = query.into();

        if !query.field_list.is_empty() {
            return Err(DatastoreError::InvalidQuery(
                "field lists are only supported on raw searches".into(),
            ));
        }

        self.search_hits(&query)
            .await?
            .try_map(|hit| self.load(hit.source))
    }

    /// Searches and returns the stored objects, projected on the query's field list.
    pub async fn search_raw(&self, query: impl Into<Query>) -> DatastoreResult<SearchResult<Map<String, Value>>> {
        let query = query.into();

        self.search_hits(&query)
            .await?
            .try_map(|hit| Ok(hit.source))
    }

    /// Streams every match of `query` through a scroll cursor, ignoring its pagination.
    ///
    /// The stream is finite and can only be consumed once. A failure ends it with a
    /// single [`DatastoreError::Scan`] item. Dropping it early clears the backend cursor
    /// on a spawned task. Follow-up pages are not retried but do honour the timeout.
    pub fn stream_search(
        &self,
        query: impl Into<Query>,
    ) -> DatastoreResult<impl Stream<Item = DatastoreResult<Document>> + Send + '_> {
        let query = query.into();
        let request = SearchRequest {
            sort: query.sort.clone(),
            ..SearchRequest::unbounded(self.resolve_filter(&query)?)
        };
        let page_size = self.config.scroll_page_size.max(1);

        debug!(index = %self.index, filter = ?request.filter, page_size, "stream search");

        Ok(stream::unfold(Scroll::Opening(request), move |mut state| async move {
            loop {
                match state {
                    Scroll::Finished => return None,
                    Scroll::Opening(request) => {
                        match self
                            .execute("stream_search", || self.backend.open_scroll(&self.index, &request, page_size))
                            .await
                        {
                            Ok(page) => state = self.reading(page),
                            Err(error) => return Some((Err(scan(error)), Scroll::Finished)),
                        }
                    }
                    Scroll::Reading { cursor, mut hits } => {
                        if let Some(hit) = hits.next() {
                            return match self.load(hit.source) {
                                Ok(document) => Some((Ok(document), Scroll::Reading { cursor, hits })),
                                Err(error) => {
                                    if let Some(cursor) = cursor {
                                        cursor.release().await;
                                    }
                                    Some((Err(scan(error)), Scroll::Finished))
                                }
                            };
                        }

                        let Some(cursor) = cursor else {
                            return None;
                        };

                        let next = within("next_scroll", self.config.timeout(), self.backend.next_scroll(cursor.id())).await;

                        match next {
                            Ok(page) => {
                                cursor.disarm();
                                state = self.reading(page);
                            }
                            Err(error) => {
                                cursor.release().await;
                                return Some((Err(scan(error)), Scroll::Finished));
                            }
                        }
                    }
                }
            }
        }))
    }

    /// Counts the matches of `query`.
    pub async fn count(&self, query: impl Into<Query>) -> DatastoreResult<u64> {
        let filter = self.resolve_filter(&query.into())?;

        self.execute("count", || self.backend.count(&self.index, &filter))
            .await
    }

    /// Counts matches per distinct value of `field`, keeping values seen at least
    /// `min_count` times.
    pub async fn facet(
        &self,
        field: &str,
        query: impl Into<Query>,
        min_count: u64,
    ) -> DatastoreResult<BTreeMap<String, u64>> {
        self.leaf_kind(field)?;

        let aggregation = Aggregation::Terms { field: field.to_string(), min_count: min_count.max(1) };

        match self.aggregate(query.into(), aggregation).await? {
            AggregationResult::Terms(terms) => Ok(terms),
            other => Err(unexpected(other)),
        }
    }

    /// Counts matches per fixed-width bucket of `range`. A `min_count` of zero keeps
    /// empty buckets.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::InvalidQuery`] if the range kind does not fit the field
    /// (numeric ranges need integer or float fields, date ranges need date fields) or
    /// if [`HistogramRange::bucket_count`] rejects the range.
    pub async fn histogram(
        &self,
        field: &str,
        query: impl Into<Query>,
        range: HistogramRange,
        min_count: u64,
    ) -> DatastoreResult<Vec<HistogramBucket>> {
        let fits = matches!(
            (self.leaf_kind(field)?, &range),
            (FieldKind::Integer | FieldKind::Float, HistogramRange::Numeric { .. })
                | (FieldKind::Date, HistogramRange::Date { .. })
        );

        if !fits {
            return Err(DatastoreError::InvalidQuery(format!("invalid histogram range {range:?} for field '{field}'")));
        }

        range.bucket_count()?;

        let aggregation = Aggregation::Histogram { field: field.to_string(), range, min_count };

        match self.aggregate(query.into(), aggregation).await? {
            AggregationResult::Histogram(buckets) => Ok(buckets),
            other => Err(unexpected(other)),
        }
    }

    /// Summary statistics of a numeric field over the matches of `query`.
    pub async fn stats(&self, field: &str, query: impl Into<Query>) -> DatastoreResult<Stats> {
        if !matches!(self.leaf_kind(field)?, FieldKind::Integer | FieldKind::Float) {
            return Err(DatastoreError::InvalidQuery(format!("field '{field}' is not numeric")));
        }

        let aggregation = Aggregation::Stats { field: field.to_string() };

        match self.aggregate(query.into(), aggregation).await? {
            AggregationResult::Stats(stats) => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    /// Groups matches by the value of `field`, keeping up to `group_limit` records
    /// per group. The query's `offset` and `rows` page over groups, and `total` is the
    /// number of groups.
    pub async fn grouped_search(
        &self,
        field: &str,
        query: impl Into<Query>,
        group_limit: usize,
    ) -> DatastoreResult<SearchResult<GroupedItem>> {
        self.leaf_kind(field)?;

        let request = self.resolve(&query.into())?;
        let request = GroupRequest {
            field: field.to_string(),
            filter: request.filter,
            offset: request.offset,
            rows: request.rows,
            group_limit: group_limit.max(1),
            sort: request.sort,
            field_list: request.field_list,
        };

        debug!(index = %self.index, field, filter = ?request.filter, "grouped search");

        let response = self
            .execute("grouped_search", || self.backend.grouped_search(&self.index, &request))
            .await?;

        let items = response
            .groups
            .into_iter()
            .map(|group| GroupedItem {
                value: group.value,
                total: group.total,
                items: group.hits.into_iter().map(|hit| hit.source).collect(),
            })
            .collect();

        Ok(SearchResult::builder(items)
            .with_offset(request.offset)
            .with_rows(request.rows)
            .with_total(response.total)
            .build())
    }

    async fn search_hits(&self, query: &Query) -> DatastoreResult<SearchResult<RawHit>> {
        let request = self.resolve(query)?;
        debug!(index = %self.index, filter = ?request.filter, offset = request.offset, rows = request.rows, "search");

        let response = self
            .execute("search", || self.backend.search(&self.index, &request))
            .await?;

        Ok(SearchResult::builder(response.hits)
            .with_offset(request.offset)
            .with_rows(request.rows)
            .with_total(response.total)
            .build())
    }

    async fn aggregate(&self, query: Query, aggregation: Aggregation) -> DatastoreResult<AggregationResult> {
        let filter = self.resolve_filter(&query)?;
        debug!(index = %self.index, ?filter, ?aggregation, "aggregate");

        self.execute("aggregate", || self.backend.aggregate(&self.index, &filter, &aggregation))
            .await
    }

    /// Runs one logical operation under the retry policy and the configured timeout.
    async fn execute<T, F, Fut>(&self, operation: &str, attempt: F) -> DatastoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DatastoreResult<T>>,
    {
        self.retry
            .run_within(operation, self.config.timeout(), attempt)
            .await
    }

    fn reading(&self, page: ScrollPage) -> Scroll {
        Scroll::Reading {
            cursor: page.cursor.map(|id| ScrollCursor {
                id: Some(id),
                index: self.index.clone(),
                backend: self.backend.clone(),
                timeout: self.config.timeout(),
            }),
            hits: page.hits.into_iter(),
        }
    }

    fn load(&self, source: Map<String, Value>) -> DatastoreResult<Document> {
        let (document, unknown) = self.model.from_raw(Value::Object(source), self.config.strict)?;

        if !unknown.is_empty() {
            debug!(index = %self.index, ?unknown, "ignored unknown fields");
        }

        Ok(document)
    }

    fn resolve_filter(&self, query: &Query) -> DatastoreResult<Expr> {
        let base = match &query.query {
            Some(query) => self.parser.parse(query)?,
            None => Expr::MatchAll,
        };

        Ok(query
            .filters
            .iter()
            .cloned()
            .fold(base, Expr::and))
    }

    fn resolve(&self, query: &Query) -> DatastoreResult<SearchRequest> {
        let offset = query.offset.unwrap_or(0);
        let rows = query.rows.unwrap_or(self.config.default_rows);
        let limit = self.config.max_result_window;

        if offset.checked_add(rows).is_none_or(|end| end > limit) {
            return Err(DatastoreError::SearchDepth { offset, rows, limit });
        }

        for sort in &query.sort {
            self.leaf_kind(&sort.field)?;
        }

        Ok(SearchRequest {
            filter: self.resolve_filter(query)?,
            offset,
            rows,
            sort: query.sort.clone(),
            field_list: query.field_list.clone(),
        })
    }

    /// Kind of the leaf at `path`, looking through lists.
    fn leaf_kind(&self, path: &str) -> DatastoreResult<&FieldKind> {
        let mut field = self
            .model
            .field_at(path)
            .ok_or_else(|| DatastoreError::InvalidQuery(format!("unknown field '{path}' on model '{}'", self.model.name())))?;

        while let FieldKind::List(child) = field.kind() {
            field = child;
        }

        Ok(field.kind())
    }
}

enum Scroll {
    Opening(SearchRequest),
    Reading {
        cursor: Option<ScrollCursor>,
        hits: std::vec::IntoIter<RawHit>,
    },
    Finished,
}

/// A live backend scroll cursor.
///
/// Dropping it before the backend reports the scroll drained clears the cursor on a
/// spawned task, so abandoned streams do not hold backend state.
struct ScrollCursor {
    id: Option<String>,
    index: String,
    backend: Arc<dyn SearchBackend>,
    timeout: Option<Duration>,
}

impl ScrollCursor {
    fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Forgets the cursor once the backend has moved past it.
    fn disarm(mut self) {
        self.id = None;
    }

    async fn release(mut self) {
        if let Some(id) = self.id.take() {
            clear_scroll(self.backend.clone(), self.index.clone(), id, self.timeout).await;
        }
    }
}

impl Drop for ScrollCursor {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!(index = %self.index, cursor = %id, "clearing abandoned scroll");
                runtime.spawn(clear_scroll(self.backend.clone(), self.index.clone(), id, self.timeout));
            }
            Err(_) => warn!(index = %self.index, cursor = %id, "scroll dropped outside a runtime, cursor left open"),
        }
    }
}

async fn clear_scroll(backend: Arc<dyn SearchBackend>, index: String, cursor: String, timeout: Option<Duration>) {
    if let Err(error) = within("clear_scroll", timeout, backend.clear_scroll(&cursor)).await {
        warn!(%index, %cursor, %error, "failed to clear scroll cursor");
    }
}

fn scan(error: DatastoreError) -> DatastoreError {
    match error {
        DatastoreError::Scan { .. } => error,
        other => DatastoreError::Scan { source: Box::new(other) },
    }
}

fn unexpected(result: AggregationResult) -> DatastoreError {
    DatastoreError::Backend(format!("unexpected aggregation result: {result:?}"))
}
