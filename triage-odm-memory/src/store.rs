//! In-memory search backend.
//!
//! Documents live in async-aware read-write locked maps, one per index. Each index
//! keeps two views: the live documents that `get` reads and writes go to, and a
//! searchable snapshot that only changes on refresh. That reproduces the near-real-time
//! visibility of a distributed search engine.
//!
//! The backend can also misbehave on demand: [`InMemoryBackend::inject_failures`] makes
//! the next calls fail with transport errors, [`InMemoryBackend::set_read_only`] puts an
//! index into the state of a lifecycle rollover and [`InMemoryBackendBuilder::with_latency`]
//! delays every call.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use chrono::Utc;
use mea::rwlock::RwLock;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use triage_odm_core::{
    backend::{
        Aggregation, AggregationResult, GroupRequest, RawGroup, RawGroupedResponse, RawHit, RawSearchResponse,
        ScrollPage, SearchBackend, SearchBackendBuilder,
    },
    error::{DatastoreError, DatastoreResult, TransportErrorKind},
    mapping::IndexMapping,
    query::{Expr, SearchRequest, Sort},
    result::{HistogramBucket, HistogramRange, Stats},
};

use crate::evaluator::{
    Comparable, DocumentEvaluator, FieldTypes, compare_documents, parse_date, project, values_at,
};

#[derive(Debug, Clone)]
struct StoredDocument {
    version: u64,
    source: Map<String, Value>,
}

impl StoredDocument {
    fn hit(&self, id: &str) -> RawHit {
        RawHit { id: id.to_string(), version: self.version, source: self.source.clone() }
    }
}

#[derive(Debug, Default)]
struct IndexState {
    mapping: IndexMapping,
    types: FieldTypes,
    live: BTreeMap<String, StoredDocument>,
    searchable: BTreeMap<String, StoredDocument>,
    read_only: bool,
}

impl IndexState {
    fn new(mapping: IndexMapping) -> Self {
        Self { types: FieldTypes::from_mapping(&mapping), mapping, ..Self::default() }
    }

    fn ensure_writable(&self, index: &str) -> DatastoreResult<()> {
        if self.read_only {
            return Err(DatastoreError::Ilm(format!(
                "index [{index}] is read-only while its lifecycle policy rolls it over"
            )));
        }

        Ok(())
    }

    /// Searchable matches of `filter`, sorted.
    fn matches(&self, filter: &Expr, sort: &[Sort]) -> DatastoreResult<Vec<RawHit>> {
        let mut hits = DocumentEvaluator::filter_documents(
            self.searchable.iter().map(|(id, document)| (document.hit(id), &document.source)),
            filter,
            &self.types,
        )?;

        if !sort.is_empty() {
            hits.sort_by(|left, right| compare_documents(&left.source, &right.source, sort, &self.types));
        }

        Ok(hits)
    }
}

/// How long an untouched scroll cursor stays open unless the builder says otherwise.
pub const DEFAULT_SCROLL_KEEP_ALIVE: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct ScrollContext {
    hits: std::vec::IntoIter<RawHit>,
    page_size: usize,
    expires_at: Instant,
}

impl ScrollContext {
    fn next_page(&mut self) -> Vec<RawHit> {
        self.hits.by_ref().take(self.page_size).collect()
    }

    fn is_drained(&self) -> bool {
        self.hits.len() == 0
    }
}

type IndexStates = HashMap<String, IndexState>;

/// Thread-safe in-memory search backend.
///
/// Cloning is cheap and every clone shares the same indices, so a test can keep a
/// handle for fault injection after handing the backend to a store.
#[derive(Default, Clone, Debug)]
pub struct InMemoryBackend {
    indices: Arc<RwLock<IndexStates>>,
    scrolls: Arc<RwLock<HashMap<String, ScrollContext>>>,
    pending_failures: Arc<AtomicU32>,
    failure_kind: Arc<RwLock<Option<TransportErrorKind>>>,
    latency: Option<Duration>,
    scroll_keep_alive: Option<Duration>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryBackendBuilder {
        InMemoryBackendBuilder::default()
    }

    /// Makes the next `count` calls fail with a transport error of `kind`.
    pub async fn inject_failures(&self, count: u32, kind: TransportErrorKind) {
        *self.failure_kind.write().await = Some(kind);
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Marks an index read-only, as during a lifecycle rollover. Writes to it then fail
    /// with [`DatastoreError::Ilm`].
    pub async fn set_read_only(&self, index: &str, read_only: bool) -> DatastoreResult<()> {
        let mut indices = self.indices.write().await;
        let state = indices
            .get_mut(index)
            .ok_or_else(|| DatastoreError::IndexNotFound(index.to_string()))?;

        state.read_only = read_only;
        Ok(())
    }

    /// Number of open scroll cursors. Expired cursors are not counted.
    pub async fn open_scrolls(&self) -> usize {
        let mut scrolls = self.scrolls.write().await;
        sweep(&mut scrolls);
        scrolls.len()
    }

    fn keep_alive(&self) -> Instant {
        Instant::now() + self.scroll_keep_alive.unwrap_or(DEFAULT_SCROLL_KEEP_ALIVE)
    }

    async fn enter(&self, operation: &str) -> DatastoreResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| pending.checked_sub(1))
            .is_ok();

        if injected {
            let kind = (*self.failure_kind.read().await).unwrap_or(TransportErrorKind::ConnectionReset);

            debug!(operation, %kind, "injected transport failure");
            return Err(DatastoreError::transport(kind, format!("injected failure during {operation}")));
        }

        Ok(())
    }

    async fn open_cursor(&self, mut context: ScrollContext) -> ScrollPage {
        let hits = context.next_page();

        if context.is_drained() {
            return ScrollPage { cursor: None, hits };
        }

        let cursor = Uuid::new_v4().to_string();
        context.expires_at = self.keep_alive();

        let mut scrolls = self.scrolls.write().await;
        sweep(&mut scrolls);
        scrolls.insert(cursor.clone(), context);

        ScrollPage { cursor: Some(cursor), hits }
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn ping(&self) -> DatastoreResult<()> {
        self.enter("ping").await
    }

    async fn index_exists(&self, index: &str) -> DatastoreResult<bool> {
        self.enter("index_exists").await?;

        Ok(self.indices.read().await.contains_key(index))
    }

    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> DatastoreResult<()> {
        self.enter("create_index").await?;

        let mut indices = self.indices.write().await;

        if indices.contains_key(index) {
            return Err(DatastoreError::Backend(format!("index [{index}] already exists")));
        }

        indices.insert(index.to_string(), IndexState::new(mapping.clone()));
        Ok(())
    }

    async fn drop_index(&self, index: &str) -> DatastoreResult<()> {
        self.enter("drop_index").await?;

        match self.indices.write().await.remove(index) {
            Some(_) => Ok(()),
            None => Err(DatastoreError::IndexNotFound(index.to_string())),
        }
    }

    async fn list_indices(&self) -> DatastoreResult<Vec<String>> {
        self.enter("list_indices").await?;

        let mut names = self.indices.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    async fn get_mapping(&self, index: &str) -> DatastoreResult<IndexMapping> {
        self.enter("get_mapping").await?;

        self.indices
            .read()
            .await
            .get(index)
            .map(|state| state.mapping.clone())
            .ok_or_else(|| DatastoreError::IndexNotFound(index.to_string()))
    }

    async fn put_mapping(&self, index: &str, mapping: &IndexMapping) -> DatastoreResult<()> {
        self.enter("put_mapping").await?;

        let mut indices = self.indices.write().await;
        let state = indices
            .get_mut(index)
            .ok_or_else(|| DatastoreError::IndexNotFound(index.to_string()))?;

        state.types = FieldTypes::from_mapping(mapping);
        state.mapping = mapping.clone();
        Ok(())
    }

    async fn get_document(&self, index: &str, id: &str) -> DatastoreResult<Option<RawHit>> {
        self.enter("get_document").await?;

        Ok(self
            .indices
            .read()
            .await
            .get(index)
            .and_then(|state| state.live.get(id))
            .map(|document| document.hit(id)))
    }

    async fn multi_get(&self, index: &str, ids: &[String]) -> DatastoreResult<Vec<RawHit>> {
        self.enter("multi_get").await?;

        let indices = self.indices.read().await;
        let Some(state) = indices.get(index) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .iter()
            .filter_map(|id| state.live.get(id).map(|document| document.hit(id)))
            .collect())
    }

    async fn index_document(
        &self,
        index: &str,
        id: &str,
        source: Map<String, Value>,
        expected_version: Option<u64>,
    ) -> DatastoreResult<u64> {
        self.enter("index_document").await?;

        let mut indices = self.indices.write().await;
        let state = indices.entry(index.to_string()).or_default();
        state.ensure_writable(index)?;

        let current = state.live.get(id).map(|document| document.version);

        if let Some(expected) = expected_version
            && current != Some(expected)
        {
            return Err(DatastoreError::VersionConflict {
                id: id.to_string(),
                index: index.to_string(),
                expected,
                actual: current,
            });
        }

        let version = current.map_or(1, |version| version + 1);
        state.live.insert(id.to_string(), StoredDocument { version, source });

        Ok(version)
    }

    async fn delete_document(&self, index: &str, id: &str) -> DatastoreResult<bool> {
        self.enter("delete_document").await?;

        let mut indices = self.indices.write().await;
        let Some(state) = indices.get_mut(index) else {
            return Ok(false);
        };

        state.ensure_writable(index)?;
        Ok(state.live.remove(id).is_some())
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> DatastoreResult<RawSearchResponse> {
        self.enter("search").await?;

        let indices = self.indices.read().await;
        let Some(state) = indices.get(index) else {
            return Ok(RawSearchResponse::default());
        };

        let hits = state.matches(&request.filter, &request.sort)?;

        Ok(RawSearchResponse {
            total: hits.len() as u64,
            hits: hits
                .into_iter()
                .skip(request.offset)
                .take(request.rows)
                .map(|hit| RawHit { source: project(&hit.source, &request.field_list), ..hit })
                .collect(),
        })
    }

    async fn count(&self, index: &str, filter: &Expr) -> DatastoreResult<u64> {
        self.enter("count").await?;

        let indices = self.indices.read().await;

        match indices.get(index) {
            Some(state) => Ok(state.matches(filter, &[])?.len() as u64),
            None => Ok(0),
        }
    }

    async fn delete_by_query(&self, index: &str, filter: &Expr) -> DatastoreResult<u64> {
        self.enter("delete_by_query").await?;

        let mut indices = self.indices.write().await;
        let Some(state) = indices.get_mut(index) else {
            return Ok(0);
        };

        state.ensure_writable(index)?;

        let doomed = DocumentEvaluator::filter_documents(
            state.live.iter().map(|(id, document)| (id.clone(), &document.source)),
            filter,
            &state.types,
        )?;

        for id in &doomed {
            state.live.remove(id);
        }

        Ok(doomed.len() as u64)
    }

    async fn refresh(&self, index: &str) -> DatastoreResult<()> {
        self.enter("refresh").await?;

        if let Some(state) = self.indices.write().await.get_mut(index) {
            state.searchable = state.live.clone();
        }

        Ok(())
    }

    async fn aggregate(
        &self,
        index: &str,
        filter: &Expr,
        aggregation: &Aggregation,
    ) -> DatastoreResult<AggregationResult> {
        self.enter("aggregate").await?;

        let indices = self.indices.read().await;
        let hits = match indices.get(index) {
            Some(state) => state.matches(filter, &[])?,
            None => Vec::new(),
        };

        Ok(match aggregation {
            Aggregation::Terms { field, min_count } => AggregationResult::Terms(terms(&hits, field, *min_count)),
            Aggregation::Histogram { field, range, min_count } => {
                AggregationResult::Histogram(histogram(&hits, field, range, *min_count))
            }
            Aggregation::Stats { field } => AggregationResult::Stats(Stats::from_values(
                hits.iter()
                    .flat_map(|hit| values_at(&hit.source, field))
                    .filter_map(Value::as_f64),
            )),
        })
    }

    async fn grouped_search(&self, index: &str, request: &GroupRequest) -> DatastoreResult<RawGroupedResponse> {
        self.enter("grouped_search").await?;

        let indices = self.indices.read().await;
        let hits = match indices.get(index) {
            Some(state) => state.matches(&request.filter, &request.sort)?,
            None => Vec::new(),
        };

        let mut groups: Vec<RawGroup> = Vec::new();
        let mut positions = HashMap::new();

        for hit in hits {
            let Some(value) = values_at(&hit.source, &request.field).first().and_then(|value| Comparable::key(value))
            else {
                continue;
            };

            let position = *positions.entry(value.clone()).or_insert_with(|| {
                groups.push(RawGroup { value, total: 0, hits: Vec::new() });
                groups.len() - 1
            });

            let group = &mut groups[position];
            group.total += 1;

            if group.hits.len() < request.group_limit {
                group.hits.push(RawHit { source: project(&hit.source, &request.field_list), ..hit });
            }
        }

        Ok(RawGroupedResponse {
            total: groups.len() as u64,
            groups: groups.into_iter().skip(request.offset).take(request.rows).collect(),
        })
    }

    async fn open_scroll(&self, index: &str, request: &SearchRequest, page_size: usize) -> DatastoreResult<ScrollPage> {
        self.enter("open_scroll").await?;

        let hits = match self.indices.read().await.get(index) {
            Some(state) => state.matches(&request.filter, &request.sort)?,
            None => Vec::new(),
        };

        let context = ScrollContext {
            hits: hits.into_iter(),
            page_size: page_size.max(1),
            expires_at: Instant::now(),
        };
        Ok(self.open_cursor(context).await)
    }

    async fn next_scroll(&self, cursor: &str) -> DatastoreResult<ScrollPage> {
        self.enter("next_scroll").await?;

        let mut scrolls = self.scrolls.write().await;
        sweep(&mut scrolls);

        let context = scrolls
            .get_mut(cursor)
            .ok_or_else(|| DatastoreError::Backend(format!("scroll cursor {cursor} has expired")))?;

        let hits = context.next_page();
        context.expires_at = self.keep_alive();

        if context.is_drained() {
            scrolls.remove(cursor);
            return Ok(ScrollPage { cursor: None, hits });
        }

        Ok(ScrollPage { cursor: Some(cursor.to_string()), hits })
    }

    async fn clear_scroll(&self, cursor: &str) -> DatastoreResult<()> {
        self.enter("clear_scroll").await?;

        self.scrolls.write().await.remove(cursor);
        Ok(())
    }
}

fn terms(hits: &[RawHit], field: &str, min_count: u64) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();

    for hit in hits {
        let mut keys = values_at(&hit.source, field)
            .into_iter()
            .filter_map(Comparable::key)
            .collect::<Vec<_>>();
        keys.sort();
        keys.dedup();

        for key in keys {
            *counts.entry(key).or_insert(0) += 1;
        }
    }

    counts.retain(|_, count| *count >= min_count);
    counts
}

fn histogram(hits: &[RawHit], field: &str, range: &HistogramRange, min_count: u64) -> Vec<HistogramBucket> {
    let starts = range.bucket_starts();
    let mut counts = vec![0u64; starts.len()];
    let now = Utc::now();

    for hit in hits {
        let mut buckets = values_at(&hit.source, field)
            .into_iter()
            .filter_map(|value| bucket_of(value, range, now))
            .filter(|bucket| *bucket < starts.len())
            .collect::<Vec<_>>();
        buckets.sort_unstable();
        buckets.dedup();

        for bucket in buckets {
            counts[bucket] += 1;
        }
    }

    starts
        .into_iter()
        .zip(counts)
        .filter(|(_, count)| *count >= min_count)
        .map(|(start, count)| HistogramBucket { start, count })
        .collect()
}

/// Index of the bucket a value falls in, if it lies inside the range.
fn bucket_of(value: &Value, range: &HistogramRange, now: chrono::DateTime<Utc>) -> Option<usize> {
    let position = match *range {
        HistogramRange::Numeric { start, end, gap } => {
            let value = value.as_f64()?;
            if value < start || value >= end {
                return None;
            }
            ((value - start) / gap).floor()
        }
        HistogramRange::Date { start, end, gap } => {
            let value = parse_date(value.as_str()?, now)?;
            if value < start || value >= end {
                return None;
            }
            let offset = (value - start).num_milliseconds() as f64;
            (offset / gap.num_milliseconds() as f64).floor()
        }
    };

    Some(position as usize)
}

/// Drops scroll cursors whose keep-alive has run out.
fn sweep(scrolls: &mut HashMap<String, ScrollContext>) {
    let now = Instant::now();
    let before = scrolls.len();

    scrolls.retain(|_, context| context.expires_at > now);

    if scrolls.len() < before {
        debug!(expired = before - scrolls.len(), "swept expired scroll cursors");
    }
}

/// Builder for [`InMemoryBackend`].
#[derive(Default)]
pub struct InMemoryBackendBuilder {
    latency: Option<Duration>,
    scroll_keep_alive: Option<Duration>,
}

impl InMemoryBackendBuilder {
    /// Delays every call, to exercise timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// How long a scroll cursor survives without a follow-up page. Each page renews it.
    pub fn with_scroll_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.scroll_keep_alive = Some(keep_alive);
        self
    }
}

#[async_trait]
impl SearchBackendBuilder for InMemoryBackendBuilder {
    type Backend = InMemoryBackend;

    async fn build(self) -> DatastoreResult<Self::Backend> {
        Ok(InMemoryBackend {
            latency: self.latency,
            scroll_keep_alive: self.scroll_keep_alive,
            ..InMemoryBackend::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use triage_odm_core::{
        field::Field,
        model::Model,
        query::{Filter, SortDirection},
        result::BucketKey,
    };

    use super::*;

    fn source(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    async fn backend() -> InMemoryBackend {
        seeded(InMemoryBackend::new()).await
    }

    async fn seeded(backend: InMemoryBackend) -> InMemoryBackend {
        let model = Model::builder("hit")
            .field("analytic", Field::keyword())
            .field("score", Field::integer())
            .field("labels", Field::list(Field::keyword()))
            .build()
            .unwrap();

        backend.create_index("hit", &IndexMapping::for_model(&model)).await.unwrap();

        for (id, analytic, score, labels) in [
            ("h1", "A", 10, vec!["x"]),
            ("h2", "B", 50, vec!["x", "y"]),
            ("h3", "A", 90, vec![]),
        ] {
            backend
                .index_document("hit", id, source(json!({"analytic": analytic, "score": score, "labels": labels})), None)
                .await
                .unwrap();
        }

        backend
    }

    #[tokio::test]
    async fn writes_are_searchable_after_refresh() {
        let backend = backend().await;
        let request = SearchRequest::unbounded(Expr::MatchAll);

        assert_eq!(backend.search("hit", &request).await.unwrap().total, 0);
        assert!(backend.get_document("hit", "h1").await.unwrap().is_some());

        backend.refresh("hit").await.unwrap();
        assert_eq!(backend.search("hit", &request).await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn versions_are_checked_and_incremented() {
        let backend = backend().await;
        let doc = source(json!({"analytic": "C"}));

        assert_eq!(backend.index_document("hit", "h1", doc.clone(), Some(1)).await.unwrap(), 2);

        let err = backend.index_document("hit", "h1", doc.clone(), Some(1)).await.unwrap_err();
        assert!(matches!(err, DatastoreError::VersionConflict { expected: 1, actual: Some(2), .. }));

        let err = backend.index_document("hit", "h9", doc, Some(1)).await.unwrap_err();
        assert!(matches!(err, DatastoreError::VersionConflict { actual: None, .. }));
    }

    #[tokio::test]
    async fn search_sorts_pages_and_projects() {
        let backend = backend().await;
        backend.refresh("hit").await.unwrap();

        let request = SearchRequest {
            filter: Filter::gte("score", 20),
            offset: 0,
            rows: 1,
            sort: vec![Sort { field: "score".into(), direction: SortDirection::Desc }],
            field_list: vec!["analytic".into()],
        };
        let response = backend.search("hit", &request).await.unwrap();

        assert_eq!(response.total, 2);
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].id, "h3");
        assert_eq!(Value::Object(response.hits[0].source.clone()), json!({"analytic": "A"}));
    }

    #[tokio::test]
    async fn aggregations() {
        let backend = backend().await;
        backend.refresh("hit").await.unwrap();

        let terms = backend
            .aggregate("hit", &Expr::MatchAll, &Aggregation::Terms { field: "labels".into(), min_count: 1 })
            .await
            .unwrap();
        assert_eq!(terms, AggregationResult::Terms(BTreeMap::from([("x".into(), 2), ("y".into(), 1)])));

        let range = HistogramRange::Numeric { start: 0.0, end: 100.0, gap: 50.0 };
        let histogram = backend
            .aggregate("hit", &Expr::MatchAll, &Aggregation::Histogram { field: "score".into(), range, min_count: 0 })
            .await
            .unwrap();
        assert_eq!(
            histogram,
            AggregationResult::Histogram(vec![
                HistogramBucket { start: BucketKey::Number(0.0), count: 1 },
                HistogramBucket { start: BucketKey::Number(50.0), count: 2 },
            ])
        );

        let stats = backend
            .aggregate("hit", &Filter::eq("analytic", "A"), &Aggregation::Stats { field: "score".into() })
            .await
            .unwrap();
        assert_eq!(stats, AggregationResult::Stats(Stats { min: 10.0, max: 90.0, avg: 50.0, sum: 100.0, count: 2 }));
    }

    #[tokio::test]
    async fn scroll_pages_until_drained() {
        let backend = backend().await;
        backend.refresh("hit").await.unwrap();

        let first = backend
            .open_scroll("hit", &SearchRequest::unbounded(Expr::MatchAll), 2)
            .await
            .unwrap();
        assert_eq!(first.hits.len(), 2);
        assert_eq!(backend.open_scrolls().await, 1);

        let cursor = first.cursor.unwrap();
        let last = backend.next_scroll(&cursor).await.unwrap();
        assert_eq!(last.hits.len(), 1);
        assert_eq!(last.cursor, None);
        assert_eq!(backend.open_scrolls().await, 0);
        assert!(backend.next_scroll(&cursor).await.is_err());
    }

    #[tokio::test]
    async fn idle_scrolls_expire() {
        let backend = seeded(InMemoryBackend::builder().with_scroll_keep_alive(Duration::ZERO).build().await.unwrap()).await;
        backend.refresh("hit").await.unwrap();

        let first = backend
            .open_scroll("hit", &SearchRequest::unbounded(Expr::MatchAll), 1)
            .await
            .unwrap();
        let cursor = first.cursor.unwrap();

        assert_eq!(backend.open_scrolls().await, 0);
        assert!(matches!(backend.next_scroll(&cursor).await, Err(DatastoreError::Backend(_))));
    }

    #[tokio::test]
    async fn injected_faults() {
        let backend = backend().await;

        backend.inject_failures(1, TransportErrorKind::ConnectionDropped).await;
        let err = backend.ping().await.unwrap_err();
        assert!(err.is_transient());
        backend.ping().await.unwrap();

        backend.set_read_only("hit", true).await.unwrap();
        let err = backend.delete_document("hit", "h1").await.unwrap_err();
        assert!(matches!(err, DatastoreError::Ilm(_)));
        assert!(backend.get_document("hit", "h1").await.unwrap().is_some());
    }
}
