//! Search and aggregation result types.
//!
//! [`SearchResult`] is one pagination window over a query's matches. Its invariant is
//! `items.len() <= rows` and `total >= items.len()`: `total` always counts every match,
//! independent of the window.

use std::fmt;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DatastoreError, DatastoreResult};

/// A single window of search results.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResult<T> {
    pub offset: usize,
    pub rows: usize,
    /// Number of matches across all windows.
    pub total: u64,
    pub items: Vec<T>,
}

impl<T> SearchResult<T> {
    pub fn builder(items: Vec<T>) -> SearchResultBuilder<T> {
        SearchResultBuilder::new(items)
    }

    /// Offset of the next window, if more matches remain.
    pub fn next_offset(&self) -> Option<usize> {
        let end = self.offset + self.items.len();
        (self.items.len() == self.rows && (end as u64) < self.total).then_some(end)
    }

    /// Converts every item, keeping the window metadata.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<SearchResult<U>, E> {
        Ok(SearchResult {
            offset: self.offset,
            rows: self.rows,
            total: self.total,
            items: self.items.into_iter().map(f).collect::<Result<Vec<_>, E>>()?,
        })
    }
}

impl<T> Default for SearchResult<T> {
    fn default() -> Self {
        Self { offset: 0, rows: 0, total: 0, items: Vec::new() }
    }
}

/// Builder for [`SearchResult`]. The `total` is raised to at least the item count.
pub struct SearchResultBuilder<T> {
    items: Vec<T>,
    offset: usize,
    rows: Option<usize>,
    total: u64,
}

impl<T> SearchResultBuilder<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items, offset: 0, rows: None, total: 0 }
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the window size. Items beyond it are dropped.
    pub fn with_rows(mut self, rows: usize) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    pub fn build(mut self) -> SearchResult<T> {
        let rows = self.rows.unwrap_or(self.items.len());
        self.items.truncate(rows);

        SearchResult {
            offset: self.offset,
            rows,
            total: self.total.max(self.items.len() as u64),
            items: self.items,
        }
    }
}

/// A stored document together with its version counter.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// One distinct value of a grouped search with its representative records.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupedItem {
    /// The group's value, rendered as a string.
    pub value: String,
    /// Number of matches in this group.
    pub total: u64,
    pub items: Vec<Map<String, Value>>,
}

/// Summary statistics of a numeric field.
///
/// `count` only includes documents where the field is present. When it is zero
/// every other statistic is zero as well.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub sum: f64,
    pub count: u64,
}

impl Stats {
    /// Accumulates statistics over a sequence of values.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = Stats { min: f64::INFINITY, max: f64::NEG_INFINITY, ..Stats::default() };

        for value in values {
            stats.min = stats.min.min(value);
            stats.max = stats.max.max(value);
            stats.sum += value;
            stats.count += 1;
        }

        if stats.count == 0 {
            return Stats::default();
        }

        stats.avg = stats.sum / stats.count as f64;
        stats
    }
}

/// The `[start, end)` span and bucket width of a histogram.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HistogramRange {
    Numeric { start: f64, end: f64, gap: f64 },
    Date { start: DateTime<Utc>, end: DateTime<Utc>, gap: Duration },
}

/// Most buckets a single histogram may produce.
pub const MAX_HISTOGRAM_BUCKETS: usize = 10_000;

impl HistogramRange {
    /// Number of buckets in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::InvalidQuery`] for non-finite bounds, a gap that is not
    /// positive, a span with `start >= end`, or more than [`MAX_HISTOGRAM_BUCKETS`]
    /// buckets.
    pub fn bucket_count(&self) -> DatastoreResult<usize> {
        let (span, gap) = match *self {
            HistogramRange::Numeric { start, end, gap } => {
                if !(start.is_finite() && end.is_finite() && gap.is_finite()) {
                    return Err(invalid_range(self, "bounds and gap must be finite"));
                }

                (end - start, gap)
            }
            HistogramRange::Date { start, end, gap } => {
                if gap < Duration::milliseconds(1) {
                    return Err(invalid_range(self, "the gap must be at least one millisecond"));
                }

                ((end - start).num_milliseconds() as f64, gap.num_milliseconds() as f64)
            }
        };

        if gap <= 0.0 {
            return Err(invalid_range(self, "the gap must be positive"));
        }

        if span <= 0.0 {
            return Err(invalid_range(self, "start must be before end"));
        }

        let count = (span / gap).ceil();

        if !count.is_finite() || count > MAX_HISTOGRAM_BUCKETS as f64 {
            return Err(invalid_range(self, format!("more than {MAX_HISTOGRAM_BUCKETS} buckets")));
        }

        Ok(count as usize)
    }

    /// Every bucket start in `[start, end)`, in ascending order. Invalid ranges have none.
    pub fn bucket_starts(&self) -> Vec<BucketKey> {
        let Ok(count) = self.bucket_count() else {
            return Vec::new();
        };

        match *self {
            HistogramRange::Numeric { start, end, gap } => (0..count)
                .map(|index| start + gap * index as f64)
                .take_while(|bucket| *bucket < end)
                .map(BucketKey::Number)
                .collect(),
            HistogramRange::Date { start, gap, .. } => (0..count)
                .filter_map(|index| start.checked_add_signed(gap * index as i32))
                .map(BucketKey::Date)
                .collect(),
        }
    }
}

fn invalid_range(range: &HistogramRange, reason: impl fmt::Display) -> DatastoreError {
    DatastoreError::InvalidQuery(format!("invalid histogram range {range:?}: {reason}"))
}

/// Start of a histogram bucket.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(untagged)]
pub enum BucketKey {
    Number(f64),
    Date(DateTime<Utc>),
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Number(value) => write!(f, "{value}"),
            BucketKey::Date(value) => f.write_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct HistogramBucket {
    pub start: BucketKey,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn builder_enforces_window_invariants() {
        let result = SearchResult::builder(vec![1, 2, 3]).with_rows(2).with_total(1).build();

        assert_eq!(result.items, vec![1, 2]);
        assert_eq!(result.rows, 2);
        assert_eq!(result.total, 2);
    }

    #[test]
    fn next_offset_stops_at_total() {
        let first = SearchResult::builder(vec![1, 2]).with_rows(2).with_total(3).build();
        assert_eq!(first.next_offset(), Some(2));

        let last = SearchResult::builder(vec![3]).with_offset(2).with_rows(2).with_total(3).build();
        assert_eq!(last.next_offset(), None);
    }

    #[test]
    fn stats_of_nothing_are_zero() {
        assert_eq!(Stats::from_values(Vec::new()), Stats::default());

        let stats = Stats::from_values([2.0, 4.0, 9.0]);
        assert_eq!(stats, Stats { min: 2.0, max: 9.0, avg: 5.0, sum: 15.0, count: 3 });
    }

    #[test]
    fn bucket_starts_are_half_open() {
        let numeric = HistogramRange::Numeric { start: 0.0, end: 30.0, gap: 10.0 };
        assert_eq!(
            numeric.bucket_starts(),
            vec![BucketKey::Number(0.0), BucketKey::Number(10.0), BucketKey::Number(20.0)]
        );

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let dates = HistogramRange::Date { start, end: start + Duration::days(2), gap: Duration::days(1) };
        assert_eq!(dates.bucket_starts().len(), 2);
        assert_eq!(dates.bucket_starts()[1].to_string(), "2024-01-02T00:00:00Z");
    }

    #[test]
    fn unusable_ranges_have_no_buckets() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let ranges = [
            HistogramRange::Numeric { start: f64::NAN, end: 10.0, gap: 1.0 },
            HistogramRange::Numeric { start: 0.0, end: f64::INFINITY, gap: 1.0 },
            HistogramRange::Numeric { start: -f64::MAX, end: f64::MAX, gap: 1.0 },
            HistogramRange::Numeric { start: 100.0, end: 0.0, gap: 10.0 },
            HistogramRange::Numeric { start: 0.0, end: 0.0, gap: 10.0 },
            HistogramRange::Numeric { start: 0.0, end: 10.0, gap: -1.0 },
            HistogramRange::Numeric { start: 0.0, end: 1.0, gap: 1e-9 },
            HistogramRange::Date { start, end: start - Duration::days(1), gap: Duration::hours(1) },
            HistogramRange::Date { start, end: start + Duration::days(1), gap: Duration::microseconds(10) },
            HistogramRange::Date { start, end: start + Duration::days(365), gap: Duration::seconds(1) },
        ];

        for range in ranges {
            assert!(matches!(range.bucket_count(), Err(DatastoreError::InvalidQuery(_))), "{range:?}");
            assert!(range.bucket_starts().is_empty(), "{range:?}");
        }
    }

    #[test]
    fn bucket_count_is_capped() {
        let widest = HistogramRange::Numeric { start: 0.0, end: MAX_HISTOGRAM_BUCKETS as f64, gap: 1.0 };
        assert_eq!(widest.bucket_count().unwrap(), MAX_HISTOGRAM_BUCKETS);
        assert_eq!(widest.bucket_starts().len(), MAX_HISTOGRAM_BUCKETS);

        let partial = HistogramRange::Numeric { start: 0.0, end: 25.0, gap: 10.0 };
        assert_eq!(partial.bucket_count().unwrap(), 3);
    }
}
