//! Query expression evaluation over stored JSON objects.
//!
//! Values are resolved by dotted path, looking through arrays at every level, and a
//! field matches when any of its values matches. Filter values are typed through the
//! index mapping, so the untyped strings produced by query strings compare correctly
//! with numbers, booleans and dates.

use std::{
    cmp::Ordering,
    collections::{HashMap, hash_map::Entry},
};

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use triage_odm_core::{
    error::{DatastoreError, DatastoreResult},
    mapping::{IndexMapping, MappingType},
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection},
};

/// Mapping type of every mapped path.
#[derive(Debug, Clone, Default)]
pub(crate) struct FieldTypes {
    types: HashMap<String, MappingType>,
}

impl FieldTypes {
    pub fn from_mapping(mapping: &IndexMapping) -> Self {
        Self {
            types: mapping
                .flatten()
                .into_iter()
                .map(|(path, field)| (path, field.kind))
                .collect(),
        }
    }

    pub fn get(&self, path: &str) -> Option<MappingType> {
        self.types.get(path).copied()
    }
}

/// Every value at a dotted path. Arrays are flattened and nulls skipped.
pub(crate) fn values_at<'a>(object: &'a Map<String, Value>, path: &str) -> Vec<&'a Value> {
    let mut values = Vec::new();
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    if let Some(value) = object.get(head) {
        collect(value, rest, &mut values);
    }

    values
}

fn collect<'a>(value: &'a Value, rest: Option<&str>, values: &mut Vec<&'a Value>) {
    match (value, rest) {
        (Value::Null, _) => {}
        (Value::Array(items), _) => {
            for item in items {
                collect(item, rest, values);
            }
        }
        (_, None) => values.push(value),
        (Value::Object(object), Some(path)) => values.extend(values_at(object, path)),
        _ => {}
    }
}

/// A value normalised for comparison.
#[derive(Debug, Clone)]
pub(crate) enum Comparable {
    Bool(bool),
    Number(f64),
    Date(DateTime<Utc>),
    String(String),
}

impl Comparable {
    /// Interprets a value as the given mapping type, falling back to its JSON type.
    pub fn typed(value: &Value, kind: Option<MappingType>, now: DateTime<Utc>) -> Option<Self> {
        match (kind, value) {
            (Some(MappingType::Date), Value::String(raw)) => parse_date(raw, now).map(Comparable::Date),
            (Some(MappingType::Date), Value::Number(millis)) => millis
                .as_i64()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
                .map(Comparable::Date),
            (Some(MappingType::Long | MappingType::Double), Value::String(raw)) => {
                raw.trim().parse::<f64>().ok().map(Comparable::Number)
            }
            (Some(MappingType::Boolean), Value::String(raw)) => raw.trim().parse::<bool>().ok().map(Comparable::Bool),
            (Some(MappingType::Keyword | MappingType::Text | MappingType::Ip), Value::Number(number)) => {
                Some(Comparable::String(number.to_string()))
            }
            (Some(MappingType::Keyword | MappingType::Text), Value::Bool(flag)) => {
                Some(Comparable::String(flag.to_string()))
            }
            (_, Value::Bool(flag)) => Some(Comparable::Bool(*flag)),
            (_, Value::Number(number)) => number.as_f64().map(Comparable::Number),
            (_, Value::String(raw)) => Some(Comparable::String(raw.clone())),
            _ => None,
        }
    }

    /// Interprets a filter value so that it compares with a stored one.
    fn like(value: &Value, stored: &Comparable, now: DateTime<Utc>) -> Option<Self> {
        match (stored, value) {
            (Comparable::Number(_), Value::String(raw)) => raw.trim().parse::<f64>().ok().map(Comparable::Number),
            (Comparable::Bool(_), Value::String(raw)) => raw.trim().parse::<bool>().ok().map(Comparable::Bool),
            (Comparable::Date(_), _) => Comparable::typed(value, Some(MappingType::Date), now),
            (Comparable::String(_), Value::Number(number)) => Some(Comparable::String(number.to_string())),
            (Comparable::String(_), Value::Bool(flag)) => Some(Comparable::String(flag.to_string())),
            _ => Comparable::typed(value, None, now),
        }
    }

    /// Text used for terms aggregations and grouping.
    pub fn key(value: &Value) -> Option<String> {
        match value {
            Value::String(raw) => Some(raw.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }
}

impl PartialEq for Comparable {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Comparable {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::Date(a), Comparable::Date(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Parses an RFC 3339 timestamp, a plain `YYYY-MM-DD` date, or date math relative to
/// `now` (`now`, `now-7d`, `now+1h/d`).
pub(crate) fn parse_date(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Some(math) = raw.strip_prefix("now") {
        return date_math(now, math);
    }

    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| Utc.from_utc_datetime(&date))
}

fn date_math(mut date: DateTime<Utc>, math: &str) -> Option<DateTime<Utc>> {
    let mut chars = math.chars().peekable();

    while let Some(op) = chars.next() {
        if op == '/' {
            date = round_down(date, chars.next()?)?;
            continue;
        }

        let sign = match op {
            '+' => 1,
            '-' => -1,
            _ => return None,
        };

        let mut digits = String::new();
        while let Some(digit) = chars.next_if(char::is_ascii_digit) {
            digits.push(digit);
        }

        let amount = if digits.is_empty() { 1 } else { digits.parse::<i64>().ok()? };
        date = shift(date, sign * amount, chars.next()?)?;
    }

    Some(date)
}

fn shift(date: DateTime<Utc>, amount: i64, unit: char) -> Option<DateTime<Utc>> {
    let months = |count: i64| {
        let months = Months::new(u32::try_from(count.unsigned_abs()).ok()?);
        if count < 0 { date.checked_sub_months(months) } else { date.checked_add_months(months) }
    };

    match unit {
        'y' => months(amount.checked_mul(12)?),
        'M' => months(amount),
        'w' => date.checked_add_signed(Duration::try_weeks(amount)?),
        'd' => date.checked_add_signed(Duration::try_days(amount)?),
        'h' | 'H' => date.checked_add_signed(Duration::try_hours(amount)?),
        'm' => date.checked_add_signed(Duration::try_minutes(amount)?),
        's' => date.checked_add_signed(Duration::try_seconds(amount)?),
        _ => None,
    }
}

fn round_down(date: DateTime<Utc>, unit: char) -> Option<DateTime<Utc>> {
    let day = date.date_naive();
    let time = date.naive_utc();

    let start = match unit {
        'y' => NaiveDate::from_ymd_opt(day.year(), 1, 1)?.and_hms_opt(0, 0, 0)?,
        'M' => NaiveDate::from_ymd_opt(day.year(), day.month(), 1)?.and_hms_opt(0, 0, 0)?,
        'w' => (day - Duration::days(i64::from(day.weekday().num_days_from_monday()))).and_hms_opt(0, 0, 0)?,
        'd' => day.and_hms_opt(0, 0, 0)?,
        'h' | 'H' => time.with_minute(0)?.with_second(0)?.with_nanosecond(0)?,
        'm' => time.with_second(0)?.with_nanosecond(0)?,
        's' => time.with_nanosecond(0)?,
        _ => return None,
    };

    Some(Utc.from_utc_datetime(&start))
}

/// Lowercased alphanumeric tokens of analyzed text.
fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Compiles a glob where `*` matches any run, `?` one character and `\` escapes.
pub(crate) fn wildcard_regex(pattern: &str, case_insensitive: bool) -> DatastoreResult<Regex> {
    let mut source = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    source.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }

    source.push('$');
    Regex::new(&source).map_err(|err| DatastoreError::InvalidQuery(format!("invalid wildcard '{pattern}': {err}")))
}

/// Evaluates expressions against one document at a time. Compiled wildcard patterns
/// are kept across documents.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Map<String, Value>,
    types: &'a FieldTypes,
    now: DateTime<Utc>,
    patterns: HashMap<(String, bool), Regex>,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Map<String, Value>, types: &'a FieldTypes, now: DateTime<Utc>) -> Self {
        Self { document, types, now, patterns: HashMap::new() }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DatastoreResult<bool> {
        self.visit_expr(expr)
    }

    /// The documents matching `expr`, in input order.
    pub fn filter_documents<T>(
        documents: impl IntoIterator<Item = (T, &'a Map<String, Value>)>,
        expr: &Expr,
        types: &'a FieldTypes,
    ) -> DatastoreResult<Vec<T>> {
        let empty = Map::new();
        let mut evaluator = DocumentEvaluator::new(&empty, types, Utc::now());
        let mut matches = Vec::new();

        for (item, document) in documents {
            evaluator.document = document;

            if evaluator.evaluate(expr)? {
                matches.push(item);
            }
        }

        Ok(matches)
    }

    fn wildcard(&mut self, pattern: &str, case_insensitive: bool) -> DatastoreResult<&Regex> {
        Ok(match self.patterns.entry((pattern.to_string(), case_insensitive)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(wildcard_regex(pattern, case_insensitive)?),
        })
    }

    fn is_text(&self, field: &str) -> bool {
        self.types.get(field) == Some(MappingType::Text)
    }

    fn compare(&self, field: &str, stored: &Value, value: &Value) -> Option<Ordering> {
        let kind = self.types.get(field);
        let stored = Comparable::typed(stored, kind, self.now)?;
        let value = Comparable::like(value, &stored, self.now)?;

        stored.partial_cmp(&value)
    }

    fn equals(&self, field: &str, stored: &Value, value: &Value) -> bool {
        if self.is_text(field)
            && let (Value::String(text), Some(phrase)) = (stored, Comparable::key(value))
        {
            let haystack = tokens(text);
            let needle = tokens(&phrase);

            return !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle.as_slice());
        }

        self.compare(field, stored, value) == Some(Ordering::Equal)
    }

    fn any_equals(&self, field: &str, values: &[&Value], value: &Value) -> bool {
        let candidates = match value {
            Value::Array(candidates) => candidates.iter().collect::<Vec<_>>(),
            single => vec![single],
        };

        values
            .iter()
            .any(|stored| candidates.iter().any(|candidate| self.equals(field, stored, candidate)))
    }

    fn string_test(&self, field: &str, values: &[&Value], value: &Value, test: fn(&str, &str) -> bool) -> bool {
        let Some(needle) = Comparable::key(value) else {
            return false;
        };

        if self.is_text(field) {
            let needle = needle.to_lowercase();
            return values
                .iter()
                .filter_map(|stored| stored.as_str())
                .any(|stored| test(&stored.to_lowercase(), &needle));
        }

        values
            .iter()
            .filter_map(|stored| Comparable::key(stored))
            .any(|stored| test(&stored, &needle))
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DatastoreError;

    fn visit_match_all(&mut self) -> Result<Self::Output, Self::Error> {
        Ok(true)
    }

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(!values_at(self.document, field).is_empty() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Value) -> Result<Self::Output, Self::Error> {
        let values = values_at(self.document, field);

        Ok(match op {
            FieldOp::Eq => values.iter().any(|stored| self.equals(field, stored, value)),
            FieldOp::Ne => !values.iter().any(|stored| self.equals(field, stored, value)),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => values.iter().any(|stored| {
                match self.compare(field, stored, value) {
                    Some(ordering) => match op {
                        FieldOp::Gt => ordering == Ordering::Greater,
                        FieldOp::Gte => ordering != Ordering::Less,
                        FieldOp::Lt => ordering == Ordering::Less,
                        _ => ordering != Ordering::Greater,
                    },
                    None => false,
                }
            }),
            FieldOp::Contains => self.string_test(field, &values, value, |stored, needle| stored.contains(needle)),
            FieldOp::StartsWith => self.string_test(field, &values, value, |stored, needle| stored.starts_with(needle)),
            FieldOp::EndsWith => self.string_test(field, &values, value, |stored, needle| stored.ends_with(needle)),
            FieldOp::Wildcard => {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| DatastoreError::InvalidQuery(format!("wildcard on '{field}' needs a string")))?;

                if self.is_text(field) {
                    let regex = self.wildcard(pattern, true)?;
                    values
                        .iter()
                        .filter_map(|stored| stored.as_str())
                        .any(|text| tokens(text).iter().any(|token| regex.is_match(token)) || regex.is_match(text))
                } else {
                    let regex = self.wildcard(pattern, false)?;
                    values
                        .iter()
                        .filter_map(|stored| Comparable::key(stored))
                        .any(|stored| regex.is_match(&stored))
                }
            }
            FieldOp::AnyOf => self.any_equals(field, &values, value),
            FieldOp::NoneOf => !self.any_equals(field, &values, value),
        })
    }
}

/// Orders two documents by the sort keys. Missing values sort last in either direction.
pub(crate) fn compare_documents(
    left: &Map<String, Value>,
    right: &Map<String, Value>,
    sort: &[Sort],
    types: &FieldTypes,
) -> Ordering {
    let now = Utc::now();

    for key in sort {
        let kind = types.get(&key.field);
        let first = |document: &Map<String, Value>| {
            values_at(document, &key.field)
                .first()
                .and_then(|value| Comparable::typed(value, kind, now))
        };

        let ordering = match (first(left), first(right)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => {
                let ordering = a.partial_cmp(&b).unwrap_or(Ordering::Equal);
                match key.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            }
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Copies only the listed dotted paths. Arrays met along a path are copied whole.
pub(crate) fn project(source: &Map<String, Value>, field_list: &[String]) -> Map<String, Value> {
    if field_list.is_empty() {
        return source.clone();
    }

    let mut projected = Map::new();

    for path in field_list {
        project_path(source, path, &mut projected);
    }

    projected
}

fn project_path(source: &Map<String, Value>, path: &str, target: &mut Map<String, Value>) {
    match path.split_once('.') {
        None => {
            if let Some(value) = source.get(path) {
                target.insert(path.to_string(), value.clone());
            }
        }
        Some((head, rest)) => match source.get(head) {
            Some(Value::Object(child)) => {
                let entry = target
                    .entry(head.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));

                if let Value::Object(entry) = entry {
                    project_path(child, rest, entry);
                }
            }
            Some(value @ Value::Array(_)) => {
                target.insert(head.to_string(), value.clone());
            }
            _ => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use triage_odm_core::{field::Field, model::Model, parser::{LuceneQueryParser, QueryParser}, query::Filter};

    use super::*;

    fn types() -> FieldTypes {
        let comment = Model::builder("comment")
            .field("user", Field::keyword())
            .field("value", Field::text())
            .build()
            .unwrap();
        let howler = Model::builder("howler")
            .field("analytic", Field::keyword())
            .field("score", Field::float())
            .field("escalated", Field::boolean())
            .field("comment", Field::list(Field::compound(comment)))
            .build()
            .unwrap();
        let hit = Model::builder("hit")
            .field("howler", Field::compound(howler))
            .field("timestamp", Field::date())
            .field("labels", Field::list(Field::keyword()))
            .build()
            .unwrap();

        FieldTypes::from_mapping(&IndexMapping::for_model(&hit))
    }

    fn hit() -> Map<String, Value> {
        json!({
            "howler": {
                "analytic": "Sigma Rule",
                "score": 72.5,
                "escalated": false,
                "comment": [
                    {"user": "alice", "value": "Looks like a False positive"},
                    {"user": "bob", "value": "confirmed"},
                ],
            },
            "timestamp": "2024-03-01T12:00:00.000000Z",
            "labels": ["phishing", "mail"],
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn matches(query: &str) -> bool {
        let expr = LuceneQueryParser::new().parse(query).unwrap();
        let types = types();
        let document = hit();

        DocumentEvaluator::new(&document, &types, Utc::now()).evaluate(&expr).unwrap()
    }

    #[test]
    fn values_look_through_arrays() {
        let document = hit();
        let users = values_at(&document, "howler.comment.user");

        assert_eq!(users, vec![&json!("alice"), &json!("bob")]);
        assert!(values_at(&document, "howler.missing").is_empty());
    }

    #[test]
    fn query_strings_are_typed_through_the_mapping() {
        assert!(matches("howler.score:[70 TO 80]"));
        assert!(!matches("howler.score:{72.5 TO *]"));
        assert!(matches("howler.escalated:false"));
        assert!(matches("timestamp:[2024-01-01 TO now]"));
        assert!(!matches("timestamp:[now-7d TO now]"));
    }

    #[test]
    fn keyword_text_and_wildcards() {
        assert!(matches(r#"howler.analytic:"Sigma Rule""#));
        assert!(!matches("howler.analytic:sigma"));
        assert!(matches("howler.analytic:Sig*"));
        assert!(matches(r#"howler.comment.value:"false positive""#));
        assert!(matches("howler.comment.value:conf?rmed"));
        assert!(matches("labels:mail AND NOT labels:malware"));
        assert!(matches("_exists_:howler.comment AND -_exists_:howler.assignment"));
    }

    #[test]
    fn structured_filters() {
        let types = types();
        let document = hit();
        let mut evaluator = DocumentEvaluator::new(&document, &types, Utc::now());

        assert!(evaluator.evaluate(&Filter::any_of("labels", json!(["spam", "mail"]))).unwrap());
        assert!(evaluator.evaluate(&Filter::none_of("labels", json!(["spam"]))).unwrap());
        assert!(evaluator.evaluate(&Filter::gte("howler.score", 72.5)).unwrap());
        assert!(evaluator.evaluate(&Filter::starts_with("howler.analytic", "Sigma")).unwrap());
        assert!(!evaluator.evaluate(&Filter::eq("howler.comment.user", "carol")).unwrap());
    }

    #[test]
    fn wildcard_patterns_compile_once_per_evaluator() {
        let types = types();
        let document = hit();
        let other = json!({"howler": {"analytic": "Sigmund"}}).as_object().cloned().unwrap();
        let expr = Filter::wildcard("howler.analytic", "Sig*");
        let mut evaluator = DocumentEvaluator::new(&document, &types, Utc::now());

        assert!(evaluator.evaluate(&expr).unwrap());

        evaluator.document = &other;
        assert!(evaluator.evaluate(&expr).unwrap());
        assert!(!evaluator.evaluate(&Filter::wildcard("howler.analytic", "Rule*")).unwrap());

        assert_eq!(evaluator.patterns.len(), 2);
    }

    #[test]
    fn date_math_rounds_and_shifts() {
        let now = Utc.with_ymd_and_hms(2024, 3, 15, 13, 45, 10).unwrap();

        assert_eq!(parse_date("now/d", now), Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).single());
        assert_eq!(parse_date("now-1M/M", now), Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).single());
        assert_eq!(parse_date("now+2h", now), Utc.with_ymd_and_hms(2024, 3, 15, 15, 45, 10).single());
        assert_eq!(parse_date("now-1x", now), None);
    }

    #[test]
    fn sort_puts_missing_values_last() {
        let types = types();
        let low = json!({"howler": {"score": 10}}).as_object().cloned().unwrap();
        let high = json!({"howler": {"score": 90}}).as_object().cloned().unwrap();
        let none = json!({"howler": {}}).as_object().cloned().unwrap();
        let desc = [Sort { field: "howler.score".into(), direction: SortDirection::Desc }];

        assert_eq!(compare_documents(&high, &low, &desc, &types), Ordering::Less);
        assert_eq!(compare_documents(&none, &low, &desc, &types), Ordering::Greater);
    }

    #[test]
    fn projection_keeps_nested_paths() {
        let projected = project(&hit(), &["howler.analytic".into(), "labels".into()]);

        assert_eq!(
            Value::Object(projected),
            json!({"howler": {"analytic": "Sigma Rule"}, "labels": ["phishing", "mail"]})
        );
    }
}
