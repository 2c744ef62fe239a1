//! Typed schema primitives.
//!
//! A [`Field`] pairs a closed [`FieldKind`] with the attributes shared by every kind
//! (`indexed`, `stored`, `optional`, `default`, `description`). Each kind carries its
//! own validator, which turns raw JSON input into the canonical stored value or
//! rejects it with a [`DatastoreError::Validation`].
//!
//! # Example
//!
//! ```ignore
//! use triage_odm_core::field::Field;
//!
//! let status = Field::enumeration(["open", "in-progress", "resolved"])
//!     .description("Triage status of the hit");
//! let assignee = Field::keyword().optional();
//! ```

use std::{fmt, net::IpAddr, sync::{Arc, LazyLock}};

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use crate::{
    error::{DatastoreError, DatastoreResult},
    model::Model,
};

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9!#$%&'*+/=?^_`{|}~.-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*$")
        .expect("email pattern is valid")
});

/// Digest families accepted by [`FieldKind::Hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Md5,
    Sha1,
    Sha256,
}

impl HashKind {
    /// Number of hex characters in a digest of this family.
    pub fn hex_len(&self) -> usize {
        match self {
            HashKind::Md5 => 32,
            HashKind::Sha1 => 40,
            HashKind::Sha256 => 64,
        }
    }
}

/// A regex-constrained keyword. Matching is always against the whole value.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    anchored: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> DatastoreResult<Self> {
        let anchored = Regex::new(&format!("^(?:{source})$"))
            .map_err(|e| DatastoreError::validation(source, format!("invalid pattern: {e}")))?;

        Ok(Self { source: source.to_string(), anchored })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.anchored.is_match(value)
    }
}

/// The semantic type of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Exact-match string token.
    Keyword,
    /// Analyzed free text.
    Text,
    Integer,
    Float,
    Boolean,
    /// RFC 3339 timestamp, stored in UTC.
    Date,
    Uuid,
    /// One of a fixed set of values. Holds the declared (canonical) values.
    Enum(Vec<String>),
    Email,
    Ip,
    /// Fixed-length lowercase hex digest.
    Hash(HashKind),
    /// Keyword that must fully match a pattern.
    ValidatedKeyword(Pattern),
    /// Opaque JSON blob, stored as its encoded string and never searched.
    Json,
    /// Free-form object whose values all follow the child field.
    Mapping(Box<Field>),
    /// Array whose elements all follow the child field.
    List(Box<Field>),
    /// Nested sub-document.
    Compound(Arc<Model>),
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Keyword => "keyword",
            FieldKind::Text => "text",
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Boolean => "boolean",
            FieldKind::Date => "date",
            FieldKind::Uuid => "uuid",
            FieldKind::Enum(_) => "enum",
            FieldKind::Email => "email",
            FieldKind::Ip => "ip",
            FieldKind::Hash(HashKind::Md5) => "md5",
            FieldKind::Hash(HashKind::Sha1) => "sha1",
            FieldKind::Hash(HashKind::Sha256) => "sha256",
            FieldKind::ValidatedKeyword(_) => "validated_keyword",
            FieldKind::Json => "json",
            FieldKind::Mapping(_) => "mapping",
            FieldKind::List(_) => "list",
            FieldKind::Compound(_) => "compound",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed schema primitive with its storage attributes.
#[derive(Debug, Clone)]
pub struct Field {
    kind: FieldKind,
    indexed: bool,
    stored: bool,
    optional: bool,
    default: Option<Value>,
    description: Option<String>,
}

impl Field {
    /// Creates a required, indexed, non-stored field of the given kind.
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            indexed: true,
            stored: false,
            optional: false,
            default: None,
            description: None,
        }
    }

    pub fn keyword() -> Self {
        Self::new(FieldKind::Keyword)
    }

    pub fn text() -> Self {
        Self::new(FieldKind::Text)
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn date() -> Self {
        Self::new(FieldKind::Date)
    }

    pub fn uuid() -> Self {
        Self::new(FieldKind::Uuid)
    }

    /// Enum over the given declared values.
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(FieldKind::Enum(values.into_iter().map(Into::into).collect()))
    }

    pub fn email() -> Self {
        Self::new(FieldKind::Email)
    }

    pub fn ip() -> Self {
        Self::new(FieldKind::Ip)
    }

    pub fn hash(kind: HashKind) -> Self {
        Self::new(FieldKind::Hash(kind))
    }

    /// Keyword constrained by a regular expression.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the pattern does not compile.
    pub fn validated_keyword(pattern: &str) -> DatastoreResult<Self> {
        Ok(Self::new(FieldKind::ValidatedKeyword(Pattern::new(pattern)?)))
    }

    pub fn json() -> Self {
        Self::new(FieldKind::Json).index(false)
    }

    pub fn mapping(child: Field) -> Self {
        Self::new(FieldKind::Mapping(Box::new(child)))
    }

    pub fn list(child: Field) -> Self {
        Self::new(FieldKind::List(Box::new(child)))
    }

    pub fn compound(model: impl Into<Arc<Model>>) -> Self {
        Self::new(FieldKind::Compound(model.into()))
    }

    /// Marks the field optional: absent or null values are omitted from documents.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn index(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    pub fn store(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn is_stored(&self) -> bool {
        self.stored
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn get_description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The nested model, if this field is a compound or a list/mapping of compounds.
    pub fn nested_model(&self) -> Option<&Arc<Model>> {
        match &self.kind {
            FieldKind::Compound(model) => Some(model),
            FieldKind::List(child) | FieldKind::Mapping(child) => child.nested_model(),
            _ => None,
        }
    }

    /// Validates a present value and returns its canonical form.
    ///
    /// Returns `Ok(None)` when the value is null on an optional field, meaning the
    /// field is omitted from the document.
    pub(crate) fn check(
        &self,
        path: &str,
        value: &Value,
        ctx: &mut ValidationContext,
    ) -> DatastoreResult<Option<Value>> {
        if value.is_null() {
            return self.resolve_absent(path, ctx);
        }

        self.check_kind(path, value, ctx).map(Some)
    }

    /// Produces the value of a field missing from the input.
    pub(crate) fn resolve_absent(
        &self,
        path: &str,
        ctx: &mut ValidationContext,
    ) -> DatastoreResult<Option<Value>> {
        if let Some(default) = &self.default {
            return self.check_kind(path, default, ctx).map(Some);
        }

        if self.optional {
            return Ok(None);
        }

        match &self.kind {
            FieldKind::List(_) => Ok(Some(Value::Array(Vec::new()))),
            FieldKind::Mapping(_) => Ok(Some(Value::Object(Map::new()))),
            FieldKind::Compound(model) => model
                .validate_object(path, &Map::new(), ctx)
                .map(|object| Some(Value::Object(object))),
            _ => Err(DatastoreError::validation(path, "missing required field")),
        }
    }

    fn check_kind(
        &self,
        path: &str,
        value: &Value,
        ctx: &mut ValidationContext,
    ) -> DatastoreResult<Value> {
        match &self.kind {
            FieldKind::Keyword | FieldKind::Text => {
                expect_str(path, value, &self.kind).map(|s| Value::String(s.to_string()))
            }
            FieldKind::Integer => check_integer(path, value),
            FieldKind::Float => match value {
                Value::Number(_) => Ok(value.clone()),
                _ => Err(type_mismatch(path, value, &self.kind)),
            },
            FieldKind::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                _ => Err(type_mismatch(path, value, &self.kind)),
            },
            FieldKind::Date => check_date(path, expect_str(path, value, &self.kind)?),
            FieldKind::Uuid => {
                let raw = expect_str(path, value, &self.kind)?;

                uuid::Uuid::parse_str(raw)
                    .map(|id| Value::String(id.hyphenated().to_string()))
                    .map_err(|e| DatastoreError::validation(path, format!("invalid uuid '{raw}': {e}")))
            }
            FieldKind::Enum(values) => check_enum(path, expect_str(path, value, &self.kind)?, values),
            FieldKind::Email => {
                let raw = expect_str(path, value, &self.kind)?;

                if !EMAIL_PATTERN.is_match(raw) {
                    return Err(DatastoreError::validation(path, format!("invalid email address '{raw}'")));
                }

                Ok(Value::String(raw.to_lowercase()))
            }
            FieldKind::Ip => {
                let raw = expect_str(path, value, &self.kind)?;

                raw.parse::<IpAddr>()
                    .map(|ip| Value::String(ip.to_string()))
                    .map_err(|_| DatastoreError::validation(path, format!("invalid ip address '{raw}'")))
            }
            FieldKind::Hash(hash) => {
                let raw = expect_str(path, value, &self.kind)?;

                if raw.len() != hash.hex_len() || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(DatastoreError::validation(
                        path,
                        format!("expected {} hex characters for {}", hash.hex_len(), self.kind),
                    ));
                }

                Ok(Value::String(raw.to_ascii_lowercase()))
            }
            FieldKind::ValidatedKeyword(pattern) => {
                let raw = expect_str(path, value, &self.kind)?;

                if !pattern.is_match(raw) {
                    return Err(DatastoreError::validation(
                        path,
                        format!("'{raw}' does not match pattern '{}'", pattern.as_str()),
                    ));
                }

                Ok(Value::String(raw.to_string()))
            }
            FieldKind::Json => match value {
                Value::String(raw) => Ok(Value::String(raw.clone())),
                other => Ok(Value::String(serde_json::to_string(other)?)),
            },
            FieldKind::Mapping(child) => {
                let object = value
                    .as_object()
                    .ok_or_else(|| type_mismatch(path, value, &self.kind))?;
                let mut output = Map::with_capacity(object.len());

                for (key, item) in object {
                    if key.is_empty() || key.contains('.') {
                        return Err(DatastoreError::validation(path, format!("invalid mapping key '{key}'")));
                    }

                    if let Some(item) = child.check(&join_path(path, key), item, ctx)? {
                        output.insert(key.clone(), item);
                    }
                }

                Ok(Value::Object(output))
            }
            FieldKind::List(child) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| type_mismatch(path, value, &self.kind))?;
                let mut output = Vec::with_capacity(items.len());

                for item in items {
                    if item.is_null() {
                        return Err(DatastoreError::validation(path, "null list element"));
                    }

                    output.push(child.check_kind(path, item, ctx)?);
                }

                Ok(Value::Array(output))
            }
            FieldKind::Compound(model) => {
                let object = value
                    .as_object()
                    .ok_or_else(|| type_mismatch(path, value, &self.kind))?;

                model.validate_object(path, object, ctx).map(Value::Object)
            }
        }
    }
}

/// Collects non-fatal findings while a document is validated.
#[derive(Debug, Default)]
pub(crate) struct ValidationContext {
    /// Dotted paths of input keys that have no field in the model.
    pub unknown: Vec<String>,
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Normalises enum input so human-friendly spellings resolve to one value.
pub(crate) fn normalize_enum(value: &str) -> String {
    value.trim().to_uppercase().replace(['-', ' '], "_")
}

fn expect_str<'v>(path: &str, value: &'v Value, kind: &FieldKind) -> DatastoreResult<&'v str> {
    value.as_str().ok_or_else(|| type_mismatch(path, value, kind))
}

fn type_mismatch(path: &str, value: &Value, kind: &FieldKind) -> DatastoreError {
    let found = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };

    DatastoreError::validation(path, format!("expected {kind}, found {found}"))
}

fn check_integer(path: &str, value: &Value) -> DatastoreResult<Value> {
    let Value::Number(number) = value else {
        return Err(type_mismatch(path, value, &FieldKind::Integer));
    };

    if let Some(n) = number.as_i64() {
        return Ok(Value::from(n));
    }

    if let Some(n) = number.as_u64() {
        return Ok(Value::from(n));
    }

    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Ok(Value::from(f as i64))
        }
        _ => Err(DatastoreError::validation(path, format!("expected integer, found {number}"))),
    }
}

fn check_date(path: &str, raw: &str) -> DatastoreResult<Value> {
    let timestamp = if raw == "NOW" {
        Utc::now()
    } else {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| DatastoreError::validation(path, format!("invalid date '{raw}': {e}")))?
    };

    Ok(Value::String(timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)))
}

fn check_enum(path: &str, raw: &str, values: &[String]) -> DatastoreResult<Value> {
    let wanted = normalize_enum(raw);

    values
        .iter()
        .find(|candidate| normalize_enum(candidate) == wanted)
        .map(|canonical| Value::String(canonical.clone()))
        .ok_or_else(|| {
            DatastoreError::validation(path, format!("'{raw}' is not one of [{}]", values.join(", ")))
        })
}
