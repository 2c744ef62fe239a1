//! Document models: ordered collections of named fields.
//!
//! A model is declared through a [`ModelBuilder`] and sealed into an immutable
//! [`Model`] by [`ModelBuilder::build`]. Sealed models are shared behind an `Arc` and
//! may be embedded in other models as compound fields, which produces a tree whose
//! leaves are addressed by dotted paths (`howler.analytic`).
//!
//! # Example
//!
//! ```ignore
//! use triage_odm_core::{field::Field, model::Model};
//!
//! let howler = Model::builder("howler")
//!     .field("analytic", Field::keyword())
//!     .field("score", Field::float().default_value(0.0))
//!     .build()?;
//!
//! let hit = Model::builder("hit")
//!     .field("howler", Field::compound(howler))
//!     .build()?;
//! ```

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::{
    document::Document,
    error::{DatastoreError, DatastoreResult},
    field::{Field, FieldKind, ValidationContext, join_path},
};

/// An immutable document schema.
#[derive(Debug, Clone)]
pub struct Model {
    name: String,
    fields: IndexMap<String, Field>,
    index: bool,
    store: bool,
    description: Option<String>,
}

impl Model {
    /// Starts the declaration of a new model.
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the engine should index instances of this model.
    pub fn index(&self) -> bool {
        self.index
    }

    /// Whether full-document storage is required.
    pub fn store(&self) -> bool {
        self.store
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Resolves a dotted path to its field, descending through compounds,
    /// lists of compounds and mappings.
    pub fn field_at(&self, path: &str) -> Option<&Field> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let field = self.fields.get(head)?;

        match rest {
            None => Some(field),
            Some(rest) => descend(field, rest),
        }
    }

    /// Every leaf field keyed by its dotted path, in declaration order.
    ///
    /// Compounds (also inside lists) are expanded; mappings are leaves.
    pub fn flatten(&self) -> Vec<(String, &Field)> {
        let mut leaves = Vec::new();
        self.collect_leaves("", &mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, prefix: &str, leaves: &mut Vec<(String, &'a Field)>) {
        for (name, field) in &self.fields {
            let path = join_path(prefix, name);

            match field.kind() {
                FieldKind::Compound(model) => model.collect_leaves(&path, leaves),
                FieldKind::List(child) => match child.kind() {
                    FieldKind::Compound(model) => model.collect_leaves(&path, leaves),
                    _ => leaves.push((path, field)),
                },
                _ => leaves.push((path, field)),
            }
        }
    }

    /// Validates raw input and builds a document.
    ///
    /// Unknown keys are reported as warnings (their dotted paths), or rejected with a
    /// validation error listing them when `strict` is set.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Validation`] if any field fails validation or if the
    /// input is not an object.
    pub fn from_raw(self: &Arc<Self>, raw: Value, strict: bool) -> DatastoreResult<(Document, Vec<String>)> {
        let Value::Object(object) = raw else {
            return Err(DatastoreError::validation("", format!("{} documents must be objects", self.name)));
        };

        let mut ctx = ValidationContext::default();
        let data = self.validate_object("", &object, &mut ctx)?;

        if strict && !ctx.unknown.is_empty() {
            return Err(DatastoreError::validation(
                ctx.unknown.join(", "),
                "unknown field(s) in strict mode",
            ));
        }

        Ok((Document::new(Arc::clone(self), data), ctx.unknown))
    }

    pub(crate) fn validate_object(
        &self,
        prefix: &str,
        raw: &Map<String, Value>,
        ctx: &mut ValidationContext,
    ) -> DatastoreResult<Map<String, Value>> {
        let mut output = Map::with_capacity(self.fields.len());

        for (name, field) in &self.fields {
            let path = join_path(prefix, name);
            let value = match raw.get(name) {
                Some(value) => field.check(&path, value, ctx)?,
                None => field.resolve_absent(&path, ctx)?,
            };

            if let Some(value) = value {
                output.insert(name.clone(), value);
            }
        }

        for key in raw.keys() {
            if !self.fields.contains_key(key) {
                ctx.unknown.push(join_path(prefix, key));
            }
        }

        Ok(output)
    }

    /// Whether a model with the given name is embedded anywhere below this one.
    fn embeds(&self, name: &str) -> bool {
        self.fields
            .values()
            .filter_map(Field::nested_model)
            .any(|nested| nested.name == name || nested.embeds(name))
    }
}

fn descend<'a>(field: &'a Field, rest: &str) -> Option<&'a Field> {
    match field.kind() {
        FieldKind::Compound(model) => model.field_at(rest),
        FieldKind::List(child) => descend(child, rest),
        FieldKind::Mapping(child) => match rest.split_once('.') {
            None => Some(child),
            Some((_, deeper)) => descend(child, deeper),
        },
        _ => None,
    }
}

/// Open declaration of a [`Model`]. Fields keep their insertion order.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    name: String,
    fields: Vec<(String, Field)>,
    index: bool,
    store: bool,
    description: Option<String>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            index: true,
            store: true,
            description: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    pub fn index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }

    pub fn store(mut self, store: bool) -> Self {
        self.store = store;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|(existing, _)| existing == name)
    }

    pub(crate) fn push_field(&mut self, name: String, field: Field) {
        self.fields.push((name, field));
    }

    /// Checks field names and nesting without consuming the builder.
    ///
    /// # Errors
    ///
    /// - [`DatastoreError::Conflict`] if a field name is declared twice
    /// - [`DatastoreError::Validation`] for empty or dotted names, or when the model
    ///   embeds a model of its own name
    pub fn validate(&self) -> DatastoreResult<()> {
        if self.name.is_empty() {
            return Err(DatastoreError::validation("", "model name must not be empty"));
        }

        for (position, (name, field)) in self.fields.iter().enumerate() {
            check_field_name(name)?;

            if self.fields[..position].iter().any(|(earlier, _)| earlier == name) {
                return Err(DatastoreError::Conflict(format!(
                    "field '{name}' is defined twice on model '{}'",
                    self.name
                )));
            }

            if let Some(nested) = field.nested_model() {
                if nested.name == self.name || nested.embeds(&self.name) {
                    return Err(DatastoreError::validation(
                        name.as_str(),
                        format!("model '{}' cannot embed itself", self.name),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Seals the declaration into an immutable model.
    ///
    /// # Errors
    ///
    /// See [`ModelBuilder::validate`].
    pub fn build(self) -> DatastoreResult<Model> {
        self.validate()?;

        Ok(Model {
            name: self.name,
            fields: self.fields.into_iter().collect(),
            index: self.index,
            store: self.store,
            description: self.description,
        })
    }
}

pub(crate) fn check_field_name(name: &str) -> DatastoreResult<()> {
    if name.is_empty() || name.contains('.') {
        return Err(DatastoreError::validation(
            name,
            "field names must be non-empty and must not contain '.'",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn hit_model() -> Arc<Model> {
        let comment = Model::builder("comment")
            .field("user", Field::keyword())
            .field("value", Field::text())
            .build()
            .unwrap();
        let howler = Model::builder("howler")
            .field("analytic", Field::keyword())
            .field("status", Field::enumeration(["open", "in-progress", "resolved"]).default_value("open"))
            .field("assignment", Field::keyword().optional())
            .field("comment", Field::list(Field::compound(comment)))
            .build()
            .unwrap();

        Arc::new(
            Model::builder("hit")
                .field("howler", Field::compound(howler))
                .field("labels", Field::mapping(Field::keyword()))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn from_raw_applies_defaults_and_omits_optionals() {
        let model = hit_model();
        let (doc, warnings) = model
            .from_raw(json!({"howler": {"analytic": "A", "assignment": null}}), false)
            .unwrap();

        assert!(warnings.is_empty());
        assert_eq!(
            doc.to_raw(),
            json!({"howler": {"analytic": "A", "status": "open", "comment": []}, "labels": {}})
        );
    }

    #[test]
    fn round_trip_is_idempotent() {
        let model = hit_model();
        let raw = json!({
            "howler": {
                "analytic": "A",
                "status": "IN_PROGRESS",
                "comment": [{"user": "u1", "value": "looks bad"}],
            },
            "labels": {"team": "blue"},
        });

        let (first, _) = model.from_raw(raw, true).unwrap();
        let (second, _) = model.from_raw(first.to_raw(), true).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.get("howler.status"), Some(&json!("in-progress")));
    }

    #[test]
    fn unknown_keys_warn_or_fail_in_strict_mode() {
        let model = hit_model();
        let raw = json!({"howler": {"analytic": "A", "extra": 1}, "other": true});

        let (_, warnings) = model.from_raw(raw.clone(), false).unwrap();
        assert_eq!(warnings, vec!["howler.extra".to_string(), "other".to_string()]);

        match model.from_raw(raw, true) {
            Err(DatastoreError::Validation { path, .. }) => assert_eq!(path, "howler.extra, other"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_field_names_its_path() {
        let model = hit_model();

        match model.from_raw(json!({"howler": {}}), false) {
            Err(DatastoreError::Validation { path, .. }) => assert_eq!(path, "howler.analytic"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn flatten_yields_dotted_paths_in_order() {
        let model = hit_model();
        let paths = model.flatten().into_iter().map(|(path, _)| path).collect::<Vec<_>>();

        assert_eq!(
            paths,
            vec![
                "howler.analytic",
                "howler.status",
                "howler.assignment",
                "howler.comment.user",
                "howler.comment.value",
                "labels",
            ]
        );
        assert!(model.field_at("howler.comment.user").is_some());
        assert!(model.field_at("labels.anything").is_some());
        assert!(model.field_at("howler.missing").is_none());
    }

    #[test]
    fn duplicate_field_names_conflict() {
        let result = Model::builder("hit")
            .field("id", Field::keyword())
            .field("id", Field::integer())
            .build();

        assert!(matches!(result, Err(DatastoreError::Conflict(_))));
    }

    #[test]
    fn self_embedding_is_rejected_at_definition() {
        let inner = Model::builder("hit").field("id", Field::keyword()).build().unwrap();
        let wrapper = Model::builder("wrapper").field("hit", Field::compound(inner)).build().unwrap();

        let direct = Model::builder("hit").field("child", Field::compound(wrapper.clone())).build();
        assert!(matches!(direct, Err(DatastoreError::Validation { .. })));

        let through_list = Model::builder("wrapper").field("items", Field::list(Field::compound(wrapper))).build();
        assert!(matches!(through_list, Err(DatastoreError::Validation { .. })));
    }
}
