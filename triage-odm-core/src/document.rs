//! Validated documents bound to a model.
//!
//! A [`Document`] is only ever produced by validation ([`Model::from_raw`] or
//! [`Document::from_serializable`]), so its data always satisfies its model. Mutation
//! re-validates the whole tree and leaves the document untouched on failure. Documents
//! are plain in-memory values: nothing is persisted until the owning collection's
//! `save` is called.

use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::{
    error::{DatastoreError, DatastoreResult},
    field::ValidationContext,
    model::Model,
};

/// A validated value tree conforming to a [`Model`].
#[derive(Debug, Clone)]
pub struct Document {
    model: Arc<Model>,
    data: Map<String, Value>,
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.model.name() == other.model.name() && self.data == other.data
    }
}

impl Document {
    pub(crate) fn new(model: Arc<Model>, data: Map<String, Value>) -> Self {
        Self { model, data }
    }

    /// Validates any serde-serializable value against `model`, rejecting unknown keys.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `value` does not serialize to JSON, or a
    /// validation error if it does not conform to the model.
    pub fn from_serializable<T: Serialize>(model: &Arc<Model>, value: &T) -> DatastoreResult<Self> {
        model
            .from_raw(serde_json::to_value(value)?, true)
            .map(|(document, _)| document)
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Looks up a value by dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.data.get(segments.next()?)?;

        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }

        Some(current)
    }

    /// Sets a value by dotted path, creating intermediate objects as needed.
    ///
    /// The whole document is re-validated; on failure the document is unchanged.
    /// Setting `null` on an optional field removes it.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the path is unknown, crosses a list, or the
    /// resulting document is invalid.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> DatastoreResult<()> {
        if self.model.field_at(path).is_none() {
            return Err(DatastoreError::validation(path, "no such field"));
        }

        let mut candidate = self.data.clone();
        insert_at(&mut candidate, path, value.into())?;
        self.replace(candidate)
    }

    /// Removes an optional field, returning its previous value.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the path is unknown or the field is required.
    pub fn remove(&mut self, path: &str) -> DatastoreResult<Option<Value>> {
        match self.model.field_at(path) {
            None => return Err(DatastoreError::validation(path, "no such field")),
            Some(field) if !field.is_optional() => {
                return Err(DatastoreError::validation(path, "cannot remove a required field"));
            }
            Some(_) => {}
        }

        let previous = self.get(path).cloned();
        self.set(path, Value::Null)?;
        Ok(previous)
    }

    pub fn to_raw(&self) -> Value {
        Value::Object(self.data.clone())
    }

    pub fn into_raw(self) -> Value {
        Value::Object(self.data)
    }

    /// Deserializes the document into a typed value.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the data does not fit `T`.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> DatastoreResult<T> {
        Ok(serde_json::from_value(self.to_raw())?)
    }

    fn replace(&mut self, candidate: Map<String, Value>) -> DatastoreResult<()> {
        let mut ctx = ValidationContext::default();
        self.data = self.model.validate_object("", &candidate, &mut ctx)?;
        Ok(())
    }
}

fn insert_at(object: &mut Map<String, Value>, path: &str, value: Value) -> DatastoreResult<()> {
    match path.split_once('.') {
        None => {
            object.insert(path.to_string(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = object
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));

            if child.is_null() {
                *child = Value::Object(Map::new());
            }

            match child {
                Value::Object(inner) => insert_at(inner, rest, value),
                _ => Err(DatastoreError::validation(head, "cannot set a path inside a list or scalar")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::field::Field;

    fn model() -> Arc<Model> {
        let howler = Model::builder("howler")
            .field("analytic", Field::keyword())
            .field("assignment", Field::keyword().optional())
            .field("escalation", Field::enumeration(["hit", "alert", "evidence"]).default_value("hit"))
            .build()
            .unwrap();

        Arc::new(Model::builder("hit").field("howler", Field::compound(howler)).build().unwrap())
    }

    #[test]
    fn set_validates_and_normalizes() {
        let (mut doc, _) = model().from_raw(json!({"howler": {"analytic": "A"}}), false).unwrap();

        doc.set("howler.escalation", "ALERT").unwrap();
        doc.set("howler.assignment", "analyst").unwrap();

        assert_eq!(doc.get("howler.escalation"), Some(&json!("alert")));
        assert_eq!(doc.get("howler.assignment"), Some(&json!("analyst")));
    }

    #[test]
    fn failed_set_leaves_document_unchanged() {
        let (mut doc, _) = model().from_raw(json!({"howler": {"analytic": "A"}}), false).unwrap();
        let before = doc.clone();

        assert!(doc.set("howler.escalation", "bogus").is_err());
        assert!(doc.set("howler.unknown", "x").is_err());
        assert_eq!(doc, before);
    }

    #[test]
    fn remove_only_accepts_optional_fields() {
        let (mut doc, _) = model()
            .from_raw(json!({"howler": {"analytic": "A", "assignment": "me"}}), false)
            .unwrap();

        assert_eq!(doc.remove("howler.assignment").unwrap(), Some(json!("me")));
        assert_eq!(doc.get("howler.assignment"), None);
        assert!(doc.remove("howler.analytic").is_err());
    }

    #[test]
    fn typed_round_trip() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Howler {
            analytic: String,
            escalation: String,
        }

        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Hit {
            howler: Howler,
        }

        let hit = Hit { howler: Howler { analytic: "A".into(), escalation: "evidence".into() } };
        let doc = Document::from_serializable(&model(), &hit).unwrap();

        assert_eq!(doc.deserialize_into::<Hit>().unwrap(), hit);
    }
}
