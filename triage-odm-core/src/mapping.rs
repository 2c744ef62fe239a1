//! Index mapping generation and comparison.
//!
//! [`IndexMapping::for_model`] walks a model's field tree and produces the engine-side
//! mapping descriptor. [`IndexMapping::compare`] classifies a remote mapping against the
//! desired one so synchronization can be idempotent and refuse destructive changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    field::{Field, FieldKind},
    model::Model,
};

/// Engine-side type of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    /// Exact-match token.
    Keyword,
    /// Analyzed token stream.
    Text,
    Long,
    Double,
    Boolean,
    /// ISO-8601 aware timestamp.
    Date,
    Ip,
    /// Arbitrary keyed object indexed as a flat set of keywords.
    Flattened,
    Object,
    /// Array of objects queried per element.
    Nested,
}

/// Mapping of a single field, possibly with sub-properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(rename = "type")]
    pub kind: MappingType,
    #[serde(default = "default_true")]
    pub index: bool,
    #[serde(default)]
    pub store: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, FieldMapping>,
}

fn default_true() -> bool {
    true
}

impl FieldMapping {
    fn leaf(kind: MappingType, index: bool, store: bool) -> Self {
        Self { kind, index, store, properties: BTreeMap::new() }
    }

    fn container(kind: MappingType, properties: BTreeMap<String, FieldMapping>) -> Self {
        Self { kind, index: true, store: false, properties }
    }

    /// Whether two mappings agree on everything except sub-properties.
    fn same_shape(&self, other: &FieldMapping) -> bool {
        self.kind == other.kind && self.index == other.index && self.store == other.store
    }
}

/// A full index mapping descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexMapping {
    pub properties: BTreeMap<String, FieldMapping>,
}

/// How a remote mapping relates to the desired one.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingDiff {
    /// Nothing to do.
    Identical,
    /// The desired mapping only adds these paths.
    Additive(Vec<String>),
    /// These paths exist remotely with a different definition.
    Incompatible(Vec<String>),
}

impl IndexMapping {
    /// Generates the mapping for a model. Models with `index = false` map every
    /// leaf as unindexed.
    pub fn for_model(model: &Model) -> Self {
        Self { properties: model_properties(model, !model.index()) }
    }

    /// Every mapped path (containers included) with its mapping, by dotted path.
    pub fn flatten(&self) -> BTreeMap<String, &FieldMapping> {
        let mut paths = BTreeMap::new();
        flatten_into("", &self.properties, &mut paths);
        paths
    }

    /// Classifies `remote` against `self` (the desired mapping).
    ///
    /// Paths that exist only remotely are ignored: engines cannot drop mapped fields
    /// and stale fields do not affect validation.
    pub fn compare(&self, remote: &IndexMapping) -> MappingDiff {
        let desired = self.flatten();
        let existing = remote.flatten();

        let incompatible = desired
            .iter()
            .filter(|(path, mapping)| {
                existing
                    .get(*path)
                    .is_some_and(|current| !current.same_shape(mapping))
            })
            .map(|(path, _)| path.clone())
            .collect::<Vec<_>>();

        if !incompatible.is_empty() {
            return MappingDiff::Incompatible(incompatible);
        }

        let added = desired
            .keys()
            .filter(|path| !existing.contains_key(*path))
            .cloned()
            .collect::<Vec<_>>();

        if added.is_empty() {
            MappingDiff::Identical
        } else {
            MappingDiff::Additive(added)
        }
    }

    /// Union of two compatible mappings; `self` wins on overlap.
    pub fn merged(&self, other: &IndexMapping) -> IndexMapping {
        IndexMapping { properties: merge_properties(&self.properties, &other.properties) }
    }
}

fn model_properties(model: &Model, force_unindexed: bool) -> BTreeMap<String, FieldMapping> {
    model
        .fields()
        .map(|(name, field)| (name.to_string(), field_mapping(field, force_unindexed)))
        .collect()
}

fn field_mapping(field: &Field, force_unindexed: bool) -> FieldMapping {
    let index = field.is_indexed() && !force_unindexed;
    let store = field.is_stored();

    match field.kind() {
        FieldKind::Keyword
        | FieldKind::Uuid
        | FieldKind::Enum(_)
        | FieldKind::Email
        | FieldKind::Hash(_)
        | FieldKind::ValidatedKeyword(_) => FieldMapping::leaf(MappingType::Keyword, index, store),
        FieldKind::Text => FieldMapping::leaf(MappingType::Text, index, store),
        FieldKind::Integer => FieldMapping::leaf(MappingType::Long, index, store),
        FieldKind::Float => FieldMapping::leaf(MappingType::Double, index, store),
        FieldKind::Boolean => FieldMapping::leaf(MappingType::Boolean, index, store),
        FieldKind::Date => FieldMapping::leaf(MappingType::Date, index, store),
        FieldKind::Ip => FieldMapping::leaf(MappingType::Ip, index, store),
        FieldKind::Json => FieldMapping::leaf(MappingType::Keyword, false, store),
        FieldKind::Mapping(_) => FieldMapping::leaf(MappingType::Flattened, index, store),
        FieldKind::Compound(model) => {
            FieldMapping::container(MappingType::Object, model_properties(model, !index))
        }
        FieldKind::List(child) => match child.kind() {
            FieldKind::Compound(model) => {
                FieldMapping::container(MappingType::Nested, model_properties(model, !index))
            }
            _ => field_mapping(child, !index),
        },
    }
}

fn flatten_into<'a>(
    prefix: &str,
    properties: &'a BTreeMap<String, FieldMapping>,
    paths: &mut BTreeMap<String, &'a FieldMapping>,
) {
    for (name, mapping) in properties {
        let path = if prefix.is_empty() { name.clone() } else { format!("{prefix}.{name}") };

        flatten_into(&path, &mapping.properties, paths);
        paths.insert(path, mapping);
    }
}

fn merge_properties(
    primary: &BTreeMap<String, FieldMapping>,
    secondary: &BTreeMap<String, FieldMapping>,
) -> BTreeMap<String, FieldMapping> {
    let mut merged = secondary.clone();

    for (name, mapping) in primary {
        let entry = match secondary.get(name) {
            Some(existing) if existing.same_shape(mapping) => FieldMapping {
                properties: merge_properties(&mapping.properties, &existing.properties),
                ..mapping.clone()
            },
            _ => mapping.clone(),
        };

        merged.insert(name.clone(), entry);
    }

    merged
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::field::HashKind;

    fn hit() -> Model {
        let comment = Model::builder("comment")
            .field("user", Field::keyword())
            .field("value", Field::text())
            .build()
            .unwrap();
        let howler = Model::builder("howler")
            .field("analytic", Field::keyword())
            .field("hash", Field::hash(HashKind::Sha256))
            .field("comment", Field::list(Field::compound(comment)))
            .field("data", Field::list(Field::json()))
            .build()
            .unwrap();

        Model::builder("hit")
            .field("howler", Field::compound(howler))
            .field("timestamp", Field::date())
            .field("source_ip", Field::list(Field::ip()))
            .build()
            .unwrap()
    }

    #[test]
    fn mapping_follows_the_field_tree() {
        let mapping = serde_json::to_value(IndexMapping::for_model(&hit())).unwrap();

        assert_eq!(
            mapping,
            json!({
                "properties": {
                    "howler": {
                        "type": "object",
                        "index": true,
                        "store": false,
                        "properties": {
                            "analytic": {"type": "keyword", "index": true, "store": false},
                            "comment": {
                                "type": "nested",
                                "index": true,
                                "store": false,
                                "properties": {
                                    "user": {"type": "keyword", "index": true, "store": false},
                                    "value": {"type": "text", "index": true, "store": false},
                                },
                            },
                            "data": {"type": "keyword", "index": false, "store": false},
                            "hash": {"type": "keyword", "index": true, "store": false},
                        },
                    },
                    "source_ip": {"type": "ip", "index": true, "store": false},
                    "timestamp": {"type": "date", "index": true, "store": false},
                }
            })
        );
    }

    #[test]
    fn unindexed_models_map_unindexed_leaves() {
        let model = Model::builder("audit").field("who", Field::keyword()).index(false).build().unwrap();
        let mapping = IndexMapping::for_model(&model);

        assert!(!mapping.properties["who"].index);
    }

    #[test]
    fn compare_classifies_changes() {
        let desired = IndexMapping::for_model(&hit());
        assert_eq!(desired.compare(&desired), MappingDiff::Identical);

        let mut older = desired.clone();
        older.properties.remove("timestamp");
        assert_eq!(desired.compare(&older), MappingDiff::Additive(vec!["timestamp".into()]));
        assert_eq!(desired.merged(&older), desired);

        let mut changed = desired.clone();
        changed.properties.insert("timestamp".into(), FieldMapping::leaf(MappingType::Keyword, true, false));
        assert_eq!(desired.compare(&changed), MappingDiff::Incompatible(vec!["timestamp".into()]));
    }
}
