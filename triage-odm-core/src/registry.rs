//! Schema registry and plugin namespace extension.
//!
//! The registry has two phases. A [`SchemaRegistry`] is open: models are registered as
//! builders and may still be extended with namespaces, either directly or by plugins.
//! [`SchemaRegistry::seal`] turns it into an immutable [`Registry`], which is what a
//! store is constructed from. Extension after sealing is impossible by construction.
//!
//! # Example
//!
//! ```ignore
//! let mut schema = SchemaRegistry::new();
//! schema.register(Model::builder("hit").field("howler", Field::compound(howler)))?;
//!
//! let report = schema.apply_plugins(&plugins);
//! for failure in &report.failures {
//!     eprintln!("{}: {}", failure.plugin, failure.error);
//! }
//!
//! let registry = schema.seal()?;
//! ```

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{info, warn};

use crate::{
    error::{DatastoreError, DatastoreResult},
    field::Field,
    model::{Model, ModelBuilder, check_field_name},
};

/// A named field subtree attached to an existing model.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub name: String,
    pub field: Field,
}

impl Namespace {
    pub fn new(name: impl Into<String>, field: Field) -> Self {
        Self { name: name.into(), field }
    }
}

/// A boot-time schema extension source.
///
/// `modify_odm` is invoked once per registered model. Returning an error, or a
/// namespace that collides with an existing field, only fails this plugin for that
/// model; the rest of the boot continues.
pub trait OdmPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn modify_odm(&self, model_name: &str) -> DatastoreResult<Vec<Namespace>>;
}

/// A namespace successfully attached by a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedNamespace {
    pub plugin: String,
    pub model: String,
    pub namespace: String,
}

/// A plugin that failed to extend a model.
#[derive(Debug)]
pub struct PluginFailure {
    pub plugin: String,
    pub model: String,
    pub error: DatastoreError,
}

/// Outcome of [`SchemaRegistry::apply_plugins`].
#[derive(Debug, Default)]
pub struct BootReport {
    pub applied: Vec<AppliedNamespace>,
    pub failures: Vec<PluginFailure>,
}

impl BootReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The open (mutable) phase of the schema.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    models: IndexMap<String, ModelBuilder>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a root model.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Conflict`] if a model with the same name is already
    /// registered, or any error from [`ModelBuilder::validate`].
    pub fn register(&mut self, model: ModelBuilder) -> DatastoreResult<()> {
        model.validate()?;

        if self.models.contains_key(model.name()) {
            return Err(DatastoreError::Conflict(format!(
                "model '{}' is already registered",
                model.name()
            )));
        }

        self.models.insert(model.name().to_string(), model);
        Ok(())
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Attaches `field` under `name` on a registered model.
    ///
    /// # Errors
    ///
    /// - [`DatastoreError::ModelNotFound`] if the model is not registered
    /// - [`DatastoreError::Conflict`] if `name` already exists on the model
    pub fn add_namespace(&mut self, model: &str, name: &str, field: Field) -> DatastoreResult<()> {
        self.extend(model, vec![Namespace::new(name, field)])
    }

    /// Runs every plugin against every registered model.
    ///
    /// Each plugin's namespaces for a model are applied all-or-nothing. Failures are
    /// logged and collected in the report instead of aborting.
    pub fn apply_plugins(&mut self, plugins: &[Arc<dyn OdmPlugin>]) -> BootReport {
        let mut report = BootReport::default();
        let model_names = self.models.keys().cloned().collect::<Vec<_>>();

        for plugin in plugins {
            for model in &model_names {
                let outcome = plugin
                    .modify_odm(model)
                    .and_then(|namespaces| {
                        let names = namespaces.iter().map(|ns| ns.name.clone()).collect::<Vec<_>>();
                        self.extend(model, namespaces).map(|_| names)
                    });

                match outcome {
                    Ok(names) => {
                        for namespace in names {
                            info!(plugin = plugin.name(), model = %model, namespace = %namespace, "applied namespace");

                            report.applied.push(AppliedNamespace {
                                plugin: plugin.name().to_string(),
                                model: model.clone(),
                                namespace,
                            });
                        }
                    }
                    Err(error) => {
                        warn!(plugin = plugin.name(), model = %model, %error, "plugin failed to extend model");

                        report.failures.push(PluginFailure {
                            plugin: plugin.name().to_string(),
                            model: model.clone(),
                            error,
                        });
                    }
                }
            }
        }

        report
    }

    /// Builds every model and freezes the schema.
    ///
    /// # Errors
    ///
    /// Returns the first model build error.
    pub fn seal(self) -> DatastoreResult<Registry> {
        let models = self
            .models
            .into_iter()
            .map(|(name, builder)| builder.build().map(|model| (name, Arc::new(model))))
            .collect::<DatastoreResult<IndexMap<_, _>>>()?;

        Ok(Registry { models })
    }

    fn extend(&mut self, model: &str, namespaces: Vec<Namespace>) -> DatastoreResult<()> {
        let builder = self
            .models
            .get(model)
            .ok_or_else(|| DatastoreError::ModelNotFound(model.to_string()))?;
        let mut candidate = builder.clone();

        for namespace in namespaces {
            check_field_name(&namespace.name)?;

            if candidate.has_field(&namespace.name) {
                return Err(DatastoreError::Conflict(format!(
                    "namespace '{}' already exists on model '{model}'",
                    namespace.name
                )));
            }

            candidate.push_field(namespace.name, namespace.field);
        }

        candidate.validate()?;
        self.models.insert(model.to_string(), candidate);
        Ok(())
    }
}

/// The sealed, immutable set of models a store is built from.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: IndexMap<String, Arc<Model>>,
}

impl Registry {
    /// Seals a registry directly from already-built models.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Conflict`] if two models share a name.
    pub fn from_models(models: impl IntoIterator<Item = Model>) -> DatastoreResult<Self> {
        let mut registry = IndexMap::new();

        for model in models {
            let name = model.name().to_string();

            if registry.insert(name.clone(), Arc::new(model)).is_some() {
                return Err(DatastoreError::Conflict(format!("model '{name}' is already registered")));
            }
        }

        Ok(Self { models: registry })
    }

    /// # Errors
    ///
    /// Returns [`DatastoreError::ModelNotFound`] if no model has this name.
    pub fn get(&self, name: &str) -> DatastoreResult<Arc<Model>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| DatastoreError::ModelNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &Arc<Model>> {
        self.models.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct StaticPlugin {
        name: &'static str,
        target: &'static str,
        namespaces: Vec<&'static str>,
    }

    impl OdmPlugin for StaticPlugin {
        fn name(&self) -> &str {
            self.name
        }

        fn modify_odm(&self, model_name: &str) -> DatastoreResult<Vec<Namespace>> {
            if model_name != self.target {
                return Ok(Vec::new());
            }

            Ok(self
                .namespaces
                .iter()
                .map(|name| Namespace::new(*name, Field::keyword().optional()))
                .collect())
        }
    }

    struct BrokenPlugin;

    impl OdmPlugin for BrokenPlugin {
        fn name(&self) -> &str {
            "broken"
        }

        fn modify_odm(&self, _model_name: &str) -> DatastoreResult<Vec<Namespace>> {
            Err(DatastoreError::Initialization("plugin misconfigured".into()))
        }
    }

    fn schema() -> SchemaRegistry {
        let mut schema = SchemaRegistry::new();
        schema
            .register(Model::builder("hit").field("analytic", Field::keyword()))
            .unwrap();
        schema
    }

    #[test]
    fn namespace_collision_conflicts_without_mutation() {
        let mut schema = schema();

        schema.add_namespace("hit", "sentinel", Field::keyword().optional()).unwrap();
        let err = schema.add_namespace("hit", "sentinel", Field::integer()).unwrap_err();
        assert!(matches!(err, DatastoreError::Conflict(_)));

        let registry = schema.seal().unwrap();
        let hit = registry.get("hit").unwrap();
        assert_eq!(hit.fields().count(), 2);
        assert!(matches!(hit.field("sentinel").unwrap().kind(), crate::field::FieldKind::Keyword));
    }

    #[test]
    fn unknown_model_is_reported() {
        let err = schema().add_namespace("alert", "x", Field::keyword()).unwrap_err();
        assert!(matches!(err, DatastoreError::ModelNotFound(_)));
    }

    #[test]
    fn plugins_apply_atomically_and_failures_are_isolated() {
        let mut schema = schema();
        let plugins: Vec<Arc<dyn OdmPlugin>> = vec![
            Arc::new(StaticPlugin { name: "sentinel", target: "hit", namespaces: vec!["sentinel"] }),
            Arc::new(BrokenPlugin),
            // second namespace collides with the first plugin, so neither is applied
            Arc::new(StaticPlugin { name: "dupe", target: "hit", namespaces: vec!["evidence", "sentinel"] }),
        ];

        let report = schema.apply_plugins(&plugins);

        assert_eq!(
            report.applied,
            vec![AppliedNamespace { plugin: "sentinel".into(), model: "hit".into(), namespace: "sentinel".into() }]
        );
        assert_eq!(
            report.failures.iter().map(|f| f.plugin.as_str()).collect::<Vec<_>>(),
            vec!["broken", "dupe"]
        );

        let hit = schema.seal().unwrap().get("hit").unwrap();
        assert!(hit.field("evidence").is_none());

        let (doc, _) = hit.from_raw(json!({"analytic": "A", "sentinel": "x"}), true).unwrap();
        assert_eq!(doc.get("sentinel"), Some(&json!("x")));
    }

    #[test]
    fn duplicate_model_registration_conflicts() {
        let mut schema = schema();
        let err = schema.register(Model::builder("hit")).unwrap_err();
        assert!(matches!(err, DatastoreError::Conflict(_)));
    }
}
