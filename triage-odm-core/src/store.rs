//! The datastore entry point.
//!
//! A [`Store`] owns a backend, a sealed [`Registry`] and the shared configuration. It
//! hands out one cached [`Collection`] per model and keeps index mappings in sync with
//! the schema.
//!
//! # Example
//!
//! ```ignore
//! use triage_odm::{prelude::*, memory::InMemoryBackend};
//!
//! let store = Store::builder(InMemoryBackend::new(), registry)
//!     .with_config(StoreConfig::from_json(r#"{"index_prefix": "howler-"}"#)?)
//!     .build();
//!
//! store.sync_all().await?;
//! let hits = store.collection("hit").await?;
//! ```

use std::{collections::HashMap, sync::Arc};

use mea::rwlock::RwLock;
use tracing::info;

use crate::{
    backend::SearchBackend,
    collection::Collection,
    config::StoreConfig,
    error::{DatastoreError, DatastoreResult},
    mapping::{IndexMapping, MappingDiff},
    parser::{LuceneQueryParser, QueryParser},
    registry::Registry,
    retry::{RetryPolicy, Sleeper},
};

/// What [`Store::sync`] did to an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The index did not exist and was created.
    Created,
    /// The remote mapping already matched.
    Unchanged,
    /// These paths were added to the remote mapping.
    Updated(Vec<String>),
}

#[derive(Debug)]
pub struct Store {
    backend: Arc<dyn SearchBackend>,
    registry: Registry,
    config: Arc<StoreConfig>,
    parser: Arc<dyn QueryParser>,
    retry: RetryPolicy,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Store {
    /// A store with the default configuration.
    pub fn new(backend: impl SearchBackend + 'static, registry: Registry) -> Self {
        Self::builder(backend, registry).build()
    }

    pub fn builder(backend: impl SearchBackend + 'static, registry: Registry) -> StoreBuilder {
        StoreBuilder::new(Arc::new(backend), registry)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Checks that the backend is reachable.
    pub async fn ping(&self) -> DatastoreResult<()> {
        self.retry
            .run_within("ping", self.config.timeout(), || self.backend.ping())
            .await
    }

    /// Returns the collection of a registered model.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::ModelNotFound`] for unregistered models.
    pub async fn collection(&self, model: &str) -> DatastoreResult<Arc<Collection>> {
        if let Some(collection) = self.collections.read().await.get(model) {
            return Ok(collection.clone());
        }

        let model = self.registry.get(model)?;
        let mut collections = self.collections.write().await;

        let collection = collections
            .entry(model.name().to_string())
            .or_insert_with(|| {
                Arc::new(Collection::new(
                    model.clone(),
                    self.backend.clone(),
                    self.parser.clone(),
                    self.retry.clone(),
                    self.config.clone(),
                ))
            });

        Ok(collection.clone())
    }

    /// Brings the index of `model` in line with its schema.
    ///
    /// Creates a missing index, does nothing when the mapping matches and adds new
    /// fields to an existing mapping.
    ///
    /// # Errors
    ///
    /// Returns [`DatastoreError::Mapping`] if an existing field changed its mapping;
    /// that needs an explicit migration.
    pub async fn sync(&self, model: &str) -> DatastoreResult<SyncOutcome> {
        let model = self.registry.get(model)?;
        let index = self.config.index_name(model.name());
        let desired = IndexMapping::for_model(&model);

        let exists = self
            .retry
            .run_within("index_exists", self.config.timeout(), || self.backend.index_exists(&index))
            .await?;

        if !exists {
            self.retry
                .run_within("create_index", self.config.timeout(), || self.backend.create_index(&index, &desired))
                .await?;

            info!(model = model.name(), index = %index, "created index");
            return Ok(SyncOutcome::Created);
        }

        let remote = self
            .retry
            .run_within("get_mapping", self.config.timeout(), || self.backend.get_mapping(&index))
            .await?;

        match desired.compare(&remote) {
            MappingDiff::Identical => Ok(SyncOutcome::Unchanged),
            MappingDiff::Additive(paths) => {
                let merged = desired.merged(&remote);

                self.retry
                    .run_within("put_mapping", self.config.timeout(), || self.backend.put_mapping(&index, &merged))
                    .await?;

                info!(model = model.name(), index = %index, fields = ?paths, "updated index mapping");
                Ok(SyncOutcome::Updated(paths))
            }
            MappingDiff::Incompatible(paths) => Err(DatastoreError::Mapping(format!(
                "index '{index}' maps {} differently than model '{}'; a migration is required",
                paths.join(", "),
                model.name()
            ))),
        }
    }

    /// Syncs every registered model, stopping at the first failure.
    pub async fn sync_all(&self) -> DatastoreResult<Vec<(String, SyncOutcome)>> {
        let mut outcomes = Vec::new();

        for name in self.registry.names() {
            outcomes.push((name.to_string(), self.sync(name).await?));
        }

        Ok(outcomes)
    }

    /// Drops the index of `model` and every document in it.
    pub async fn wipe(&self, model: &str) -> DatastoreResult<()> {
        let model = self.registry.get(model)?;
        let index = self.config.index_name(model.name());

        self.retry
            .run_within("drop_index", self.config.timeout(), || self.backend.drop_index(&index))
            .await?;

        info!(model = model.name(), index = %index, "dropped index");
        Ok(())
    }

    /// Names of the backend indices that belong to this store's prefix.
    pub async fn indices(&self) -> DatastoreResult<Vec<String>> {
        let indices = self
            .retry
            .run_within("list_indices", self.config.timeout(), || self.backend.list_indices())
            .await?;

        Ok(indices
            .into_iter()
            .filter(|index| index.starts_with(&self.config.index_prefix))
            .collect())
    }
}

/// Builder for [`Store`].
pub struct StoreBuilder {
    backend: Arc<dyn SearchBackend>,
    registry: Registry,
    config: StoreConfig,
    parser: Arc<dyn QueryParser>,
    retry: Option<RetryPolicy>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl StoreBuilder {
    pub fn new(backend: Arc<dyn SearchBackend>, registry: Registry) -> Self {
        Self {
            backend,
            registry,
            config: StoreConfig::default(),
            parser: Arc::new(LuceneQueryParser::new()),
            retry: None,
            sleeper: None,
        }
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_parser(mut self, parser: impl QueryParser + 'static) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Overrides the retry policy derived from the configuration.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Replaces the sleeper of whichever retry policy ends up in use.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn build(self) -> Store {
        let mut retry = self
            .retry
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config.retry));

        if let Some(sleeper) = self.sleeper {
            retry = retry.with_sleeper(sleeper);
        }

        Store {
            backend: self.backend,
            registry: self.registry,
            config: Arc::new(self.config),
            parser: self.parser,
            retry,
            collections: RwLock::new(HashMap::new()),
        }
    }
}
