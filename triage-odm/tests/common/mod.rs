#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Value, json};
use triage_odm::{memory::InMemoryBackend, prelude::*};

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

pub fn howler_model() -> Model {
    Model::builder("howler")
        .field("id", Field::keyword())
        .field("analytic", Field::keyword())
        .field("detection", Field::keyword().optional())
        .field(
            "status",
            Field::enumeration(["open", "in-progress", "on-hold", "resolved"]).default_value("open"),
        )
        .field("score", Field::float().default_value(0.0))
        .field("labels", Field::list(Field::keyword()))
        .field("outline", Field::text().optional())
        .build()
        .unwrap()
}

pub fn hit_model() -> ModelBuilder {
    Model::builder("hit")
        .field("timestamp", Field::date())
        .field("howler", Field::compound(howler_model()))
}

pub fn user_model() -> ModelBuilder {
    Model::builder("user")
        .field("user_id", Field::keyword())
        .field("email", Field::email())
        .field("name", Field::keyword())
}

pub fn registry() -> Registry {
    let mut schema = SchemaRegistry::new();
    schema.register(hit_model()).unwrap();
    schema.register(user_model()).unwrap();
    schema.seal().unwrap()
}

/// A store over a fresh memory backend whose retries never touch the clock.
pub async fn store_with(config: StoreConfig) -> (InMemoryBackend, Store, Arc<RecordingSleeper>) {
    let backend = InMemoryBackend::builder().build().await.unwrap();
    let sleeper = Arc::new(RecordingSleeper::default());
    let store = Store::builder(backend.clone(), registry())
        .with_config(config)
        .with_sleeper(sleeper.clone())
        .build();

    store.sync_all().await.unwrap();
    (backend, store, sleeper)
}

pub async fn store() -> (InMemoryBackend, Store, Arc<RecordingSleeper>) {
    store_with(StoreConfig::default()).await
}

pub fn raw_hit(id: &str, analytic: &str, status: &str, score: f64, timestamp: &str) -> Value {
    json!({
        "timestamp": timestamp,
        "howler": {
            "id": id,
            "analytic": analytic,
            "status": status,
            "score": score,
        }
    })
}

pub fn hit(collection: &Collection, raw: Value) -> Document {
    collection.model().from_raw(raw, true).unwrap().0
}

/// Saves the given raw hits under their `howler.id` and commits.
pub async fn seed(collection: &Collection, raws: impl IntoIterator<Item = Value>) {
    for raw in raws {
        let id = raw["howler"]["id"].as_str().unwrap().to_string();
        collection.save(&id, &hit(collection, raw), None).await.unwrap();
    }

    collection.commit().await.unwrap();
}

/// Five hits over two analytics, spread across one day.
pub fn triage_hits() -> Vec<Value> {
    vec![
        raw_hit("h1", "Bad Guy Finder", "open", 10.0, "2024-05-01T01:00:00Z"),
        raw_hit("h2", "Bad Guy Finder", "open", 40.0, "2024-05-01T05:30:00Z"),
        raw_hit("h3", "Bad Guy Finder", "resolved", 25.0, "2024-05-01T07:15:00Z"),
        raw_hit("h4", "Password Sprayer", "in-progress", 90.0, "2024-05-01T13:00:00Z"),
        raw_hit("h5", "Password Sprayer", "open", 5.0, "2024-05-01T22:45:00Z"),
    ]
}

pub fn ids(documents: &[Document]) -> Vec<String> {
    documents
        .iter()
        .filter_map(|document| document.get("howler.id").and_then(Value::as_str).map(str::to_string))
        .collect()
}
