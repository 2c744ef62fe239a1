mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use triage_odm::{memory::InMemoryBackend, prelude::*};

use common::{hit, hit_model, howler_model, ids, raw_hit, registry, seed, store, store_with, triage_hits};

#[tokio::test]
async fn versions_advance_and_stale_writes_conflict() {
    let (_, store, _) = store().await;
    let hits = store.collection("hit").await.unwrap();

    let first = hit(&hits, raw_hit("h1", "A", "open", 1.0, "2024-05-01T00:00:00Z"));
    assert_eq!(hits.save("h1", &first, None).await.unwrap(), 1);

    let mut second = first.clone();
    second.set("howler.analytic", "B").unwrap();
    assert_eq!(hits.save("h1", &second, Some(1)).await.unwrap(), 2);

    let mut third = first.clone();
    third.set("howler.analytic", "C").unwrap();
    let err = hits.save("h1", &third, Some(1)).await.unwrap_err();
    assert!(matches!(
        err,
        DatastoreError::VersionConflict { expected: 1, actual: Some(2), .. }
    ));

    let stored = hits.get_with_version("h1").await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.value.get("howler.analytic"), Some(&json!("B")));
}

#[tokio::test]
async fn expecting_a_version_of_a_missing_document_conflicts() {
    let (_, store, _) = store().await;
    let hits = store.collection("hit").await.unwrap();
    let document = hit(&hits, raw_hit("h9", "A", "open", 1.0, "2024-05-01T00:00:00Z"));

    let err = hits.save("h9", &document, Some(3)).await.unwrap_err();

    assert!(matches!(err, DatastoreError::VersionConflict { actual: None, .. }));
    assert!(!hits.exists("h9").await.unwrap());
}

#[tokio::test]
async fn documents_of_another_model_are_rejected() {
    let (_, store, _) = store().await;
    let hits = store.collection("hit").await.unwrap();
    let users = store.collection("user").await.unwrap();

    let (user, _) = users
        .model()
        .from_raw(json!({"user_id": "u1", "email": "Analyst@Example.com", "name": "analyst"}), true)
        .unwrap();

    assert_eq!(user.get("email"), Some(&json!("analyst@example.com")));
    assert!(matches!(
        hits.save("u1", &user, None).await,
        Err(DatastoreError::Validation { .. })
    ));
}

#[tokio::test]
async fn reads_see_writes_before_commit() {
    let (_, store, _) = store().await;
    let hits = store.collection("hit").await.unwrap();
    let document = hit(&hits, raw_hit("h1", "A", "open", 1.0, "2024-05-01T00:00:00Z"));

    hits.save("h1", &document, None).await.unwrap();

    assert_eq!(hits.get("h1").await.unwrap(), Some(document));
    assert_eq!(hits.count(Query::all()).await.unwrap(), 0);

    hits.commit().await.unwrap();
    assert_eq!(hits.count(Query::all()).await.unwrap(), 1);
}

#[tokio::test]
async fn multi_get_keeps_request_order_and_reports_missing_keys() {
    let (_, store, _) = store().await;
    let hits = store.collection("hit").await.unwrap();
    seed(&hits, triage_hits()).await;

    let found = hits.multi_get(&["h3", "h1"]).await.unwrap();
    assert_eq!(ids(&found), vec!["h3", "h1"]);

    let err = hits.multi_get(&["h2", "nope", "h4", "gone"]).await.unwrap_err();
    let DatastoreError::MultiKey(err) = err else {
        panic!("expected a multi-key error, got {err:?}");
    };

    assert_eq!(err.keys.into_iter().collect::<Vec<_>>(), vec!["gone", "nope"]);
    assert_eq!(ids(&err.partial_output), vec!["h2", "h4"]);
}

#[tokio::test]
async fn delete_by_query_is_visible_after_commit() {
    let (_, store, _) = store().await;
    let hits = store.collection("hit").await.unwrap();
    seed(&hits, triage_hits()).await;

    let deleted = hits
        .delete_by_query(Filter::eq("howler.analytic", "Password Sprayer"))
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    assert!(hits.get("h4").await.unwrap().is_none());
    assert_eq!(hits.count(Query::all()).await.unwrap(), 5);

    hits.commit().await.unwrap();
    assert_eq!(hits.count(Query::all()).await.unwrap(), 3);
}

#[tokio::test]
async fn delete_reports_whether_the_document_existed() {
    let (_, store, _) = store().await;
    let hits = store.collection("hit").await.unwrap();
    seed(&hits, triage_hits()).await;

    assert!(hits.delete("h1").await.unwrap());
    assert!(!hits.delete("h1").await.unwrap());
    assert!(!hits.exists("h1").await.unwrap());
}

#[tokio::test]
async fn unknown_models_are_not_found() {
    let (_, store, _) = store().await;

    assert!(matches!(
        store.collection("alert").await,
        Err(DatastoreError::ModelNotFound(name)) if name == "alert"
    ));
}

#[tokio::test]
async fn collections_are_cached_per_model() {
    let (_, store, _) = store().await;

    let first = store.collection("hit").await.unwrap();
    let second = store.collection("hit").await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn sync_creates_then_leaves_matching_indices_alone() {
    let backend = InMemoryBackend::new();
    let store = Store::new(backend.clone(), registry());

    assert_eq!(
        store.sync_all().await.unwrap(),
        vec![
            ("hit".to_string(), SyncOutcome::Created),
            ("user".to_string(), SyncOutcome::Created),
        ]
    );
    assert_eq!(store.sync("hit").await.unwrap(), SyncOutcome::Unchanged);
}

#[tokio::test]
async fn sync_adds_new_fields_to_an_existing_index() {
    let backend = InMemoryBackend::new();
    Store::new(backend.clone(), registry()).sync("hit").await.unwrap();

    let mut schema = SchemaRegistry::new();
    schema
        .register(hit_model().field("assignment", Field::keyword().optional()))
        .unwrap();
    let store = Store::new(backend.clone(), schema.seal().unwrap());

    assert_eq!(
        store.sync("hit").await.unwrap(),
        SyncOutcome::Updated(vec!["assignment".to_string()])
    );
    assert_eq!(store.sync("hit").await.unwrap(), SyncOutcome::Unchanged);

    let mapping = backend.get_mapping("hit").await.unwrap();
    assert!(mapping.flatten().contains_key("howler.analytic"));
}

#[tokio::test]
async fn sync_refuses_incompatible_mappings() {
    let backend = InMemoryBackend::new();
    Store::new(backend.clone(), registry()).sync("hit").await.unwrap();

    let mut schema = SchemaRegistry::new();
    schema
        .register(Model::builder("hit").field("timestamp", Field::keyword()))
        .unwrap();
    let store = Store::new(backend, schema.seal().unwrap());

    let err = store.sync("hit").await.unwrap_err();

    assert!(matches!(err, DatastoreError::Mapping(message) if message.contains("timestamp")));
}

#[tokio::test]
async fn index_prefix_scopes_indices() {
    let config = StoreConfig::from_json(r#"{"index_prefix": "howler-"}"#).unwrap();
    let (backend, store, _) = store_with(config).await;

    backend
        .create_index("unrelated", &IndexMapping::default())
        .await
        .unwrap();

    assert_eq!(store.collection("hit").await.unwrap().index(), "howler-hit");
    assert_eq!(store.indices().await.unwrap(), vec!["howler-hit", "howler-user"]);

    store.wipe("user").await.unwrap();
    assert_eq!(store.indices().await.unwrap(), vec!["howler-hit"]);
}

struct Sentinel;

impl OdmPlugin for Sentinel {
    fn name(&self) -> &str {
        "sentinel"
    }

    fn modify_odm(&self, model_name: &str) -> DatastoreResult<Vec<Namespace>> {
        if model_name != "hit" {
            return Ok(Vec::new());
        }

        let sentinel = Model::builder("sentinel")
            .field("id", Field::keyword())
            .field("severity", Field::integer().default_value(0))
            .build()?;

        Ok(vec![Namespace::new("sentinel", Field::compound(sentinel).optional())])
    }
}

/// Tries to take over a field every hit already has.
struct Squatter;

impl OdmPlugin for Squatter {
    fn name(&self) -> &str {
        "squatter"
    }

    fn modify_odm(&self, model_name: &str) -> DatastoreResult<Vec<Namespace>> {
        match model_name {
            "hit" => Ok(vec![Namespace::new("howler", Field::keyword())]),
            _ => Ok(Vec::new()),
        }
    }
}

#[tokio::test]
async fn plugins_extend_models_before_the_schema_is_sealed() {
    let mut schema = SchemaRegistry::new();
    schema.register(hit_model()).unwrap();

    let report = schema.apply_plugins(&[Arc::new(Squatter), Arc::new(Sentinel)]);

    assert!(!report.is_clean());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].plugin, "squatter");
    assert!(matches!(report.failures[0].error, DatastoreError::Conflict(_)));
    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].namespace, "sentinel");

    let store = Store::new(InMemoryBackend::new(), schema.seal().unwrap());
    store.sync_all().await.unwrap();

    let hits = store.collection("hit").await.unwrap();
    let mut raw = raw_hit("h1", "A", "open", 1.0, "2024-05-01T00:00:00Z");
    raw["sentinel"] = json!({"id": "s-1"});

    let document = hit(&hits, raw);
    hits.save("h1", &document, None).await.unwrap();
    hits.commit().await.unwrap();

    assert_eq!(document.get("sentinel.severity"), Some(&json!(0)));
    assert_eq!(hits.count("sentinel.id:s-1").await.unwrap(), 1);
}

#[tokio::test]
async fn stored_documents_round_trip_through_the_model() {
    let (_, store, _) = store().await;
    let hits = store.collection("hit").await.unwrap();

    let (document, unknown) = hits
        .model()
        .from_raw(
            json!({
                "timestamp": "2024-05-01T02:00:00+02:00",
                "howler": {"id": "h1", "analytic": "A", "status": "IN_PROGRESS", "labels": ["x"]},
                "extra": true,
            }),
            false,
        )
        .unwrap();

    assert_eq!(unknown, vec!["extra"]);
    assert_eq!(document.get("timestamp"), Some(&json!("2024-05-01T00:00:00.000000Z")));
    assert_eq!(document.get("howler.status"), Some(&json!("in-progress")));
    assert_eq!(document.get("howler.score"), Some(&json!(0.0)));
    assert_eq!(document.get("howler.detection"), None);

    hits.save("h1", &document, None).await.unwrap();
    let reloaded = hits.get("h1").await.unwrap().unwrap();
    assert_eq!(reloaded, document);

    let (again, _) = hits.model().from_raw(reloaded.to_raw(), true).unwrap();
    assert_eq!(again, document);
}

#[tokio::test]
async fn nested_models_are_shared_not_copied() {
    let howler = Arc::new(howler_model());
    let model = Model::builder("hit")
        .field("howler", Field::compound(howler.clone()))
        .build()
        .unwrap();

    let nested = model.field("howler").and_then(Field::nested_model).unwrap();
    assert!(Arc::ptr_eq(nested, &howler));
}
