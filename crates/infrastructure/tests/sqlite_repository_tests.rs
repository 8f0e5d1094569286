use chrono::{NaiveDate, Utc};
use serde_json::json;
use tradesync_core::config::DatabaseConfig;
use tradesync_core::models::{
    ChangeEvent, EntityType, NewCanonicalRecord, Payload, SourceId, SyncCounts, SyncRun,
    SyncRunStatus,
};
use tradesync_core::traits::{CanonicalRepository, InsertOutcome, SyncRunRepository};
use tradesync_infrastructure::database::{
    DatabaseManager, SqliteCanonicalRepository, SqliteSyncRunRepository,
};
use uuid::Uuid;

async fn setup() -> DatabaseManager {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        ..DatabaseConfig::default()
    };
    let manager = DatabaseManager::new(&config).await.unwrap();
    manager.migrate().await.unwrap();
    manager
}

fn tariff(rate: f64, date: &str) -> NewCanonicalRecord {
    let mut fields = Payload::new();
    fields.insert("htsCode".to_string(), json!("8471.30.01"));
    fields.insert("countryCode".to_string(), json!("CN"));
    fields.insert("totalRate".to_string(), json!(rate));
    fields.insert("effectiveDate".to_string(), json!(date));
    NewCanonicalRecord {
        entity_type: EntityType::TariffRate,
        natural_key: "8471.30.01:CN".to_string(),
        source_id: SourceId::TariffSchedule,
        source_priority: 40,
        effective_date: Some(date.parse().unwrap()),
        content_hash: tradesync_core::models::content_hash(&fields),
        fields,
        supersedes: None,
        run_id: Some(Uuid::new_v4()),
    }
}

#[tokio::test]
async fn test_insert_version_with_events_and_lookup() {
    let db = setup().await;
    let repo = SqliteCanonicalRepository::new(db.pool().clone());

    let first = tariff(7.5, "2023-01-01");
    let created = ChangeEvent::created(
        EntityType::TariffRate,
        "8471.30.01:CN",
        json!({"totalRate": 7.5}),
        Utc::now(),
        first.run_id,
    );
    let outcome = repo.insert_version(&first, &[created]).await.unwrap();
    assert!(matches!(outcome, InsertOutcome::Inserted(_)));

    let second = tariff(10.0, "2024-06-01");
    let updated = ChangeEvent::updated(
        EntityType::TariffRate,
        "8471.30.01:CN",
        "totalRate",
        Some(json!(7.5)),
        Some(json!(10.0)),
        Utc::now(),
        second.run_id,
    );
    repo.insert_version(&second, &[updated]).await.unwrap();

    let versions = repo
        .find_versions(EntityType::TariffRate, "8471.30.01:CN")
        .await
        .unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(
        versions[1].effective_date,
        NaiveDate::from_ymd_opt(2024, 6, 1)
    );
    assert_eq!(versions[1].fields["totalRate"], json!(10.0));

    let events = repo.list_events(second.run_id, 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].field, "totalRate");
    assert_eq!(events[0].old_value, Some(json!(7.5)));
}

#[tokio::test]
async fn test_duplicate_version_writes_nothing() {
    let db = setup().await;
    let repo = SqliteCanonicalRepository::new(db.pool().clone());
    let record = tariff(7.5, "2023-01-01");

    repo.insert_version(&record, &[]).await.unwrap();
    let event = ChangeEvent::created(
        EntityType::TariffRate,
        "8471.30.01:CN",
        json!({}),
        Utc::now(),
        record.run_id,
    );
    let outcome = repo.insert_version(&record, &[event]).await.unwrap();

    assert_eq!(outcome, InsertOutcome::Duplicate);
    assert_eq!(repo.count_records(EntityType::TariffRate).await.unwrap(), 1);
    // 事务回滚，事件也未写入
    assert!(repo.list_events(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_same_content_on_newer_baseline_is_a_new_version() {
    let db = setup().await;
    let repo = SqliteCanonicalRepository::new(db.pool().clone());

    let original = tariff(7.5, "2024-06-01");
    let InsertOutcome::Inserted(first) = repo.insert_version(&original, &[]).await.unwrap() else {
        panic!("expected insert");
    };
    let raised = NewCanonicalRecord {
        supersedes: Some(first.id),
        ..tariff(10.0, "2024-06-01")
    };
    let InsertOutcome::Inserted(second) = repo.insert_version(&raised, &[]).await.unwrap() else {
        panic!("expected insert");
    };

    let reverted = NewCanonicalRecord {
        supersedes: Some(second.id),
        ..tariff(7.5, "2024-06-01")
    };
    let outcome = repo.insert_version(&reverted, &[]).await.unwrap();
    assert!(matches!(outcome, InsertOutcome::Inserted(_)));
    // 同一基线上的重复写入仍然被拒绝
    assert_eq!(
        repo.insert_version(&reverted, &[]).await.unwrap(),
        InsertOutcome::Duplicate
    );

    let versions = repo
        .find_versions(EntityType::TariffRate, "8471.30.01:CN")
        .await
        .unwrap();
    assert_eq!(versions.len(), 3);
    assert_eq!(versions[2].fields["totalRate"], json!(7.5));
    assert_eq!(versions[2].supersedes, Some(second.id));
    assert_eq!(versions[0].supersedes, None);
}

#[tokio::test]
async fn test_update_in_place_checks_expected_hash() {
    let db = setup().await;
    let repo = SqliteCanonicalRepository::new(db.pool().clone());

    let mut fields = Payload::new();
    fields.insert("description".to_string(), json!("Laptops"));
    let product = NewCanonicalRecord {
        entity_type: EntityType::Product,
        natural_key: "8471.30.01".to_string(),
        source_id: SourceId::TariffSchedule,
        source_priority: 40,
        effective_date: None,
        content_hash: "h1".to_string(),
        fields,
        supersedes: None,
        run_id: None,
    };
    let InsertOutcome::Inserted(stored) = repo.insert_version(&product, &[]).await.unwrap() else {
        panic!("expected insert");
    };

    // 非只追加实体在自然键上唯一
    assert_eq!(
        repo.insert_version(&product, &[]).await.unwrap(),
        InsertOutcome::Duplicate
    );

    let mut changed = product.clone();
    changed.content_hash = "h2".to_string();
    changed
        .fields
        .insert("description".to_string(), json!("Portable computers"));

    assert!(!repo
        .update_in_place(stored.id, &changed, "stale", &[])
        .await
        .unwrap());
    assert!(repo
        .update_in_place(stored.id, &changed, "h1", &[])
        .await
        .unwrap());

    let versions = repo
        .find_versions(EntityType::Product, "8471.30.01")
        .await
        .unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].content_hash, "h2");
}

#[tokio::test]
async fn test_sync_run_round_trip() {
    let db = setup().await;
    let repo = SqliteSyncRunRepository::new(db.pool().clone());

    let older = SyncRun::new(
        Uuid::new_v4(),
        Utc::now() - chrono::Duration::minutes(5),
        chrono::Duration::hours(1),
    );
    repo.create(&older).await.unwrap();

    let mut run = SyncRun::new(Uuid::new_v4(), Utc::now(), chrono::Duration::hours(1));
    let job = Uuid::new_v4();
    run.job_ids.push(job);
    repo.create(&run).await.unwrap();

    run.record_completion(
        job,
        Some(SourceId::CustomsRulings),
        &SyncCounts {
            fetched: 3,
            upserted: 3,
            changed: 1,
            failed: 0,
        },
    );
    run.try_finalize(Utc::now());
    repo.update(&run).await.unwrap();

    let latest = repo.latest().await.unwrap().unwrap();
    assert_eq!(latest.run_id, run.run_id);
    assert_eq!(latest.status, SyncRunStatus::Completed);
    assert_eq!(
        latest.per_source_counts[&SourceId::CustomsRulings].counts.changed,
        1
    );

    let running = repo.list_running().await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].run_id, older.run_id);

    let missing = SyncRun::new(Uuid::new_v4(), Utc::now(), chrono::Duration::hours(1));
    assert!(repo.update(&missing).await.is_err());
}
