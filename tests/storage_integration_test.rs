//! Integration tests for the budget ledger across storage backends
//!
//! These tests ensure every backend keeps the ledger guarantees: no overspend
//! under concurrency, one charge per click token, and zero-cost events always
//! recorded.
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests
//! - By default, both backends are tested (PostgreSQL only when DATABASE_URL is set)

use adreel::models::{Campaign, Creative, NewClick, NewImpression, StatsQuery};
use adreel::storage::{LedgerError, MemoryStorage, PostgresStorage, SqliteStorage, Storage};
use rand::RngExt;
use std::sync::Arc;

/// Get the database backend to test from environment variable
fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true, // Test all backends if not specified
    }
}

/// Helper to create SQLite test storage
async fn create_sqlite_storage() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// Helper to create PostgreSQL test storage
async fn create_postgres_storage() -> Option<Arc<dyn Storage>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    if !db_url.starts_with("postgres") {
        return None;
    }
    let storage = PostgresStorage::new(&db_url, 5).await.ok()?;
    storage.init().await.ok()?;
    Some(Arc::new(storage))
}

/// Insert a fresh campaign with one creative. Ids are random so runs against a
/// shared PostgreSQL database do not collide.
async fn create_campaign(storage: &Arc<dyn Storage>, budget: i64, cpm: i64, cpc: i64) -> (i64, i64) {
    let (campaign_id, creative_id) = {
        let mut rng = rand::rng();
        (
            rng.random_range(1_000_000..1_000_000_000_i64),
            rng.random_range(1_000_000..1_000_000_000_i64),
        )
    };
    let now = chrono::Utc::now().timestamp();

    let mut campaign = Campaign::new(campaign_id, "ledger test", now - 3600, now + 3600, budget, budget);
    campaign.cpm_bid = cpm;
    campaign.cpc_bid = cpc;
    storage.upsert_campaign(&campaign).await.unwrap();
    storage
        .upsert_creative(&Creative::new(
            creative_id,
            campaign_id,
            "https://cdn.example.com/v.mp4",
            "https://example.com/landing",
            30,
        ))
        .await
        .unwrap();

    (campaign_id, creative_id)
}

async fn check_concurrent_impressions_never_overspend(storage: Arc<dyn Storage>) {
    // 100 units of budget at 1 unit per impression
    let (campaign_id, creative_id) = create_campaign(&storage, 100, 1000, 0).await;

    let mut handles = vec![];
    for _ in 0..150 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            let token = uuid::Uuid::new_v4().to_string();
            storage
                .charge_impression(
                    NewImpression::new(token, creative_id, campaign_id, "viewer"),
                    1000,
                )
                .await
        }));
    }

    let mut charged = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => charged += 1,
            Err(LedgerError::InsufficientBudget { .. }) => insufficient += 1,
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    assert_eq!(charged, 100, "Exactly the budget should be spent");
    assert_eq!(insufficient, 50, "The rest should be refused");

    let campaign = storage.get_campaign(campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.remaining_daily_budget, 0);
    assert_eq!(campaign.remaining_total_budget, 0);

    let stats = storage
        .get_stats(&StatsQuery {
            from: 0,
            to: i64::MAX,
            campaign_id: Some(campaign_id),
        })
        .await
        .unwrap();
    assert_eq!(stats.impressions, 100);
    assert_eq!(stats.cost, 100);
}

async fn check_concurrent_impressions_leave_remainder(storage: Arc<dyn Storage>) {
    // 100 units at 3 per impression: 33 fit and 1 unit is left over
    let (campaign_id, creative_id) = create_campaign(&storage, 100, 3000, 0).await;

    let mut handles = vec![];
    for _ in 0..150 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            let token = uuid::Uuid::new_v4().to_string();
            storage
                .charge_impression(
                    NewImpression::new(token, creative_id, campaign_id, "viewer"),
                    3000,
                )
                .await
        }));
    }

    let mut charged = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(impression) => {
                assert_eq!(impression.cost, 3);
                charged += 1;
            }
            Err(LedgerError::InsufficientBudget { .. }) => insufficient += 1,
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    assert_eq!(charged, 33);
    assert_eq!(insufficient, 117);

    let campaign = storage.get_campaign(campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.remaining_daily_budget, 1);
    assert_eq!(campaign.remaining_total_budget, 1);

    let stats = storage
        .get_stats(&StatsQuery {
            from: 0,
            to: i64::MAX,
            campaign_id: Some(campaign_id),
        })
        .await
        .unwrap();
    assert_eq!(stats.impressions, 33);
    assert_eq!(stats.cost, 99);
}

async fn check_duplicate_clicks_charge_once(storage: Arc<dyn Storage>) {
    let (campaign_id, creative_id) = create_campaign(&storage, 1000, 0, 25).await;
    let token = uuid::Uuid::new_v4().to_string();

    let mut handles = vec![];
    for _ in 0..10 {
        let storage = Arc::clone(&storage);
        let click = NewClick {
            token: token.clone(),
            impression_id: None,
            creative_id,
            campaign_id,
            user_id: "viewer".to_string(),
        };
        handles.push(tokio::spawn(async move { storage.charge_click(click, 25).await }));
    }

    let mut recorded = 0;
    for handle in handles {
        let charge = handle.await.unwrap().unwrap();
        if !charge.is_duplicate() {
            recorded += 1;
        }
        assert_eq!(charge.click().token, token);
    }
    assert_eq!(recorded, 1, "Exactly one retry should be recorded");

    let campaign = storage.get_campaign(campaign_id).await.unwrap().unwrap();
    assert_eq!(campaign.remaining_total_budget, 975);

    let stats = storage
        .get_stats(&StatsQuery {
            from: 0,
            to: i64::MAX,
            campaign_id: Some(campaign_id),
        })
        .await
        .unwrap();
    assert_eq!(stats.clicks, 1);
    assert_eq!(stats.cost, 25);
}

async fn check_zero_cost_always_recorded(storage: Arc<dyn Storage>) {
    let (campaign_id, creative_id) = create_campaign(&storage, 0, 0, 0).await;

    let impression = storage
        .charge_impression(
            NewImpression::new(uuid::Uuid::new_v4().to_string(), creative_id, campaign_id, "viewer"),
            0,
        )
        .await
        .unwrap();
    assert_eq!(impression.cost, 0);

    let found = storage
        .find_impression_by_token(&impression.token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, impression.id);
}

#[tokio::test]
async fn test_concurrent_impressions_never_overspend_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_concurrent_impressions_never_overspend(create_sqlite_storage().await).await;
}

#[tokio::test]
async fn test_concurrent_impressions_leave_remainder_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_concurrent_impressions_leave_remainder(create_sqlite_storage().await).await;
}

#[tokio::test]
async fn test_duplicate_clicks_charge_once_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_duplicate_clicks_charge_once(create_sqlite_storage().await).await;
}

#[tokio::test]
async fn test_zero_cost_always_recorded_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_zero_cost_always_recorded(create_sqlite_storage().await).await;
}

#[tokio::test]
async fn test_concurrent_impressions_never_overspend_memory() {
    if !should_test_backend("memory") {
        return;
    }
    check_concurrent_impressions_never_overspend(Arc::new(MemoryStorage::new())).await;
}

#[tokio::test]
async fn test_concurrent_impressions_leave_remainder_memory() {
    if !should_test_backend("memory") {
        return;
    }
    check_concurrent_impressions_leave_remainder(Arc::new(MemoryStorage::new())).await;
}

#[tokio::test]
async fn test_concurrent_impressions_never_overspend_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(storage) = create_postgres_storage().await else {
        eprintln!("Skipping PostgreSQL test: DATABASE_URL is not a PostgreSQL URL");
        return;
    };
    check_concurrent_impressions_never_overspend(storage).await;
}

#[tokio::test]
async fn test_duplicate_clicks_charge_once_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(storage) = create_postgres_storage().await else {
        eprintln!("Skipping PostgreSQL test: DATABASE_URL is not a PostgreSQL URL");
        return;
    };
    check_duplicate_clicks_charge_once(storage).await;
}

#[tokio::test]
async fn test_zero_cost_always_recorded_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(storage) = create_postgres_storage().await else {
        eprintln!("Skipping PostgreSQL test: DATABASE_URL is not a PostgreSQL URL");
        return;
    };
    check_zero_cost_always_recorded(storage).await;
}

#[tokio::test]
async fn test_concurrent_impressions_leave_remainder_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(storage) = create_postgres_storage().await else {
        eprintln!("Skipping PostgreSQL test: DATABASE_URL is not a PostgreSQL URL");
        return;
    };
    check_concurrent_impressions_leave_remainder(storage).await;
}
