use crate::models::{Campaign, CampaignStatus, Creative, NewClick, NewImpression, StatsQuery};
use crate::storage::ledger::LedgerError;
use crate::storage::{SqliteStorage, Storage};
use std::sync::Arc;

async fn setup_sqlite() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

async fn add_campaign(storage: &Arc<dyn Storage>, id: i64, budget: i64, cpm: i64, cpc: i64) {
    let now = now();
    let mut campaign = Campaign::new(id, format!("campaign {id}"), now - 3600, now + 3600, budget, budget);
    campaign.cpm_bid = cpm;
    campaign.cpc_bid = cpc;
    storage.upsert_campaign(&campaign).await.unwrap();
    storage
        .upsert_creative(&Creative::new(
            id * 10,
            id,
            format!("https://cdn.example.com/{id}.mp4"),
            format!("https://example.com/landing/{id}"),
            30,
        ))
        .await
        .unwrap();
}

fn click(token: &str, campaign_id: i64) -> NewClick {
    NewClick {
        token: token.to_string(),
        impression_id: None,
        creative_id: campaign_id * 10,
        campaign_id,
        user_id: "viewer".to_string(),
    }
}

#[tokio::test]
async fn test_init_is_idempotent() {
    let storage = setup_sqlite().await;
    add_campaign(&storage, 1, 100, 1000, 5).await;

    storage.init().await.unwrap();

    assert!(storage.get_campaign(1).await.unwrap().is_some());
}

#[tokio::test]
async fn test_serving_candidates_skips_unservable_campaigns() {
    let storage = setup_sqlite().await;
    let now = now();

    add_campaign(&storage, 1, 100, 1000, 0).await;

    add_campaign(&storage, 2, 100, 1000, 0).await;
    let mut paused = storage.get_campaign(2).await.unwrap().unwrap();
    paused.status = CampaignStatus::Paused;
    storage.upsert_campaign(&paused).await.unwrap();

    add_campaign(&storage, 3, 100, 1000, 0).await;
    let mut expired = storage.get_campaign(3).await.unwrap().unwrap();
    expired.start_date = now - 7200;
    expired.end_date = now - 3600;
    storage.upsert_campaign(&expired).await.unwrap();

    add_campaign(&storage, 4, 100, 1000, 0).await;
    let mut drained = storage.get_campaign(4).await.unwrap().unwrap();
    drained.remaining_daily_budget = 0;
    storage.upsert_campaign(&drained).await.unwrap();

    let candidates = storage.serving_candidates(now).await.unwrap();
    let campaign_ids: Vec<i64> = candidates.iter().map(|row| row.campaign.id).collect();
    assert_eq!(campaign_ids, vec![1]);
}

#[tokio::test]
async fn test_serving_candidates_ordered_by_creative_id_with_raw_targeting() {
    let storage = setup_sqlite().await;
    add_campaign(&storage, 2, 100, 1000, 0).await;
    add_campaign(&storage, 1, 100, 1000, 0).await;
    storage
        .upsert_creative(&Creative::new(5, 2, "https://cdn/5.mp4", "https://l/5", 15))
        .await
        .unwrap();
    storage.set_targeting(2, "{not json").await.unwrap();

    let candidates = storage.serving_candidates(now()).await.unwrap();
    let creative_ids: Vec<i64> = candidates.iter().map(|row| row.creative.id).collect();
    assert_eq!(creative_ids, vec![5, 10, 20]);

    // Malformed documents are handed back untouched; missing ones default to match-all
    assert_eq!(candidates[0].targeting, "{not json");
    assert_eq!(candidates[1].targeting, "{}");
}

#[tokio::test]
async fn test_insufficient_budget_records_nothing() {
    let storage = setup_sqlite().await;
    // Budget 5, impression cost 10
    add_campaign(&storage, 1, 5, 10_000, 0).await;

    let result = storage
        .charge_impression(NewImpression::new("tok-1", 10, 1, "viewer"), 10_000)
        .await;
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientBudget { campaign_id: 1 })
    ));

    assert!(storage
        .find_impression_by_token("tok-1")
        .await
        .unwrap()
        .is_none());
    let campaign = storage.get_campaign(1).await.unwrap().unwrap();
    assert_eq!(campaign.remaining_daily_budget, 5);
    assert_eq!(campaign.remaining_total_budget, 5);
}

#[tokio::test]
async fn test_charge_unknown_campaign_is_not_found() {
    let storage = setup_sqlite().await;

    let result = storage
        .charge_impression(NewImpression::new("tok-1", 10, 42, "viewer"), 1000)
        .await;
    assert!(matches!(result, Err(LedgerError::NotFound(42))));

    // Zero cost still requires the campaign to exist
    let result = storage
        .charge_impression(NewImpression::new("tok-2", 10, 42, "viewer"), 0)
        .await;
    assert!(matches!(result, Err(LedgerError::NotFound(42))));
}

#[tokio::test]
async fn test_impression_charges_rounded_up_cost() {
    let storage = setup_sqlite().await;
    add_campaign(&storage, 1, 100, 1500, 0).await;

    let impression = storage
        .charge_impression(NewImpression::new("tok-1", 10, 1, "viewer"), 1500)
        .await
        .unwrap();
    assert_eq!(impression.cost, 2);

    let campaign = storage.get_campaign(1).await.unwrap().unwrap();
    assert_eq!(campaign.remaining_daily_budget, 98);
    assert_eq!(campaign.remaining_total_budget, 98);
}

#[tokio::test]
async fn test_click_charged_once_per_token() {
    let storage = setup_sqlite().await;
    add_campaign(&storage, 1, 100, 0, 7).await;

    let first = storage.charge_click(click("tok-1", 1), 7).await.unwrap();
    assert!(!first.is_duplicate());
    assert_eq!(first.click().cost, 7);

    let second = storage.charge_click(click("tok-1", 1), 7).await.unwrap();
    assert!(second.is_duplicate());
    assert_eq!(second.click().id, first.click().id);

    let campaign = storage.get_campaign(1).await.unwrap().unwrap();
    assert_eq!(campaign.remaining_total_budget, 93);
}

#[tokio::test]
async fn test_rejected_click_leaves_no_row() {
    let storage = setup_sqlite().await;
    add_campaign(&storage, 1, 3, 0, 7).await;

    let result = storage.charge_click(click("tok-1", 1), 7).await;
    assert!(matches!(
        result,
        Err(LedgerError::InsufficientBudget { campaign_id: 1 })
    ));

    // Raise the budget; the token was never consumed, so the retry is a fresh click
    let mut campaign = storage.get_campaign(1).await.unwrap().unwrap();
    campaign.remaining_daily_budget = 10;
    campaign.remaining_total_budget = 10;
    storage.upsert_campaign(&campaign).await.unwrap();

    let retry = storage.charge_click(click("tok-1", 1), 7).await.unwrap();
    assert!(!retry.is_duplicate());
}

#[tokio::test]
async fn test_stats_window_is_inclusive() {
    let storage = setup_sqlite().await;
    add_campaign(&storage, 1, 1000, 2000, 3).await;
    add_campaign(&storage, 2, 1000, 1000, 0).await;

    let impression = storage
        .charge_impression(NewImpression::new("tok-1", 10, 1, "viewer"), 2000)
        .await
        .unwrap();
    storage
        .charge_impression(NewImpression::new("tok-2", 20, 2, "viewer"), 1000)
        .await
        .unwrap();
    let clicked = storage.charge_click(click("tok-1", 1), 3).await.unwrap();

    let at = impression.created_at;
    let end = clicked.click().created_at;

    let all = storage
        .get_stats(&StatsQuery {
            from: at,
            to: end,
            campaign_id: None,
        })
        .await
        .unwrap();
    assert_eq!(all.impressions, 2);
    assert_eq!(all.clicks, 1);
    assert_eq!(all.cost, 2 + 1 + 3);

    let only_first = storage
        .get_stats(&StatsQuery {
            from: at,
            to: end,
            campaign_id: Some(1),
        })
        .await
        .unwrap();
    assert_eq!(only_first.impressions, 1);
    assert_eq!(only_first.cost, 5);

    let later = storage
        .get_stats(&StatsQuery {
            from: end + 1,
            to: end + 100,
            campaign_id: None,
        })
        .await
        .unwrap();
    assert_eq!(later.impressions, 0);
    assert_eq!(later.clicks, 0);
    assert_eq!(later.cost, 0);

    let inverted = storage
        .get_stats(&StatsQuery {
            from: end,
            to: at - 1,
            campaign_id: None,
        })
        .await
        .unwrap();
    assert_eq!(inverted.impressions, 0);
}

#[tokio::test]
async fn test_recent_impression_counts_per_creative() {
    let storage = setup_sqlite().await;
    add_campaign(&storage, 1, 1000, 1000, 0).await;
    add_campaign(&storage, 2, 1000, 1000, 0).await;

    for i in 0..3 {
        storage
            .charge_impression(NewImpression::new(format!("a-{i}"), 10, 1, "viewer"), 1000)
            .await
            .unwrap();
    }
    storage
        .charge_impression(NewImpression::new("b-0", 20, 2, "viewer"), 1000)
        .await
        .unwrap();
    storage
        .charge_impression(NewImpression::new("c-0", 20, 2, "someone-else"), 1000)
        .await
        .unwrap();

    let counts = storage
        .recent_impression_counts("viewer", now() - 60)
        .await
        .unwrap();
    assert_eq!(counts.get(&10), Some(&3));
    assert_eq!(counts.get(&20), Some(&1));

    let future = storage
        .recent_impression_counts("viewer", now() + 60)
        .await
        .unwrap();
    assert!(future.is_empty());
}

#[tokio::test]
async fn test_reset_daily_budgets_bounded_by_total() {
    let storage = setup_sqlite().await;
    add_campaign(&storage, 1, 100, 0, 0).await;
    add_campaign(&storage, 2, 100, 0, 0).await;

    let mut low_total = storage.get_campaign(2).await.unwrap().unwrap();
    low_total.remaining_daily_budget = 0;
    low_total.remaining_total_budget = 40;
    storage.upsert_campaign(&low_total).await.unwrap();

    let mut spent_today = storage.get_campaign(1).await.unwrap().unwrap();
    spent_today.remaining_daily_budget = 0;
    storage.upsert_campaign(&spent_today).await.unwrap();

    let touched = storage.reset_daily_budgets().await.unwrap();
    assert_eq!(touched, 2);

    let first = storage.get_campaign(1).await.unwrap().unwrap();
    assert_eq!(first.remaining_daily_budget, 100);
    let second = storage.get_campaign(2).await.unwrap().unwrap();
    assert_eq!(second.remaining_daily_budget, 40);
    assert_eq!(second.remaining_total_budget, 40);
}
