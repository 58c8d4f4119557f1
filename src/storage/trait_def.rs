use crate::models::{Campaign, ClickCharge, Creative, Impression, NewClick, NewImpression, Stats, StatsQuery};
use crate::storage::ledger::LedgerResult;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// A creative joined with its campaign, as read for eligibility.
///
/// `targeting` is the raw stored JSON document; decoding it is left to the
/// caller so one malformed campaign cannot fail the whole read.
#[derive(Debug, Clone)]
pub struct CandidateRow {
    pub campaign: Campaign,
    pub creative: Creative,
    pub targeting: String,
}

/// Read side of campaigns and creatives. Reads may be relaxed (cached or
/// non-transactional); the ledger is the consistency point.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Creatives whose campaign is active, in its date window at `now` and
    /// budget-positive, ordered by creative id.
    async fn serving_candidates(&self, now: i64) -> Result<Vec<CandidateRow>>;

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>>;

    async fn get_creative(&self, id: i64) -> Result<Option<Creative>>;

    /// Impressions shown to `user_id` at or after `since`, counted per creative id
    async fn recent_impression_counts(&self, user_id: &str, since: i64)
        -> Result<HashMap<i64, i64>>;
}

/// The only mutation points of campaign budgets. Each call is one atomic unit:
/// budget check, decrement and event insert commit together or not at all.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Charge `ceil(cpm_bid / 1000)` and record the impression.
    async fn charge_impression(
        &self,
        impression: NewImpression,
        cpm_bid: i64,
    ) -> LedgerResult<Impression>;

    /// Charge `cpc_bid` and record the click, at most once per click token.
    async fn charge_click(&self, click: NewClick, cpc_bid: i64) -> LedgerResult<ClickCharge>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn find_impression_by_token(&self, token: &str) -> Result<Option<Impression>>;

    async fn get_stats(&self, query: &StatsQuery) -> Result<Stats>;
}

/// Administrative writes used by seeding and operations tooling.
#[async_trait]
pub trait AdminStore: Send + Sync {
    /// Insert or replace a campaign, including its remaining counters
    async fn upsert_campaign(&self, campaign: &Campaign) -> Result<()>;

    async fn upsert_creative(&self, creative: &Creative) -> Result<()>;

    /// Store the raw targeting JSON for a campaign
    async fn set_targeting(&self, campaign_id: i64, targeting: &str) -> Result<()>;

    /// Restore every campaign's daily counter to its daily budget, never above
    /// what remains of the total budget. Returns the number of campaigns touched.
    async fn reset_daily_budgets(&self) -> Result<u64>;
}

#[async_trait]
pub trait Storage: CatalogStore + Ledger + EventStore + AdminStore {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;
}
