use crate::models::{
    Campaign, Click, ClickCharge, Creative, Impression, NewClick, NewImpression, Stats, StatsQuery,
};
use crate::storage::ledger::{can_afford, click_cost, impression_cost, LedgerError, LedgerResult};
use crate::storage::{AdminStore, CandidateRow, CatalogStore, EventStore, Ledger, Storage};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Process-local storage backed by `DashMap`.
///
/// Budget charges hold the campaign's shard lock for the whole check-and-decrement,
/// so concurrent charges against one campaign are serialized while unrelated
/// campaigns mostly proceed in parallel.
#[derive(Default)]
pub struct MemoryStorage {
    campaigns: DashMap<i64, Campaign>,
    creatives: DashMap<i64, Creative>,
    targeting: DashMap<i64, String>,
    /// Keyed by impression token
    impressions: DashMap<String, Impression>,
    /// Keyed by click token
    clicks: DashMap<String, Click>,
    next_event_id: AtomicI64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.next_event_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Check and decrement under the campaign entry lock.
    fn debit(&self, campaign_id: i64, cost: i64, now: i64) -> LedgerResult<()> {
        let mut campaign = self
            .campaigns
            .get_mut(&campaign_id)
            .ok_or(LedgerError::NotFound(campaign_id))?;

        if !can_afford(
            campaign.remaining_daily_budget,
            campaign.remaining_total_budget,
            cost,
        ) {
            return Err(LedgerError::InsufficientBudget { campaign_id });
        }

        if cost > 0 {
            campaign.remaining_daily_budget -= cost;
            campaign.remaining_total_budget -= cost;
            campaign.updated_at = now;
        }

        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryStorage {
    async fn serving_candidates(&self, now: i64) -> Result<Vec<CandidateRow>> {
        let mut rows: Vec<CandidateRow> = self
            .creatives
            .iter()
            .filter_map(|entry| {
                let creative = entry.value();
                let campaign = self.campaigns.get(&creative.campaign_id)?;
                if !campaign.is_serving_at(now) {
                    return None;
                }
                let targeting = self
                    .targeting
                    .get(&campaign.id)
                    .map(|t| t.value().clone())
                    .unwrap_or_else(|| "{}".to_string());

                Some(CandidateRow {
                    campaign: campaign.value().clone(),
                    creative: creative.clone(),
                    targeting,
                })
            })
            .collect();

        rows.sort_by_key(|row| row.creative.id);
        Ok(rows)
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        Ok(self.campaigns.get(&id).map(|c| c.value().clone()))
    }

    async fn get_creative(&self, id: i64) -> Result<Option<Creative>> {
        Ok(self.creatives.get(&id).map(|c| c.value().clone()))
    }

    async fn recent_impression_counts(
        &self,
        user_id: &str,
        since: i64,
    ) -> Result<HashMap<i64, i64>> {
        let mut counts = HashMap::new();
        for entry in self.impressions.iter() {
            let impression = entry.value();
            if impression.user_id == user_id && impression.created_at >= since {
                *counts.entry(impression.creative_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl Ledger for MemoryStorage {
    async fn charge_impression(
        &self,
        impression: NewImpression,
        cpm_bid: i64,
    ) -> LedgerResult<Impression> {
        let cost = impression_cost(cpm_bid);
        let now = chrono::Utc::now().timestamp();

        self.debit(impression.campaign_id, cost, now)?;

        let recorded = Impression {
            id: self.next_id(),
            token: impression.token,
            creative_id: impression.creative_id,
            campaign_id: impression.campaign_id,
            user_id: impression.user_id,
            cost,
            created_at: now,
        };
        self.impressions
            .insert(recorded.token.clone(), recorded.clone());

        Ok(recorded)
    }

    async fn charge_click(&self, click: NewClick, cpc_bid: i64) -> LedgerResult<ClickCharge> {
        let cost = click_cost(cpc_bid);
        let now = chrono::Utc::now().timestamp();

        // The vacant entry keeps the token's shard locked until the click is stored,
        // so a concurrent duplicate waits and then sees the recorded click.
        match self.clicks.entry(click.token.clone()) {
            Entry::Occupied(existing) => Ok(ClickCharge::Duplicate(existing.get().clone())),
            Entry::Vacant(slot) => {
                self.debit(click.campaign_id, cost, now)?;

                let recorded = Click {
                    id: self.next_id(),
                    token: click.token,
                    impression_id: click.impression_id,
                    creative_id: click.creative_id,
                    campaign_id: click.campaign_id,
                    user_id: click.user_id,
                    cost,
                    created_at: now,
                };
                slot.insert(recorded.clone());

                Ok(ClickCharge::Recorded(recorded))
            }
        }
    }
}

#[async_trait]
impl EventStore for MemoryStorage {
    async fn find_impression_by_token(&self, token: &str) -> Result<Option<Impression>> {
        Ok(self.impressions.get(token).map(|i| i.value().clone()))
    }

    async fn get_stats(&self, query: &StatsQuery) -> Result<Stats> {
        let in_scope = |campaign_id: i64, created_at: i64| {
            created_at >= query.from
                && created_at <= query.to
                && query.campaign_id.map_or(true, |id| id == campaign_id)
        };

        let mut stats = Stats::default();
        for entry in self.impressions.iter() {
            let impression = entry.value();
            if in_scope(impression.campaign_id, impression.created_at) {
                stats.impressions += 1;
                stats.cost += impression.cost;
            }
        }
        for entry in self.clicks.iter() {
            let click = entry.value();
            if in_scope(click.campaign_id, click.created_at) {
                stats.clicks += 1;
                stats.cost += click.cost;
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl AdminStore for MemoryStorage {
    async fn upsert_campaign(&self, campaign: &Campaign) -> Result<()> {
        self.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn upsert_creative(&self, creative: &Creative) -> Result<()> {
        if !self.campaigns.contains_key(&creative.campaign_id) {
            anyhow::bail!(
                "creative {} references unknown campaign {}",
                creative.id,
                creative.campaign_id
            );
        }
        self.creatives.insert(creative.id, creative.clone());
        Ok(())
    }

    async fn set_targeting(&self, campaign_id: i64, targeting: &str) -> Result<()> {
        self.targeting.insert(campaign_id, targeting.to_string());
        Ok(())
    }

    async fn reset_daily_budgets(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut touched = 0;
        for mut entry in self.campaigns.iter_mut() {
            let campaign = entry.value_mut();
            campaign.remaining_daily_budget =
                campaign.daily_budget.min(campaign.remaining_total_budget);
            campaign.updated_at = now;
            touched += 1;
        }
        Ok(touched)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn init(&self) -> Result<()> {
        Ok(())
    }
}
