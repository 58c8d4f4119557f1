use crate::models::{
    Campaign, ClickCharge, Creative, Impression, NewClick, NewImpression, Stats, StatsQuery,
};
use crate::storage::ledger::{LedgerError, LedgerResult};
use crate::storage::{AdminStore, CandidateRow, CatalogStore, EventStore, Ledger, Storage};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Cached storage wrapper that keeps the eligibility read warm for a short TTL.
///
/// Only `serving_candidates` is cached. Every ledger call goes straight to the
/// inner store, which re-checks budgets under its own lock, so a stale candidate
/// list can at worst cost an extra `InsufficientBudget` round trip.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    candidates: Cache<(), Arc<Vec<CandidateRow>>>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, ttl: Duration) -> Self {
        let candidates = Cache::builder().max_capacity(1).time_to_live(ttl).build();

        Self { inner, candidates }
    }

    async fn invalidate(&self) {
        self.candidates.invalidate(&()).await;
    }
}

#[async_trait]
impl CatalogStore for CachedStorage {
    async fn serving_candidates(&self, now: i64) -> Result<Vec<CandidateRow>> {
        if let Some(cached) = self.candidates.get(&()).await {
            return Ok(cached.as_ref().clone());
        }

        // Cache miss - fetch from underlying storage
        let rows = Arc::new(self.inner.serving_candidates(now).await?);
        self.candidates.insert((), Arc::clone(&rows)).await;

        Ok(rows.as_ref().clone())
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        self.inner.get_campaign(id).await
    }

    async fn get_creative(&self, id: i64) -> Result<Option<Creative>> {
        self.inner.get_creative(id).await
    }

    async fn recent_impression_counts(
        &self,
        user_id: &str,
        since: i64,
    ) -> Result<HashMap<i64, i64>> {
        self.inner.recent_impression_counts(user_id, since).await
    }
}

#[async_trait]
impl Ledger for CachedStorage {
    async fn charge_impression(
        &self,
        impression: NewImpression,
        cpm_bid: i64,
    ) -> LedgerResult<Impression> {
        let result = self.inner.charge_impression(impression, cpm_bid).await;

        // Drop exhausted campaigns from the next candidate read
        if matches!(result, Err(LedgerError::InsufficientBudget { .. })) {
            self.invalidate().await;
        }

        result
    }

    async fn charge_click(&self, click: NewClick, cpc_bid: i64) -> LedgerResult<ClickCharge> {
        let result = self.inner.charge_click(click, cpc_bid).await;

        if matches!(result, Err(LedgerError::InsufficientBudget { .. })) {
            self.invalidate().await;
        }

        result
    }
}

#[async_trait]
impl EventStore for CachedStorage {
    async fn find_impression_by_token(&self, token: &str) -> Result<Option<Impression>> {
        self.inner.find_impression_by_token(token).await
    }

    async fn get_stats(&self, query: &StatsQuery) -> Result<Stats> {
        self.inner.get_stats(query).await
    }
}

#[async_trait]
impl AdminStore for CachedStorage {
    async fn upsert_campaign(&self, campaign: &Campaign) -> Result<()> {
        self.inner.upsert_campaign(campaign).await?;
        self.invalidate().await;
        Ok(())
    }

    async fn upsert_creative(&self, creative: &Creative) -> Result<()> {
        self.inner.upsert_creative(creative).await?;
        self.invalidate().await;
        Ok(())
    }

    async fn set_targeting(&self, campaign_id: i64, targeting: &str) -> Result<()> {
        self.inner.set_targeting(campaign_id, targeting).await?;
        self.invalidate().await;
        Ok(())
    }

    async fn reset_daily_budgets(&self) -> Result<u64> {
        let touched = self.inner.reset_daily_budgets().await?;
        self.invalidate().await;
        Ok(touched)
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }
}
