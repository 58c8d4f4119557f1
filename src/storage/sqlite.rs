use crate::models::{
    Campaign, Click, ClickCharge, Creative, Impression, NewClick, NewImpression, Stats, StatsQuery,
};
use crate::storage::ledger::{click_cost, impression_cost, LedgerError, LedgerResult};
use crate::storage::{AdminStore, CandidateRow, CatalogStore, EventStore, Ledger, Storage};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS campaigns (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        start_date INTEGER NOT NULL,
        end_date INTEGER NOT NULL,
        daily_budget INTEGER NOT NULL,
        total_budget INTEGER NOT NULL,
        remaining_daily_budget INTEGER NOT NULL CHECK (remaining_daily_budget >= 0),
        remaining_total_budget INTEGER NOT NULL CHECK (remaining_total_budget >= 0),
        cpm_bid INTEGER NOT NULL DEFAULT 0,
        cpc_bid INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'active',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS creatives (
        id INTEGER PRIMARY KEY,
        campaign_id INTEGER NOT NULL REFERENCES campaigns(id),
        title TEXT NOT NULL,
        video_url TEXT NOT NULL,
        landing_url TEXT NOT NULL,
        duration INTEGER NOT NULL,
        language TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT '',
        placement TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS campaign_targeting (
        campaign_id INTEGER PRIMARY KEY REFERENCES campaigns(id),
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS impressions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        token TEXT NOT NULL UNIQUE,
        creative_id INTEGER NOT NULL,
        campaign_id INTEGER NOT NULL,
        user_id TEXT NOT NULL,
        cost INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS clicks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        token TEXT NOT NULL UNIQUE,
        impression_id INTEGER,
        creative_id INTEGER NOT NULL,
        campaign_id INTEGER NOT NULL,
        user_id TEXT NOT NULL,
        cost INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_creatives_campaign ON creatives(campaign_id)",
    "CREATE INDEX IF NOT EXISTS idx_impressions_user ON impressions(user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_impressions_created ON impressions(created_at, campaign_id)",
    "CREATE INDEX IF NOT EXISTS idx_clicks_created ON clicks(created_at, campaign_id)",
];

#[derive(FromRow)]
struct CampaignWithTargeting {
    #[sqlx(flatten)]
    campaign: Campaign,
    targeting: String,
}

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Compare-and-decrement on the campaign row. Runs as the first statement of
    /// `tx` for impressions so the write lock is taken before anything is read.
    async fn debit(
        tx: &mut Transaction<'_, Sqlite>,
        campaign_id: i64,
        cost: i64,
        now: i64,
    ) -> LedgerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET remaining_daily_budget = remaining_daily_budget - ?,
                remaining_total_budget = remaining_total_budget - ?,
                updated_at = ?
            WHERE id = ?
              AND remaining_daily_budget >= ?
              AND remaining_total_budget >= ?
            "#,
        )
        .bind(cost)
        .bind(cost)
        .bind(now)
        .bind(campaign_id)
        .bind(cost)
        .bind(cost)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM campaigns WHERE id = ?")
            .bind(campaign_id)
            .fetch_one(&mut **tx)
            .await?;

        if exists > 0 {
            Err(LedgerError::InsufficientBudget { campaign_id })
        } else {
            Err(LedgerError::NotFound(campaign_id))
        }
    }
}

#[async_trait]
impl CatalogStore for SqliteStorage {
    async fn serving_candidates(&self, now: i64) -> Result<Vec<CandidateRow>> {
        let campaigns = sqlx::query_as::<_, CampaignWithTargeting>(
            r#"
            SELECT c.id, c.name, c.start_date, c.end_date, c.daily_budget, c.total_budget,
                   c.remaining_daily_budget, c.remaining_total_budget, c.cpm_bid, c.cpc_bid,
                   c.status, c.created_at, c.updated_at,
                   COALESCE(t.data, '{}') AS targeting
            FROM campaigns c
            LEFT JOIN campaign_targeting t ON t.campaign_id = c.id
            WHERE c.status = 'active'
              AND ? BETWEEN c.start_date AND c.end_date
              AND c.remaining_daily_budget > 0
              AND c.remaining_total_budget > 0
            "#,
        )
        .bind(now)
        .fetch_all(self.pool.as_ref())
        .await?;

        let by_id: HashMap<i64, CampaignWithTargeting> = campaigns
            .into_iter()
            .map(|row| (row.campaign.id, row))
            .collect();
        if by_id.is_empty() {
            return Ok(vec![]);
        }

        let creatives = sqlx::query_as::<_, Creative>(
            r#"
            SELECT cr.id, cr.campaign_id, cr.title, cr.video_url, cr.landing_url, cr.duration,
                   cr.language, cr.category, cr.placement, cr.created_at, cr.updated_at
            FROM creatives cr
            JOIN campaigns c ON c.id = cr.campaign_id
            WHERE c.status = 'active'
              AND ? BETWEEN c.start_date AND c.end_date
              AND c.remaining_daily_budget > 0
              AND c.remaining_total_budget > 0
            ORDER BY cr.id
            "#,
        )
        .bind(now)
        .fetch_all(self.pool.as_ref())
        .await?;

        // Campaigns that dropped out between the two reads are skipped.
        let rows = creatives
            .into_iter()
            .filter_map(|creative| {
                let entry = by_id.get(&creative.campaign_id)?;
                Some(CandidateRow {
                    campaign: entry.campaign.clone(),
                    creative,
                    targeting: entry.targeting.clone(),
                })
            })
            .collect();

        Ok(rows)
    }

    async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            SELECT id, name, start_date, end_date, daily_budget, total_budget,
                   remaining_daily_budget, remaining_total_budget, cpm_bid, cpc_bid,
                   status, created_at, updated_at
            FROM campaigns
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(campaign)
    }

    async fn get_creative(&self, id: i64) -> Result<Option<Creative>> {
        let creative = sqlx::query_as::<_, Creative>(
            r#"
            SELECT id, campaign_id, title, video_url, landing_url, duration,
                   language, category, placement, created_at, updated_at
            FROM creatives
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(creative)
    }

    async fn recent_impression_counts(
        &self,
        user_id: &str,
        since: i64,
    ) -> Result<HashMap<i64, i64>> {
        let counts = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT creative_id, COUNT(*)
            FROM impressions
            WHERE user_id = ? AND created_at >= ?
            GROUP BY creative_id
            "#,
        )
        .bind(user_id)
        .bind(since)
        .fetch_all(self.pool.as_ref())
        .await?
        .into_iter()
        .collect();

        Ok(counts)
    }
}

#[async_trait]
impl Ledger for SqliteStorage {
    async fn charge_impression(
        &self,
        impression: NewImpression,
        cpm_bid: i64,
    ) -> LedgerResult<Impression> {
        let cost = impression_cost(cpm_bid);
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        if let Err(e) = Self::debit(&mut tx, impression.campaign_id, cost, now).await {
            tx.rollback().await?;
            return Err(e);
        }

        let recorded = sqlx::query_as::<_, Impression>(
            r#"
            INSERT INTO impressions (token, creative_id, campaign_id, user_id, cost, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, token, creative_id, campaign_id, user_id, cost, created_at
            "#,
        )
        .bind(&impression.token)
        .bind(impression.creative_id)
        .bind(impression.campaign_id)
        .bind(&impression.user_id)
        .bind(cost)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(recorded)
    }

    async fn charge_click(&self, click: NewClick, cpc_bid: i64) -> LedgerResult<ClickCharge> {
        let cost = click_cost(cpc_bid);
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Click>(
            r#"
            INSERT INTO clicks (token, impression_id, creative_id, campaign_id, user_id, cost, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(token) DO NOTHING
            RETURNING id, token, impression_id, creative_id, campaign_id, user_id, cost, created_at
            "#,
        )
        .bind(&click.token)
        .bind(click.impression_id)
        .bind(click.creative_id)
        .bind(click.campaign_id)
        .bind(&click.user_id)
        .bind(cost)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(recorded) = inserted else {
            let existing = sqlx::query_as::<_, Click>(
                r#"
                SELECT id, token, impression_id, creative_id, campaign_id, user_id, cost, created_at
                FROM clicks
                WHERE token = ?
                "#,
            )
            .bind(&click.token)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Ok(ClickCharge::Duplicate(existing));
        };

        // Rolling back also removes the click inserted above.
        if let Err(e) = Self::debit(&mut tx, click.campaign_id, cost, now).await {
            tx.rollback().await?;
            return Err(e);
        }

        tx.commit().await?;
        Ok(ClickCharge::Recorded(recorded))
    }
}

#[async_trait]
impl EventStore for SqliteStorage {
    async fn find_impression_by_token(&self, token: &str) -> Result<Option<Impression>> {
        let impression = sqlx::query_as::<_, Impression>(
            r#"
            SELECT id, token, creative_id, campaign_id, user_id, cost, created_at
            FROM impressions
            WHERE token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(impression)
    }

    async fn get_stats(&self, query: &StatsQuery) -> Result<Stats> {
        let (impressions, impression_cost) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*), COALESCE(SUM(cost), 0)
            FROM impressions
            WHERE created_at >= ? AND created_at <= ?
              AND (? IS NULL OR campaign_id = ?)
            "#,
        )
        .bind(query.from)
        .bind(query.to)
        .bind(query.campaign_id)
        .bind(query.campaign_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        let (clicks, click_cost) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*), COALESCE(SUM(cost), 0)
            FROM clicks
            WHERE created_at >= ? AND created_at <= ?
              AND (? IS NULL OR campaign_id = ?)
            "#,
        )
        .bind(query.from)
        .bind(query.to)
        .bind(query.campaign_id)
        .bind(query.campaign_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(Stats {
            impressions,
            clicks,
            cost: impression_cost + click_cost,
        })
    }
}

#[async_trait]
impl AdminStore for SqliteStorage {
    async fn upsert_campaign(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (id, name, start_date, end_date, daily_budget, total_budget,
                                   remaining_daily_budget, remaining_total_budget, cpm_bid, cpc_bid,
                                   status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                daily_budget = excluded.daily_budget,
                total_budget = excluded.total_budget,
                remaining_daily_budget = excluded.remaining_daily_budget,
                remaining_total_budget = excluded.remaining_total_budget,
                cpm_bid = excluded.cpm_bid,
                cpc_bid = excluded.cpc_bid,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(campaign.id)
        .bind(&campaign.name)
        .bind(campaign.start_date)
        .bind(campaign.end_date)
        .bind(campaign.daily_budget)
        .bind(campaign.total_budget)
        .bind(campaign.remaining_daily_budget)
        .bind(campaign.remaining_total_budget)
        .bind(campaign.cpm_bid)
        .bind(campaign.cpc_bid)
        .bind(campaign.status.as_str())
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn upsert_creative(&self, creative: &Creative) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO creatives (id, campaign_id, title, video_url, landing_url, duration,
                                   language, category, placement, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                campaign_id = excluded.campaign_id,
                title = excluded.title,
                video_url = excluded.video_url,
                landing_url = excluded.landing_url,
                duration = excluded.duration,
                language = excluded.language,
                category = excluded.category,
                placement = excluded.placement,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(creative.id)
        .bind(creative.campaign_id)
        .bind(&creative.title)
        .bind(&creative.video_url)
        .bind(&creative.landing_url)
        .bind(creative.duration)
        .bind(&creative.language)
        .bind(&creative.category)
        .bind(&creative.placement)
        .bind(creative.created_at)
        .bind(creative.updated_at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn set_targeting(&self, campaign_id: i64, targeting: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaign_targeting (campaign_id, data)
            VALUES (?, ?)
            ON CONFLICT (campaign_id) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(campaign_id)
        .bind(targeting)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn reset_daily_budgets(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET remaining_daily_budget = MIN(daily_budget, remaining_total_budget),
                updated_at = ?
            "#,
        )
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(self.pool.as_ref()).await?;
        }

        Ok(())
    }
}
