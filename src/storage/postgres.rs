use crate::models::{
    Campaign, Click, ClickCharge, Creative, Impression, NewClick, NewImpression, Stats, StatsQuery,
};
use crate::storage::ledger::{
    can_afford, click_cost, impression_cost, LedgerError, LedgerResult,
};
use crate::storage::{AdminStore, CandidateRow, CatalogStore, EventStore, Ledger, Storage};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS campaigns (
        id BIGINT PRIMARY KEY,
        name TEXT NOT NULL,
        start_date BIGINT NOT NULL,
        end_date BIGINT NOT NULL,
        daily_budget BIGINT NOT NULL,
        total_budget BIGINT NOT NULL,
        remaining_daily_budget BIGINT NOT NULL CHECK (remaining_daily_budget >= 0),
        remaining_total_budget BIGINT NOT NULL CHECK (remaining_total_budget >= 0),
        cpm_bid BIGINT NOT NULL DEFAULT 0,
        cpc_bid BIGINT NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'active',
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS creatives (
        id BIGINT PRIMARY KEY,
        campaign_id BIGINT NOT NULL REFERENCES campaigns(id),
        title TEXT NOT NULL,
        video_url TEXT NOT NULL,
        landing_url TEXT NOT NULL,
        duration INTEGER NOT NULL,
        language TEXT NOT NULL DEFAULT '',
        category TEXT NOT NULL DEFAULT '',
        placement TEXT NOT NULL DEFAULT '',
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS campaign_targeting (
        campaign_id BIGINT PRIMARY KEY REFERENCES campaigns(id),
        data TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS impressions (
        id BIGSERIAL PRIMARY KEY,
        token TEXT NOT NULL UNIQUE,
        creative_id BIGINT NOT NULL,
        campaign_id BIGINT NOT NULL,
        user_id TEXT NOT NULL,
        cost BIGINT NOT NULL,
        created_at BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS clicks (
        id BIGSERIAL PRIMARY KEY,
        token TEXT NOT NULL UNIQUE,
        impression_id BIGINT,
        creative_id BIGINT NOT NULL,
        campaign_id BIGINT NOT NULL,
        user_id TEXT NOT NULL,
        cost BIGINT NOT NULL,
        created_at BIGINT NOT NULL
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

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Lock the campaign row, check both counters and decrement.
    ///
    /// The `FOR UPDATE` lock is held until `tx` ends, so a concurrent charge on the
    /// same campaign blocks here and then reads the committed balance.
    /// READ COMMITTED is enough: the locked row is the only state the check reads.
    async fn debit(
        tx: &mut Transaction<'_, Postgres>,
        campaign_id: i64,
        cost: i64,
        now: i64,
    ) -> LedgerResult<()> {
        let balance = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT remaining_daily_budget, remaining_total_budget
            FROM campaigns
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(campaign_id)
        .fetch_optional(&mut **tx)
        .await?;

        let Some((remaining_daily, remaining_total)) = balance else {
            return Err(LedgerError::NotFound(campaign_id));
        };

        if !can_afford(remaining_daily, remaining_total, cost) {
            return Err(LedgerError::InsufficientBudget { campaign_id });
        }

        if cost > 0 {
            sqlx::query(
                r#"
                UPDATE campaigns
                SET remaining_daily_budget = remaining_daily_budget - $1,
                    remaining_total_budget = remaining_total_budget - $1,
                    updated_at = $2
                WHERE id = $3
                "#,
            )
            .bind(cost)
            .bind(now)
            .bind(campaign_id)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PostgresStorage {
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
              AND $1 BETWEEN c.start_date AND c.end_date
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

        let ids: Vec<i64> = by_id.keys().copied().collect();
        let creatives = sqlx::query_as::<_, Creative>(
            r#"
            SELECT id, campaign_id, title, video_url, landing_url, duration,
                   language, category, placement, created_at, updated_at
            FROM creatives
            WHERE campaign_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&ids)
        .fetch_all(self.pool.as_ref())
        .await?;

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
            WHERE id = $1
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
            WHERE id = $1
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
            WHERE user_id = $1 AND created_at >= $2
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
impl Ledger for PostgresStorage {
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
            VALUES ($1, $2, $3, $4, $5, $6)
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

        // A concurrent insert of the same token blocks on the unique index until
        // the first transaction finishes, then takes the DO NOTHING branch.
        let inserted = sqlx::query_as::<_, Click>(
            r#"
            INSERT INTO clicks (token, impression_id, creative_id, campaign_id, user_id, cost, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (token) DO NOTHING
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
                WHERE token = $1
                "#,
            )
            .bind(&click.token)
            .fetch_one(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Ok(ClickCharge::Duplicate(existing));
        };

        if let Err(e) = Self::debit(&mut tx, click.campaign_id, cost, now).await {
            tx.rollback().await?;
            return Err(e);
        }

        tx.commit().await?;
        Ok(ClickCharge::Recorded(recorded))
    }
}

#[async_trait]
impl EventStore for PostgresStorage {
    async fn find_impression_by_token(&self, token: &str) -> Result<Option<Impression>> {
        let impression = sqlx::query_as::<_, Impression>(
            r#"
            SELECT id, token, creative_id, campaign_id, user_id, cost, created_at
            FROM impressions
            WHERE token = $1
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
            SELECT COUNT(*), COALESCE(SUM(cost), 0)::BIGINT
            FROM impressions
            WHERE created_at >= $1 AND created_at <= $2
              AND ($3::BIGINT IS NULL OR campaign_id = $3)
            "#,
        )
        .bind(query.from)
        .bind(query.to)
        .bind(query.campaign_id)
        .fetch_one(self.pool.as_ref())
        .await?;

        let (clicks, click_cost) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*), COALESCE(SUM(cost), 0)::BIGINT
            FROM clicks
            WHERE created_at >= $1 AND created_at <= $2
              AND ($3::BIGINT IS NULL OR campaign_id = $3)
            "#,
        )
        .bind(query.from)
        .bind(query.to)
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
impl AdminStore for PostgresStorage {
    async fn upsert_campaign(&self, campaign: &Campaign) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (id, name, start_date, end_date, daily_budget, total_budget,
                                   remaining_daily_budget, remaining_total_budget, cpm_bid, cpc_bid,
                                   status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                daily_budget = EXCLUDED.daily_budget,
                total_budget = EXCLUDED.total_budget,
                remaining_daily_budget = EXCLUDED.remaining_daily_budget,
                remaining_total_budget = EXCLUDED.remaining_total_budget,
                cpm_bid = EXCLUDED.cpm_bid,
                cpc_bid = EXCLUDED.cpc_bid,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                campaign_id = EXCLUDED.campaign_id,
                title = EXCLUDED.title,
                video_url = EXCLUDED.video_url,
                landing_url = EXCLUDED.landing_url,
                duration = EXCLUDED.duration,
                language = EXCLUDED.language,
                category = EXCLUDED.category,
                placement = EXCLUDED.placement,
                updated_at = EXCLUDED.updated_at
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
            VALUES ($1, $2)
            ON CONFLICT (campaign_id) DO UPDATE SET data = EXCLUDED.data
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
            SET remaining_daily_budget = LEAST(daily_budget, remaining_total_budget),
                updated_at = $1
            "#,
        )
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(self.pool.as_ref()).await?;
        }

        Ok(())
    }
}
