use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A creative shown to a viewer. Written once by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Impression {
    pub id: i64,
    pub token: String,
    pub creative_id: i64,
    pub campaign_id: i64,
    pub user_id: String,
    pub cost: i64,
    pub created_at: i64,
}

/// A viewer following a click token. At most one per token.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Click {
    pub id: i64,
    pub token: String,
    pub impression_id: Option<i64>,
    pub creative_id: i64,
    pub campaign_id: i64,
    pub user_id: String,
    pub cost: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewImpression {
    pub token: String,
    pub creative_id: i64,
    pub campaign_id: i64,
    pub user_id: String,
}

impl NewImpression {
    pub fn new(
        token: impl Into<String>,
        creative_id: i64,
        campaign_id: i64,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            creative_id,
            campaign_id,
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewClick {
    pub token: String,
    pub impression_id: Option<i64>,
    pub creative_id: i64,
    pub campaign_id: i64,
    pub user_id: String,
}

/// Outcome of a click charge. Both variants are successes.
#[derive(Debug, Clone)]
pub enum ClickCharge {
    Recorded(Click),
    /// The token was already recorded; nothing was inserted or charged.
    Duplicate(Click),
}

impl ClickCharge {
    pub fn click(&self) -> &Click {
        match self {
            ClickCharge::Recorded(click) | ClickCharge::Duplicate(click) => click,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, ClickCharge::Duplicate(_))
    }
}

/// Inclusive `[from, to]` window in Unix seconds, optionally narrowed to one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsQuery {
    pub from: i64,
    pub to: i64,
    pub campaign_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub impressions: i64,
    pub clicks: i64,
    /// Impression cost plus click cost
    pub cost: i64,
}
