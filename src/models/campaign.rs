use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Paused,
    Ended,
}

#[derive(Debug, Error)]
#[error("unknown campaign status '{0}'")]
pub struct UnknownStatus(String);

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Ended => "ended",
        }
    }
}

impl TryFrom<String> for CampaignStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "ended" => Ok(CampaignStatus::Ended),
            _ => Err(UnknownStatus(value)),
        }
    }
}

/// A budgeted advertising contract.
///
/// Budgets and bids are integer minor currency units. `remaining_*` counters are
/// only ever decremented by the ledger (or restored by an administrative reset).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub start_date: i64,
    pub end_date: i64,
    pub daily_budget: i64,
    pub total_budget: i64,
    pub remaining_daily_budget: i64,
    pub remaining_total_budget: i64,
    /// Cost per thousand impressions
    pub cpm_bid: i64,
    /// Cost per click
    pub cpc_bid: i64,
    #[sqlx(try_from = "String")]
    pub status: CampaignStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Campaign {
    /// Active campaign with full budgets and no bids.
    pub fn new(
        id: i64,
        name: impl Into<String>,
        start_date: i64,
        end_date: i64,
        daily_budget: i64,
        total_budget: i64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id,
            name: name.into(),
            start_date,
            end_date,
            daily_budget,
            total_budget,
            remaining_daily_budget: daily_budget,
            remaining_total_budget: total_budget,
            cpm_bid: 0,
            cpc_bid: 0,
            status: CampaignStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the campaign may be shown at `now`: active, inside its date window
    /// and with both budget counters positive.
    pub fn is_serving_at(&self, now: i64) -> bool {
        self.status == CampaignStatus::Active
            && self.start_date <= now
            && now <= self.end_date
            && self.remaining_daily_budget > 0
            && self.remaining_total_budget > 0
    }
}
