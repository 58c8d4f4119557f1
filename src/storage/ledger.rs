use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient budget for campaign {campaign_id}")]
    InsufficientBudget { campaign_id: i64 },
    #[error("campaign {0} not found")]
    NotFound(i64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Other(err.into())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// One thousandth of the CPM bid, rounded up so a positive bid never charges zero.
pub fn impression_cost(cpm_bid: i64) -> i64 {
    if cpm_bid <= 0 {
        return 0;
    }
    cpm_bid / 1000 + i64::from(cpm_bid % 1000 != 0)
}

pub fn click_cost(cpc_bid: i64) -> i64 {
    cpc_bid.max(0)
}

/// Both counters must cover the cost; zero cost always fits.
pub fn can_afford(remaining_daily: i64, remaining_total: i64, cost: i64) -> bool {
    remaining_daily >= cost && remaining_total >= cost
}
