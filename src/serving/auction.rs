use crate::models::{Campaign, Impression, NewImpression};
use crate::serving::eligibility::Candidate;
use crate::storage::{Ledger, LedgerError, LedgerResult};
use tracing::debug;
use uuid::Uuid;

/// The auction winner together with the impression the ledger recorded for it.
#[derive(Debug, Clone)]
pub struct Selection {
    pub candidate: Candidate,
    pub impression: Impression,
}

/// Expected revenue per thousand impressions.
pub fn score(campaign: &Campaign, estimated_ctr: f64) -> f64 {
    let cpc_value = campaign.cpc_bid as f64 * estimated_ctr * 1000.0;
    (campaign.cpm_bid as f64).max(cpc_value)
}

/// Highest score first. Equal scores keep their incoming order.
pub fn rank(candidates: Vec<Candidate>, estimated_ctr: f64) -> Vec<Candidate> {
    let mut scored: Vec<(f64, Candidate)> = candidates
        .into_iter()
        .map(|candidate| (score(&candidate.campaign, estimated_ctr), candidate))
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, candidate)| candidate).collect()
}

/// Charge candidates in rank order until one campaign can pay.
///
/// Campaigns that cannot cover the impression are skipped. Any other ledger
/// failure aborts the auction.
pub async fn select<L>(
    ledger: &L,
    candidates: Vec<Candidate>,
    user_id: &str,
    estimated_ctr: f64,
) -> LedgerResult<Option<Selection>>
where
    L: Ledger + ?Sized,
{
    for candidate in rank(candidates, estimated_ctr) {
        let impression = NewImpression::new(
            Uuid::new_v4().to_string(),
            candidate.creative.id,
            candidate.campaign.id,
            user_id,
        );

        match ledger
            .charge_impression(impression, candidate.campaign.cpm_bid)
            .await
        {
            Ok(impression) => {
                debug!(
                    creative_id = candidate.creative.id,
                    campaign_id = candidate.campaign.id,
                    cost = impression.cost,
                    "Auction won"
                );
                return Ok(Some(Selection {
                    candidate,
                    impression,
                }));
            }
            Err(LedgerError::InsufficientBudget { campaign_id }) => {
                debug!(campaign_id, "Insufficient budget, trying next candidate");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(None)
}
