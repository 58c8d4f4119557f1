use crate::models::{ClickCharge, NewClick};
use crate::serving::error::ServeError;
use crate::storage::{CatalogStore, EventStore, Ledger, LedgerError};
use anyhow::anyhow;
use tracing::{debug, info, warn};

/// Resolve a click token to its landing URL, charging the campaign at most once.
///
/// A campaign that can no longer pay for the click still sends the viewer to the
/// landing page; the click is left unbilled and unrecorded.
pub async fn register_click<S>(store: &S, token: &str) -> Result<String, ServeError>
where
    S: CatalogStore + EventStore + Ledger + ?Sized,
{
    if token.trim().is_empty() {
        return Err(ServeError::Validation(
            "click token must not be empty".to_string(),
        ));
    }

    let impression = store
        .find_impression_by_token(token)
        .await?
        .ok_or(ServeError::UnknownToken)?;

    let creative = store
        .get_creative(impression.creative_id)
        .await?
        .ok_or_else(|| {
            anyhow!(
                "creative {} for impression {} not found",
                impression.creative_id,
                impression.id
            )
        })?;

    let campaign = store
        .get_campaign(impression.campaign_id)
        .await?
        .ok_or_else(|| {
            anyhow!(
                "campaign {} for impression {} not found",
                impression.campaign_id,
                impression.id
            )
        })?;

    let click = NewClick {
        token: token.to_string(),
        impression_id: Some(impression.id),
        creative_id: creative.id,
        campaign_id: campaign.id,
        user_id: impression.user_id.clone(),
    };

    match store.charge_click(click, campaign.cpc_bid).await {
        Ok(ClickCharge::Recorded(click)) => {
            info!(
                campaign_id = click.campaign_id,
                creative_id = click.creative_id,
                cost = click.cost,
                "Click recorded"
            );
        }
        Ok(ClickCharge::Duplicate(click)) => {
            debug!(click_id = click.id, "Duplicate click ignored");
        }
        Err(LedgerError::InsufficientBudget { campaign_id }) => {
            warn!(campaign_id, "Click left unbilled: insufficient budget");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(creative.landing_url)
}
