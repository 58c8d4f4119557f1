use crate::config::ServingConfig;
use crate::models::{Campaign, Creative, Targeting, UserContext};
use crate::storage::{CandidateRow, CatalogStore};
use anyhow::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

/// A creative that may be shown to the current viewer.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub campaign: Campaign,
    pub creative: Creative,
    pub targeting: Targeting,
}

/// Creatives the viewer may be shown right now, ordered by creative id.
///
/// Storage pre-filters on status, date window and budget; those are checked
/// again here because the rows may come from a cache.
pub async fn find_eligible<S>(
    store: &S,
    viewer: &UserContext,
    settings: &ServingConfig,
    now: i64,
) -> Result<Vec<Candidate>>
where
    S: CatalogStore + ?Sized,
{
    let rows = store.serving_candidates(now).await?;
    let candidates = filter_rows(rows, viewer, now);

    // Anonymous requests have no history to cap against
    if candidates.is_empty() || viewer.user_id.is_empty() {
        return Ok(candidates);
    }

    let since = now - settings.frequency_window_secs;
    let seen = store
        .recent_impression_counts(&viewer.user_id, since)
        .await?;

    Ok(apply_frequency_cap(candidates, &seen, settings.frequency_cap))
}

pub fn filter_rows(rows: Vec<CandidateRow>, viewer: &UserContext, now: i64) -> Vec<Candidate> {
    rows.into_iter()
        .filter(|row| row.campaign.is_serving_at(now))
        .filter_map(|row| {
            let targeting = match serde_json::from_str::<Targeting>(&row.targeting) {
                Ok(targeting) => targeting,
                Err(e) => {
                    warn!(
                        campaign_id = row.campaign.id,
                        creative_id = row.creative.id,
                        "Skipping candidate with malformed targeting: {}",
                        e
                    );
                    return None;
                }
            };

            targeting.matches(viewer).then(|| Candidate {
                campaign: row.campaign,
                creative: row.creative,
                targeting,
            })
        })
        .collect()
}

/// Drop creatives the viewer has already seen `cap` or more times.
pub fn apply_frequency_cap(
    candidates: Vec<Candidate>,
    seen: &HashMap<i64, i64>,
    cap: i64,
) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|candidate| {
            let shown = seen.get(&candidate.creative.id).copied().unwrap_or(0);
            if shown >= cap {
                debug!(
                    creative_id = candidate.creative.id,
                    shown, "Frequency cap reached"
                );
                return false;
            }
            true
        })
        .collect()
}
