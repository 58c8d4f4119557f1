pub mod auction;
pub mod clicks;
pub mod eligibility;
pub mod error;
pub mod stats;

pub use error::ServeError;

use crate::config::ServingConfig;
use crate::models::{Stats, StatsQuery, UserContext};
use crate::storage::Storage;
use auction::Selection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// What the player needs to show the winning creative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdResponse {
    pub creative_id: i64,
    /// Seconds
    pub duration: i32,
    pub video_url: String,
    pub click_url: String,
}

impl From<Selection> for AdResponse {
    fn from(selection: Selection) -> Self {
        let creative = selection.candidate.creative;
        Self {
            creative_id: creative.id,
            duration: creative.duration,
            video_url: creative.video_url,
            click_url: click_path(&selection.impression.token),
        }
    }
}

pub fn click_path(token: &str) -> String {
    format!("/api/v1/ad/click/{token}")
}

/// Ad selection, click accounting and reporting over one storage backend.
pub struct AdService {
    storage: Arc<dyn Storage>,
    settings: ServingConfig,
}

impl AdService {
    pub fn new(storage: Arc<dyn Storage>, settings: ServingConfig) -> Self {
        Self { storage, settings }
    }

    /// Pick, charge and return the best ad for `viewer`, or `None` when no
    /// eligible campaign can pay for the impression.
    pub async fn request_ad(&self, viewer: &UserContext) -> Result<Option<AdResponse>, ServeError> {
        let now = chrono::Utc::now().timestamp();
        let candidates =
            eligibility::find_eligible(self.storage.as_ref(), viewer, &self.settings, now).await?;

        if candidates.is_empty() {
            debug!(user_id = %viewer.user_id, "No eligible candidates");
            return Ok(None);
        }

        let selection = auction::select(
            self.storage.as_ref(),
            candidates,
            &viewer.user_id,
            self.settings.estimated_ctr,
        )
        .await?;

        Ok(selection.map(AdResponse::from))
    }

    /// Landing URL for a click token.
    pub async fn register_click(&self, token: &str) -> Result<String, ServeError> {
        clicks::register_click(self.storage.as_ref(), token).await
    }

    pub async fn get_stats(&self, query: &StatsQuery) -> Result<Stats, ServeError> {
        Ok(self.storage.get_stats(query).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Campaign, Creative};
    use crate::storage::MemoryStorage;

    async fn service() -> AdService {
        let now = chrono::Utc::now().timestamp();
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

        let mut cheap = Campaign::new(1, "cheap", now - 60, now + 3600, 1000, 1000);
        cheap.cpm_bid = 1000;
        let mut rich = Campaign::new(2, "rich", now - 60, now + 3600, 1000, 1000);
        rich.cpm_bid = 4000;
        rich.cpc_bid = 20;
        storage.upsert_campaign(&cheap).await.unwrap();
        storage.upsert_campaign(&rich).await.unwrap();
        storage
            .upsert_creative(&Creative::new(1, 1, "https://v/1.mp4", "https://l/1", 15))
            .await
            .unwrap();
        storage
            .upsert_creative(&Creative::new(2, 2, "https://v/2.mp4", "https://l/2", 30))
            .await
            .unwrap();
        storage
            .set_targeting(2, r#"{"languages":["en"]}"#)
            .await
            .unwrap();

        AdService::new(storage, ServingConfig::default())
    }

    fn viewer(language: &str) -> UserContext {
        UserContext {
            user_id: "u1".to_string(),
            language: language.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_request_then_click_round() {
        let service = service().await;

        let ad = service.request_ad(&viewer("en")).await.unwrap().unwrap();
        assert_eq!(ad.creative_id, 2);
        assert_eq!(ad.duration, 30);
        assert_eq!(ad.video_url, "https://v/2.mp4");

        let token = ad.click_url.trim_start_matches("/api/v1/ad/click/");
        assert_eq!(service.register_click(token).await.unwrap(), "https://l/2");

        let stats = service
            .get_stats(&StatsQuery {
                from: 0,
                to: i64::MAX,
                campaign_id: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(stats.impressions, 1);
        assert_eq!(stats.clicks, 1);
        assert_eq!(stats.cost, 4 + 20);
    }

    #[tokio::test]
    async fn test_targeting_steers_selection() {
        let service = service().await;

        let ad = service.request_ad(&viewer("ru")).await.unwrap().unwrap();
        assert_eq!(ad.creative_id, 1);
    }

    #[tokio::test]
    async fn test_frequency_cap_moves_to_next_creative() {
        let service = service().await;

        for _ in 0..3 {
            let ad = service.request_ad(&viewer("en")).await.unwrap().unwrap();
            assert_eq!(ad.creative_id, 2);
        }
        let ad = service.request_ad(&viewer("en")).await.unwrap().unwrap();
        assert_eq!(ad.creative_id, 1);
    }

    #[tokio::test]
    async fn test_no_ad_without_candidates() {
        let service = AdService::new(Arc::new(MemoryStorage::new()), ServingConfig::default());
        assert!(service.request_ad(&viewer("en")).await.unwrap().is_none());
    }
}
