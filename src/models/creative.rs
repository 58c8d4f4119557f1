use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A single video asset belonging to a campaign.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Creative {
    pub id: i64,
    pub campaign_id: i64,
    pub title: String,
    pub video_url: String,
    pub landing_url: String,
    /// Length in seconds
    pub duration: i32,
    pub language: String,
    pub category: String,
    pub placement: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Creative {
    pub fn new(
        id: i64,
        campaign_id: i64,
        video_url: impl Into<String>,
        landing_url: impl Into<String>,
        duration: i32,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id,
            campaign_id,
            title: format!("Creative {id}"),
            video_url: video_url.into(),
            landing_url: landing_url.into(),
            duration,
            language: String::new(),
            category: String::new(),
            placement: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
