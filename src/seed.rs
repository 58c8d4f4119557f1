//! Demo catalog and synthetic traffic for local development.

use crate::models::{Campaign, Creative, Targeting, UserContext};
use crate::serving::AdService;
use crate::storage::AdminStore;
use anyhow::Result;
use rand::RngExt;

pub const CAMPAIGNS: i64 = 5;
pub const CREATIVES_PER_CAMPAIGN: i64 = 10;

const LANGUAGES: &[&str] = &["ru", "en"];
const GEOS: &[&str] = &["Armenia", "Russia"];
const CATEGORIES: &[&str] = &["music", "tech", "sports"];
const INTERESTS: &[&str] = &["coding", "gaming", "cooking"];
const PLACEMENTS: &[&str] = &["pre-roll", "mid-roll", "post-roll"];

/// Requests that found no payable ad are counted in `requests` only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSummary {
    pub requests: u64,
    pub served: u64,
    pub clicks: u64,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn pick<'a>(rng: &mut impl RngExt, values: &[&'a str]) -> &'a str {
    values[rng.random_range(0..values.len())]
}

fn demo_targeting() -> Targeting {
    Targeting {
        languages: strings(LANGUAGES),
        geos: strings(GEOS),
        categories: strings(CATEGORIES),
        interests: strings(&INTERESTS[..2]),
        placements: strings(&PLACEMENTS[..2]),
    }
}

/// Insert (or refresh) the demo campaigns, their targeting and creatives.
///
/// Campaign `i` bids `500 * i` per mille and 50 per click, so the auction has a
/// clear order. Re-running resets the remaining budgets.
pub async fn seed_catalog<S>(store: &S) -> Result<()>
where
    S: AdminStore + ?Sized,
{
    let now = chrono::Utc::now().timestamp();
    let targeting = serde_json::to_string(&demo_targeting())?;

    for i in 1..=CAMPAIGNS {
        let mut campaign = Campaign::new(
            i,
            format!("Campaign {i}"),
            now - 24 * 60 * 60,
            now + 30 * 24 * 60 * 60,
            100_000,
            500_000,
        );
        campaign.cpm_bid = 500 * i;
        campaign.cpc_bid = 50;
        store.upsert_campaign(&campaign).await?;
        store.set_targeting(i, &targeting).await?;

        for j in 1..=CREATIVES_PER_CAMPAIGN {
            let id = (i - 1) * CREATIVES_PER_CAMPAIGN + j;
            let creative = {
                let mut rng = rand::rng();
                let mut creative = Creative::new(
                    id,
                    i,
                    format!("https://example.com/video/{id}.mp4"),
                    format!("https://example.com/landing/{id}"),
                    30 + rng.random_range(0..30),
                );
                creative.title = format!("Creative {j} for campaign {i}");
                creative.language = pick(&mut rng, LANGUAGES).to_string();
                creative.category = pick(&mut rng, CATEGORIES).to_string();
                creative.placement = pick(&mut rng, PLACEMENTS).to_string();
                creative
            };
            store.upsert_creative(&creative).await?;
        }
    }

    tracing::info!(
        campaigns = CAMPAIGNS,
        creatives = CAMPAIGNS * CREATIVES_PER_CAMPAIGN,
        "Seeded demo catalog"
    );
    Ok(())
}

fn random_viewer(rng: &mut impl RngExt) -> UserContext {
    UserContext {
        user_id: format!("user-{}", rng.random_range(1..=100)),
        language: pick(rng, LANGUAGES).to_string(),
        geo: pick(rng, GEOS).to_string(),
        category: pick(rng, CATEGORIES).to_string(),
        interests: vec![pick(rng, INTERESTS).to_string()],
        placement: pick(rng, PLACEMENTS).to_string(),
    }
}

/// Drive `requests` random viewers through the real serving path, clicking
/// roughly one served ad in `click_one_in`.
pub async fn simulate_traffic(
    service: &AdService,
    requests: u64,
    click_one_in: u32,
) -> Result<TrafficSummary> {
    let mut summary = TrafficSummary::default();

    for _ in 0..requests {
        let (viewer, clicks) = {
            let mut rng = rand::rng();
            (random_viewer(&mut rng), rng.random_range(0..click_one_in.max(1)) == 0)
        };
        summary.requests += 1;

        let Some(ad) = service.request_ad(&viewer).await? else {
            continue;
        };
        summary.served += 1;

        if clicks {
            let token = ad
                .click_url
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            service.register_click(&token).await?;
            summary.clicks += 1;
        }
    }

    Ok(summary)
}
