use serde::{Deserialize, Serialize};

/// Who a campaign should be shown to. An empty list leaves that dimension
/// unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Targeting {
    pub languages: Vec<String>,
    pub geos: Vec<String>,
    pub categories: Vec<String>,
    pub interests: Vec<String>,
    pub placements: Vec<String>,
}

/// The viewer and content context of a single ad request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserContext {
    pub user_id: String,
    pub language: String,
    pub geo: String,
    pub category: String,
    pub interests: Vec<String>,
    pub placement: String,
}

impl Targeting {
    /// Every non-empty dimension must match. Interests need at least one shared
    /// entry; the other dimensions need the viewer's value to be listed.
    pub fn matches(&self, viewer: &UserContext) -> bool {
        admits(&self.languages, &viewer.language)
            && admits(&self.geos, &viewer.geo)
            && admits(&self.categories, &viewer.category)
            && admits(&self.placements, &viewer.placement)
            && (self.interests.is_empty()
                || self
                    .interests
                    .iter()
                    .any(|interest| viewer.interests.contains(interest)))
    }
}

fn admits(allowed: &[String], value: &str) -> bool {
    allowed.is_empty() || allowed.iter().any(|v| v == value)
}
