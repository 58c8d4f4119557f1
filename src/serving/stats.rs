use crate::models::StatsQuery;

/// Window used when the caller gives no lower bound.
pub const DEFAULT_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Fill in missing bounds: `to` defaults to `now`, `from` to a day before `now`.
pub fn resolve_window(
    from: Option<i64>,
    to: Option<i64>,
    campaign_id: Option<i64>,
    now: i64,
) -> StatsQuery {
    StatsQuery {
        from: from.unwrap_or(now - DEFAULT_WINDOW_SECS),
        to: to.unwrap_or(now),
        campaign_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_last_day() {
        let query = resolve_window(None, None, None, 100_000);
        assert_eq!(query.from, 100_000 - DEFAULT_WINDOW_SECS);
        assert_eq!(query.to, 100_000);
        assert_eq!(query.campaign_id, None);
    }

    #[test]
    fn test_explicit_bounds_are_kept() {
        let query = resolve_window(Some(10), Some(20), Some(3), 100_000);
        assert_eq!(
            query,
            StatsQuery {
                from: 10,
                to: 20,
                campaign_id: Some(3)
            }
        );
    }
}
