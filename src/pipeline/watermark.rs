//! Feedback watermarks.
//!
//! After a feedback cycle the bot leaves a PR comment carrying a UTC
//! timestamp. Reviews and comments at or before the newest such timestamp
//! have already been handled.

use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;

use crate::models::PrComment;

pub const MARKER_PREFIX: &str = "🤖 AI Processing Timestamp: ";

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"🤖 AI Processing Timestamp: (\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z)").unwrap()
});

/// The watermark used when the bot has never recorded one.
pub const NONE: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

/// GitHub logins compare case-insensitively.
pub fn is_bot(author: &str, bot_username: &str) -> bool {
    !bot_username.is_empty() && author.eq_ignore_ascii_case(bot_username)
}

/// Newest marker timestamp found in the bot's own comments, or [`NONE`].
pub fn latest_watermark(comments: &[PrComment], bot_username: &str) -> DateTime<Utc> {
    comments
        .iter()
        .filter(|c| is_bot(&c.author, bot_username))
        .flat_map(|c| MARKER.captures_iter(&c.body))
        .filter_map(|caps| DateTime::parse_from_rfc3339(&caps[1]).ok())
        .map(|t| t.with_timezone(&Utc))
        .max()
        .unwrap_or(NONE)
}

/// Whether an item with timestamp `at` arrived after `watermark`.
/// Items without a timestamp (pending reviews) never count as new.
pub fn is_after(at: Option<DateTime<Utc>>, watermark: DateTime<Utc>) -> bool {
    at.is_some_and(|t| t > watermark)
}

/// Watermark to record for a cycle whose feedback was fetched at `fetched_at`.
///
/// GitHub stamps items with whole seconds, so an item created later in the
/// same second as the fetch carries that second too. The marker therefore
/// stops one second short of the fetch; items in the fetch second are seen
/// again next cycle. The result never moves backwards.
pub fn next_watermark(fetched_at: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
    let whole_seconds = DateTime::from_timestamp(fetched_at.timestamp(), 0).unwrap_or(fetched_at);
    (whole_seconds - TimeDelta::seconds(1)).max(previous)
}

/// Body of the marker comment.
pub fn marker_comment(at: DateTime<Utc>, ticket_key: &str) -> String {
    format!(
        "{}{}\n\nAI has processed feedback for ticket {} at this time. \
         Future processing will only consider feedback submitted after this timestamp.",
        MARKER_PREFIX,
        at.format("%Y-%m-%dT%H:%M:%SZ"),
        ticket_key
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn comment(author: &str, body: &str) -> PrComment {
        PrComment {
            author: author.to_string(),
            body: body.to_string(),
            path: None,
            line: None,
            created_at: None,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_latest_watermark_takes_maximum_bot_marker() {
        let comments = vec![
            comment("test-bot", &marker_comment(at(10, 0, 0), "TEST-1")),
            comment("test-bot", &marker_comment(at(12, 30, 0), "TEST-1")),
            comment("test-bot", &marker_comment(at(11, 0, 0), "TEST-1")),
        ];
        assert_eq!(latest_watermark(&comments, "test-bot"), at(12, 30, 0));
    }

    #[test]
    fn test_latest_watermark_ignores_markers_from_others() {
        let comments = vec![
            comment("test-bot", &marker_comment(at(10, 0, 0), "TEST-1")),
            comment("mallory", &marker_comment(at(23, 0, 0), "TEST-1")),
        ];
        assert_eq!(latest_watermark(&comments, "Test-Bot"), at(10, 0, 0));
    }

    #[test]
    fn test_latest_watermark_defaults_to_none() {
        let comments = vec![comment("test-bot", "Thanks for the review!")];
        assert_eq!(latest_watermark(&comments, "test-bot"), NONE);
        assert_eq!(latest_watermark(&[], "test-bot"), NONE);
    }

    #[test]
    fn test_marker_comment_round_trips_through_parser() {
        let body = marker_comment(at(9, 15, 42), "TEST-123");
        assert!(body.starts_with("🤖 AI Processing Timestamp: 2024-03-01T09:15:42Z\n\n"));
        assert!(body.contains("ticket TEST-123"));
    }

    #[test]
    fn test_is_after_is_strict() {
        let watermark = at(10, 0, 0);
        assert!(!is_after(Some(at(10, 0, 0)), watermark));
        assert!(is_after(Some(at(10, 0, 1)), watermark));
        assert!(!is_after(None, watermark));
        assert!(is_after(Some(at(0, 0, 0)), NONE));
    }

    #[test]
    fn test_next_watermark_stops_before_fetch_second_and_never_regresses() {
        let fetched = at(10, 0, 5) + TimeDelta::milliseconds(750);
        assert_eq!(next_watermark(fetched, NONE), at(10, 0, 4));
        assert_eq!(next_watermark(fetched, at(11, 0, 0)), at(11, 0, 0));
        assert_eq!(next_watermark(at(10, 0, 5), at(10, 0, 4)), at(10, 0, 4));
    }

    #[test]
    fn test_item_stamped_in_fetch_second_stays_new() {
        let fetched = at(10, 0, 0) + TimeDelta::milliseconds(700);
        let recorded = next_watermark(fetched, NONE);
        // Created after the fetch but stamped with the same whole second
        assert!(is_after(Some(at(10, 0, 0)), recorded));
        assert!(!is_after(Some(at(9, 59, 59)), recorded));
    }

    #[test]
    fn test_is_bot_requires_configured_name() {
        assert!(is_bot("TEST-BOT", "test-bot"));
        assert!(!is_bot("", ""));
    }
}
