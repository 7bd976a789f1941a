//! Merge legacy usage and metrics payloads into one stats record.

use hearth_types::{MessageStats, Metrics, Usage};
use serde_json::Value;

/// Parse the legacy `usage` and `metrics` objects and merge them.
///
/// Both sides are lenient: unknown fields are ignored, malformed objects
/// are treated as absent. Returns `None` when neither side contributed
/// anything.
#[must_use]
pub fn merge_stats(usage: Option<&Value>, metrics: Option<&Value>) -> Option<MessageStats> {
    let usage: Option<Usage> = usage.and_then(|v| serde_json::from_value(v.clone()).ok());
    let metrics: Option<Metrics> = metrics.and_then(|v| serde_json::from_value(v.clone()).ok());
    MessageStats::merged(usage.as_ref(), metrics.as_ref())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::merge_stats;

    #[test]
    fn merges_usage_and_metrics() {
        let usage = json!({
            "prompt_tokens": 120,
            "completion_tokens": 80,
            "total_tokens": 200,
            "thoughts_tokens": 30,
            "cost": 0.004
        });
        let metrics = json!({
            "time_first_token_millsec": 230,
            "time_completion_millsec": 1800,
            "time_thinking_millsec": 400
        });
        let stats = merge_stats(Some(&usage), Some(&metrics)).unwrap();
        assert_eq!(stats.prompt_tokens, Some(120));
        assert_eq!(stats.thoughts_tokens, Some(30));
        assert_eq!(stats.time_thinking_ms, Some(400));
    }

    #[test]
    fn absent_both_sides_is_none() {
        assert!(merge_stats(None, None).is_none());
    }

    #[test]
    fn usage_alone_is_enough() {
        let usage = json!({"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3});
        let stats = merge_stats(Some(&usage), None).unwrap();
        assert_eq!(stats.total_tokens, Some(3));
        assert!(stats.time_first_token_ms.is_none());
    }

    #[test]
    fn malformed_usage_is_treated_as_absent() {
        let usage = json!("not an object");
        assert!(merge_stats(Some(&usage), None).is_none());
    }
}
