//! Token usage, latency metrics, and their merged per-message stats record.

use serde::{Deserialize, Serialize};

/// Token accounting as reported by a vendor response.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thoughts_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cost: Option<f64>,
}

impl Usage {
    /// Saturating element-wise accumulation across recursive tool rounds.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        if let Some(thoughts) = other.thoughts_tokens {
            let current = self.thoughts_tokens.unwrap_or(0);
            self.thoughts_tokens = Some(current.saturating_add(thoughts));
        }
        if let Some(cost) = other.cost {
            self.cost = Some(self.cost.unwrap_or(0.0) + cost);
        }
    }
}

/// Wall-clock latency measurements for one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_first_token_millsec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_completion_millsec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_thinking_millsec: Option<u64>,
}

impl Metrics {
    /// Keep the earliest first-token time, sum the rest.
    pub fn accumulate(&mut self, other: &Metrics) {
        if self.time_first_token_millsec.is_none() {
            self.time_first_token_millsec = other.time_first_token_millsec;
        }
        if let Some(completion) = other.time_completion_millsec {
            let current = self.time_completion_millsec.unwrap_or(0);
            self.time_completion_millsec = Some(current.saturating_add(completion));
        }
        if let Some(thinking) = other.time_thinking_millsec {
            let current = self.time_thinking_millsec.unwrap_or(0);
            self.time_thinking_millsec = Some(current.saturating_add(thinking));
        }
    }
}

/// Merged usage + metrics stored on a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completion_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thoughts_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_first_token_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_completion_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub time_thinking_ms: Option<u64>,
}

impl MessageStats {
    /// Merge observed usage and metrics into one stats record.
    ///
    /// Returns `None` when both sides are absent, so messages without any
    /// observation carry no stats at all rather than an all-null record.
    #[must_use]
    pub fn merged(usage: Option<&Usage>, metrics: Option<&Metrics>) -> Option<Self> {
        if usage.is_none() && metrics.is_none() {
            return None;
        }
        let mut stats = MessageStats::default();
        if let Some(usage) = usage {
            stats.prompt_tokens = Some(usage.prompt_tokens);
            stats.completion_tokens = Some(usage.completion_tokens);
            stats.total_tokens = Some(usage.total_tokens);
            stats.thoughts_tokens = usage.thoughts_tokens;
            stats.cost = usage.cost;
        }
        if let Some(metrics) = metrics {
            stats.time_first_token_ms = metrics.time_first_token_millsec;
            stats.time_completion_ms = metrics.time_completion_millsec;
            stats.time_thinking_ms = metrics.time_thinking_millsec;
        }
        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageStats, Metrics, Usage};

    #[test]
    fn merged_is_none_when_both_absent() {
        assert!(MessageStats::merged(None, None).is_none());
    }

    #[test]
    fn merged_uses_camel_case_keys() {
        let usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            thoughts_tokens: None,
            cost: None,
        };
        let metrics = Metrics {
            time_first_token_millsec: Some(120),
            time_completion_millsec: Some(900),
            time_thinking_millsec: None,
        };
        let stats = MessageStats::merged(Some(&usage), Some(&metrics)).unwrap();
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["promptTokens"], 10);
        assert_eq!(json["timeFirstTokenMs"], 120);
        assert!(json.get("time_first_token_millsec").is_none());
    }

    #[test]
    fn usage_accumulates_across_rounds() {
        let mut total = Usage::default();
        total.accumulate(&Usage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
            thoughts_tokens: Some(5),
            cost: Some(0.01),
        });
        total.accumulate(&Usage {
            prompt_tokens: 150,
            completion_tokens: 30,
            total_tokens: 180,
            thoughts_tokens: None,
            cost: Some(0.02),
        });
        assert_eq!(total.prompt_tokens, 250);
        assert_eq!(total.total_tokens, 300);
        assert_eq!(total.thoughts_tokens, Some(5));
        assert!((total.cost.unwrap() - 0.03).abs() < f64::EPSILON);
    }

    #[test]
    fn metrics_keep_earliest_first_token() {
        let mut total = Metrics::default();
        total.accumulate(&Metrics {
            time_first_token_millsec: Some(80),
            time_completion_millsec: Some(500),
            time_thinking_millsec: None,
        });
        total.accumulate(&Metrics {
            time_first_token_millsec: Some(40),
            time_completion_millsec: Some(300),
            time_thinking_millsec: Some(75),
        });
        assert_eq!(total.time_first_token_millsec, Some(80));
        assert_eq!(total.time_completion_millsec, Some(800));
        assert_eq!(total.time_thinking_millsec, Some(75));
    }
}
