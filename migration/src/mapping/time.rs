//! Legacy timestamp normalisation.
//!
//! The old stores wrote timestamps inconsistently: ISO-8601 strings in most
//! places, raw epoch numbers in others. Everything normalises to epoch
//! milliseconds.

use chrono::DateTime;
use serde_json::Value;

/// Parse a legacy timestamp value into epoch milliseconds.
///
/// Accepts RFC 3339 strings and integer/float epoch values (seconds are
/// promoted to milliseconds when the magnitude makes the unit obvious).
/// Anything unparseable yields `fallback_ms`.
#[must_use]
pub fn parse_timestamp_ms(value: Option<&Value>, fallback_ms: i64) -> i64 {
    match value {
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.timestamp_millis())
            .unwrap_or(fallback_ms),
        Some(Value::Number(n)) => {
            let ms = if let Some(i) = n.as_i64() {
                i
            } else if let Some(f) = n.as_f64() {
                f as i64
            } else {
                return fallback_ms;
            };
            promote_seconds(ms)
        }
        _ => fallback_ms,
    }
}

/// Epoch seconds fit in ~10 digits until the year 2286; epoch millis are
/// already 13 digits for any modern date.
fn promote_seconds(value: i64) -> i64 {
    if (0..100_000_000_000).contains(&value) {
        value * 1000
    } else {
        value
    }
}

#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_timestamp_ms;

    #[test]
    fn parses_rfc3339_strings() {
        let value = json!("2024-03-01T12:00:00.500Z");
        assert_eq!(parse_timestamp_ms(Some(&value), 0), 1_709_294_400_500);
    }

    #[test]
    fn passes_epoch_millis_through() {
        let value = json!(1_709_294_400_500_i64);
        assert_eq!(parse_timestamp_ms(Some(&value), 0), 1_709_294_400_500);
    }

    #[test]
    fn promotes_epoch_seconds() {
        let value = json!(1_709_294_400_i64);
        assert_eq!(parse_timestamp_ms(Some(&value), 0), 1_709_294_400_000);
    }

    #[test]
    fn invalid_input_falls_back() {
        assert_eq!(parse_timestamp_ms(Some(&json!("yesterday")), 42), 42);
        assert_eq!(parse_timestamp_ms(Some(&json!(null)), 42), 42);
        assert_eq!(parse_timestamp_ms(None, 42), 42);
    }
}
