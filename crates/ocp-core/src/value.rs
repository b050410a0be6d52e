//! Typed parsing of raw attribute text.
//!
//! Every parser returns `None` on malformed input; callers omit the field
//! rather than failing the whole snapshot.

use std::str::FromStr;

/// Parses a numeric value (integers, floats).
pub fn parse_number<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}

/// Parses a boolean-like flag as written by the driver (`0`/`1`).
///
/// Also accepts `true`/`false` and `on`/`off`, case-insensitively.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Splits a whitespace-separated list such as `available_clock_sources`.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Normalizes a free-text value; empty text counts as absent.
pub fn parse_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number::<u32>("50"), Some(50));
        assert_eq!(parse_number::<i64>(" -12 "), Some(-12));
        assert_eq!(parse_number::<f64>("10000000.0"), Some(10_000_000.0));
        assert_eq!(parse_number::<u32>("fifty"), None);
        assert_eq!(parse_number::<u8>("300"), None);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("0\n"), Some(false));
        assert_eq!(parse_flag("ON"), Some(true));
        assert_eq!(parse_flag("2"), None);
        assert_eq!(parse_flag(""), None);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_list("NONE PPS  TOD\tIRIG\n"),
            vec!["NONE", "PPS", "TOD", "IRIG"]
        );
        assert!(parse_list("   ").is_empty());
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(parse_text(" PPS1 "), Some("PPS1".to_string()));
        assert_eq!(parse_text("  "), None);
    }
}
