// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-readable timeout parsing
//!
//! Timeout knobs are written as duration strings ("500ms", "2m", "1h").
//! Parsing happens at configuration time; a malformed string is a
//! [`ConfigError::InvalidDuration`] and never reaches the dispatch path.

use crate::error::ConfigError;
use std::time::Duration;

/// Parse a duration string into a canonical [`Duration`]
pub fn parse_timeout(input: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(input.trim()).map_err(|e| ConfigError::InvalidDuration {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        millis = { "500ms", Duration::from_millis(500) },
        seconds = { "45s", Duration::from_secs(45) },
        minutes = { "2m", Duration::from_secs(120) },
        hours = { "1h", Duration::from_secs(3600) },
        compound = { "5m 30s", Duration::from_secs(330) },
        padded = { "  10s ", Duration::from_secs(10) },
    )]
    fn parses_unit_suffixes(input: &str, expected: Duration) {
        assert_eq!(parse_timeout(input).unwrap(), expected);
    }

    #[parameterized(
        bad_suffix = { "10 lightyears" },
        bare_garbage = { "soon" },
        empty = { "" },
        negative = { "-5s" },
    )]
    fn rejects_malformed_input(input: &str) {
        let err = parse_timeout(input).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { .. }));
    }

    #[test]
    fn half_second_is_exactly_500_millis() {
        // "500ms" -> 0.5s as a canonical numeric value
        assert_eq!(parse_timeout("500ms").unwrap().as_secs_f64(), 0.5);
    }
}
