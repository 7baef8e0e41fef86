//! Timeout text parsing
//!
//! Accepts whole seconds (`90`) or a sequence of number/unit pairs
//! (`500ms`, `30s`, `10m`, `1h30m`, `2h 15m`).

use std::time::Duration;

/// Parses a timeout such as `90`, `30s` or `1h30m`
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }

    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;

    while !rest.is_empty() {
        rest = rest.trim_start();

        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("expected a number in '{}'", text));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| format!("number too large in '{}'", text))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let too_large = || format!("duration too large in '{}'", text);
        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(too_large)?),
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(too_large)?),
            "" => return Err(format!("missing unit in '{}'", text)),
            other => return Err(format!("unknown unit '{}' in '{}'", other, text)),
        };
        total = total.checked_add(part).ok_or_else(too_large)?;
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_seconds() {
        assert_eq!(parse_duration("90"), Ok(Duration::from_secs(90)));
    }

    #[test]
    fn test_units() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("10m"), Ok(Duration::from_secs(600)));
        assert_eq!(parse_duration("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("2h 15m"), Ok(Duration::from_secs(8100)));
    }

    #[test]
    fn test_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("ten minutes").is_err());
        assert!(parse_duration("10 ").is_ok());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("1h30").is_err());
    }

    #[test]
    fn test_overflow_is_an_error() {
        let err = parse_duration("9999999999999999h").unwrap_err();
        assert!(err.contains("too large"), "{}", err);
        assert!(parse_duration("9999999999999999999m").is_err());
        assert!(parse_duration("18446744073709551615s 18446744073709551615s").is_err());
        assert!(parse_duration("99999999999999999999").is_err());
    }
}
