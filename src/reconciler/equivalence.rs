//! # Equivalence Comparator
//!
//! Pure comparisons between a declared JSON value and the value the server reports.
//! The server normalises some fields (TTL strings become integer seconds, single
//! values may come back wrapped in a one-element list), so plain equality would
//! trigger a write on every run.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::vault::Document;

static DURATION_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]*)(?:\.([0-9]*))?(ns|us|µs|μs|ms|s|m|h)")
        .expect("duration component regex is valid")
});

/// A value shape the comparator has no rule for
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EquivalenceError {
    #[error("unsupported value shape in list comparison: {value}")]
    UnsupportedShape { value: String },
}

/// A string that is not a duration expression
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{input:?} can't be parsed as duration")]
pub struct ParseDurationError {
    input: String,
}

/// Exact structural equality
pub fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

/// True when both values describe the same duration.
///
/// Numbers are whole or fractional seconds; strings are duration expressions such as
/// `"1m10s"`. Anything unparseable compares unequal and is logged.
pub fn ttl_equivalent(a: &Value, b: &Value) -> bool {
    let dur_a = match to_duration(a) {
        Ok(d) => d,
        Err(e) => {
            warn!("Could not parse {} as TTL: {}", a, e);
            return false;
        }
    };
    let dur_b = match to_duration(b) {
        Ok(d) => d,
        Err(e) => {
            warn!("Could not parse {} as TTL: {}", b, e);
            return false;
        }
    };
    dur_a == dur_b
}

fn to_duration(value: &Value) -> Result<Duration, String> {
    match value {
        Value::String(s) => parse_duration(s).map_err(|e| e.to_string()),
        Value::Number(n) => {
            if let Some(secs) = n.as_u64() {
                Ok(Duration::from_secs(secs))
            } else if let Some(secs) = n.as_f64() {
                Duration::try_from_secs_f64(secs).map_err(|e| format!("{n}: {e}"))
            } else {
                Err(format!("{n} is not a valid number of seconds"))
            }
        }
        other => Err(format!("type of {other} not handled")),
    }
}

/// Parse a duration expression: a sequence of decimal numbers with unit suffixes
/// (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`), e.g. `"300ms"`, `"1.5h"` or `"2h45m"`.
/// A bare `"0"` is accepted; other unitless numbers are not. Negative durations are
/// rejected.
///
/// # Errors
/// Returns [`ParseDurationError`] when the input is not a duration expression.
pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let invalid = || ParseDurationError {
        input: input.to_string(),
    };

    let mut rest = input.strip_prefix('+').unwrap_or(input);
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let caps = DURATION_COMPONENT.captures(rest).ok_or_else(invalid)?;
        let whole = caps.get(1).map_or("", |m| m.as_str());
        let fraction = caps.get(2).map_or("", |m| m.as_str());
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }

        let unit = unit_nanos(&caps[3]);
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        total = whole
            .checked_mul(unit)
            .and_then(|n| total.checked_add(n))
            .ok_or_else(invalid)?;

        if !fraction.is_empty() {
            // Digits beyond nanosecond precision of an hour carry no weight
            let digits = &fraction[..fraction.len().min(18)];
            let numerator: u128 = digits.parse().map_err(|_| invalid())?;
            let scale = 10u128.pow(u32::try_from(digits.len()).map_err(|_| invalid())?);
            total = total
                .checked_add(numerator * unit / scale)
                .ok_or_else(invalid)?;
        }

        rest = &rest[caps[0].len()..];
    }

    let secs = u64::try_from(total / 1_000_000_000).map_err(|_| invalid())?;
    let nanos = u32::try_from(total % 1_000_000_000).map_err(|_| invalid())?;
    Ok(Duration::new(secs, nanos))
}

fn unit_nanos(unit: &str) -> u128 {
    match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        _ => 3_600 * 1_000_000_000,
    }
}

/// True when the values are equal, or one is a one-element list holding the other
/// (e.g. `"policy"` and `["policy"]`).
///
/// The list element is matched structurally, or by its plain text form when the other
/// side is a string (`[1]` matches `"1"`). Two lists compare structurally only.
///
/// # Errors
/// Returns [`EquivalenceError::UnsupportedShape`] when the single list element is
/// itself a list or a map.
pub fn slice_equivalent(a: &Value, b: &Value) -> Result<bool, EquivalenceError> {
    if values_equal(a, b) {
        return Ok(true);
    }
    match (a, b) {
        (Value::Array(_), Value::Array(_)) => Ok(false),
        (Value::Array(list), other) | (other, Value::Array(list)) => {
            first_element_equal(list, other)
        }
        _ => Ok(false),
    }
}

fn first_element_equal(list: &[Value], value: &Value) -> Result<bool, EquivalenceError> {
    let [element] = list else {
        return Ok(false);
    };
    match element {
        Value::Array(_) | Value::Object(_) => Err(EquivalenceError::UnsupportedShape {
            value: element.to_string(),
        }),
        _ if element == value => Ok(true),
        _ => Ok(match (plain_text(element), value) {
            (Some(text), Value::String(s)) => &text == s,
            _ => false,
        }),
    }
}

fn plain_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// True when every declared key is present live with an equivalent value.
/// Keys only present live are ignored.
///
/// # Errors
/// Propagates [`EquivalenceError`] from the list comparison.
pub fn are_keys_applied(declared: &Document, live: &Document) -> Result<bool, EquivalenceError> {
    for (key, want) in declared {
        let Some(have) = live.get(key) else {
            debug!("{:?} not present live", key);
            return Ok(false);
        };
        if values_equal(want, have) {
            continue;
        }
        if key.contains("ttl") && ttl_equivalent(want, have) {
            continue;
        }
        if slice_equivalent(want, have)? {
            continue;
        }
        debug!("{:?} not equal; {} != {}", key, want, have);
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_ttl_equivalent() {
        assert!(ttl_equivalent(&json!("1m10s"), &json!(70)));
        assert!(!ttl_equivalent(&json!("1m"), &json!("2m")));
        assert!(ttl_equivalent(&json!(60), &json!("1m")));
        assert!(ttl_equivalent(&json!(60.0), &json!("60s")));
        assert!(ttl_equivalent(&json!("0"), &json!(0)));
    }

    #[test]
    fn test_ttl_equivalent_unparseable_is_false() {
        assert!(!ttl_equivalent(&json!("one hour"), &json!(3600)));
        assert!(!ttl_equivalent(&json!(3600), &json!(true)));
        assert!(!ttl_equivalent(&json!(null), &json!(null)));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1m10s").unwrap(), Duration::from_secs(70));
        assert_eq!(parse_duration("768h").unwrap(), Duration::from_secs(768 * 3600));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("2h45m").unwrap(), Duration::from_secs(9900));
        assert_eq!(parse_duration("1µs").unwrap(), Duration::from_micros(1));
        assert_eq!(parse_duration(".5s").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_invalid() {
        for input in ["", "60", "1x", "h", "-1h", "1h ", ".s", "1d"] {
            assert!(parse_duration(input).is_err(), "{input:?} should not parse");
        }
    }

    #[test]
    fn test_slice_equivalent() {
        assert!(slice_equivalent(&json!("foo"), &json!(["foo"])).unwrap());
        assert!(slice_equivalent(&json!(["foo"]), &json!("foo")).unwrap());
        assert!(!slice_equivalent(&json!(["foo"]), &json!(["bar"])).unwrap());
        assert!(!slice_equivalent(&json!([99, 1]), &json!("1")).unwrap());
        assert!(!slice_equivalent(&json!("a"), &json!("b")).unwrap());
        assert!(!slice_equivalent(&json!([]), &json!("a")).unwrap());
    }

    #[test]
    fn test_slice_equivalent_matches_plain_text_form() {
        assert!(slice_equivalent(&json!([1]), &json!("1")).unwrap());
        assert!(slice_equivalent(&json!("true"), &json!([true])).unwrap());
        assert!(slice_equivalent(&json!([1]), &json!(1)).unwrap());
    }

    #[test]
    fn test_slice_equivalent_nested_shape_is_error() {
        let err = slice_equivalent(&json!([{"a": 1}]), &json!("a")).unwrap_err();
        assert!(matches!(err, EquivalenceError::UnsupportedShape { .. }));
        assert!(slice_equivalent(&json!([["a"]]), &json!("a")).is_err());
    }

    #[test]
    fn test_are_keys_applied_ignores_extra_live_keys() {
        let declared = doc(json!({"policies": "reader", "ttl": "1h"}));
        let live = doc(json!({"policies": ["reader"], "ttl": 3600, "num_uses": 0}));
        assert!(are_keys_applied(&declared, &live).unwrap());
    }

    #[test]
    fn test_are_keys_applied_missing_key() {
        let declared = doc(json!({"a": 1, "b": 2}));
        let live = doc(json!({"a": 1}));
        assert!(!are_keys_applied(&declared, &live).unwrap());
    }

    #[test]
    fn test_are_keys_applied_ttl_only_for_ttl_keys() {
        let declared = doc(json!({"period": "1m"}));
        let live = doc(json!({"period": 60}));
        assert!(!are_keys_applied(&declared, &live).unwrap());

        let declared = doc(json!({"token_max_ttl": "1m"}));
        let live = doc(json!({"token_max_ttl": 60}));
        assert!(are_keys_applied(&declared, &live).unwrap());
    }

    #[test]
    fn test_are_keys_applied_value_mismatch() {
        let declared = doc(json!({"bound_cidrs": ["10.0.0.0/8", "192.168.0.0/16"]}));
        let live = doc(json!({"bound_cidrs": ["10.0.0.0/8"]}));
        assert!(!are_keys_applied(&declared, &live).unwrap());
    }
}
