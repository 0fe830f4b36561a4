//! Environment variable configuration helpers.

use chrono::{DateTime, Utc};
use tracing::warn;

/// Returns the value of `name`, or `default` when unset.
pub fn string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_owned())
}

/// Returns the comma-separated value of `name` as a trimmed list, or `None`
/// when unset.
pub fn string_slice(name: &str) -> Option<Vec<String>> {
    let v = std::env::var(name).ok()?;
    Some(v.split(',').map(|s| s.trim().to_owned()).collect())
}

/// Returns the boolean value of `name`, or `default` when unset or
/// unparsable (with a warning).
pub fn boolean(name: &str, default: bool) -> bool {
    let Ok(v) = std::env::var(name) else {
        return default;
    };
    match v.as_str() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => true,
        "0" | "f" | "F" | "false" | "FALSE" | "False" => false,
        _ => {
            warn!("failed to parse {v:?} (${name}) as a boolean");
            default
        }
    }
}

/// Parses `SOURCE_DATE_EPOCH` as Unix seconds, if set and valid.
pub fn source_date_epoch() -> Option<DateTime<Utc>> {
    let v = std::env::var("SOURCE_DATE_EPOCH").ok()?;
    match v.trim().parse::<i64>() {
        Ok(secs) => match DateTime::<Utc>::from_timestamp(secs, 0) {
            Some(t) => Some(t),
            None => {
                warn!("SOURCE_DATE_EPOCH value {v:?} is out of range");
                None
            }
        },
        Err(e) => {
            warn!("failed to parse SOURCE_DATE_EPOCH value {v:?}: {e}");
            None
        }
    }
}
