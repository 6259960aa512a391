//! Typed reads over an event's `{key, value}` attribute list.
//!
//! Attribute values are frequently JSON-encoded a second time (a string value
//! arrives as `"\"ACTIVE\""`, a list as `"[\"fp1\",\"fp2\"]"`). Every accessor
//! unwraps that layer before interpreting the value.

use staketrail_core::DelegationState;

use crate::chain::RawEvent;

/// Strip one or two layers of JSON string encoding.
pub fn unwrap_value(raw: &str) -> String {
    let mut value = raw.trim().to_string();
    for _ in 0..2 {
        if !value.starts_with('"') {
            break;
        }
        match serde_json::from_str::<String>(&value) {
            Ok(inner) => value = inner.trim().to_string(),
            Err(_) => break,
        }
    }
    value
}

/// Accessor over one event's attributes.
#[derive(Debug, Clone, Copy)]
pub struct Attributes<'a> {
    event: &'a RawEvent,
}

impl<'a> Attributes<'a> {
    pub fn new(event: &'a RawEvent) -> Self {
        Self { event }
    }

    /// Unwrapped, non-empty value of the first key present.
    pub fn string(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|k| self.event.attribute(k))
            .map(unwrap_value)
            .find(|v| !v.is_empty())
    }

    /// Unsigned integer value. `Err` holds the raw text when present but unparsable.
    pub fn u64(&self, keys: &[&str]) -> Result<Option<u64>, String> {
        match self.string(keys) {
            None => Ok(None),
            Some(v) => v.parse().map(Some).map_err(|_| v),
        }
    }

    /// List value: a JSON array, a comma-separated string, or a single item.
    pub fn list(&self, keys: &[&str]) -> Vec<String> {
        let Some(value) = self.string(keys) else {
            return Vec::new();
        };
        if value.starts_with('[') {
            if let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(&value) {
                return items
                    .into_iter()
                    .filter_map(|item| match item {
                        serde_json::Value::String(s) => Some(unwrap_value(&s)),
                        serde_json::Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }
        value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Lifecycle state. `Err` holds the raw text when present but unknown.
    pub fn state(&self, keys: &[&str]) -> Result<Option<DelegationState>, String> {
        match self.string(keys) {
            None => Ok(None),
            Some(v) => v.parse().map(Some).map_err(|_| v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_value_layers() {
        assert_eq!(unwrap_value("ACTIVE"), "ACTIVE");
        assert_eq!(unwrap_value("\"ACTIVE\""), "ACTIVE");
        assert_eq!(unwrap_value("\"\\\"ACTIVE\\\"\""), "ACTIVE");
        // Not a complete JSON string: left alone.
        assert_eq!(unwrap_value("\"half"), "\"half");
        assert_eq!(unwrap_value("  12 "), "12");
    }

    #[test]
    fn test_string_takes_first_present_key() {
        let event = RawEvent::new(
            "x",
            &[("staking_tx_id_hex", ""), ("staking_tx_hash", "\"aa\"")],
        );
        let attrs = Attributes::new(&event);
        assert_eq!(
            attrs.string(&["staking_tx_id_hex", "staking_tx_hash"]),
            Some("aa".to_string())
        );
        assert_eq!(attrs.string(&["missing"]), None);
    }

    #[test]
    fn test_list_forms() {
        let event = RawEvent::new(
            "x",
            &[
                ("json", "[\"fp1\",\"fp2\"]"),
                ("double", "\"[\\\"fp3\\\"]\""),
                ("csv", "fp4, fp5"),
                ("single", "fp6"),
            ],
        );
        let attrs = Attributes::new(&event);
        assert_eq!(attrs.list(&["json"]), vec!["fp1", "fp2"]);
        assert_eq!(attrs.list(&["double"]), vec!["fp3"]);
        assert_eq!(attrs.list(&["csv"]), vec!["fp4", "fp5"]);
        assert_eq!(attrs.list(&["single"]), vec!["fp6"]);
        assert!(attrs.list(&["none"]).is_empty());
    }

    #[test]
    fn test_numbers_and_states() {
        let event = RawEvent::new(
            "x",
            &[
                ("start_height", "\"120\""),
                ("end_height", "soon"),
                ("new_state", "\"BTC_DELEGATION_STATUS_ACTIVE\""),
                ("bad_state", "GONE"),
            ],
        );
        let attrs = Attributes::new(&event);
        assert_eq!(attrs.u64(&["start_height"]), Ok(Some(120)));
        assert_eq!(attrs.u64(&["end_height"]), Err("soon".to_string()));
        assert_eq!(attrs.u64(&["missing"]), Ok(None));
        assert_eq!(
            attrs.state(&["new_state"]),
            Ok(Some(DelegationState::Active))
        );
        assert!(attrs.state(&["bad_state"]).is_err());
    }
}
