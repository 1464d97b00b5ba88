//! Statistics values as returned by `statistic-get-all`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// The newest sample of one Kea statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatValue {
    /// Dotted statistic key (e.g. `subnet[1].assigned-addresses`).
    pub key: String,
    /// Numeric value.
    pub value: f64,
    /// Kea timestamp string of the sample.
    pub timestamp: String,
}

impl StatValue {
    /// Create a new statistic value.
    pub fn new(key: impl Into<String>, value: f64, timestamp: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp: timestamp.into(),
        }
    }
}

/// Parse the `arguments` object of a `statistic-get-all` response.
///
/// Every entry holds `[[value, timestamp], ...]` with the newest sample
/// first. Entries in any other shape are skipped. The result is sorted by key.
pub fn parse_statistics(arguments: &Map<String, Value>) -> Vec<StatValue> {
    let mut stats: Vec<StatValue> = arguments
        .iter()
        .filter_map(|(key, samples)| {
            let newest = samples.as_array()?.first()?.as_array()?;
            let value = match newest.first()?.as_f64() {
                Some(v) => v,
                None => {
                    tracing::trace!(key = %key, "Skipping non-numeric statistic");
                    return None;
                }
            };
            let timestamp = newest
                .get(1)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(StatValue::new(key.clone(), value, timestamp))
        })
        .collect();

    stats.sort_by(|a, b| a.key.cmp(&b.key));
    stats
}

/// One dot-separated component of a statistic key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySegment<'a> {
    /// Segment name (`subnet`, `pool`, `assigned-addresses`, ...).
    pub name: &'a str,
    /// Bracketed index, if any (`1` in `subnet[1]`).
    pub index: Option<&'a str>,
}

impl<'a> KeySegment<'a> {
    fn parse(raw: &'a str, key: &str) -> Result<Self> {
        let invalid = || Error::StatKey(key.to_string());

        match raw.find('[') {
            None if raw.is_empty() => Err(invalid()),
            None => Ok(Self {
                name: raw,
                index: None,
            }),
            Some(open) => {
                let inner = raw[open + 1..].strip_suffix(']').ok_or_else(invalid)?;
                if open == 0 {
                    return Err(invalid());
                }
                Ok(Self {
                    name: &raw[..open],
                    index: Some(inner),
                })
            }
        }
    }
}

/// Split a statistic key into segments.
///
/// Dots inside brackets belong to the index, so `key[example.com.].update-sent`
/// yields `key[example.com.]` and `update-sent`.
pub fn split_key(key: &str) -> Result<Vec<KeySegment<'_>>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in key.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::StatKey(key.to_string()))?;
            }
            '.' if depth == 0 => {
                segments.push(KeySegment::parse(&key[start..i], key)?);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(Error::StatKey(key.to_string()));
    }
    segments.push(KeySegment::parse(&key[start..], key)?);

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_statistics_takes_newest_sample() {
        let args = json!({
            "pkt4-ack-sent": [[42, "2024-01-01 00:00:00.000000"], [41, "2023-12-31 23:59:00.000000"]],
            "pkt4-received": [[100, "2024-01-01 00:00:00.000000"]],
        });

        let stats = parse_statistics(args.as_object().unwrap());

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].key, "pkt4-ack-sent");
        assert_eq!(stats[0].value, 42.0);
        assert_eq!(stats[0].timestamp, "2024-01-01 00:00:00.000000");
        assert_eq!(stats[1].key, "pkt4-received");
    }

    #[test]
    fn test_parse_statistics_skips_malformed_entries() {
        let args = json!({
            "empty": [],
            "scalar": 5,
            "text": [["abc", "2024-01-01"]],
            "ok": [[1.5, "2024-01-01"]],
        });

        let stats = parse_statistics(args.as_object().unwrap());

        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].key, "ok");
        assert_eq!(stats[0].value, 1.5);
    }

    #[test]
    fn test_split_plain_key() {
        let segments = split_key("pkt4-ack-sent").unwrap();
        assert_eq!(
            segments,
            vec![KeySegment {
                name: "pkt4-ack-sent",
                index: None
            }]
        );
    }

    #[test]
    fn test_split_pool_key() {
        let segments = split_key("subnet[1].pool[0].assigned-addresses").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].name, "subnet");
        assert_eq!(segments[0].index, Some("1"));
        assert_eq!(segments[1].name, "pool");
        assert_eq!(segments[1].index, Some("0"));
        assert_eq!(segments[2].name, "assigned-addresses");
    }

    #[test]
    fn test_split_keeps_dots_inside_brackets() {
        let segments = split_key("ddns.key[sub.example.org.].update-sent").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].name, "ddns");
        assert_eq!(segments[1].name, "key");
        assert_eq!(segments[1].index, Some("sub.example.org."));
        assert_eq!(segments[2].name, "update-sent");
    }

    #[test]
    fn test_split_rejects_malformed_keys() {
        assert!(split_key("").is_err());
        assert!(split_key("subnet[1.assigned").is_err());
        assert!(split_key("subnet]1[").is_err());
        assert!(split_key("a..b").is_err());
        assert!(split_key("[1].x").is_err());
    }
}
