//! Raw channel readings as reported by modem drivers.
//!
//! Drivers hand over a nested document of the shape
//! `{"channelDs": {"docsis30": [...], "docsis31": [...]}, "channelUs": {...}}`.
//! Modems are inconsistent about types (numbers arrive as strings, fields go
//! missing, lists are absent), so every field here is read leniently and
//! degrades to a default instead of failing the whole snapshot.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use tracing::warn;

use crate::error::{json_kind, SnapshotError};

/// DOCSIS version of a channel list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocsisVersion {
    V30,
    V31,
}

impl DocsisVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocsisVersion::V30 => "3.0",
            DocsisVersion::V31 => "3.1",
        }
    }
}

impl fmt::Display for DocsisVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DocsisVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One poll's worth of channel readings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "channelDs", default, deserialize_with = "value_or_default")]
    pub downstream: ChannelGroup<DownstreamReading>,
    #[serde(rename = "channelUs", default, deserialize_with = "value_or_default")]
    pub upstream: ChannelGroup<UpstreamReading>,
}

impl Snapshot {
    /// Parse a snapshot document.
    ///
    /// Fails only when the text is not JSON or its top level is neither an
    /// object nor `null`. Anything below the top level is read leniently.
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, SnapshotError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => Ok(serde_json::from_value(value)?),
            other => Err(SnapshotError::NotAnObject(json_kind(&other))),
        }
    }
}

/// Readings of one direction, split by DOCSIS version.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "R: DeserializeOwned"))]
pub struct ChannelGroup<R> {
    #[serde(default, deserialize_with = "readings")]
    pub docsis30: Vec<R>,
    #[serde(default, deserialize_with = "readings")]
    pub docsis31: Vec<R>,
}

impl<R> Default for ChannelGroup<R> {
    fn default() -> Self {
        Self {
            docsis30: Vec::new(),
            docsis31: Vec::new(),
        }
    }
}

impl<R> ChannelGroup<R> {
    /// Iterate over every reading tagged with its version, 3.0 first.
    pub fn iter(&self) -> impl Iterator<Item = (DocsisVersion, &R)> {
        self.docsis30
            .iter()
            .map(|r| (DocsisVersion::V30, r))
            .chain(self.docsis31.iter().map(|r| (DocsisVersion::V31, r)))
    }

    pub fn len(&self) -> usize {
        self.docsis30.len() + self.docsis31.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownstreamReading {
    #[serde(rename = "channelID", default, deserialize_with = "lenient_u32")]
    pub channel_id: u32,
    #[serde(default, deserialize_with = "lenient_text")]
    pub frequency: String,
    #[serde(rename = "powerLevel", default, deserialize_with = "lenient_f64")]
    pub power_level: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub modulation: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_text")]
    pub channel_type: String,
    /// DOCSIS 3.0 SNR proxy; its magnitude approximates SNR.
    #[serde(default, deserialize_with = "snr_proxy")]
    pub mse: Option<f64>,
    /// DOCSIS 3.1 SNR proxy, used as SNR directly.
    #[serde(default, deserialize_with = "snr_proxy")]
    pub mer: Option<f64>,
    #[serde(rename = "corrErrors", default, deserialize_with = "lenient_count")]
    pub correctable_errors: u64,
    #[serde(rename = "nonCorrErrors", default, deserialize_with = "lenient_count")]
    pub uncorrectable_errors: u64,
}

impl DownstreamReading {
    pub fn power(&self) -> f64 {
        self.power_level.unwrap_or(0.0)
    }

    /// Reported modulation, falling back to the channel type.
    pub fn modulation(&self) -> &str {
        pick_modulation(&self.modulation, &self.channel_type)
    }

    /// SNR estimate for a channel of the given version, if the modem
    /// reported one.
    pub fn snr(&self, version: DocsisVersion) -> Option<f64> {
        match version {
            DocsisVersion::V30 => self.mse.map(f64::abs),
            DocsisVersion::V31 => self.mer,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamReading {
    #[serde(rename = "channelID", default, deserialize_with = "lenient_u32")]
    pub channel_id: u32,
    #[serde(default, deserialize_with = "lenient_text")]
    pub frequency: String,
    #[serde(rename = "powerLevel", default, deserialize_with = "lenient_f64")]
    pub power_level: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub modulation: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_text")]
    pub channel_type: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub multiplex: String,
}

impl UpstreamReading {
    pub fn power(&self) -> f64 {
        self.power_level.unwrap_or(0.0)
    }

    pub fn modulation(&self) -> &str {
        pick_modulation(&self.modulation, &self.channel_type)
    }
}

fn pick_modulation<'a>(modulation: &'a str, channel_type: &'a str) -> &'a str {
    if modulation.is_empty() {
        channel_type
    } else {
        modulation
    }
}

/// Parse a number that may arrive as a JSON number or a numeric string.
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(number(&value))
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let id = match &value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|v| *v >= 0.0 && v.fract() == 0.0)
                .map(|v| v as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    Ok(id.and_then(|id| u32::try_from(id).ok()).unwrap_or(0))
}

/// Error counters: non-negative integers, anything else counts as zero.
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let count = match &value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|v| *v > 0.0).map(|v| v as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    Ok(count.unwrap_or(0))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// MSE/MER values count as reported only when non-empty and non-zero.
/// A reported value that isn't numeric reads as 0.0.
fn snr_proxy<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let reported = match &value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    };
    if !reported {
        return Ok(None);
    }
    let parsed = match &value {
        Value::Bool(true) => Some(1.0),
        other => number(other),
    };
    Ok(Some(parsed.unwrap_or(0.0)))
}

fn value_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn readings<'de, D, R>(deserializer: D) -> Result<Vec<R>, D::Error>
where
    D: Deserializer<'de>,
    R: DeserializeOwned,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };

    let mut readings = Vec::with_capacity(items.len());
    for (position, item) in items.into_iter().enumerate() {
        if !item.is_object() {
            warn!(
                "Skipping channel entry {}: expected an object, found {}",
                position,
                json_kind(&item)
            );
            continue;
        }
        match serde_json::from_value(item) {
            Ok(reading) => readings.push(reading),
            Err(e) => warn!("Skipping channel entry {}: {}", position, e),
        }
    }
    Ok(readings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn downstream(value: Value) -> DownstreamReading {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_power_accepts_strings_and_numbers() {
        assert_eq!(downstream(json!({"powerLevel": "3.5"})).power(), 3.5);
        assert_eq!(downstream(json!({"powerLevel": "-7.2"})).power(), -7.2);
        assert_eq!(downstream(json!({"powerLevel": 4.25})).power(), 4.25);
        assert_eq!(downstream(json!({"powerLevel": " 1.0 "})).power(), 1.0);
    }

    #[test]
    fn test_power_defaults_to_zero() {
        assert_eq!(downstream(json!({})).power(), 0.0);
        assert_eq!(downstream(json!({"powerLevel": null})).power(), 0.0);
        assert_eq!(downstream(json!({"powerLevel": ""})).power(), 0.0);
        assert_eq!(downstream(json!({"powerLevel": "bad"})).power(), 0.0);
        assert_eq!(downstream(json!({"powerLevel": [1, 2]})).power(), 0.0);
    }

    #[test]
    fn test_mse_magnitude_is_snr() {
        let reading = downstream(json!({"mse": "-35.0"}));
        assert_eq!(reading.snr(DocsisVersion::V30), Some(35.0));
        // MER is not consulted for 3.0 channels.
        assert_eq!(reading.snr(DocsisVersion::V31), None);
    }

    #[test]
    fn test_mer_used_directly() {
        let reading = downstream(json!({"mer": 38.5}));
        assert_eq!(reading.snr(DocsisVersion::V31), Some(38.5));
        assert_eq!(reading.snr(DocsisVersion::V30), None);
    }

    #[test]
    fn test_empty_or_zero_proxy_is_absent() {
        assert_eq!(downstream(json!({"mse": ""})).mse, None);
        assert_eq!(downstream(json!({"mse": null})).mse, None);
        assert_eq!(downstream(json!({"mse": 0})).mse, None);
        assert_eq!(downstream(json!({"mer": 0.0})).mer, None);
    }

    #[test]
    fn test_unparsable_proxy_reads_as_zero() {
        assert_eq!(downstream(json!({"mse": "n/a"})).mse, Some(0.0));
        assert_eq!(downstream(json!({"mer": "0"})).mer, Some(0.0));
    }

    #[test]
    fn test_modulation_falls_back_to_type() {
        let reading = downstream(json!({"type": "4096QAM"}));
        assert_eq!(reading.modulation(), "4096QAM");

        let reading = downstream(json!({"modulation": "256QAM", "type": "SC-QAM"}));
        assert_eq!(reading.modulation(), "256QAM");

        let reading = downstream(json!({"modulation": "", "type": "64QAM"}));
        assert_eq!(reading.modulation(), "64QAM");
    }

    #[test]
    fn test_counts_and_ids_are_lenient() {
        let reading = downstream(json!({
            "channelID": "7",
            "corrErrors": "120",
            "nonCorrErrors": -5
        }));
        assert_eq!(reading.channel_id, 7);
        assert_eq!(reading.correctable_errors, 120);
        assert_eq!(reading.uncorrectable_errors, 0);

        let reading = downstream(json!({"channelID": 3.0}));
        assert_eq!(reading.channel_id, 3);
        let reading = downstream(json!({"channelID": 3.5}));
        assert_eq!(reading.channel_id, 0);

        let reading = downstream(json!({"channelID": "abc", "corrErrors": null}));
        assert_eq!(reading.channel_id, 0);
        assert_eq!(reading.correctable_errors, 0);
    }

    #[test]
    fn test_snapshot_missing_sections_are_empty() {
        let snapshot = Snapshot::from_json(r#"{"channelDs": {"docsis30": [{"channelID": 1}]}}"#)
            .unwrap();
        assert_eq!(snapshot.downstream.docsis30.len(), 1);
        assert!(snapshot.downstream.docsis31.is_empty());
        assert!(snapshot.upstream.is_empty());

        let snapshot = Snapshot::from_json("{}").unwrap();
        assert!(snapshot.downstream.is_empty());
        assert!(snapshot.upstream.is_empty());

        let snapshot = Snapshot::from_json("null").unwrap();
        assert!(snapshot.downstream.is_empty());
    }

    #[test]
    fn test_snapshot_wrong_shapes_degrade_to_empty() {
        let snapshot = Snapshot::from_json(
            r#"{"channelDs": [1, 2, 3], "channelUs": {"docsis30": "none", "docsis31": null}}"#,
        )
        .unwrap();
        assert!(snapshot.downstream.is_empty());
        assert!(snapshot.upstream.is_empty());
    }

    #[test]
    fn test_non_object_entries_are_skipped() {
        let snapshot = Snapshot::from_json(
            r#"{"channelDs": {"docsis30": [{"channelID": 1}, 42, "x", {"channelID": 2}]}}"#,
        )
        .unwrap();
        let ids: Vec<u32> = snapshot
            .downstream
            .docsis30
            .iter()
            .map(|r| r.channel_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_snapshot_rejects_non_object_top_level() {
        assert!(matches!(
            Snapshot::from_json("[1, 2]"),
            Err(SnapshotError::NotAnObject(_))
        ));
        assert!(matches!(
            Snapshot::from_json("not json"),
            Err(SnapshotError::Json(_))
        ));
    }

    #[test]
    fn test_group_iter_orders_docsis30_first() {
        let mut group: ChannelGroup<UpstreamReading> = ChannelGroup::default();
        group.docsis31.push(UpstreamReading {
            channel_id: 1,
            ..Default::default()
        });
        group.docsis30.push(UpstreamReading {
            channel_id: 9,
            ..Default::default()
        });

        let order: Vec<(DocsisVersion, u32)> =
            group.iter().map(|(v, r)| (v, r.channel_id)).collect();
        assert_eq!(
            order,
            vec![(DocsisVersion::V30, 9), (DocsisVersion::V31, 1)]
        );
    }
}
