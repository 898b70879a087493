use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One completed read cycle for a single collector: every value that made it
/// through the cycle without a read error, keyed by register name.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

impl TelemetryRecord {
    pub fn new(device_id: impl Into<String>, values: BTreeMap<String, f64>) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp: Utc::now(),
            values,
        }
    }

    /// `{ "collector_id", "timestamp" (ISO-8601, second precision), "values" }`
    pub fn to_primary_json(&self) -> serde_json::Value {
        serde_json::to_value(PrimaryForm {
            collector_id: &self.device_id,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            values: &self.values,
        })
        .expect("TelemetryRecord always serialises")
    }

    /// `{ "line_id", "timestamp" (ms since epoch), "data" }` — the schema the
    /// broker-publisher and pub/sub exporters emit.
    pub fn to_legacy_json(&self) -> serde_json::Value {
        serde_json::to_value(LegacyForm {
            line_id: &self.device_id,
            timestamp: self.timestamp.timestamp_millis(),
            data: &self.values,
        })
        .expect("TelemetryRecord always serialises")
    }

    /// Inverse of [`TelemetryRecord::to_legacy_json`]. The legacy form's
    /// millisecond-epoch timestamp round-trips exactly; the primary form's
    /// second-precision ISO-8601 string does not, by construction.
    pub fn from_legacy_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let parsed: LegacyFormOwned = serde_json::from_value(value.clone())?;
        let timestamp = Utc
            .timestamp_millis_opt(parsed.timestamp)
            .single()
            .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))?;
        Ok(Self {
            device_id: parsed.line_id,
            timestamp,
            values: parsed.data,
        })
    }
}

#[derive(Serialize)]
struct PrimaryForm<'a> {
    collector_id: &'a str,
    timestamp: String,
    values: &'a BTreeMap<String, f64>,
}

#[derive(Serialize)]
struct LegacyForm<'a> {
    line_id: &'a str,
    timestamp: i64,
    data: &'a BTreeMap<String, f64>,
}

#[derive(Deserialize)]
struct LegacyFormOwned {
    line_id: String,
    timestamp: i64,
    data: BTreeMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetryRecord {
        let mut values = BTreeMap::new();
        values.insert("temp".to_string(), 21.5);
        values.insert("pressure".to_string(), 1013.25);
        TelemetryRecord::new("L1", values)
    }

    #[test]
    fn primary_json_has_expected_shape() {
        let record = sample();
        let json = record.to_primary_json();
        assert_eq!(json["collector_id"], "L1");
        assert_eq!(json["values"]["temp"], 21.5);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn legacy_json_uses_millisecond_epoch() {
        let record = sample();
        let json = record.to_legacy_json();
        assert_eq!(json["line_id"], "L1");
        assert_eq!(
            json["timestamp"].as_i64().unwrap(),
            record.timestamp.timestamp_millis()
        );
        assert_eq!(json["data"]["pressure"], 1013.25);
    }

    #[test]
    fn legacy_json_round_trips_id_timestamp_and_values() {
        let record = sample();
        let json = record.to_legacy_json();
        let decoded = TelemetryRecord::from_legacy_json(&json).unwrap();
        assert_eq!(decoded.device_id, record.device_id);
        assert_eq!(
            decoded.timestamp.timestamp_millis(),
            record.timestamp.timestamp_millis()
        );
        assert_eq!(decoded.values, record.values);
    }
}
