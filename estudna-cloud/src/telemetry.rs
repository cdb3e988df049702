use chrono::{DateTime, Local, SecondsFormat, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::error::Error;
use crate::session::Session;
use crate::util::types::DeviceId;

/// Telemetry channel carrying the water level
pub const LEVEL_CHANNEL: &str = "ain1";

/// Latest telemetry of a device, by channel name.
///
/// Each channel holds a list of `{"value": <string>, "ts": <ms>}` entries,
/// most recent first, where `value` is a JSON document encoded as a string,
/// e.g. `"{\"str\": \"1.23\", \"zone\": \"A\", \"units\": \"m\"}"`.
/// Channels are kept as raw JSON so that a malformed channel only affects
/// reads of that channel.
pub type LatestTelemetry = HashMap<String, Value>;

/// A single reading of a telemetry channel
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TelemetrySample {
    pub value: f64,
    pub zone: Option<String>,
    pub units: Option<String>,
    pub timestamp_ms: i64,
}

/// Descriptive metadata accompanying a sample
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SampleAttributes {
    pub zone: Option<String>,
    pub units: Option<String>,
    pub last_updated: Option<String>,
}

impl TelemetrySample {
    /// Time of the measurement in the local timezone
    pub fn last_updated(&self) -> Option<DateTime<Local>> {
        Local.timestamp_millis_opt(self.timestamp_ms).single()
    }

    pub fn attributes(&self) -> SampleAttributes {
        SampleAttributes {
            zone: self.zone.clone(),
            units: self.units.clone(),
            last_updated: self
                .last_updated()
                .map(|time| time.to_rfc3339_opts(SecondsFormat::Millis, false)),
        }
    }
}

/// Reasons for a channel to have no usable sample. None of these is fatal,
/// the remote may well have a sample on the next read.
#[derive(Debug, Error)]
enum Unavailable {
    #[error("channel is missing")]
    MissingChannel,

    #[error("channel is not a list: {0}")]
    NotAList(String),

    #[error("channel has no entries")]
    EmptyChannel,

    #[error("entry is not an object: {0}")]
    NotAnObject(String),

    #[error("entry has no value")]
    MissingValue,

    #[error("entry has no timestamp")]
    MissingTimestamp,

    #[error("timestamp is not an integer: {0}")]
    BadTimestamp(String),

    #[error("value is not a JSON string: {0}")]
    NotJson(String),

    #[error("value has no 'str' field")]
    MissingReading,

    #[error("'str' field is not a number: {0}")]
    NotNumeric(String),
}

#[derive(Deserialize)]
struct ChannelValue {
    #[serde(rename = "str")]
    reading: Option<Value>,
    zone: Option<Value>,
    units: Option<Value>,
}

/// Fetch the latest telemetry of every channel of a device.
///
/// The remote supports filtering by channel keys but the full snapshot is
/// always requested.
#[instrument(skip(session), err)]
pub async fn latest_telemetry(
    session: &Session,
    device_id: &DeviceId,
) -> Result<LatestTelemetry, Error> {
    session
        .get(&format!("/apiv2/device/{device_id}/latest"), None)
        .await
}

/// Read the most recent sample of `channel` for a device.
///
/// Returns `Ok(None)` if the remote has no usable sample for the channel,
/// malformed telemetry is logged and otherwise ignored. Request failures are
/// returned as errors.
#[instrument(skip(session), err)]
pub async fn read_channel(
    session: &Session,
    device_id: &DeviceId,
    channel: &str,
) -> Result<Option<TelemetrySample>, Error> {
    let telemetry = latest_telemetry(session, device_id).await?;

    match parse_sample(&telemetry, channel) {
        Ok(sample) => Ok(Some(sample)),
        Err(err) => {
            warn!("no sample for channel {channel} of device {device_id}: {err}");
            Ok(None)
        }
    }
}

/// Read the current water level of a device.
pub async fn read_level(session: &Session, device_id: &DeviceId) -> Result<Option<f64>, Error> {
    let sample = read_channel(session, device_id, LEVEL_CHANNEL).await?;
    Ok(sample.map(|s| s.value))
}

fn parse_sample(telemetry: &LatestTelemetry, channel: &str) -> Result<TelemetrySample, Unavailable> {
    let entry = match telemetry.get(channel) {
        Some(Value::Array(entries)) => entries.first().ok_or(Unavailable::EmptyChannel)?,
        Some(other) => return Err(Unavailable::NotAList(other.to_string())),
        None => return Err(Unavailable::MissingChannel),
    };
    let entry = entry
        .as_object()
        .ok_or_else(|| Unavailable::NotAnObject(entry.to_string()))?;

    let raw = match entry.get("value") {
        Some(Value::String(raw)) => raw,
        Some(Value::Null) | None => return Err(Unavailable::MissingValue),
        Some(other) => return Err(Unavailable::NotJson(other.to_string())),
    };
    let timestamp_ms = match entry.get("ts") {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| Unavailable::BadTimestamp(n.to_string()))?,
        Some(Value::Null) | None => return Err(Unavailable::MissingTimestamp),
        Some(other) => return Err(Unavailable::BadTimestamp(other.to_string())),
    };

    let value: ChannelValue =
        serde_json::from_str(raw).map_err(|e| Unavailable::NotJson(e.to_string()))?;

    let reading = match value.reading {
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| Unavailable::NotNumeric(s.clone()))?,
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| Unavailable::NotNumeric(n.to_string()))?,
        Some(Value::Null) | None => return Err(Unavailable::MissingReading),
        Some(other) => return Err(Unavailable::NotNumeric(other.to_string())),
    };

    // "nan" and "inf" parse as floats but are no measurement
    if !reading.is_finite() {
        return Err(Unavailable::NotNumeric(reading.to_string()));
    }

    Ok(TelemetrySample {
        value: reading,
        zone: value.zone.and_then(into_text),
        units: value.units.and_then(into_text),
        timestamp_ms,
    })
}

fn into_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
