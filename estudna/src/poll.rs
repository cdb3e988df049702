use serde::Serialize;
use std::io::{self, Write};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{instrument, warn};

use crate::cloud::{Device, SampleAttributes, Session, TelemetrySample, read_channel};
use crate::util::types::DeviceId;

/// Water level is reported in meters
const UNIT_OF_MEASUREMENT: &str = "m";

/// The state of one device's sensor after a read
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SensorState {
    pub device_id: DeviceId,
    pub name: String,
    pub state: Option<f64>,
    pub available: bool,
    pub unit_of_measurement: &'static str,
    pub attributes: Option<SampleAttributes>,
}

impl SensorState {
    pub fn new(device: &Device, sample: Option<&TelemetrySample>) -> Self {
        Self {
            device_id: device.id.clone(),
            name: device.display_name(),
            state: sample.map(|s| s.value),
            available: sample.is_some(),
            unit_of_measurement: UNIT_OF_MEASUREMENT,
            attributes: sample.map(TelemetrySample::attributes),
        }
    }
}

/// Read `channel` of every device, one after the other.
///
/// A failed read makes that device unavailable until the next one.
#[instrument(skip(session, devices))]
pub async fn read_all(session: &Session, devices: &[Device], channel: &str) -> Vec<SensorState> {
    let mut states = Vec::with_capacity(devices.len());
    for device in devices {
        let sample = match read_channel(session, &device.id, channel).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!("failed to read device {}: {e}", device.id);
                None
            }
        };
        states.push(SensorState::new(device, sample.as_ref()));
    }
    states
}

/// Write one JSON line per state
pub fn emit<W: Write>(out: &mut W, states: &[SensorState]) -> io::Result<()> {
    for state in states {
        serde_json::to_writer(&mut *out, state)?;
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// Read all devices every `poll_interval`, forever.
pub async fn start_poll(
    session: &Session,
    devices: &[Device],
    channel: &str,
    poll_interval: Duration,
) -> io::Result<()> {
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let states = read_all(session, devices, channel).await;
        emit(&mut io::stdout().lock(), &states)?;
    }
}
