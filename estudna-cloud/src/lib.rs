/*
This crate is home to everything related to the eSTUDNA2 cloud, a
ThingsBoard deployment exposing the vendor's "API v2".

It provides the authenticated session (login and refresh of the
access/refresh token pair), device discovery, and reading the latest
water level telemetry of a device.
*/

mod config;
mod devices;
mod error;
mod session;
mod telemetry;
mod token;

pub use config::{DEFAULT_API_ENDPOINT, RemoteConfig, RequestConfig};
pub use devices::{Device, list_devices};
pub use error::Error;
pub use session::Session;
pub use telemetry::{
    LEVEL_CHANNEL, LatestTelemetry, SampleAttributes, TelemetrySample, latest_telemetry,
    read_channel, read_level,
};

use estudna_util as util;
