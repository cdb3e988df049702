use clap::Parser;
use std::num::ParseIntError;
use std::time::Duration;

use crate::cloud::{DEFAULT_API_ENDPOINT, LEVEL_CHANNEL, RemoteConfig, RequestConfig};
use crate::util::http::Uri;

fn parse_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: u64 = s.parse()?;
    Ok(Duration::from_millis(millis))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// eSTUDNA2 account user name
    #[arg(env = "ESTUDNA_USERNAME", long = "username", value_name = "str")]
    pub username: String,

    /// eSTUDNA2 account password
    #[arg(
        env = "ESTUDNA_PASSWORD",
        long = "password",
        value_name = "str",
        hide_env_values = true
    )]
    pub password: String,

    /// Remote API endpoint URI
    #[arg(
        env = "ESTUDNA_API_ENDPOINT",
        long = "api-endpoint",
        value_name = "uri",
        default_value = DEFAULT_API_ENDPOINT
    )]
    pub api_endpoint: Uri,

    /// Remote request timeout in milliseconds
    #[arg(
        env = "ESTUDNA_REQUEST_TIMEOUT_MS",
        long = "request-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub request_timeout: Option<Duration>,

    /// Device read interval in milliseconds
    #[arg(
        env = "ESTUDNA_POLL_INTERVAL_MS",
        long = "poll-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub poll_interval: Option<Duration>,

    /// Telemetry channel to read from every device
    #[arg(
        env = "ESTUDNA_CHANNEL",
        long = "channel",
        value_name = "key",
        default_value = LEVEL_CHANNEL
    )]
    pub channel: String,

    /// Read every device once and exit
    #[arg(env = "ESTUDNA_ONCE", long = "once")]
    pub once: bool,
}

impl Cli {
    pub fn remote_config(&self) -> RemoteConfig {
        let request_defaults = RequestConfig::default();
        RemoteConfig {
            api_endpoint: self.api_endpoint.clone(),
            request: RequestConfig {
                timeout: self.request_timeout.unwrap_or(request_defaults.timeout),
                poll_interval: self
                    .poll_interval
                    .unwrap_or(request_defaults.poll_interval),
            },
        }
    }
}

pub fn parse() -> Cli {
    Parser::parse()
}
