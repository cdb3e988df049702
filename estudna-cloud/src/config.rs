use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::util::http::Uri;

pub const DEFAULT_API_ENDPOINT: &str = "https://cml5.seapraha.cz";

/// Remote API configuration
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RemoteConfig {
    pub api_endpoint: Uri,
    pub request: RequestConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_endpoint: Uri::from_static(DEFAULT_API_ENDPOINT),
            request: RequestConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RequestConfig {
    /// Maximum time to wait for a single HTTP request to complete
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    /// Time between two reads of the same device
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(30_000),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
