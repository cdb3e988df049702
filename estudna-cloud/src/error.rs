use thiserror::Error;

use crate::util::http::{ClientError, InvalidUriError};

#[derive(Debug, Error)]
pub enum Error {
    /// Credentials were rejected or the session holds no usable tokens
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request failed: {0}")]
    Transport(#[from] ClientError),

    #[error("invalid remote endpoint URI: {0}")]
    InvalidEndpoint(#[from] InvalidUriError),

    #[error("no devices found")]
    NoDevices,
}
