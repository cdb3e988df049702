//! Access token inspection.
//!
//! The access token is a JWT issued by the cloud. This client never verifies
//! its signature: the token's integrity is trusted and only its `exp` claim
//! is read to decide when to refresh ahead of a request.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Claims {
    exp: i64,
}

/// Read the expiry time of `token` without verifying its signature.
pub fn expiry(token: &str) -> Result<DateTime<Utc>, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Utc.timestamp_opt(data.claims.exp, 0)
        .single()
        .ok_or_else(|| jsonwebtoken::errors::ErrorKind::InvalidToken.into())
}

/// A token is expired once `now` reaches its `exp` claim.
///
/// Tokens that cannot be decoded are reported as expired, so the caller
/// exchanges them for a fresh pair.
pub fn is_expired(token: &str, now: DateTime<Utc>) -> bool {
    match expiry(token) {
        Ok(exp) => exp <= now,
        Err(_) => true,
    }
}

#[cfg(test)]
pub(crate) fn mint(exp: i64) -> String {
    use jsonwebtoken::{EncodingKey, Header, encode};

    encode(
        &Header::new(jsonwebtoken::Algorithm::HS512),
        &serde_json::json!({"sub": "tenant@example.com", "exp": exp}),
        &EncodingKey::from_secret(b"not-the-server-secret"),
    )
    .unwrap()
}
