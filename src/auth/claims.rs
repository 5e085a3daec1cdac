//! Bearer token claim decoding.
//!
//! Decodes the claims segment of a compact token without verifying the
//! signature; verification is the identity provider's job. The untyped
//! JSON payload is converted into a typed struct immediately, with
//! numeric coercion for string-encoded epoch values, so nothing
//! downstream ever touches a raw claim map.

use base64::Engine as _;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimError {
    /// Not a three-segment compact token, or the payload is not valid
    /// base64url-encoded JSON.
    #[error("invalid token format")]
    InvalidFormat,
    /// Structurally sound but missing subject, issued-at, or expiry.
    #[error("missing required claim '{0}'")]
    MissingClaim(&'static str),
}

/// Validated claims extracted from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub subject: String,
    pub email: Option<String>,
    /// Role asserted by the token; authoritative only after the
    /// provider confirms the subject.
    pub role: Option<String>,
    pub suspended: bool,
    /// Seconds since epoch.
    pub issued_at: u64,
    pub expires_at: u64,
}

impl TokenClaims {
    /// Deterministic session id: the same token always addresses the
    /// same session row.
    pub fn session_id(&self) -> String {
        format!("{}_{}", self.subject, self.issued_at)
    }
}

/// Decode the claims segment of a compact `header.payload.signature`
/// token. No cryptographic checks are performed here.
pub fn decode_claims(token: &str) -> Result<TokenClaims, ClaimError> {
    let mut segments = token.split('.');
    let (_header, payload) = match (segments.next(), segments.next(), segments.next()) {
        (Some(h), Some(p), Some(_sig)) if !h.is_empty() && !p.is_empty() => (h, p),
        _ => return Err(ClaimError::InvalidFormat),
    };
    if segments.next().is_some() {
        return Err(ClaimError::InvalidFormat);
    }

    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| ClaimError::InvalidFormat)?;
    let value: Value = serde_json::from_slice(&raw).map_err(|_| ClaimError::InvalidFormat)?;

    let subject = value
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(ClaimError::MissingClaim("sub"))?
        .to_string();
    let issued_at = epoch_claim(&value, "iat")?;
    let expires_at = epoch_claim(&value, "exp")?;

    Ok(TokenClaims {
        subject,
        email: value
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string),
        role: value
            .get("role")
            .and_then(Value::as_str)
            .map(str::to_string),
        suspended: value
            .get("suspended")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        issued_at,
        expires_at,
    })
}

/// Epoch claims arrive as numbers from well-behaved issuers and as
/// decimal strings from some legacy ones; accept both.
fn epoch_claim(value: &Value, name: &'static str) -> Result<u64, ClaimError> {
    match value.get(name) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f as u64))
            .ok_or(ClaimError::MissingClaim(name)),
        Some(Value::String(s)) => s.parse().map_err(|_| ClaimError::MissingClaim(name)),
        _ => Err(ClaimError::MissingClaim(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn encode_token(claims: &serde_json::Value) -> String {
        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!(
            "{}.{}.sig",
            engine.encode(r#"{"alg":"none"}"#),
            engine.encode(claims.to_string()),
        )
    }

    #[test]
    fn test_decode_valid_token() {
        let token = encode_token(&serde_json::json!({
            "sub": "user-1",
            "email": "u@example.com",
            "iat": 1000,
            "exp": 2000,
        }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.subject, "user-1");
        assert_eq!(claims.issued_at, 1000);
        assert_eq!(claims.expires_at, 2000);
        assert_eq!(claims.session_id(), "user-1_1000");
        assert!(!claims.suspended);
    }

    #[test]
    fn test_string_encoded_epochs_coerce() {
        let token = encode_token(&serde_json::json!({
            "sub": "user-1",
            "iat": "1000",
            "exp": "2000",
        }));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.issued_at, 1000);
        assert_eq!(claims.expires_at, 2000);
    }

    #[test]
    fn test_missing_subject() {
        let token = encode_token(&serde_json::json!({ "iat": 1, "exp": 2 }));
        assert_eq!(decode_claims(&token), Err(ClaimError::MissingClaim("sub")));
    }

    #[test]
    fn test_garbage_tokens_rejected() {
        assert_eq!(decode_claims(""), Err(ClaimError::InvalidFormat));
        assert_eq!(decode_claims("not-a-token"), Err(ClaimError::InvalidFormat));
        assert_eq!(decode_claims("a.b"), Err(ClaimError::InvalidFormat));
        assert_eq!(
            decode_claims("a.!!notbase64!!.c"),
            Err(ClaimError::InvalidFormat)
        );
        assert_eq!(decode_claims("a.b.c.d"), Err(ClaimError::InvalidFormat));
    }
}
