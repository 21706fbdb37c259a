//! Local decoding of access-token claims.
//!
//! The payload segment is read without checking the signature. Claims
//! obtained here are display data: the server re-validates the token on every
//! API call and remains the only authority on what the bearer may do.

use crate::error::{SessionError, SessionResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Claims carried in an access token's payload segment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityClaims {
    claims: Map<String, Value>,
}

impl IdentityClaims {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.claims.iter()
    }

    /// Numeric user id (`user_id`, or `id` as issued by older servers)
    pub fn user_id(&self) -> Option<u64> {
        self.get("user_id")
            .or_else(|| self.get("id"))
            .and_then(|v| v.as_u64().or_else(|| v.as_str()?.parse().ok()))
    }

    pub fn username(&self) -> Option<&str> {
        self.get("username").and_then(Value::as_str)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = self.get("exp")?.as_i64()?;
        DateTime::from_timestamp(exp, 0)
    }

    /// First and last name when present, otherwise the username
    pub fn display_name(&self) -> Option<String> {
        let first = self.get("first_name").and_then(Value::as_str).unwrap_or("");
        let last = self.get("last_name").and_then(Value::as_str).unwrap_or("");
        let full = format!("{} {}", first, last).trim().to_string();
        if full.is_empty() {
            self.username().map(str::to_string)
        } else {
            Some(full)
        }
    }
}

/// Decode the claims of a compact `header.payload.signature` token.
///
/// The signature is not verified.
pub fn decode(access_token: &str) -> SessionResult<IdentityClaims> {
    let segments: Vec<&str> = access_token.split('.').collect();
    if segments.len() != 3 {
        return Err(SessionError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let bytes = decode_segment(segments[1])?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| SessionError::MalformedToken(format!("payload is not JSON: {}", e)))?;

    match value {
        Value::Object(claims) => Ok(IdentityClaims { claims }),
        other => Err(SessionError::MalformedToken(format!(
            "payload is not a claims object: {}",
            json_kind(&other)
        ))),
    }
}

/// Base64url without padding, tolerating padding and the standard alphabet
fn decode_segment(segment: &str) -> SessionResult<Vec<u8>> {
    let normalized: String = segment
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();

    URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| SessionError::MalformedToken(format!("payload is not base64: {}", e)))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
pub(crate) fn encode_token(claims: &Value) -> String {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    format!("eyJhbGciOiJIUzI1NiJ9.{}.c2lnbmF0dXJl", payload)
}
