//! Session cookie decoding.
//!
//! The auth provider signs the session as an HS256 JWT and sets it as a
//! cookie. This module only verifies and decodes it; turning claims into a
//! credential is [`docchat_relay::resolve_credential`].

use axum::http::{HeaderMap, header};
use docchat_relay::{Credential, SessionClaims, resolve_credential};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use tracing::debug;

pub struct SessionDecoder {
    key: Option<DecodingKey>,
    validation: Validation,
    cookie_name: String,
}

impl SessionDecoder {
    /// Without a secret no session can be verified and every caller resolves
    /// to anonymous.
    pub fn new(secret: Option<&str>, cookie_name: impl Into<String>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        Self {
            key: secret.map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation,
            cookie_name: cookie_name.into(),
        }
    }

    /// Resolves the caller's credential from request headers.
    pub fn credential(&self, headers: &HeaderMap) -> Credential {
        resolve_credential(self.claims(headers).as_ref())
    }

    /// Verified claims, or `None` if the session is missing or invalid.
    pub fn claims(&self, headers: &HeaderMap) -> Option<SessionClaims> {
        let key = self.key.as_ref()?;
        let token = self.session_token(headers)?;
        match decode::<SessionClaims>(&token, key, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(err) => {
                debug!(error = %err, "rejecting session token");
                None
            }
        }
    }

    /// The session cookie, falling back to an `Authorization: Bearer` header.
    fn session_token(&self, headers: &HeaderMap) -> Option<String> {
        cookie_value(headers, &self.cookie_name).or_else(|| bearer_token(headers))
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
