//! Session expiry guard.
//!
//! A lighter alternative to full token verification: the session cookie holds
//! nothing but an encrypted expiry instant, so the only question it answers is
//! "is this session still fresh". No identity or permissions travel with it.
//!
//! Cookie values are `base64(nonce ‖ AES-256-GCM(expiry))`, where the expiry is
//! a big-endian `i64` of Unix microseconds.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use axum::http::{HeaderMap, header::COOKIE};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use rand::prelude::RngExt;
use rand::rng;
use std::fmt;
use thiserror::Error;
use tracing::{instrument, trace};

use crate::errors::Error;

/// Default metadata entry (and cookie name) holding the session value.
pub const DEFAULT_SESSION_COOKIE: &str = "session_token";

const NONCE_LEN: usize = 12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session key must be base64 of exactly 32 bytes: {0}")]
    InvalidKey(String),

    #[error("session cookie not found in request")]
    Missing,

    #[error("session value could not be decoded or decrypted")]
    Malformed,

    #[error("session has expired")]
    Expired,

    #[error("failed to seal session value: {0}")]
    Seal(String),
}

/// Seals and checks session expiry cookies with a single symmetric key.
#[derive(Clone)]
pub struct SessionGuard {
    cipher: Aes256Gcm,
    cookie_name: String,
}

impl SessionGuard {
    /// Build a guard from a base64-encoded 32-byte key.
    pub fn new(key_b64: &str, cookie_name: impl Into<String>) -> Result<Self, SessionError> {
        let key_bytes = general_purpose::STANDARD
            .decode(key_b64)
            .map_err(|e| SessionError::InvalidKey(e.to_string()))?;
        if key_bytes.len() != 32 {
            return Err(SessionError::InvalidKey(format!("got {} bytes", key_bytes.len())));
        }
        let cipher = Aes256Gcm::new_from_slice(&key_bytes).map_err(|e| SessionError::InvalidKey(e.to_string()))?;

        let cookie_name = cookie_name.into();
        Ok(Self {
            cipher,
            cookie_name: if cookie_name.is_empty() { DEFAULT_SESSION_COOKIE.to_string() } else { cookie_name },
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Produce a cookie value that stays valid until `expires_at`.
    pub fn seal(&self, expires_at: DateTime<Utc>) -> Result<String, SessionError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rng().fill(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, expires_at.timestamp_micros().to_be_bytes().as_slice())
            .map_err(|e| SessionError::Seal(e.to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(sealed))
    }

    /// Recover the expiry instant without judging it.
    pub fn open(&self, value: &str) -> Result<DateTime<Utc>, SessionError> {
        let sealed = general_purpose::STANDARD.decode(value).map_err(|_| SessionError::Malformed)?;
        if sealed.len() < NONCE_LEN {
            return Err(SessionError::Malformed);
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| SessionError::Malformed)?;
        let micros: [u8; 8] = plaintext.as_slice().try_into().map_err(|_| SessionError::Malformed)?;

        DateTime::from_timestamp_micros(i64::from_be_bytes(micros)).ok_or(SessionError::Malformed)
    }

    /// Accept `value` only if it opens and its expiry is still in the future.
    #[instrument(skip_all)]
    pub fn check(&self, value: &str) -> Result<DateTime<Utc>, SessionError> {
        let expires_at = self.open(value)?;
        if expires_at <= Utc::now() {
            trace!(%expires_at, "Session expired");
            return Err(SessionError::Expired);
        }
        Ok(expires_at)
    }

    /// Find the session value in `headers`.
    ///
    /// gRPC clients send it as its own metadata entry; requests coming through an
    /// HTTP gateway carry it inside the `Cookie` header instead.
    pub fn session_value<'a>(&self, headers: &'a HeaderMap) -> Result<&'a str, SessionError> {
        if let Some(value) = headers.get(self.cookie_name.as_str()).and_then(|v| v.to_str().ok()) {
            return Ok(value);
        }

        for cookie_header in headers.get_all(COOKIE) {
            let Ok(cookies) = cookie_header.to_str() else { continue };
            for cookie in cookies.split(';') {
                if let Some((name, value)) = cookie.trim().split_once('=')
                    && name == self.cookie_name
                {
                    return Ok(value);
                }
            }
        }
        Err(SessionError::Missing)
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("cipher", &"<redacted>")
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Missing => Error::unauthenticated("session_token cookie not found in request"),
            SessionError::Malformed => Error::unauthenticated("session_token is invalid"),
            SessionError::Expired => Error::unauthenticated("token has been expired"),
            SessionError::InvalidKey(_) | SessionError::Seal(_) => Error::Internal {
                operation: format!("handle session cookie: {err}"),
            },
        }
    }
}
