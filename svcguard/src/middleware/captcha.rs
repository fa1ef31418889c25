//! Captcha challenge verification.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::errors::Error;

pub const DEFAULT_CAPTCHA_HEADER: &str = "x-captcha-key";
pub const DEFAULT_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Body returned by the siteverify endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GoogleCaptchaResponse {
    pub success: bool,
    #[serde(default)]
    pub challenge_ts: Option<String>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default, rename = "error-codes")]
    pub error_codes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("failed to send captcha verification request: {0}")]
    Request(#[source] reqwest::Error),

    #[error("failed to read captcha verification response: {0}")]
    Read(#[source] reqwest::Error),

    #[error("failed to decode captcha verification response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Checks a client's challenge response with a third party.
#[async_trait]
pub trait CaptchaVerifier: Send + Sync {
    async fn verify(&self, challenge: &str) -> Result<GoogleCaptchaResponse, CaptchaError>;
}

/// [`CaptchaVerifier`] backed by Google reCAPTCHA's siteverify API.
#[derive(Clone)]
pub struct RecaptchaVerifier {
    client: reqwest::Client,
    secret_key: String,
    verify_url: String,
}

impl RecaptchaVerifier {
    pub fn new(secret_key: impl Into<String>, verify_url: impl Into<String>, timeout: Duration) -> Result<Self, CaptchaError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(CaptchaError::Request)?;
        Ok(Self {
            client,
            secret_key: secret_key.into(),
            verify_url: verify_url.into(),
        })
    }
}

impl std::fmt::Debug for RecaptchaVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecaptchaVerifier")
            .field("secret_key", &"<redacted>")
            .field("verify_url", &self.verify_url)
            .finish()
    }
}

#[async_trait]
impl CaptchaVerifier for RecaptchaVerifier {
    async fn verify(&self, challenge: &str) -> Result<GoogleCaptchaResponse, CaptchaError> {
        let response = self
            .client
            .post(&self.verify_url)
            .query(&[("secret", self.secret_key.as_str()), ("response", challenge)])
            .send()
            .await
            .map_err(CaptchaError::Request)?;

        let body = response.bytes().await.map_err(CaptchaError::Read)?;
        Ok(serde_json::from_slice(&body)?)
    }
}

/// Parse a gRPC `grpc-timeout` value such as `250m` or `5S`.
pub fn grpc_timeout(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    if value.len() < 2 {
        return None;
    }
    let (amount, unit) = value.split_at(value.len() - 1);
    let amount: u64 = amount.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(amount.checked_mul(3600)?)),
        "M" => Some(Duration::from_secs(amount.checked_mul(60)?)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

/// Verify the challenge carried in `header_name`, bounded by the call's `grpc-timeout` if any.
///
/// A cancelled call drops this future together with the in-flight request; nothing is
/// rendered for it.
#[instrument(skip(verifier, headers))]
pub async fn verify_challenge(verifier: &dyn CaptchaVerifier, headers: &HeaderMap, header_name: &str) -> Result<(), Error> {
    let challenge = headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidArgument {
            message: format!("failed to find header key {header_name} in metadata"),
        })?;

    let outcome = match grpc_timeout(headers) {
        Some(deadline) => tokio::time::timeout(deadline, verifier.verify(challenge))
            .await
            .map_err(|_| Error::DeadlineExceeded {
                operation: "verify captcha challenge".to_string(),
            })?,
        None => verifier.verify(challenge).await,
    };

    let response = outcome.map_err(|e| Error::Internal {
        operation: format!("validate captcha: {e}"),
    })?;
    if !response.success {
        debug!(error_codes = ?response.error_codes, "Captcha challenge failed");
        return Err(Error::permission_denied(
            "your challenge is unsuccessful, try again to complete captcha challenge",
        ));
    }
    Ok(())
}
