//! Signed claim tokens with two trust classes.
//!
//! Tokens are HS256 JWTs. A *public* token is signed with the public secret and
//! handed to end-user clients; a *private* (delegation) token is signed with the
//! private secret and minted by one service to authenticate a forwarded call to
//! another service on a user's behalf.
//!
//! Which secret verifies a token depends on the token's own `is_p` claim, so
//! verification is two-phase: [`parse_unverified_token`] peeks at the claims to
//! learn the [`SecretClass`], then [`TokenEngine::parse_token`] (or
//! [`is_valid_token`]) verifies signature and expiry with the selected secret.
//! Nothing read during the peek is trusted until the second phase succeeds.

use bon::bon;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, time::Duration};
use thiserror::Error;

use crate::{
    acl::PermissionMatrix,
    types::{PermissionCode, ServiceCode, SessionId, UserId},
};

pub const DEFAULT_ACCESS_TOKEN_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_REFRESH_TOKEN_EXPIRY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("{0} secret key is empty")]
    SecretKeyEmpty(SecretClass),

    #[error("token signature is invalid")]
    SignatureInvalid,

    #[error("token expired")]
    Expired,

    #[error("token is invalid")]
    Invalid,

    #[error("failed to sign token: {0}")]
    Encode(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::SignatureInvalid,
            _ => TokenError::Invalid,
        }
    }
}

/// Which secret a token is signed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretClass {
    /// End-user token, signed with the public secret
    Public,
    /// Inter-service delegation token, signed with the private secret
    Private,
}

impl SecretClass {
    /// The class a token declares for itself.
    pub fn of(claims: &Claims) -> Self {
        if claims.is_private { SecretClass::Private } else { SecretClass::Public }
    }
}

impl fmt::Display for SecretClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretClass::Public => write!(f, "public"),
            SecretClass::Private => write!(f, "private"),
        }
    }
}

/// The signed token body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "u_id", default)]
    pub user_id: UserId,
    #[serde(rename = "sess_id", default)]
    pub session_id: SessionId,
    #[serde(rename = "perms", default, skip_serializing_if = "PermissionMatrix::is_empty")]
    pub permissions: PermissionMatrix,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(rename = "is_p", default, skip_serializing_if = "is_false")]
    pub is_private: bool,
    #[serde(rename = "valid", default, skip_serializing_if = "is_false")]
    pub validated: bool,
    #[serde(rename = "e_data", default, skip_serializing_if = "HashMap::is_empty")]
    pub extra_data: HashMap<String, serde_json::Value>,
    #[serde(rename = "applicationId", default, skip_serializing_if = "String::is_empty")]
    pub application_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default)]
    pub exp: i64,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Claims {
    pub fn new(user_id: UserId, session_id: SessionId, permissions: PermissionMatrix, roles: Vec<String>) -> Self {
        Self {
            user_id,
            session_id,
            permissions,
            roles,
            ..Default::default()
        }
    }

    /// Expiry compared against the wall clock
    pub fn is_expired(&self) -> bool {
        self.exp < Utc::now().timestamp()
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn service_permissions(&self, service: ServiceCode) -> &[PermissionCode] {
        self.permissions.service_permissions(service)
    }
}

/// Creates and verifies claim tokens for both secret classes.
///
/// ```ignore
/// let engine = TokenEngine::builder()
///     .public_secret_key("public")
///     .private_secret_key("private")
///     .issuer("accounts")
///     .build();
/// let token = engine.create_access_token(&mut claims)?;
/// ```
#[derive(Clone)]
pub struct TokenEngine {
    public_secret_key: String,
    private_secret_key: String,
    issuer: Option<String>,
    subject: Option<String>,
    access_token_expiry: Duration,
    refresh_token_expiry: Duration,
}

#[bon]
impl TokenEngine {
    #[builder]
    pub fn new(
        #[builder(into, default)] public_secret_key: String,
        #[builder(into, default)] private_secret_key: String,
        #[builder(into)] issuer: Option<String>,
        #[builder(into)] subject: Option<String>,
        #[builder(default = DEFAULT_ACCESS_TOKEN_EXPIRY)] access_token_expiry: Duration,
        #[builder(default = DEFAULT_REFRESH_TOKEN_EXPIRY)] refresh_token_expiry: Duration,
    ) -> Self {
        Self {
            public_secret_key,
            private_secret_key,
            issuer,
            subject,
            access_token_expiry,
            refresh_token_expiry,
        }
    }
}

impl TokenEngine {
    /// Stamp an access-token expiry on `claims` and sign them with the public secret.
    pub fn create_access_token(&self, claims: &mut Claims) -> Result<String, TokenError> {
        claims.is_private = false;
        claims.exp = (Utc::now() + self.access_token_expiry).timestamp();
        self.create_token(SecretClass::Public, claims)
    }

    /// Same as [`TokenEngine::create_access_token`] with the longer refresh lifetime.
    pub fn create_refresh_token(&self, claims: &mut Claims) -> Result<String, TokenError> {
        claims.is_private = false;
        claims.exp = (Utc::now() + self.refresh_token_expiry).timestamp();
        self.create_token(SecretClass::Public, claims)
    }

    /// Mint a delegation token: marked private and signed with the private secret.
    pub fn create_private_access_token(&self, claims: &mut Claims) -> Result<String, TokenError> {
        claims.is_private = true;
        claims.exp = (Utc::now() + self.access_token_expiry).timestamp();
        self.create_token(SecretClass::Private, claims)
    }

    fn create_token(&self, class: SecretClass, claims: &mut Claims) -> Result<String, TokenError> {
        if let Some(issuer) = &self.issuer {
            claims.iss = Some(issuer.clone());
            claims.iat = Some(Utc::now().timestamp());
        }
        if let Some(subject) = &self.subject {
            claims.sub = Some(subject.clone());
        }
        self.sign(class, claims)
    }

    /// Sign `claims` exactly as given with the secret of `class`.
    pub fn sign(&self, class: SecretClass, claims: &Claims) -> Result<String, TokenError> {
        let secret = self.secret(class)?;
        let key = EncodingKey::from_secret(secret.as_bytes());
        encode(&Header::new(Algorithm::HS256), claims, &key).map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Verify signature and expiry against the secret of `class` and return the claims.
    pub fn parse_token(&self, token: &str, class: SecretClass) -> Result<Claims, TokenError> {
        let secret = self.secret(class)?;
        verify::<Claims>(token, secret)
    }

    /// The configured secret for `class`, failing if it is empty.
    pub fn secret(&self, class: SecretClass) -> Result<&str, TokenError> {
        let secret = match class {
            SecretClass::Public => &self.public_secret_key,
            SecretClass::Private => &self.private_secret_key,
        };
        if secret.is_empty() {
            return Err(TokenError::SecretKeyEmpty(class));
        }
        Ok(secret)
    }

    pub fn access_token_expiry(&self) -> Duration {
        self.access_token_expiry
    }

    pub fn refresh_token_expiry(&self) -> Duration {
        self.refresh_token_expiry
    }
}

impl fmt::Debug for TokenEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenEngine")
            .field("public_secret_key", &"[REDACTED]")
            .field("private_secret_key", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .field("subject", &self.subject)
            .field("access_token_expiry", &self.access_token_expiry)
            .field("refresh_token_expiry", &self.refresh_token_expiry)
            .finish()
    }
}

/// Verification-only check of `token` against `secret_key`.
///
/// Distinguishes a bad signature, an expired token and a structurally invalid
/// token, without requiring the claims to have any particular shape.
pub fn is_valid_token(token: &str, secret_key: &str) -> Result<(), TokenError> {
    if secret_key.is_empty() {
        return Err(TokenError::Invalid);
    }
    verify::<serde_json::Value>(token, secret_key).map(|_| ())
}

/// Decode the claims of `token` without checking its signature or expiry.
///
/// Only use this to decide which secret to verify with; the result carries no trust.
pub fn parse_unverified_token(token: &str) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|_| TokenError::Invalid)
}

fn verify<T: serde::de::DeserializeOwned>(token: &str, secret: &str) -> Result<T, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    let key = DecodingKey::from_secret(secret.as_bytes());
    Ok(decode::<T>(token, &key, &validation)?.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    const PUBLIC: &str = "test-public-secret";
    const PRIVATE: &str = "test-private-secret";

    fn engine() -> TokenEngine {
        TokenEngine::builder()
            .public_secret_key(PUBLIC)
            .private_secret_key(PRIVATE)
            .build()
    }

    fn sample_claims() -> Claims {
        let mut claims = Claims::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            PermissionMatrix::from([(5, vec![10, 20]), (7, vec![1])]),
            vec!["editor".to_string()],
        );
        claims.application_id = "blog".to_string();
        claims.extra_data.insert("tenant".to_string(), json!("acme"));
        claims
    }

    #[test]
    fn test_access_token_roundtrip() {
        let engine = engine();
        let mut claims = sample_claims();

        let token = engine.create_access_token(&mut claims).unwrap();
        let parsed = engine.parse_token(&token, SecretClass::Public).unwrap();

        assert_eq!(parsed, claims);
        assert!(!parsed.is_private);
        assert!(!parsed.is_expired());
    }

    #[test]
    fn test_private_token_roundtrip() {
        let engine = engine();
        let mut claims = sample_claims();

        let token = engine.create_private_access_token(&mut claims).unwrap();
        assert!(claims.is_private);

        let parsed = engine.parse_token(&token, SecretClass::Private).unwrap();
        assert_eq!(parsed, claims);
    }

    #[test]
    fn test_refresh_token_outlives_access_token() {
        let engine = engine();
        let mut access = sample_claims();
        let mut refresh = sample_claims();

        engine.create_access_token(&mut access).unwrap();
        engine.create_refresh_token(&mut refresh).unwrap();

        assert!(refresh.exp > access.exp);
    }

    #[test]
    fn test_wrong_secret_is_signature_error() {
        let engine = engine();
        let mut claims = sample_claims();
        let token = engine.create_access_token(&mut claims).unwrap();

        // Public token checked against the private secret
        let result = engine.parse_token(&token, SecretClass::Private);
        assert_eq!(result.unwrap_err(), TokenError::SignatureInvalid);

        let result = is_valid_token(&token, "some-other-secret");
        assert_eq!(result.unwrap_err(), TokenError::SignatureInvalid);
    }

    #[test]
    fn test_expired_token() {
        let engine = engine();
        let mut claims = sample_claims();
        claims.exp = (Utc::now() - chrono::Duration::seconds(3600)).timestamp();
        assert!(claims.is_expired());

        let token = engine.sign(SecretClass::Public, &claims).unwrap();

        assert_eq!(engine.parse_token(&token, SecretClass::Public).unwrap_err(), TokenError::Expired);
        assert_eq!(is_valid_token(&token, PUBLIC).unwrap_err(), TokenError::Expired);
    }

    #[test]
    fn test_malformed_tokens() {
        let engine = engine();
        for token in ["not.a.token", "invalid", "", "too.many.parts.in.this.token"] {
            assert_eq!(
                engine.parse_token(token, SecretClass::Public).unwrap_err(),
                TokenError::Invalid,
                "Expected Invalid for token: {token}"
            );
            assert_eq!(parse_unverified_token(token).unwrap_err(), TokenError::Invalid);
        }
    }

    #[test]
    fn test_empty_secrets() {
        let engine = TokenEngine::builder().private_secret_key(PRIVATE).build();
        let mut claims = sample_claims();

        assert_eq!(
            engine.create_access_token(&mut claims).unwrap_err(),
            TokenError::SecretKeyEmpty(SecretClass::Public)
        );
        assert_eq!(
            engine.create_refresh_token(&mut claims).unwrap_err(),
            TokenError::SecretKeyEmpty(SecretClass::Public)
        );
        assert!(engine.create_private_access_token(&mut claims).is_ok());

        let engine = TokenEngine::builder().public_secret_key(PUBLIC).build();
        assert_eq!(
            engine.create_private_access_token(&mut claims).unwrap_err(),
            TokenError::SecretKeyEmpty(SecretClass::Private)
        );
    }

    #[test]
    fn test_unverified_peek_reads_class_without_secret() {
        let engine = engine();
        let mut claims = sample_claims();
        let token = engine.create_private_access_token(&mut claims).unwrap();

        let peeked = parse_unverified_token(&token).unwrap();
        assert_eq!(SecretClass::of(&peeked), SecretClass::Private);
        assert_eq!(peeked.user_id, claims.user_id);
    }

    #[test]
    fn test_unverified_peek_ignores_expiry_and_signature() {
        let other = TokenEngine::builder().public_secret_key("unrelated").build();
        let mut claims = sample_claims();
        claims.exp = 1;
        let token = other.sign(SecretClass::Public, &claims).unwrap();

        let peeked = parse_unverified_token(&token).unwrap();
        assert_eq!(peeked.exp, 1);
        assert!(engine().parse_token(&token, SecretClass::Public).is_err());
    }

    #[test]
    fn test_issuer_and_subject_are_stamped() {
        let engine = TokenEngine::builder()
            .public_secret_key(PUBLIC)
            .issuer("accounts")
            .subject("session")
            .access_token_expiry(Duration::from_secs(60))
            .build();
        let mut claims = sample_claims();

        let token = engine.create_access_token(&mut claims).unwrap();
        let parsed = engine.parse_token(&token, SecretClass::Public).unwrap();

        assert_eq!(parsed.iss.as_deref(), Some("accounts"));
        assert_eq!(parsed.sub.as_deref(), Some("session"));
        assert!(parsed.iat.is_some());
        assert!(parsed.exp <= Utc::now().timestamp() + 60);
    }

    #[test]
    fn test_claim_names_on_the_wire() {
        let engine = engine();
        let mut claims = sample_claims();
        let token = engine.create_private_access_token(&mut claims).unwrap();

        let payload: serde_json::Value = verify(&token, PRIVATE).unwrap();
        for key in ["u_id", "sess_id", "perms", "roles", "is_p", "e_data", "applicationId", "exp"] {
            assert!(payload.get(key).is_some(), "missing claim {key}");
        }
        assert_eq!(payload["perms"]["5"], json!([10, 20]));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", engine());
        assert!(!debug.contains(PUBLIC));
        assert!(!debug.contains(PRIVATE));
    }
}
