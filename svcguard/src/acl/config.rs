//! Immutable ACL configuration and the identity lookup hooks it carries.

use async_trait::async_trait;
use bon::bon;
use std::{fmt, sync::Arc};

use super::{AclError, PermissionMatrix};
use crate::{
    middleware::captcha::DEFAULT_CAPTCHA_HEADER,
    session::DEFAULT_SESSION_COOKIE,
    token::{SecretClass, TokenEngine},
    types::UserId,
};

/// Default metadata key carrying an API key.
pub const DEFAULT_API_KEY_HEADER: &str = "key";

/// Looks up a user's current permission matrix from the authoritative source
/// (usually the user service). Used to re-validate the matrix carried in a token.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn user_permissions(&self, user_id: UserId) -> Result<PermissionMatrix, AclError>;
}

/// Identity resolved from an API key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiKeyIdentity {
    pub user_id: UserId,
    pub permissions: PermissionMatrix,
    pub roles: Vec<String>,
}

/// Resolves an API key presented instead of a bearer token.
#[async_trait]
pub trait ApiKeyResolver: Send + Sync {
    async fn resolve(&self, api_key: &str) -> Result<ApiKeyIdentity, AclError>;
}

/// Secrets, flags and hooks shared by every controller a service builds.
///
/// Built once and shared behind an `Arc`; never mutated afterwards. Construction
/// fails if neither secret is configured, or if ACL re-validation is requested
/// without a [`PermissionSource`].
#[derive(Clone)]
pub struct AclConfig {
    tokens: TokenEngine,
    validate_acl: bool,
    api_key_header: String,
    caller_headers: Vec<String>,
    permission_source: Option<Arc<dyn PermissionSource>>,
    api_key_resolver: Option<Arc<dyn ApiKeyResolver>>,
}

#[bon]
impl AclConfig {
    #[builder]
    pub fn new(
        tokens: TokenEngine,
        #[builder(default)] validate_acl: bool,
        #[builder(into, default = DEFAULT_API_KEY_HEADER.to_string())] api_key_header: String,
        // Caller-only metadata (captcha challenge, session entry), never forwarded downstream
        #[builder(default = vec![DEFAULT_CAPTCHA_HEADER.to_string(), DEFAULT_SESSION_COOKIE.to_string()])]
        caller_headers: Vec<String>,
        permission_source: Option<Arc<dyn PermissionSource>>,
        api_key_resolver: Option<Arc<dyn ApiKeyResolver>>,
    ) -> Result<Self, AclError> {
        if tokens.secret(SecretClass::Public).is_err() && tokens.secret(SecretClass::Private).is_err() {
            return Err(AclError::NoSecretsConfigured);
        }
        if validate_acl && permission_source.is_none() {
            return Err(AclError::PermissionSourceMissing);
        }
        let api_key_header = if api_key_header.is_empty() {
            DEFAULT_API_KEY_HEADER.to_string()
        } else {
            api_key_header.to_ascii_lowercase()
        };
        let caller_headers = caller_headers
            .into_iter()
            .filter(|name| !name.is_empty())
            .map(|name| name.to_ascii_lowercase())
            .collect();

        Ok(Self {
            tokens,
            validate_acl,
            api_key_header,
            caller_headers,
            permission_source,
            api_key_resolver,
        })
    }
}

impl AclConfig {
    pub fn tokens(&self) -> &TokenEngine {
        &self.tokens
    }

    pub fn validate_acl(&self) -> bool {
        self.validate_acl
    }

    pub fn api_key_header(&self) -> &str {
        &self.api_key_header
    }

    pub fn caller_headers(&self) -> &[String] {
        &self.caller_headers
    }

    pub fn permission_source(&self) -> Option<&Arc<dyn PermissionSource>> {
        self.permission_source.as_ref()
    }

    pub fn api_key_resolver(&self) -> Option<&Arc<dyn ApiKeyResolver>> {
        self.api_key_resolver.as_ref()
    }

    pub fn has_private_secret(&self) -> bool {
        self.tokens.secret(SecretClass::Private).is_ok()
    }
}

impl fmt::Debug for AclConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AclConfig")
            .field("tokens", &self.tokens)
            .field("validate_acl", &self.validate_acl)
            .field("api_key_header", &self.api_key_header)
            .field("caller_headers", &self.caller_headers)
            .field("permission_source", &self.permission_source.is_some())
            .field("api_key_resolver", &self.api_key_resolver.is_some())
            .finish()
    }
}
