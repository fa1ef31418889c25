//! Service configuration.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `config.yaml` and can be changed with the `-f` flag or the `SVCGUARD_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `SVCGUARD_` override YAML values
//!
//! Nested values use double underscores, e.g. `SVCGUARD_SECRETS__PRIVATE_SECRET_KEY=...` sets
//! `secrets.private_secret_key`.
//!
//! ## Example
//!
//! ```yaml
//! service:
//!   code: 5
//!   name: blog
//! secrets:
//!   public_secret_key: change-me
//!   private_secret_key: change-me-too
//! tokens:
//!   access_token_expiry: 1h
//! captcha:
//!   secret_key: recaptcha-secret
//! methods:
//!   blog.v1.Posts.Create:
//!     permissions: [10]
//!     captcha: true
//!   blog.v1.Posts.List:
//!     permissions: [0]
//! ```

use clap::{Parser, Subcommand};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use uuid::Uuid;

use crate::{
    acl::{AclConfig, AclError, ApiKeyResolver, DEFAULT_API_KEY_HEADER, PermissionSource},
    errors::Error,
    middleware::{
        Authorizer, MethodRequirement, PermissionResolver, StaticPermissions,
        captcha::{CaptchaError, CaptchaVerifier, DEFAULT_CAPTCHA_HEADER, DEFAULT_VERIFY_TIMEOUT, DEFAULT_VERIFY_URL, RecaptchaVerifier},
    },
    session::{DEFAULT_SESSION_COOKIE, SessionError, SessionGuard},
    token::{DEFAULT_ACCESS_TOKEN_EXPIRY, DEFAULT_REFRESH_TOKEN_EXPIRY, TokenEngine},
    types::ServiceCode,
};

/// CLI args: config file location plus operator subcommands
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "SVCGUARD_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit.
    #[arg(long)]
    pub validate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Mint a token with the configured secrets
    Issue {
        /// User the token is issued for
        #[arg(long)]
        user_id: Uuid,
        /// Session identifier (random when omitted)
        #[arg(long)]
        session_id: Option<Uuid>,
        /// Grants as SERVICE:CODE[,CODE...], repeatable
        #[arg(long = "grant", value_name = "SERVICE:CODES")]
        grants: Vec<String>,
        #[arg(long)]
        role: Vec<String>,
        #[arg(long, value_enum, default_value = "access")]
        kind: TokenKind,
    },
    /// Verify a token and print its claims
    Inspect {
        token: String,
    },
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
    Private,
}

/// Root configuration, loaded from YAML and environment variables.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Identity of this service
    pub service: ServiceConfig,
    /// JWT signing secrets
    pub secrets: SecretsConfig,
    pub tokens: TokensConfig,
    pub acl: AccessControlConfig,
    pub captcha: CaptchaConfig,
    pub session: SessionConfig,
    /// Requirements keyed by fully-qualified method name (`pkg.Service.Method`)
    pub methods: HashMap<String, MethodRequirement>,
    /// Requirement for methods missing from `methods`; unknown methods fail when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_method: Option<MethodRequirement>,
    /// Emit logs as JSON lines instead of human-readable text
    pub json_logs: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Non-zero code every permission of this service is scoped to
    pub code: ServiceCode,
    /// Recorded on authorization spans
    pub name: String,
}

#[derive(Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsConfig {
    /// Verifies tokens issued to end users
    pub public_secret_key: String,
    /// Verifies and signs service-to-service delegation tokens
    pub private_secret_key: String,
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConfig")
            .field("public_secret_key", &(!self.public_secret_key.is_empty()))
            .field("private_secret_key", &(!self.private_secret_key.is_empty()))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokensConfig {
    #[serde(with = "humantime_serde")]
    pub access_token_expiry: Duration,
    #[serde(with = "humantime_serde")]
    pub refresh_token_expiry: Duration,
    /// Stamped as `iss` (together with `iat`) when set
    pub issuer: Option<String>,
    pub subject: Option<String>,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            access_token_expiry: DEFAULT_ACCESS_TOKEN_EXPIRY,
            refresh_token_expiry: DEFAULT_REFRESH_TOKEN_EXPIRY,
            issuer: None,
            subject: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessControlConfig {
    /// Allow methods flagged `validate` to re-check token permissions against the permission source
    pub validate_acl: bool,
    /// Metadata key carrying an API key
    pub api_key_header: String,
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            validate_acl: false,
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptchaConfig {
    /// Captcha checks are skipped entirely while unset
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub verify_url: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Metadata key carrying the client's challenge response
    pub header: String,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            verify_url: DEFAULT_VERIFY_URL.to_string(),
            timeout: DEFAULT_VERIFY_TIMEOUT,
            header: DEFAULT_CAPTCHA_HEADER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Base64 of a 32-byte AES key; the session guard is disabled while unset
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            cookie_name: DEFAULT_SESSION_COOKIE.to_string(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            // SVCGUARD_CONFIG names the file itself
            .merge(Env::prefixed("SVCGUARD_").ignore(&["config"]).split("__"))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.service.code == 0 {
            return Err(Error::Misconfigured {
                message: "Config validation: service.code must be a non-zero service code".to_string(),
            });
        }

        if self.secrets.public_secret_key.is_empty() && self.secrets.private_secret_key.is_empty() {
            return Err(Error::Misconfigured {
                message: "Config validation: at least one of secrets.public_secret_key and secrets.private_secret_key must be set. \
                     Please set SVCGUARD_SECRETS__PUBLIC_SECRET_KEY or add it to the config file."
                    .to_string(),
            });
        }

        if let Some(key) = &self.session.secret_key {
            SessionGuard::new(key, &self.session.cookie_name).map_err(|e| Error::Misconfigured {
                message: format!("Config validation: session.secret_key is invalid: {e}"),
            })?;
        }

        if self.captcha.secret_key.is_some() && self.captcha.header.is_empty() {
            return Err(Error::Misconfigured {
                message: "Config validation: captcha.header must name the metadata entry carrying the challenge".to_string(),
            });
        }

        if self.captcha.secret_key.is_some() && self.captcha.timeout.is_zero() {
            return Err(Error::Misconfigured {
                message: "Config validation: captcha.timeout must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn token_engine(&self) -> TokenEngine {
        TokenEngine::builder()
            .public_secret_key(self.secrets.public_secret_key.clone())
            .private_secret_key(self.secrets.private_secret_key.clone())
            .maybe_issuer(self.tokens.issuer.clone())
            .maybe_subject(self.tokens.subject.clone())
            .access_token_expiry(self.tokens.access_token_expiry)
            .refresh_token_expiry(self.tokens.refresh_token_expiry)
            .build()
    }

    /// Runtime ACL settings with whichever lookup hooks the service provides.
    pub fn acl_config(
        &self,
        permission_source: Option<Arc<dyn PermissionSource>>,
        api_key_resolver: Option<Arc<dyn ApiKeyResolver>>,
    ) -> Result<AclConfig, AclError> {
        AclConfig::builder()
            .tokens(self.token_engine())
            .validate_acl(self.acl.validate_acl)
            .api_key_header(self.acl.api_key_header.clone())
            .caller_headers(vec![self.captcha.header.clone(), self.session.cookie_name.clone()])
            .maybe_permission_source(permission_source)
            .maybe_api_key_resolver(api_key_resolver)
            .build()
    }

    /// The full authorization pipeline for this service: ACL settings, the `methods`
    /// table and, when a captcha secret is set, a verifier reading `captcha.header`.
    pub fn authorizer(
        &self,
        permission_source: Option<Arc<dyn PermissionSource>>,
        api_key_resolver: Option<Arc<dyn ApiKeyResolver>>,
    ) -> Result<Authorizer, Error> {
        let acl = self.acl_config(permission_source, api_key_resolver)?;
        let captcha = self.captcha_verifier().map_err(|e| Error::Misconfigured {
            message: format!("captcha verifier could not be built: {e}"),
        })?;

        Ok(Authorizer::builder()
            .service_code(self.service.code)
            .service_name(self.service.name.clone())
            .acl(Arc::new(acl))
            .permissions(Arc::new(self.permissions()) as Arc<dyn PermissionResolver>)
            .maybe_captcha(captcha.map(|verifier| Arc::new(verifier) as Arc<dyn CaptchaVerifier>))
            .captcha_header(self.captcha.header.clone())
            .build())
    }

    pub fn permissions(&self) -> StaticPermissions {
        StaticPermissions::new(self.methods.clone(), self.default_method.clone())
    }

    /// `None` while no captcha secret is configured.
    pub fn captcha_verifier(&self) -> Result<Option<RecaptchaVerifier>, CaptchaError> {
        self.captcha
            .secret_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .map(|key| RecaptchaVerifier::new(key, self.captcha.verify_url.clone(), self.captcha.timeout))
            .transpose()
    }

    /// `None` while no session secret is configured.
    pub fn session_guard(&self) -> Result<Option<SessionGuard>, SessionError> {
        self.session
            .secret_key
            .as_deref()
            .map(|key| SessionGuard::new(key, self.session.cookie_name.clone()))
            .transpose()
    }
}
