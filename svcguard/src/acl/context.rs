//! Moving identity material between call metadata and controllers.
//!
//! gRPC metadata travels as HTTP/2 headers, so inbound and outbound metadata are
//! both plain [`HeaderMap`]s here. A resolved controller is bound to the call as
//! a typed [`CallContext`] in the request extensions, never under a string key.

use axum::http::{
    Extensions, HeaderMap, HeaderName, HeaderValue,
    header::{AUTHORIZATION, CONNECTION, CONTENT_LENGTH, COOKIE, HOST, TE, TRANSFER_ENCODING, UPGRADE},
};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, instrument};

use super::{AclConfig, AclController, AclError, TokenAcl};
use crate::types::{ServiceCode, ServiceId};

/// Metadata key listing the service identifiers a forwarded call was addressed to.
pub const SERVICE_CONTEXT_HEADER: &str = "s_id";

const BEARER_PREFIX: &str = "Bearer ";

/// Connection-level headers that describe the inbound hop, not the outbound call.
const HOP_HEADERS: [HeaderName; 6] = [CONNECTION, CONTENT_LENGTH, HOST, TE, TRANSFER_ENCODING, UPGRADE];

fn single_header<'a>(headers: &'a HeaderMap, name: &str, cardinality_error: AclError) -> Result<&'a HeaderValue, AclError> {
    let mut values = headers.get_all(name).iter();
    let first = values.next().ok_or(AclError::NoHeaderInRequest)?;
    if values.next().is_some() {
        return Err(cardinality_error);
    }
    Ok(first)
}

/// The token from a single `authorization: Bearer <token>` entry.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AclError> {
    let value = single_header(headers, AUTHORIZATION.as_str(), AclError::JwtTokenNotFoundInHeader)?;
    let value = value.to_str().map_err(|_| AclError::JwtTokenInvalid)?;
    if value.is_empty() {
        return Err(AclError::JwtTokenNotFoundInHeader);
    }
    value.strip_prefix(BEARER_PREFIX).ok_or(AclError::MissingBearerPrefix)
}

/// The API key from a single entry named `header_name` (default `key`).
pub fn api_key<'a>(headers: &'a HeaderMap, header_name: &str) -> Result<&'a str, AclError> {
    let header_name = if header_name.is_empty() { super::DEFAULT_API_KEY_HEADER } else { header_name };
    let value = single_header(headers, header_name, AclError::ApiKeyNotFoundInHeader)?;
    match value.to_str() {
        Ok(key) if !key.is_empty() => Ok(key),
        _ => Err(AclError::ApiKeyNotFoundInHeader),
    }
}

/// A controller bound to a call, in one of the two shapes it can be built in.
#[derive(Debug, Clone)]
pub enum AclContext {
    /// Built from explicit identity fields or an API key
    Controller(AclController),
    /// Built from a verified bearer token
    Token(TokenAcl),
}

impl AclContext {
    /// Resolve the caller from inbound metadata.
    ///
    /// The bearer token wins when an `authorization` entry exists; the API-key
    /// entry is only consulted when that header is absent altogether and an
    /// [`super::ApiKeyResolver`] is configured.
    #[instrument(skip(headers, config))]
    pub async fn from_headers(service_code: ServiceCode, headers: &HeaderMap, config: Arc<AclConfig>) -> Result<Self, AclError> {
        match bearer_token(headers) {
            Ok(token) => Ok(AclContext::Token(TokenAcl::from_token(service_code, token, config)?)),
            Err(AclError::NoHeaderInRequest) => {
                let Some(resolver) = config.api_key_resolver() else {
                    return Err(AclError::NoHeaderInRequest);
                };
                let key = api_key(headers, config.api_key_header())?;
                let identity = resolver.resolve(key).await?;
                debug!("Resolved caller from API key");
                Ok(AclContext::Controller(AclController::from_api_key(service_code, identity, config)?))
            }
            Err(e) => Err(e),
        }
    }

    pub fn controller(&self) -> &AclController {
        match self {
            AclContext::Controller(controller) => controller,
            AclContext::Token(token_acl) => token_acl.controller(),
        }
    }

    pub fn controller_mut(&mut self) -> &mut AclController {
        match self {
            AclContext::Controller(controller) => controller,
            AclContext::Token(token_acl) => token_acl.controller_mut(),
        }
    }

    /// The token-backed shape, failing with [`AclError::NotTokenBacked`] otherwise.
    pub fn token_acl(&self) -> Result<&TokenAcl, AclError> {
        match self {
            AclContext::Token(token_acl) => Ok(token_acl),
            AclContext::Controller(_) => Err(AclError::NotTokenBacked),
        }
    }
}

impl From<AclController> for AclContext {
    fn from(controller: AclController) -> Self {
        AclContext::Controller(controller)
    }
}

impl From<TokenAcl> for AclContext {
    fn from(token_acl: TokenAcl) -> Self {
        AclContext::Token(token_acl)
    }
}

/// What the authorization step hands to the handler of a call.
#[derive(Debug, Clone)]
pub struct CallContext {
    method: String,
    acl: Option<AclContext>,
}

impl CallContext {
    pub fn unauthenticated(method: impl Into<String>) -> Self {
        Self { method: method.into(), acl: None }
    }

    pub fn authenticated(method: impl Into<String>, acl: impl Into<AclContext>) -> Self {
        Self {
            method: method.into(),
            acl: Some(acl.into()),
        }
    }

    /// Fully-qualified name of the invoked method
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_authenticated(&self) -> bool {
        self.acl.is_some()
    }

    pub fn acl(&self) -> Result<&AclContext, AclError> {
        self.acl.as_ref().ok_or(AclError::NotFoundAclObject)
    }

    pub fn acl_mut(&mut self) -> Result<&mut AclContext, AclError> {
        self.acl.as_mut().ok_or(AclError::NotFoundAclObject)
    }

    pub fn token_acl(&self) -> Result<&TokenAcl, AclError> {
        self.acl()?.token_acl()
    }

    pub fn into_acl(self) -> Option<AclContext> {
        self.acl
    }

    /// Attach this context to a request's extensions.
    pub fn bind(self, extensions: &mut Extensions) {
        extensions.insert(self);
    }

    pub fn from_extensions(extensions: &Extensions) -> Result<&CallContext, AclError> {
        extensions.get::<CallContext>().ok_or(AclError::NotFoundAclObject)
    }
}

impl AclController {
    /// Metadata for a call this service makes to `target` on the caller's behalf.
    ///
    /// Starts from the inbound metadata minus hop headers and the caller's own
    /// credentials (cookies, API key, the configured caller-only entries), sets
    /// `authorization` to the (memoized) delegation token and appends `target` in
    /// simple hex form to the [`SERVICE_CONTEXT_HEADER`] entry.
    pub fn outgoing_headers(
        &mut self,
        inbound: &HeaderMap,
        target: ServiceId,
        extra_data: HashMap<String, serde_json::Value>,
    ) -> Result<HeaderMap, AclError> {
        let token = self.private_token(extra_data)?;

        let mut headers = inbound.clone();
        for name in HOP_HEADERS {
            headers.remove(name);
        }
        headers.remove(COOKIE);
        headers.remove(self.config().api_key_header());
        for name in self.config().caller_headers() {
            headers.remove(name.as_str());
        }

        let bearer = HeaderValue::from_str(&format!("{BEARER_PREFIX}{token}")).map_err(|_| AclError::JwtTokenInvalid)?;
        headers.insert(AUTHORIZATION, bearer);

        let service = HeaderValue::from_str(&target.simple().to_string()).map_err(|_| AclError::JwtTokenInvalid)?;
        headers.append(SERVICE_CONTEXT_HEADER, service);
        Ok(headers)
    }
}
