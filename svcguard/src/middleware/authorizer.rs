use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use bon::bon;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

use super::{
    MethodRequirement, PermissionResolver,
    captcha::{CaptchaVerifier, DEFAULT_CAPTCHA_HEADER, verify_challenge},
    full_method_name, is_grpc,
};
use crate::{
    acl::{AclConfig, AclContext, AclError, CallContext},
    errors::{Error, Result},
    types::{ServiceCode, abbrev_uuid},
};

/// Runs the per-call decision pipeline for one service.
pub struct Authorizer {
    service_code: ServiceCode,
    service_name: String,
    acl: Arc<AclConfig>,
    permissions: Arc<dyn PermissionResolver>,
    captcha: Option<Arc<dyn CaptchaVerifier>>,
    captcha_header: String,
}

#[bon]
impl Authorizer {
    #[builder]
    pub fn new(
        service_code: ServiceCode,
        #[builder(into, default)] service_name: String,
        acl: Arc<AclConfig>,
        permissions: Arc<dyn PermissionResolver>,
        captcha: Option<Arc<dyn CaptchaVerifier>>,
        #[builder(into, default = DEFAULT_CAPTCHA_HEADER.to_string())] captcha_header: String,
    ) -> Self {
        Self {
            service_code,
            service_name,
            acl,
            permissions,
            captcha,
            captcha_header,
        }
    }
}

impl Authorizer {
    /// Decide whether `method` may run for the caller described by `headers`.
    ///
    /// Returns the context to bind to the call; on optional-auth methods called
    /// without credentials that context carries no controller.
    #[instrument(skip(self, headers), fields(service = %self.service_name))]
    pub async fn authorize(&self, method: &str, headers: &HeaderMap) -> Result<CallContext> {
        let requirement = self.permissions.requirement(method)?;

        if requirement.captcha
            && let Some(verifier) = &self.captcha
        {
            verify_challenge(verifier.as_ref(), headers, &self.captcha_header).await?;
            trace!("Captcha challenge passed");
        }

        if requirement.is_public() && !requirement.optional {
            trace!("Public method, skipping identity resolution");
            return Ok(CallContext::unauthenticated(method));
        }

        if requirement.optional {
            return match self.resolve(headers, &requirement).await {
                Ok(acl) => Ok(CallContext::authenticated(method, acl)),
                Err(AclError::NoHeaderInRequest) => {
                    trace!("No credentials on optional method, continuing unauthenticated");
                    Ok(CallContext::unauthenticated(method))
                }
                Err(e) => Err(e.into()),
            };
        }

        let acl = self.resolve(headers, &requirement).await?;
        if !acl.controller().has_any_permissions_access(&requirement.permissions) {
            debug!(
                user_id = %abbrev_uuid(&acl.controller().user_id()),
                required = ?requirement.permissions,
                "Caller lacks every required permission"
            );
            return Err(Error::permission_denied("you don't have permission to access method"));
        }
        Ok(CallContext::authenticated(method, acl))
    }

    async fn resolve(&self, headers: &HeaderMap, requirement: &MethodRequirement) -> std::result::Result<AclContext, AclError> {
        let mut acl = AclContext::from_headers(self.service_code, headers, self.acl.clone()).await?;

        if requirement.validate && self.acl.validate_acl() && !acl.controller().is_validated() {
            acl.controller_mut().revalidate().await?;
        }
        Ok(acl)
    }

    pub fn service_code(&self) -> ServiceCode {
        self.service_code
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn acl_config(&self) -> &Arc<AclConfig> {
        &self.acl
    }
}

/// axum middleware running [`Authorizer::authorize`] for every request.
///
/// Errors are rendered as trailers-only gRPC responses for gRPC requests and as
/// plain HTTP responses otherwise.
pub async fn authorization_middleware(State(authorizer): State<Arc<Authorizer>>, mut request: Request, next: Next) -> Response {
    let method = full_method_name(request.uri().path());

    let outcome = authorizer.authorize(&method, request.headers()).await;
    match outcome {
        Ok(context) => {
            context.bind(request.extensions_mut());
            next.run(request).await
        }
        Err(e) if is_grpc(request.headers()) => e.into_grpc_response(),
        Err(e) => e.into_response(),
    }
}
