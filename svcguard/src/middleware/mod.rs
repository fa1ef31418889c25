//! Per-call authorization for axum routers.
//!
//! Every call walks the same steps in a fixed order:
//!
//! 1. **Captcha**: when the method asks for it and a verifier is configured, the
//!    challenge in `x-captcha-key` is checked before anything else.
//! 2. **Public methods**: a method with no required permission (or the `0`
//!    sentinel) that is not marked optional runs without identity resolution.
//! 3. **Optional auth**: without an `authorization` header the call runs
//!    unauthenticated; with one, the caller is resolved exactly as below but
//!    the permission list is not enforced.
//! 4. **Mandatory auth**: the bearer token (or API key) is verified and the
//!    caller must hold at least one of the method's permissions.
//!
//! The outcome is bound to the request as a [`crate::acl::CallContext`].
//!
//! ```ignore
//! let authorizer = Arc::new(Authorizer::builder().service_code(5).acl(acl).permissions(resolver).build());
//! let app = Router::new()
//!     .route("/blog.Posts/Create", post(create_post))
//!     .layer(axum::middleware::from_fn_with_state(authorizer, authorization_middleware));
//! ```

mod authorizer;
pub mod captcha;
mod extract;
mod session;

pub use authorizer::{Authorizer, authorization_middleware};
pub use extract::Acl;
pub use session::{SessionGate, session_middleware};

use axum::http::{HeaderMap, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{
    errors::{Error, Result},
    types::{NO_PERMISSION, PermissionCode},
};

/// What a method demands of its callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MethodRequirement {
    /// Caller needs any one of these in the current service
    pub permissions: Vec<PermissionCode>,
    /// Run unauthenticated when no credential is presented
    pub optional: bool,
    /// Re-check the token's matrix against the permission source
    pub validate: bool,
    /// Require a solved captcha challenge
    pub captcha: bool,
}

impl MethodRequirement {
    /// True when the method needs no explicit permission: an empty list, or one led by the `0` sentinel.
    pub fn is_public(&self) -> bool {
        self.permissions.first().is_none_or(|&code| code == NO_PERMISSION)
    }
}

/// Maps a fully-qualified method name to its [`MethodRequirement`].
pub trait PermissionResolver: Send + Sync {
    fn requirement(&self, method: &str) -> Result<MethodRequirement>;
}

/// Requirements from a fixed table, usually the `methods` section of the config.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    methods: HashMap<String, MethodRequirement>,
    default: Option<MethodRequirement>,
}

impl StaticPermissions {
    pub fn new(methods: HashMap<String, MethodRequirement>, default: Option<MethodRequirement>) -> Self {
        Self { methods, default }
    }

    pub fn with_method(mut self, method: impl Into<String>, requirement: MethodRequirement) -> Self {
        self.methods.insert(method.into(), requirement);
        self
    }
}

impl PermissionResolver for StaticPermissions {
    fn requirement(&self, method: &str) -> Result<MethodRequirement> {
        self.methods
            .get(method)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| Error::Internal {
                operation: format!("resolve permissions for unknown method {method}"),
            })
    }
}

/// `/pkg.Service/Method` becomes `pkg.Service.Method`.
pub fn full_method_name(path: &str) -> String {
    path.strip_prefix('/').unwrap_or(path).replace('/', ".")
}

pub(crate) fn is_grpc(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|content_type| content_type.starts_with("application/grpc"))
}
