use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::request::Parts,
};
use std::ops::{Deref, DerefMut};

use crate::{
    acl::{AclContext, CallContext},
    errors::{Error, Result},
};

/// The caller bound by [`super::authorization_middleware`].
///
/// Extracting `Acl` fails on calls that ran unauthenticated; use `Option<Acl>`
/// in handlers of optional-auth methods. The handler receives its own copy, so
/// minting a delegation token through it needs no locking.
#[derive(Debug, Clone)]
pub struct Acl(pub AclContext);

impl Deref for Acl {
    type Target = AclContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Acl {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

fn call_context(parts: &Parts) -> Result<&CallContext> {
    CallContext::from_extensions(&parts.extensions).map_err(|_| Error::Internal {
        operation: "find call context (is the authorization middleware installed?)".to_string(),
    })
}

impl<S: Send + Sync> FromRequestParts<S> for Acl {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        let acl = call_context(parts)?.acl()?;
        Ok(Acl(acl.clone()))
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for Acl {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Option<Self>> {
        Ok(call_context(parts)?.acl().ok().cloned().map(Acl))
    }
}
