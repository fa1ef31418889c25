use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{instrument, trace};

use super::{PermissionResolver, full_method_name, is_grpc};
use crate::{errors::Result, session::SessionGuard};

/// Rejects calls to non-public methods unless they carry a fresh session cookie.
pub struct SessionGate {
    guard: SessionGuard,
    permissions: Arc<dyn PermissionResolver>,
}

impl SessionGate {
    pub fn new(guard: SessionGuard, permissions: Arc<dyn PermissionResolver>) -> Self {
        Self { guard, permissions }
    }

    #[instrument(skip(self, headers))]
    pub fn check(&self, method: &str, headers: &HeaderMap) -> Result<()> {
        if self.permissions.requirement(method)?.is_public() {
            return Ok(());
        }

        let value = self.guard.session_value(headers)?;
        let expires_at = self.guard.check(value)?;
        trace!(%expires_at, "Session is fresh");
        Ok(())
    }
}

/// axum middleware running [`SessionGate::check`] for every request.
pub async fn session_middleware(State(gate): State<Arc<SessionGate>>, request: Request, next: Next) -> Response {
    let method = full_method_name(request.uri().path());

    match gate.check(&method, request.headers()) {
        Ok(()) => next.run(request).await,
        Err(e) if is_grpc(request.headers()) => e.into_grpc_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::Code,
        middleware::{MethodRequirement, StaticPermissions},
    };
    use axum::http::{HeaderValue, header::COOKIE};
    use base64::{Engine as _, engine::general_purpose};
    use chrono::{Duration, Utc};

    fn gate() -> (SessionGate, SessionGuard) {
        let guard = SessionGuard::new(&general_purpose::STANDARD.encode([3u8; 32]), "session_token").unwrap();
        let permissions = StaticPermissions::default()
            .with_method("svc.Open", MethodRequirement::default())
            .with_method(
                "svc.Closed",
                MethodRequirement {
                    permissions: vec![4],
                    ..Default::default()
                },
            );
        (SessionGate::new(guard.clone(), Arc::new(permissions)), guard)
    }

    #[test]
    fn test_public_methods_skip_session() {
        let (gate, _) = gate();
        gate.check("svc.Open", &HeaderMap::new()).unwrap();
    }

    #[test]
    fn test_missing_and_expired_sessions() {
        let (gate, guard) = gate();

        let err = gate.check("svc.Closed", &HeaderMap::new()).unwrap_err();
        assert_eq!(err.code(), Code::Unauthenticated);
        assert_eq!(err.user_message(), "session_token cookie not found in request");

        let mut headers = HeaderMap::new();
        let stale = guard.seal(Utc::now() - Duration::minutes(5)).unwrap();
        headers.insert(COOKIE, HeaderValue::from_str(&format!("session_token={stale}")).unwrap());
        assert_eq!(gate.check("svc.Closed", &headers).unwrap_err().user_message(), "token has been expired");

        let fresh = guard.seal(Utc::now() + Duration::minutes(5)).unwrap();
        headers.insert(COOKIE, HeaderValue::from_str(&format!("session_token={fresh}")).unwrap());
        gate.check("svc.Closed", &headers).unwrap();
    }
}
