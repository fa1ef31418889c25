use std::{collections::HashMap, sync::Arc};
use tracing::{debug, instrument};

use super::{AclConfig, AclError, ApiKeyIdentity, PermissionMatrix};
use crate::{
    token::Claims,
    types::{PermissionCode, ServiceCode, SessionId, UserId, abbrev_uuid},
};

/// Capability queries and delegation tokens for one caller in one call.
///
/// A controller is built fresh for every inbound call and dropped with it.
/// The delegation token is memoized in a plain field, so minting needs
/// `&mut self`: keep one controller per call and do not share it between
/// concurrently running tasks. Clones carry their own copy of the cache.
#[derive(Debug, Clone)]
pub struct AclController {
    service_code: ServiceCode,
    user_id: UserId,
    session_id: SessionId,
    permissions: PermissionMatrix,
    roles: Vec<String>,
    validated: bool,
    private_token: Option<String>,
    config: Arc<AclConfig>,
}

impl AclController {
    /// Fails with [`AclError::ServiceCodeNotSet`] when `service_code` is zero.
    pub fn new(
        service_code: ServiceCode,
        user_id: UserId,
        session_id: SessionId,
        permissions: PermissionMatrix,
        roles: Vec<String>,
        config: Arc<AclConfig>,
    ) -> Result<Self, AclError> {
        if service_code == 0 {
            return Err(AclError::ServiceCodeNotSet);
        }
        Ok(Self {
            service_code,
            user_id,
            session_id,
            permissions,
            roles,
            validated: false,
            private_token: None,
            config,
        })
    }

    /// Controller for a caller identified by API key. API-key callers have no session.
    pub fn from_api_key(service_code: ServiceCode, identity: ApiKeyIdentity, config: Arc<AclConfig>) -> Result<Self, AclError> {
        Self::new(
            service_code,
            identity.user_id,
            SessionId::nil(),
            identity.permissions,
            identity.roles,
            config,
        )
    }

    pub(crate) fn mark_validated(&mut self, validated: bool) {
        self.validated = validated;
    }

    /// Whether the caller holds `permission` in the current service.
    pub fn has_access(&self, permission: PermissionCode) -> bool {
        self.has_access_in_other_service(self.service_code, permission)
    }

    /// Whether the caller holds `permission` in an arbitrary `service`.
    pub fn has_access_in_other_service(&self, service: ServiceCode, permission: PermissionCode) -> bool {
        self.permissions.contains(service, permission)
    }

    pub fn not_has_access(&self, permission: PermissionCode) -> bool {
        !self.has_access(permission)
    }

    /// Logical OR over [`AclController::has_access`]. False for an empty list.
    pub fn has_any_permissions_access(&self, permissions: &[PermissionCode]) -> bool {
        permissions.iter().any(|&code| self.has_access(code))
    }

    /// Logical AND over [`AclController::has_access`]. True for an empty list.
    pub fn has_all_permissions_access(&self, permissions: &[PermissionCode]) -> bool {
        permissions.iter().all(|&code| self.has_access(code))
    }

    /// Delegation token for calls made on the caller's behalf.
    ///
    /// The first successful call mints a private token carrying the full matrix,
    /// the identity and `extra_data`; every later call returns that same token and
    /// ignores its `extra_data`. Fails whenever the private secret is unset.
    #[instrument(skip(self, extra_data), fields(user_id = %abbrev_uuid(&self.user_id)))]
    pub fn private_token(&mut self, extra_data: HashMap<String, serde_json::Value>) -> Result<String, AclError> {
        if !self.config.has_private_secret() {
            return Err(AclError::PrivateSecretKeyEmpty);
        }
        if let Some(token) = &self.private_token {
            return Ok(token.clone());
        }

        let mut claims = Claims {
            is_private: true,
            validated: self.validated,
            extra_data,
            ..Claims::new(self.user_id, self.session_id, self.permissions.clone(), self.roles.clone())
        };
        let token = self.config.tokens().create_private_access_token(&mut claims)?;
        debug!("Minted delegation token");

        self.private_token = Some(token.clone());
        Ok(token)
    }

    /// Re-check the carried matrix against the configured [`super::PermissionSource`].
    ///
    /// Every service present in both matrices must grant the same set of codes.
    /// On success the controller is marked validated.
    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&self.user_id)))]
    pub async fn revalidate(&mut self) -> Result<(), AclError> {
        let source = self.config.permission_source().ok_or(AclError::PermissionSourceMissing)?;
        let current = source.user_permissions(self.user_id).await?;

        if !self.permissions.agrees_with(&current) {
            debug!("Token permissions disagree with permission source");
            return Err(AclError::AclDataInvalid);
        }
        self.validated = true;
        Ok(())
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

    pub fn service_code(&self) -> ServiceCode {
        self.service_code
    }

    pub fn permissions(&self) -> &PermissionMatrix {
        &self.permissions
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn config(&self) -> &AclConfig {
        &self.config
    }
}
