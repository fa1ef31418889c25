use std::{collections::HashMap, sync::Arc};
use tracing::{instrument, trace};

use super::{AclConfig, AclController, AclError};
use crate::{
    token::{Claims, SecretClass, parse_unverified_token},
    types::ServiceCode,
};

/// Controller built from a verified bearer token, keeping the token and its claims.
#[derive(Debug, Clone)]
pub struct TokenAcl {
    controller: AclController,
    claims: Claims,
    token: String,
}

impl TokenAcl {
    /// Verify `token` and build a controller for it.
    ///
    /// The unverified claims only decide which secret to use; everything the
    /// controller is built from comes out of the verified parse.
    #[instrument(skip(token, config))]
    pub fn from_token(service_code: ServiceCode, token: &str, config: Arc<AclConfig>) -> Result<Self, AclError> {
        let class = SecretClass::of(&parse_unverified_token(token).map_err(|_| AclError::JwtTokenInvalid)?);
        trace!(%class, "Selected verification secret");

        config.tokens().secret(class).map_err(|_| AclError::SecretKeyEmpty)?;
        let claims = config.tokens().parse_token(token, class)?;

        let mut controller = AclController::new(
            service_code,
            claims.user_id,
            claims.session_id,
            claims.permissions.clone(),
            claims.roles.clone(),
            config,
        )?;
        // `valid` is only trusted on delegation tokens
        controller.mark_validated(claims.is_private && claims.validated);

        Ok(Self {
            controller,
            claims,
            token: token.to_string(),
        })
    }

    pub fn controller(&self) -> &AclController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut AclController {
        &mut self.controller
    }

    pub fn into_controller(self) -> AclController {
        self.controller
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn extra_data(&self) -> &HashMap<String, serde_json::Value> {
        &self.claims.extra_data
    }

    pub fn application_id(&self) -> &str {
        &self.claims.application_id
    }

    /// The bearer token exactly as presented
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_private(&self) -> bool {
        self.claims.is_private
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        acl::PermissionMatrix,
        token::{TokenEngine, TokenError},
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn engine(public: &str, private: &str) -> TokenEngine {
        TokenEngine::builder()
            .public_secret_key(public)
            .private_secret_key(private)
            .build()
    }

    fn config(public: &str, private: &str) -> Arc<AclConfig> {
        Arc::new(AclConfig::builder().tokens(engine(public, private)).build().unwrap())
    }

    fn claims() -> Claims {
        let mut claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), PermissionMatrix::from([(5, vec![10])]), vec!["reader".to_string()]);
        claims.application_id = "console".to_string();
        claims
    }

    #[test]
    fn test_public_token() {
        let mut claims = claims();
        let token = engine("public", "private").create_access_token(&mut claims).unwrap();

        let acl = TokenAcl::from_token(5, &token, config("public", "private")).unwrap();
        assert_eq!(acl.controller().user_id(), claims.user_id);
        assert_eq!(acl.controller().roles(), &["reader".to_string()]);
        assert!(acl.controller().has_access(10));
        assert_eq!(acl.application_id(), "console");
        assert_eq!(acl.token(), token);
        assert!(!acl.is_private());
    }

    #[test]
    fn test_private_token_uses_private_secret() {
        let mut claims = claims();
        let token = engine("public", "private").create_private_access_token(&mut claims).unwrap();

        let acl = TokenAcl::from_token(5, &token, config("public", "private")).unwrap();
        assert!(acl.is_private());

        // The receiving service has no private secret configured
        let result = TokenAcl::from_token(5, &token, config("public", ""));
        assert_eq!(result.unwrap_err(), AclError::SecretKeyEmpty);
    }

    #[test]
    fn test_forged_private_flag_fails_signature() {
        // Signed with the public secret while claiming to be private
        let mut claims = claims();
        claims.is_private = true;
        claims.exp = Utc::now().timestamp() + 60;
        let token = engine("public", "private").sign(crate::token::SecretClass::Public, &claims).unwrap();

        let result = TokenAcl::from_token(5, &token, config("public", "private"));
        assert_eq!(result.unwrap_err(), AclError::Token(TokenError::SignatureInvalid));
    }

    #[test]
    fn test_expired_and_garbage_tokens() {
        let mut claims = claims();
        claims.exp = Utc::now().timestamp() - 10;
        let token = engine("public", "private").sign(crate::token::SecretClass::Public, &claims).unwrap();

        let result = TokenAcl::from_token(5, &token, config("public", "private"));
        assert_eq!(result.unwrap_err(), AclError::Token(TokenError::Expired));

        let result = TokenAcl::from_token(5, "garbage", config("public", "private"));
        assert_eq!(result.unwrap_err(), AclError::JwtTokenInvalid);
    }

    #[test]
    fn test_service_code_checked_after_verification() {
        let mut claims = claims();
        let token = engine("public", "private").create_access_token(&mut claims).unwrap();

        let result = TokenAcl::from_token(0, &token, config("public", "private"));
        assert_eq!(result.unwrap_err(), AclError::ServiceCodeNotSet);
    }

    #[test]
    fn test_validated_claim_carries_over() {
        let mut claims = claims();
        claims.validated = true;
        let token = engine("public", "private").create_private_access_token(&mut claims).unwrap();

        let acl = TokenAcl::from_token(5, &token, config("public", "private")).unwrap();
        assert!(acl.controller().is_validated());
    }

    #[test]
    fn test_validated_claim_ignored_on_public_tokens() {
        let mut claims = claims();
        claims.validated = true;
        let token = engine("public", "private").create_access_token(&mut claims).unwrap();

        let acl = TokenAcl::from_token(5, &token, config("public", "private")).unwrap();
        assert!(acl.claims().validated);
        assert!(!acl.controller().is_validated());
    }
}
