use thiserror::Error;

use crate::token::TokenError;

/// Failures while extracting, building or retrieving an ACL controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AclError {
    #[error("acl: no headers in request")]
    NoHeaderInRequest,

    #[error("acl: not found jwt token in header")]
    JwtTokenNotFoundInHeader,

    #[error("acl: missing Bearer prefix in Authorization header")]
    MissingBearerPrefix,

    #[error("acl: not found api key in header")]
    ApiKeyNotFoundInHeader,

    #[error("acl: jwt token is invalid")]
    JwtTokenInvalid,

    #[error("acl: secret key is empty")]
    SecretKeyEmpty,

    #[error("acl: private secret key is empty")]
    PrivateSecretKeyEmpty,

    #[error("acl: both public and private secret keys are empty")]
    NoSecretsConfigured,

    #[error("acl: validate_acl requires a permission source")]
    PermissionSourceMissing,

    #[error("acl: not found acl object in context")]
    NotFoundAclObject,

    #[error("acl: acl object in context is not backed by a token")]
    NotTokenBacked,

    #[error("acl: service code has been not set")]
    ServiceCodeNotSet,

    #[error("acl: data not valid")]
    AclDataInvalid,

    #[error("acl: api key is not recognised")]
    ApiKeyRejected,

    #[error("acl: identity lookup failed: {0}")]
    Lookup(String),

    #[error("acl: {0}")]
    Token(#[from] TokenError),
}
