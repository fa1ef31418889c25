use axum::{
    http::{HeaderName, HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

use crate::{acl::AclError, token::TokenError};

/// gRPC status codes this crate can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Code {
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    PermissionDenied = 7,
    Internal = 13,
    Unauthenticated = 16,
}

impl Code {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

const GRPC_STATUS: HeaderName = HeaderName::from_static("grpc-status");
const GRPC_MESSAGE: HeaderName = HeaderName::from_static("grpc-message");

/// Transport-facing authorization failure: one status code and one safe message per variant.
#[derive(ThisError, Debug)]
pub enum Error {
    /// Credential missing, malformed, expired or forged
    #[error("Not authenticated: {message}")]
    Unauthenticated { message: String },

    /// Caller is authenticated but lacks the capability
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// Client sent something unusable
    #[error("{message}")]
    InvalidArgument { message: String },

    /// The call's deadline ran out while waiting on a dependency
    #[error("Deadline exceeded while trying to {operation}")]
    DeadlineExceeded { operation: String },

    /// Service is configured in a way that makes the check impossible
    #[error("Configuration error: {message}")]
    Misconfigured { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Error::Unauthenticated { message: message.into() }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Error::PermissionDenied { message: message.into() }
    }

    pub fn code(&self) -> Code {
        match self {
            Error::Unauthenticated { .. } => Code::Unauthenticated,
            Error::PermissionDenied { .. } => Code::PermissionDenied,
            Error::InvalidArgument { .. } => Code::InvalidArgument,
            Error::DeadlineExceeded { .. } => Code::DeadlineExceeded,
            Error::Misconfigured { .. } | Error::Internal { .. } => Code::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.code() {
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } | Error::PermissionDenied { message } | Error::InvalidArgument { message } => message.clone(),
            Error::Misconfigured { message } => message.clone(),
            Error::DeadlineExceeded { .. } => "deadline exceeded".to_string(),
            Error::Internal { .. } => "Internal server error".to_string(),
        }
    }

    fn log(&self) {
        match self {
            Error::Misconfigured { .. } | Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Unauthenticated { .. } | Error::PermissionDenied { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::DeadlineExceeded { .. } => {
                tracing::warn!("Call timed out: {}", self);
            }
            Error::InvalidArgument { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }
    }

    /// Render as a trailers-only gRPC response.
    pub fn into_grpc_response(self) -> Response {
        self.log();

        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
        headers.insert(GRPC_STATUS, HeaderValue::from(self.code().as_i32()));
        let message = HeaderValue::from_str(&self.user_message()).unwrap_or_else(|_| HeaderValue::from_static("unprintable error message"));
        headers.insert(GRPC_MESSAGE, message);
        response
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        (status, self.user_message()).into_response()
    }
}

impl From<AclError> for Error {
    fn from(err: AclError) -> Self {
        match err {
            AclError::NoHeaderInRequest => Error::unauthenticated("authorization header not found in request"),
            AclError::JwtTokenNotFoundInHeader => Error::unauthenticated("jwt token not found in header"),
            AclError::MissingBearerPrefix => Error::unauthenticated("missing prefix Bearer in your token"),
            AclError::ApiKeyNotFoundInHeader => Error::unauthenticated("api key not found in header"),
            AclError::ApiKeyRejected => Error::unauthenticated("api key is invalid"),
            AclError::AclDataInvalid => Error::unauthenticated("acl data is not valid"),
            AclError::JwtTokenInvalid => Error::unauthenticated("jwt token is invalid"),
            AclError::SecretKeyEmpty | AclError::PrivateSecretKeyEmpty | AclError::NoSecretsConfigured => Error::Misconfigured {
                message: "secret key is not configured".to_string(),
            },
            AclError::PermissionSourceMissing => Error::Misconfigured {
                message: "permission source is not configured".to_string(),
            },
            AclError::ServiceCodeNotSet => Error::Misconfigured {
                message: "service code is not configured".to_string(),
            },
            AclError::NotFoundAclObject | AclError::NotTokenBacked => Error::Internal {
                operation: format!("read caller identity from call context ({err})"),
            },
            AclError::Lookup(cause) => Error::Internal {
                operation: format!("look up caller identity: {cause}"),
            },
            AclError::Token(token_err) => token_err.into(),
        }
    }
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => Error::unauthenticated("jwt token expired"),
            TokenError::SignatureInvalid => Error::unauthenticated("jwt token signature is invalid"),
            TokenError::Invalid => Error::unauthenticated("jwt token is invalid"),
            TokenError::SecretKeyEmpty(_) => Error::Misconfigured {
                message: "secret key is not configured".to_string(),
            },
            TokenError::Encode(cause) => Error::Internal {
                operation: format!("sign token: {cause}"),
            },
        }
    }
}

/// Type alias for authorization results
pub type Result<T> = std::result::Result<T, Error>;
