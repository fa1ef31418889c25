//! Per-call access control.
//!
//! An [`AclController`] answers capability queries for one caller in one call and
//! mints the delegation tokens used when that call fans out to other services.
//! Controllers are built either from explicit identity fields, from an API key,
//! or from a verified bearer token ([`TokenAcl`]); [`AclContext::from_headers`]
//! picks the right one for inbound metadata.
//!
//! ## Binding
//!
//! The authorization middleware wraps the controller in a [`CallContext`] and
//! stores it in the request extensions. Handlers read it back with the
//! [`crate::middleware::Acl`] extractor, or with [`CallContext::from_extensions`]
//! outside axum.

mod config;
mod context;
mod controller;
mod errors;
mod matrix;
mod token_acl;

pub use config::{AclConfig, ApiKeyIdentity, ApiKeyResolver, DEFAULT_API_KEY_HEADER, PermissionSource};
pub use context::{AclContext, CallContext, SERVICE_CONTEXT_HEADER, api_key, bearer_token};
pub use controller::AclController;
pub use errors::AclError;
pub use matrix::PermissionMatrix;
pub use token_acl::TokenAcl;
