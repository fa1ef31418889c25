//! # svcguard: capability tokens and per-call authorization
//!
//! `svcguard` is the access-control core shared by a family of services that call each other on
//! behalf of end users. It decides, for every remote-procedure call, who the caller is and whether
//! they may invoke the method, and it lets a service forward that caller's identity to the services
//! it calls in turn.
//!
//! ## Overview
//!
//! Every service owns a non-zero numeric **service code**. A caller's capabilities are a
//! **permission matrix**: service code → permission codes granted in that service. The matrix
//! travels inside a signed token, so a service can answer "may this caller do X here?" without
//! asking anyone.
//!
//! Tokens come in two trust classes. **Public** tokens are signed with the public secret and
//! handed to end-user clients. **Private** (delegation) tokens are signed with the private secret
//! and minted by one service to authenticate a call it forwards to another service. A token's own
//! `is_p` claim says which secret verifies it, so verification peeks at the unverified claims first
//! and only then verifies with the selected secret (see [`token`]).
//!
//! ## Request Flow
//!
//! The [`middleware::authorization_middleware`] resolves the invoked method's
//! [`middleware::MethodRequirement`], optionally checks a captcha challenge, verifies the bearer
//! token (or API key), enforces the permission list and binds the resulting
//! [`acl::CallContext`] to the request. Handlers read the caller with the
//! [`middleware::Acl`] extractor:
//!
//! ```ignore
//! async fn create_post(mut acl: Acl, headers: HeaderMap) -> Result<Json<Post>, Error> {
//!     let outbound = acl.controller_mut().outgoing_headers(&headers, media_service_id, HashMap::new())?;
//!     // call the media service with `outbound`
//! }
//! ```
//!
//! A lighter [`middleware::session_middleware`] checks only that an encrypted session cookie has
//! not expired (see [`session`]).
//!
//! ## Modules
//!
//! - [`token`]: claim payload, token creation and two-phase verification
//! - [`acl`]: permission matrix, ACL controller, context binding
//! - [`middleware`]: authorization pipeline, captcha verification, session gate, extractors
//! - [`session`]: AES-GCM sealed session expiry cookies
//! - [`config`]: YAML + environment configuration and CLI arguments
//! - [`errors`]: transport-facing error type with gRPC and HTTP renderings

pub mod acl;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod session;
pub mod telemetry;
pub mod token;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod test;

pub use config::Config;
pub use errors::{Code, Error};
