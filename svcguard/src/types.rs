//! Identity and permission type aliases shared across the crate.
//!
//! - [`UserId`] / [`SessionId`]: the caller identity carried in every token
//! - [`ServiceId`]: the instance identifier of a participating service, forwarded on outbound calls
//! - [`ServiceCode`] / [`PermissionCode`]: the `(service, permission)` pair every access decision checks
//!
//! A permission code only means something relative to a service code. The code
//! [`NO_PERMISSION`] is reserved for methods that require no explicit permission.

use uuid::Uuid;

pub type UserId = Uuid;
pub type SessionId = Uuid;
pub type ServiceId = Uuid;

/// Non-zero integer identifying a participating service.
pub type ServiceCode = i32;

/// Integer identifying a capability, meaningful only paired with a [`ServiceCode`].
pub type PermissionCode = i32;

/// Sentinel permission code: the method requires no explicit permission.
pub const NO_PERMISSION: PermissionCode = 0;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}
