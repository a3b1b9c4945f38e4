//! Stable exit codes for rover CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, unreadable `.rover/` files, or any other error.
pub const INVALID: i32 = 1;
/// The remote session expired and re-authentication attempts ran out.
pub const AUTH_EXPIRED: i32 = 2;
