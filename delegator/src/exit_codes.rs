//! Stable exit codes for delegator CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, config or plan, or a phase rejected by preflight.
pub const INVALID: i32 = 1;
/// `delegator check` found validation failures.
pub const VALIDATION_FAILED: i32 = 2;
