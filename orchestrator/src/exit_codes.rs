//! Stable exit codes for orchestrator CLI commands.

/// Command succeeded; for `run`, the report was certified.
pub const OK: i32 = 0;
/// Command failed due to invalid input/config or other errors.
pub const INVALID: i32 = 1;
/// `run` finished but the refinement loop hit its cap without a pass.
pub const UNCERTIFIED: i32 = 3;
