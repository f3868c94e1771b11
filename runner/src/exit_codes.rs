//! Stable exit codes for robot-runner CLI commands.

/// Command succeeded; for `run`, the execution completed.
pub const OK: i32 = 0;
/// Invalid config, robot file or arguments, or any other setup error.
pub const INVALID: i32 = 1;
/// `run` produced an execution that failed or was cancelled.
pub const FAILED: i32 = 2;
/// `run` was rejected because the robot is at its concurrency quota.
pub const QUOTA_EXCEEDED: i32 = 3;
