//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Validation error - unknown component, missing flag, bad configuration
pub const VALIDATION_ERROR: i32 = 2;

/// Dependency error - a required component is not installed
pub const DEPENDENCY_ERROR: i32 = 3;

/// Substrate error - SSH, helm, Kubernetes API or DNS API failure
pub const SUBSTRATE_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// A stateful release needs an operator to decide
pub const MANUAL_INTERVENTION: i32 = 6;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;

/// Interrupted with Ctrl-C
pub const CANCELLED: i32 = 130;
