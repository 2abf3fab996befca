//! Process exit codes
//!
//! Codes 1-7 are depot specific; usage errors follow sysexits.h.

/// Success
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Configuration error - unreadable or invalid configuration file
pub const CONFIG_ERROR: i32 = 2;

/// The requested item was not found in any candidate repository
pub const NOT_FOUND: i32 = 3;

/// The permission gate refused the operation
pub const FORBIDDEN: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Conflicting metadata or checksum mismatch
pub const CONFLICT: i32 = 6;

/// A remote origin could not be reached
pub const REMOTE_ERROR: i32 = 7;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
