//! Process exit codes.
//!
//! Pipeline failures reuse `SignError::exit_code`: 1 malformed archive,
//! 4 integrity or identity violation, 5 external service, 6 other.

pub const SUCCESS: i32 = 0;
pub const CONFIG_ERROR: i32 = 2; // Invalid configuration or invocation payload
