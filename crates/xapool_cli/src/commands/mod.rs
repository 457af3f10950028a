//! CLI command implementations.

pub mod recover;
pub mod simulate;

/// Format id stamped on every branch the CLI generates.
pub const CLI_FORMAT_ID: i32 = 0x7861;
