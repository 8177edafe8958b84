//! # Harness Process
//!
//! Low-level process operations used by the harness crates:
//! - Process and process-group existence checks
//! - Signal delivery to single processes and whole groups
//! - Spawning a child that is terminated on drop
//! - Ephemeral port reservation shared across one test session
//!
//! Process groups and signals are POSIX concepts, so this crate targets unix.

pub mod check;
pub mod execute;
pub mod group;
pub mod ports;
pub mod terminate;

// Re-export main types
pub use check::*;
pub use execute::*;
pub use group::*;
pub use ports::*;
pub use terminate::*;
