//! Transparency module for the usage sentinel.
//!
//! Tracks and exposes what the monitor collects and how it scores it,
//! so users can audit the agent.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    TransparencyStats,
};
