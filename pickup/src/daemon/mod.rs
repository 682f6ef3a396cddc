// Daemon plumbing shared by pickup-daemon and the pickup CLI

pub mod config;
pub mod protocol;
pub mod settings;

// Daemon client (Unix only)
#[cfg(unix)]
pub mod client;
