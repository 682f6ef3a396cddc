// Editor work-context companion: capture where you were, resurface it later

// Per-editor session wiring (monitor + triggers + capture + history)
pub mod app;

// Locating the daemon binary (shared by the CLI and tests)
pub mod cli_paths;

// Snapshot capture, locator, synthesis and history storage
pub mod context;

// Daemon config, settings, protocol and client
pub mod daemon;

pub mod error;
pub mod logging;

// Human-readable strings and jump resolution for plugins and the CLI
pub mod present;

// Activity tracking: idle monitor, file-switch policy, exclude filter
pub mod tracking;

// Clock and retry helpers for tests (also used by integration tests)
pub mod test_utils;
