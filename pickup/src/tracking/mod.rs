//! Activity tracking: idle detection, file-switch policy and exclusions

pub mod filter;
pub mod monitor;
pub mod trigger;

pub use filter::ExcludeFilter;
pub use monitor::IdleMonitor;
pub use trigger::FileFocusTracker;
