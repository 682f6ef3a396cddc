// Shared by integration tests; not every test uses every helper
#![allow(dead_code)]

pub mod daemon_guard;
pub mod polling;
