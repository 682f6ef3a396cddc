// Locating the daemon binary from the CLI

use std::path::PathBuf;

/// Overrides every other lookup when set
pub const DAEMON_PATH_ENV_VAR: &str = "PICKUP_DAEMON";

pub fn daemon_binary_name() -> &'static str {
    if cfg!(windows) {
        "pickup-daemon.exe"
    } else {
        "pickup-daemon"
    }
}

/// Install locations searched after the executable's own directory
pub fn fallback_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();

    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".cargo/bin"));
        locations.push(home.join(".local/bin"));
    }

    if let Some(path) = std::env::var_os("PATH") {
        locations.extend(std::env::split_paths(&path));
    }

    #[cfg(unix)]
    {
        locations.push(PathBuf::from("/usr/local/bin"));
        locations.push(PathBuf::from("/usr/bin"));
    }

    locations
}

/// Resolve the `pickup-daemon` binary for the current process.
///
/// Resolution order:
/// 1) `PICKUP_DAEMON`
/// 2) Next to `current_exe()` (cargo target dir / installed together)
/// 3) Fallback locations
pub fn resolve_daemon_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(DAEMON_PATH_ENV_VAR) {
        let explicit = PathBuf::from(explicit);
        if explicit.is_file() {
            return Some(explicit);
        }
        tracing::warn!(path = %explicit.display(), "{} does not point to a file", DAEMON_PATH_ENV_VAR);
    }

    let name = daemon_binary_name();

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    fallback_locations()
        .into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
