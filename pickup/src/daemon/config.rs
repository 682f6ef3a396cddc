// Path configuration for the daemon and its clients
// Resolves platform-specific locations for the socket, PID file and state

use std::path::{Path, PathBuf};

/// Environment variable overriding both runtime and state directories
pub const DIR_ENV_VAR: &str = "PICKUP_DIR";

/// Daemon file locations
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for runtime files (socket, PID)
    pub runtime_dir: PathBuf,
    /// Directory for durable state (settings.json, history regions)
    pub state_dir: PathBuf,
    /// Path to the Unix socket
    pub socket_path: PathBuf,
    /// Path to the daemon PID file
    pub pid_file: PathBuf,
}

impl Config {
    /// Create configuration using default paths
    pub fn default_paths() -> Self {
        let runtime_dir = Self::default_runtime_dir();
        let state_dir = Self::default_state_dir();
        Self::with_dirs(runtime_dir, state_dir)
    }

    /// Configuration rooted at explicit directories
    pub fn with_dirs(runtime_dir: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            socket_path: runtime_dir.join("pickup.sock"),
            pid_file: runtime_dir.join("pickup.pid"),
            runtime_dir,
            state_dir,
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        // PICKUP_DIR overrides BOTH runtime_dir and state_dir
        match std::env::var(DIR_ENV_VAR) {
            Ok(dir) if !dir.trim().is_empty() => {
                let base = PathBuf::from(dir);
                Self::with_dirs(base.clone(), base)
            }
            _ => Self::default_paths(),
        }
    }

    fn default_runtime_dir() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            // prefer XDG_RUNTIME_DIR, else share the state dir
            if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
                PathBuf::from(runtime_dir).join("pickup")
            } else {
                Self::default_state_dir()
            }
        }

        #[cfg(not(target_os = "linux"))]
        {
            Self::default_state_dir()
        }
    }

    fn default_state_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".pickup"))
            .unwrap_or_else(|| std::env::temp_dir().join("pickup"))
    }

    pub fn runtime_dir(&self) -> &PathBuf {
        &self.runtime_dir
    }

    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }

    /// User settings file
    pub fn settings_file(&self) -> PathBuf {
        self.state_dir.join("settings.json")
    }

    /// Ensure both runtime and state directories exist with appropriate permissions
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::create_dir_all(&self.runtime_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.runtime_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }

    /// Write the daemon PID to the PID file
    pub fn write_pid(&self) -> std::io::Result<()> {
        self.ensure_dirs()?;
        std::fs::write(&self.pid_file, std::process::id().to_string())
    }

    /// Read the daemon PID from the PID file
    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn remove_pid(&self) -> std::io::Result<()> {
        remove_if_exists(&self.pid_file)
    }

    pub fn remove_socket(&self) -> std::io::Result<()> {
        remove_if_exists(&self.socket_path)
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if a process with the stored PID is still running
    #[cfg(unix)]
    pub fn is_daemon_running(&self) -> bool {
        match self.read_pid() {
            // signal 0 only probes for existence
            Some(pid) => unsafe { libc::kill(pid as i32, 0) == 0 },
            None => false,
        }
    }

    #[cfg(not(unix))]
    pub fn is_daemon_running(&self) -> bool {
        self.socket_exists()
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_config(temp_dir: &TempDir) -> Config {
        Config::with_dirs(
            temp_dir.path().join("runtime"),
            temp_dir.path().join("state"),
        )
    }

    #[test]
    fn test_config_from_env() {
        let temp_dir = TempDir::new().unwrap();
        std::env::set_var(DIR_ENV_VAR, temp_dir.path());

        let config = Config::from_env();
        assert_eq!(config.runtime_dir(), temp_dir.path());
        assert_eq!(config.state_dir(), temp_dir.path());
        assert_eq!(config.socket_path, temp_dir.path().join("pickup.sock"));
        assert_eq!(config.pid_file, temp_dir.path().join("pickup.pid"));

        std::env::remove_var(DIR_ENV_VAR);
    }

    #[test]
    fn test_settings_file_uses_state_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config = temp_config(&temp_dir);

        assert!(config.settings_file().starts_with(&config.state_dir));
        assert!(config.settings_file().ends_with("settings.json"));
        assert!(config.socket_path.starts_with(&config.runtime_dir));
        assert!(config.pid_file.starts_with(&config.runtime_dir));
    }

    #[test]
    fn test_pid_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config = temp_config(&temp_dir);

        config.write_pid().unwrap();
        assert_eq!(config.read_pid(), Some(std::process::id()));
        #[cfg(unix)]
        assert!(config.is_daemon_running());

        config.remove_pid().unwrap();
        assert!(config.read_pid().is_none());
        assert!(!config.is_daemon_running());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_runtime_dir_follows_xdg() {
        let previous = std::env::var("XDG_RUNTIME_DIR").ok();

        std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
        let config = Config::default_paths();
        assert_eq!(config.runtime_dir(), &PathBuf::from("/run/user/1000/pickup"));
        assert!(config.state_dir().ends_with(".pickup"));

        std::env::remove_var("XDG_RUNTIME_DIR");
        let config = Config::default_paths();
        assert_eq!(config.runtime_dir(), config.state_dir());

        if let Some(previous) = previous {
            std::env::set_var("XDG_RUNTIME_DIR", previous);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_dirs_creates_runtime_dir_with_0700() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let config = temp_config(&temp_dir);
        config.ensure_dirs().unwrap();

        let mode = std::fs::metadata(&config.runtime_dir)
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o700);
        assert!(config.state_dir.exists());
    }
}
