//! Configuration loading from `~/.holdfast/config.toml` with defaults.

use holdfast_types::config::ProtocolConfig;
use holdfast_types::error::{HoldfastError, HoldfastResult};
use std::path::{Path, PathBuf};
use tracing::info;

/// Load protocol configuration from a TOML file, with defaults.
///
/// A missing, unreadable or invalid file never fails the caller; the
/// problem is logged and the defaults are used.
pub fn load_config(path: Option<&Path>) -> ProtocolConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return ProtocolConfig::default();
    }

    match read_config(&config_path) {
        Ok(config) => {
            info!(path = %config_path.display(), "Loaded configuration");
            config
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to load config, using defaults"
            );
            ProtocolConfig::default()
        }
    }
}

/// Read and parse a config file, reporting any problem as
/// [`HoldfastError::Config`].
pub fn read_config(path: &Path) -> HoldfastResult<ProtocolConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| HoldfastError::Config(format!("{}: {e}", path.display())))?;
    let config: ProtocolConfig = toml::from_str(&contents)
        .map_err(|e| HoldfastError::Config(format!("{}: {e}", path.display())))?;
    if config.max_loopback_rounds == 0 {
        return Err(HoldfastError::Config(
            "max_loopback_rounds must be at least 1".to_string(),
        ));
    }
    if config.recent_ack_capacity == 0 {
        return Err(HoldfastError::Config(
            "recent_ack_capacity must be at least 1".to_string(),
        ));
    }
    Ok(config)
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    holdfast_home().join("config.toml")
}

/// Get the default Holdfast home directory.
pub fn holdfast_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".holdfast")
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_types::config::TransferPolicyKind;
    use holdfast_types::net::DeliveryClass;
    use std::io::Write;

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(Some(Path::new("/nonexistent/holdfast.toml")));
        assert_eq!(config, ProtocolConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "local_name = \"scavenger\"").unwrap();
        writeln!(f, "request_timeout_ticks = 12").unwrap();
        writeln!(f, "event_delivery = \"reliable\"").unwrap();
        writeln!(f, "transfer_policy = \"lowest_peer_id\"").unwrap();
        drop(f);

        let config = load_config(Some(&path));
        assert_eq!(config.local_name, "scavenger");
        assert_eq!(config.request_timeout_ticks, Some(12));
        assert_eq!(config.event_delivery, DeliveryClass::Reliable);
        assert_eq!(config.transfer_policy, TransferPolicyKind::LowestPeerId);
        assert_eq!(config.max_loopback_rounds, 64);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "event_delivery = \"carrier pigeon\"").unwrap();

        assert!(matches!(read_config(&path), Err(HoldfastError::Config(_))));
        assert_eq!(load_config(Some(&path)), ProtocolConfig::default());
    }

    #[test]
    fn test_zero_loopback_rounds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_loopback_rounds = 0").unwrap();
        assert!(read_config(&path).is_err());
    }

    #[test]
    fn test_zero_recent_ack_capacity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "recent_ack_capacity = 0").unwrap();
        assert!(matches!(read_config(&path), Err(HoldfastError::Config(_))));

        std::fs::write(&path, "recent_ack_capacity = 4").unwrap();
        assert_eq!(read_config(&path).unwrap().recent_ack_capacity, 4);
    }

    #[test]
    fn test_default_path_under_home() {
        let path = default_config_path();
        assert!(path.ends_with(".holdfast/config.toml"));
    }
}
