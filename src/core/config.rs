use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{P2PError, Result};

pub const DEFAULT_TRACKER_PORT: u16 = 5001;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub listen_addr: SocketAddr,
    /// `None` keeps state in memory only.
    pub database_path: Option<PathBuf>,
    pub staleness_window_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_message_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_TRACKER_PORT)),
            database_path: Some(PathBuf::from("p2p.db")),
            staleness_window_secs: 60,
            sweep_interval_secs: 30,
            max_message_size: 4 * 1024 * 1024,
        }
    }
}

impl TrackerConfig {
    pub fn staleness_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_window_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(P2PError::ConfigError(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }
        if i64::try_from(self.staleness_window_secs).is_err() {
            return Err(P2PError::ConfigError(
                "staleness_window_secs is out of range".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub tracker_addr: SocketAddr,
    /// Where the transfer listener binds. Port 0 picks a free port.
    pub listen_addr: SocketAddr,
    /// IP announced to the tracker; derived from the bind address when unset.
    pub advertise_ip: Option<IpAddr>,
    pub shared_dir: PathBuf,
    pub download_dir: PathBuf,
    pub heartbeat_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub max_message_size: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            tracker_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_TRACKER_PORT)),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            advertise_ip: None,
            shared_dir: PathBuf::from("./shared_files"),
            download_dir: PathBuf::from("./downloads"),
            heartbeat_interval_secs: 30,
            request_timeout_secs: 10,
            max_message_size: 4 * 1024 * 1024,
        }
    }
}

impl PeerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(P2PError::ConfigError(
                "heartbeat_interval_secs must be positive".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(P2PError::ConfigError(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read a JSON config file, falling back to defaults when it is missing or broken.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<T>(&content) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(err) => {
                warn!("Failed to parse config file {}: {err}", path.display());
                T::default()
            }
        },
        Err(err) => {
            info!(
                "Config file {} not readable ({err}); using defaults",
                path.display()
            );
            T::default()
        }
    }
}

pub fn save_config<T: Serialize>(path: &Path, config: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.json");
        std::fs::write(&path, r#"{"staleness_window_secs": 90}"#).unwrap();

        let config: TrackerConfig = load_config(&path);
        assert_eq!(config.staleness_window_secs, 90);
        assert_eq!(config.sweep_interval_secs, 30);
        assert_eq!(config.listen_addr.port(), DEFAULT_TRACKER_PORT);
    }

    #[test]
    fn test_missing_or_broken_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing: PeerConfig = load_config(&dir.path().join("absent.json"));
        assert_eq!(missing.heartbeat_interval_secs, 30);

        let broken_path = dir.path().join("broken.json");
        std::fs::write(&broken_path, "{ not json").unwrap();
        let broken: PeerConfig = load_config(&broken_path);
        assert_eq!(broken.shared_dir, PathBuf::from("./shared_files"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("peer.json");
        let config = PeerConfig {
            heartbeat_interval_secs: 5,
            ..PeerConfig::default()
        };
        save_config(&path, &config).unwrap();
        let loaded: PeerConfig = load_config(&path);
        assert_eq!(loaded.heartbeat_interval_secs, 5);
    }

    #[test]
    fn test_validate() {
        let bad = TrackerConfig {
            sweep_interval_secs: 0,
            ..TrackerConfig::default()
        };
        assert!(matches!(bad.validate(), Err(P2PError::ConfigError(_))));
        assert!(PeerConfig::default().validate().is_ok());
    }
}
