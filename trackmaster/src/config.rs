//! Runtime configuration.
//!
//! Built once at startup (defaults, then an optional JSON file, then CLI
//! overrides), validated, and handed to every component behind an `Arc`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MasterError, Result};

/// What happens to routes whose chunks were held by a worker that disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerLossPolicy {
    /// Drop the route's partial results and tell the client it failed.
    Abandon,
    /// Leave the route unreduced; it is reported by `stalled_routes()`.
    Stall,
}

/// Explicit handling of worker unavailability. Chunks are never retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailurePolicy {
    /// How long dispatch waits for a worker when the pool is empty.
    /// `None` waits forever.
    pub worker_wait_secs: Option<u64>,
    pub on_worker_loss: WorkerLossPolicy,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            worker_wait_secs: Some(30),
            on_worker_loss: WorkerLossPolicy::Abandon,
        }
    }
}

impl FailurePolicy {
    pub fn worker_wait(&self) -> Option<Duration> {
        self.worker_wait_secs.map(Duration::from_secs)
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Address clients connect to
    pub client_addr: SocketAddr,
    /// Address workers connect to
    pub worker_addr: SocketAddr,
    /// In-process workers spawned at startup (0 = rely on external workers)
    pub worker_pool_size: usize,
    /// Directory `submit` reads tracks from when no file is given
    pub track_dir: PathBuf,
    /// Directory of segment definitions in track format, keyed by file stem
    pub segment_dir: Option<PathBuf>,
    /// Radius in meters for matching waypoints to segment vertices
    pub segment_tolerance_m: f64,
    pub failure: FailurePolicy,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            client_addr: SocketAddr::from(([127, 0, 0, 1], 4321)),
            worker_addr: SocketAddr::from(([127, 0, 0, 1], 4322)),
            worker_pool_size: 4,
            track_dir: PathBuf::from("tracks"),
            segment_dir: None,
            segment_tolerance_m: trackreduce::calculator::DEFAULT_SEGMENT_TOLERANCE,
            failure: FailurePolicy::default(),
        }
    }
}

impl MasterConfig {
    /// Load a configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MasterError::Config(format!("{}: {}", path.display(), e)))?;
        let config: MasterConfig = serde_json::from_str(&contents)
            .map_err(|e| MasterError::Config(format!("{}: {}", path.display(), e)))?;
        log::info!("[Config] Loaded {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_addr.port() != 0 && self.client_addr == self.worker_addr {
            return Err(MasterError::Config(format!(
                "client and worker listeners share {}",
                self.client_addr
            )));
        }
        if !(self.segment_tolerance_m.is_finite() && self.segment_tolerance_m > 0.0) {
            return Err(MasterError::Config(format!(
                "segment_tolerance_m must be positive, got {}",
                self.segment_tolerance_m
            )));
        }
        if self.failure.worker_wait_secs == Some(0) && self.worker_pool_size == 0 {
            log::warn!(
                "[Config] No local workers and zero worker wait: routes fail unless workers are already connected"
            );
        }
        Ok(())
    }
}

/// Worker process configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub master_addr: SocketAddr,
}

impl WorkerConfig {
    /// Connect to the worker listener of `master`.
    pub fn from_master(master: &MasterConfig) -> Self {
        Self {
            master_addr: master.worker_addr,
        }
    }
}

/// Submitting client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub master_addr: SocketAddr,
    pub track_dir: PathBuf,
}

impl ClientConfig {
    /// Submit to the client listener of `master`, reading tracks from its track directory.
    pub fn from_master(master: &MasterConfig) -> Self {
        Self {
            master_addr: master.client_addr,
            track_dir: master.track_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = MasterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.failure.worker_wait(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "worker_pool_size": 2, "failure": {{ "worker_wait_secs": null, "on_worker_loss": "stall" }} }}"#
        )
        .unwrap();

        let config = MasterConfig::load(file.path()).unwrap();
        assert_eq!(config.worker_pool_size, 2);
        assert_eq!(config.failure.worker_wait(), None);
        assert_eq!(config.failure.on_worker_loss, WorkerLossPolicy::Stall);
        assert_eq!(config.client_addr, MasterConfig::default().client_addr);
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "worker_pool_size = 2").unwrap();
        assert!(matches!(
            MasterConfig::load(file.path()),
            Err(MasterError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_shared_listener() {
        let config = MasterConfig {
            worker_addr: MasterConfig::default().client_addr,
            ..MasterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_peer_configs_follow_master_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "client_addr": "10.0.0.5:7000", "worker_addr": "10.0.0.5:7001", "track_dir": "rides" }}"#
        )
        .unwrap();
        let master = MasterConfig::load(file.path()).unwrap();

        let client = ClientConfig::from_master(&master);
        assert_eq!(client.master_addr, SocketAddr::from(([10, 0, 0, 5], 7000)));
        assert_eq!(client.track_dir, PathBuf::from("rides"));
        assert_eq!(
            WorkerConfig::from_master(&master).master_addr,
            SocketAddr::from(([10, 0, 0, 5], 7001))
        );
    }

    #[test]
    fn test_validate_rejects_bad_tolerance() {
        let config = MasterConfig {
            segment_tolerance_m: 0.0,
            ..MasterConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
