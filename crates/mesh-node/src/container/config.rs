//! # Node Configuration
//!
//! Everything a replica needs to start, read from `MESH_*` environment
//! variables. Unset variables keep their defaults; malformed ones are
//! rejected.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `MESH_POD_ID` | `$HOSTNAME`, else `mesh-0` |
//! | `MESH_CLIENT_ID` | fresh UUID v4 |
//! | `MESH_BUS_ADDR` | `0.0.0.0:7400` |
//! | `MESH_ROLE` | `standby` |
//! | `MESH_MASTER_ADDR` | unset |
//! | `MESH_STORAGE` | `memory` |
//! | `MESH_DATA_DIR` | `./data` |
//! | `MESH_BUS_CHANNEL_CAPACITY` | `1000` |
//! | `MESH_DEFERRED_TTL_SECS` | `60` |
//! | `MESH_DEFERRED_SWEEP_SECS` | `10` |
//! | `MESH_RETRY_DELAY_MS` | `1000` |
//! | `MESH_SNAPSHOT_ATTEMPTS` | `10` |
//! | `MESH_SNAPSHOT_RETRY_DELAY_MS` | `1000` |
//! | `MESH_DIAL_MAX_ATTEMPTS` | `50` |
//! | `MESH_DIAL_BACKOFF_MS` | `10` |
//! | `MESH_MAX_FRAME_BYTES` | `67108864` |

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shared_bus::{BusConfig, DialPolicy};
use shared_types::NodeRole;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Bus channel capacity must be at least 1")]
    ZeroChannelCapacity,

    #[error("Snapshot attempts must be at least 1")]
    ZeroSnapshotAttempts,

    #[error("Role slave requires MESH_MASTER_ADDR")]
    MissingMasterAddress,

    #[error("Storage backend {0} is not compiled in")]
    BackendUnavailable(StorageBackend),
}

/// Complete node configuration.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    pub bus: BusSettings,
    /// Static role, standing in for the election collaborator.
    pub role: RoleConfig,
    pub storage: StorageConfig,
}

impl NodeConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let pod_id = lookup("MESH_POD_ID")
            .or_else(|| lookup("HOSTNAME"))
            .unwrap_or(defaults.identity.pod_id);
        let client_id = lookup("MESH_CLIENT_ID").unwrap_or(defaults.identity.client_id);

        let b = defaults.bus;
        let config = Self {
            identity: IdentityConfig {
                pod_id,
                client_id,
                bus_listen_addr: parse(&lookup, "MESH_BUS_ADDR", defaults.identity.bus_listen_addr)?,
            },
            bus: BusSettings {
                channel_capacity: parse(&lookup, "MESH_BUS_CHANNEL_CAPACITY", b.channel_capacity)?,
                deferred_ttl: secs(&lookup, "MESH_DEFERRED_TTL_SECS", b.deferred_ttl)?,
                deferred_sweep_interval: secs(
                    &lookup,
                    "MESH_DEFERRED_SWEEP_SECS",
                    b.deferred_sweep_interval,
                )?,
                retry_delay: millis(&lookup, "MESH_RETRY_DELAY_MS", b.retry_delay)?,
                snapshot_attempts: parse(&lookup, "MESH_SNAPSHOT_ATTEMPTS", b.snapshot_attempts)?,
                snapshot_retry_delay: millis(
                    &lookup,
                    "MESH_SNAPSHOT_RETRY_DELAY_MS",
                    b.snapshot_retry_delay,
                )?,
                dial_max_attempts: parse(&lookup, "MESH_DIAL_MAX_ATTEMPTS", b.dial_max_attempts)?,
                dial_backoff: millis(&lookup, "MESH_DIAL_BACKOFF_MS", b.dial_backoff)?,
                max_frame_bytes: parse(&lookup, "MESH_MAX_FRAME_BYTES", b.max_frame_bytes)?,
            },
            role: RoleConfig {
                role: parse(&lookup, "MESH_ROLE", defaults.role.role)?,
                master_addr: lookup("MESH_MASTER_ADDR")
                    .map(|v| parse_value("MESH_MASTER_ADDR", &v))
                    .transpose()?,
            },
            storage: StorageConfig {
                backend: parse(&lookup, "MESH_STORAGE", defaults.storage.backend)?,
                data_dir: lookup("MESH_DATA_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.data_dir),
            },
        };
        Ok(config)
    }

    /// Rejects settings the node cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.channel_capacity == 0 {
            return Err(ConfigError::ZeroChannelCapacity);
        }
        if self.bus.snapshot_attempts == 0 {
            return Err(ConfigError::ZeroSnapshotAttempts);
        }
        if self.role.role == NodeRole::Slave && self.role.master_addr.is_none() {
            return Err(ConfigError::MissingMasterAddress);
        }
        if self.storage.backend == StorageBackend::RocksDb && !cfg!(feature = "rocksdb") {
            return Err(ConfigError::BackendUnavailable(StorageBackend::RocksDb));
        }
        Ok(())
    }
}

/// Who this node is on the network.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Pod name; the durable store's master lease names a pod.
    pub pod_id: String,
    /// Stable id sent to masters; keys deferred events.
    pub client_id: String,
    /// Where the bus publisher listens while this node is master.
    pub bus_listen_addr: SocketAddr,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            pod_id: "mesh-0".to_string(),
            client_id: uuid::Uuid::new_v4().to_string(),
            bus_listen_addr: SocketAddr::from(([0, 0, 0, 0], 7400)),
        }
    }
}

/// Event bus tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    pub channel_capacity: usize,
    pub deferred_ttl: Duration,
    pub deferred_sweep_interval: Duration,
    pub retry_delay: Duration,
    pub snapshot_attempts: u32,
    pub snapshot_retry_delay: Duration,
    pub dial_max_attempts: u32,
    pub dial_backoff: Duration,
    pub max_frame_bytes: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        let bus = BusConfig::default();
        Self {
            channel_capacity: bus.channel_capacity,
            deferred_ttl: bus.deferred_ttl,
            deferred_sweep_interval: bus.deferred_sweep_interval,
            retry_delay: bus.retry_delay,
            snapshot_attempts: bus.snapshot_attempts,
            snapshot_retry_delay: bus.snapshot_retry_delay,
            dial_max_attempts: bus.dial.max_attempts,
            dial_backoff: bus.dial.backoff,
            max_frame_bytes: bus.max_frame_bytes,
        }
    }
}

impl BusSettings {
    pub fn to_bus_config(&self) -> BusConfig {
        BusConfig {
            channel_capacity: self.channel_capacity,
            deferred_ttl: self.deferred_ttl,
            deferred_sweep_interval: self.deferred_sweep_interval,
            retry_delay: self.retry_delay,
            snapshot_attempts: self.snapshot_attempts,
            snapshot_retry_delay: self.snapshot_retry_delay,
            dial: DialPolicy {
                max_attempts: self.dial_max_attempts,
                backoff: self.dial_backoff,
            },
            max_frame_bytes: self.max_frame_bytes,
            ..BusConfig::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoleConfig {
    pub role: NodeRole,
    /// Master's bus address; required for slaves.
    pub master_addr: Option<SocketAddr>,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Standby,
            master_addr: None,
        }
    }
}

/// Durable store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Memory,
    RocksDb,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StorageBackend::Memory => "memory",
            StorageBackend::RocksDb => "rocksdb",
        })
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "rocksdb" => Ok(StorageBackend::RocksDb),
            other => Err(format!("unknown storage backend {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory of the RocksDB database.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: PathBuf::from("./data"),
        }
    }
}

fn parse_value<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(value) => parse_value(key, &value),
        None => Ok(default),
    }
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse(lookup, key, default.as_secs()).map(Duration::from_secs)
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse(lookup, key, default).map(Duration::from_millis)
}
