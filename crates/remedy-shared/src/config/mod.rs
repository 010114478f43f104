//! # Configuration
//!
//! Layered configuration for the remedy daemon: defaults in code, overridden
//! by an optional TOML file, overridden by `REMEDY_`-prefixed environment
//! variables (`REMEDY_SUPERVISOR__FAST_POOL_SIZE=5` style). All values are
//! injected at construction; no component reads configuration globals.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RemedyError, RemedyResult};
use crate::types::routing::WorkerMode;

/// Poll-loop and queue-facing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Main-loop cadence in seconds
    pub poll_interval_s: f64,
    /// Upper bound on tasks claimed per tick
    pub claim_batch_size: usize,
    /// Queue-poll timeout; expiry aborts the tick, never fatal
    pub queue_poll_timeout_s: u64,
    /// Event-bus publish timeout
    pub event_publish_timeout_s: u64,
    /// Lease duration requested when claiming tasks
    pub claim_lease_s: u64,
    /// Retry budget before a retryable failure escalates
    pub max_attempts: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_interval_s: 5.0,
            claim_batch_size: 8,
            queue_poll_timeout_s: 10,
            event_publish_timeout_s: 5,
            claim_lease_s: 600,
            max_attempts: 3,
        }
    }
}

impl DaemonConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_s)
    }

    pub fn queue_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_poll_timeout_s)
    }

    pub fn event_publish_timeout(&self) -> Duration {
        Duration::from_secs(self.event_publish_timeout_s)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_s)
    }
}

/// Caps enforced by the batch optimizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub batch_max_violations: usize,
    pub batch_max_files: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_max_violations: 20,
            batch_max_files: 10,
        }
    }
}

/// Decision-engine thresholds. Injectable so operators can tune routing
/// without recompilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub high_complexity_threshold: f64,
    pub low_confidence_threshold: f64,
    pub medium_complexity_threshold: f64,
    pub security_kind_threshold: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            high_complexity_threshold: 0.70,
            low_confidence_threshold: 0.30,
            medium_complexity_threshold: 0.40,
            security_kind_threshold: 0.80,
        }
    }
}

/// Worker pool sizing, timeouts, and spawned-worker plumbing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub fast_pool_size: usize,
    pub heavy_pool_size: usize,
    pub fast_timeout_s: u64,
    pub heavy_timeout_s: u64,
    /// Heartbeats older than this are considered stale during the sweep
    pub heartbeat_stale_s: u64,
    pub health_sweep_interval_s: u64,
    /// Grace between soft-stop and hard-kill of a spawned worker
    pub soft_stop_grace_s: u64,
    /// Script the supervisor spawns for each heavy dispatch
    pub heavy_worker_startup_script: PathBuf,
    /// Directory where spawned workers touch their heartbeat files
    pub heartbeat_dir: PathBuf,
    /// Mode handed to spawned workers via `QA_MODE`
    pub worker_mode: WorkerMode,
    /// Cadence of in-process heartbeat ticks for fast workers
    pub fast_heartbeat_interval_s: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            fast_pool_size: 3,
            heavy_pool_size: 2,
            fast_timeout_s: 60,
            heavy_timeout_s: 300,
            heartbeat_stale_s: 60,
            health_sweep_interval_s: 5,
            soft_stop_grace_s: 10,
            heavy_worker_startup_script: PathBuf::from("scripts/heavy-worker.sh"),
            heartbeat_dir: std::env::temp_dir().join("remedy-heartbeats"),
            worker_mode: WorkerMode::Headless,
            fast_heartbeat_interval_s: 1,
        }
    }
}

impl SupervisorConfig {
    pub fn fast_timeout(&self) -> Duration {
        Duration::from_secs(self.fast_timeout_s)
    }

    pub fn heavy_timeout(&self) -> Duration {
        Duration::from_secs(self.heavy_timeout_s)
    }

    pub fn heartbeat_stale(&self) -> Duration {
        Duration::from_secs(self.heartbeat_stale_s)
    }

    pub fn health_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.health_sweep_interval_s)
    }

    pub fn soft_stop_grace(&self) -> Duration {
        Duration::from_secs(self.soft_stop_grace_s)
    }

    /// Per-kind timeout for a dispatch
    pub fn timeout_for(&self, kind: crate::types::worker::WorkerKind) -> Duration {
        match kind {
            crate::types::worker::WorkerKind::FastInproc => self.fast_timeout(),
            crate::types::worker::WorkerKind::HeavySpawned
            | crate::types::worker::WorkerKind::Human => self.heavy_timeout(),
        }
    }
}

/// Root configuration for the remedy daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemedyConfig {
    pub daemon: DaemonConfig,
    pub batching: BatchingConfig,
    pub routing: RoutingConfig,
    pub supervisor: SupervisorConfig,
    /// Directory of the retrieval corpus; absent ⇒ empty index
    pub pattern_index_path: Option<PathBuf>,
}

impl RemedyConfig {
    /// Load configuration: defaults ← optional TOML file ← environment.
    ///
    /// Environment variables use the `REMEDY_` prefix with `__` as the
    /// nesting separator, e.g. `REMEDY_ROUTING__HIGH_COMPLEXITY_THRESHOLD`.
    pub fn load(config_path: Option<&Path>) -> RemedyResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("REMEDY")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: Self = builder
            .build()
            .map_err(|e| RemedyError::ConfigurationError(format!("failed to build config: {e}")))?
            .try_deserialize()
            .map_err(|e| {
                RemedyError::ConfigurationError(format!("failed to deserialize config: {e}"))
            })?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject configurations the daemon cannot run with
    pub fn validate(&self) -> RemedyResult<()> {
        if self.supervisor.fast_pool_size == 0 {
            return Err(RemedyError::ConfigurationError(
                "fast_pool_size must be at least 1".to_string(),
            ));
        }
        if self.supervisor.heavy_pool_size == 0 {
            return Err(RemedyError::ConfigurationError(
                "heavy_pool_size must be at least 1".to_string(),
            ));
        }
        if self.batching.batch_max_violations == 0 || self.batching.batch_max_files == 0 {
            return Err(RemedyError::ConfigurationError(
                "batch caps must be at least 1".to_string(),
            ));
        }
        if self.daemon.poll_interval_s <= 0.0 {
            return Err(RemedyError::ConfigurationError(
                "poll_interval_s must be positive".to_string(),
            ));
        }

        let thresholds = [
            ("routing_high_complexity_threshold", self.routing.high_complexity_threshold),
            ("routing_low_confidence_threshold", self.routing.low_confidence_threshold),
            ("routing_medium_complexity_threshold", self.routing.medium_complexity_threshold),
            ("routing_security_kind_threshold", self.routing.security_kind_threshold),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(RemedyError::ConfigurationError(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }

        Ok(())
    }
}
