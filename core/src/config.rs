//! Configuration options.
//!
//! Applications embedding the engine are free to define their own command
//! line arguments; the engine itself is configured from a TOML file that
//! defines stream and connection tracking options. The path to the
//! configuration file will typically be a command line argument passed to
//! the application.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Loads a configuration file from `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> RuntimeConfig {
    let config_str = fs::read_to_string(path).expect("ERROR: File read failed");
    let config: RuntimeConfig = toml::from_str(&config_str).expect("Invalid config file");
    config
}

/// Loads a default configuration.
///
/// For demonstration purposes only, not configured for production traffic
/// volumes.
pub fn default_config() -> RuntimeConfig {
    RuntimeConfig::default()
}

/* --------------------------------------------------------------------------------- */

/// Runtime configuration options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    /// Per-stream settings.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Connection tracking settings.
    #[serde(default)]
    pub conntrack: ConnTrackConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            stream: StreamConfig::default(),
            conntrack: ConnTrackConfig::default(),
        }
    }
}

/* --------------------------------------------------------------------------------- */

/// Editable stream options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StreamConfig {
    /// Inspect-only mode: streams reassemble and surface bytes but refuse
    /// edits, and segments pass through byte-identical. Defaults to `false`.
    #[serde(default = "default_passthrough")]
    pub passthrough: bool,

    /// Maximum number of segments a stream may hold between push and pop
    /// before further pushes are refused. Bounds memory on flows whose
    /// consumer stalls. Defaults to `100`.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            passthrough: default_passthrough(),
            max_pending: default_max_pending(),
        }
    }
}

fn default_passthrough() -> bool {
    false
}

fn default_max_pending() -> usize {
    100
}

/* --------------------------------------------------------------------------------- */

/// Connection tracking options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ConnTrackConfig {
    /// Maximum number of connections that can be tracked simultaneously per
    /// worker. Defaults to `100_000`.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ConnTrackConfig {
    fn default() -> Self {
        ConnTrackConfig {
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> usize {
    100_000
}
