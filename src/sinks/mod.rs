//! Sink manager (§4.H): owns named sinks, exposes the set of enabled names,
//! and dispatches a record to a sink by name. Sinks are kept opaque —
//! callers never see file handles or sockets, only `log`/`name`.

pub mod file;
pub mod gelf;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::rules::FieldSpec;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no sink registered under {0:?}")]
    Unknown(String),
}

/// A log destination. Variants (file, gelf) are distinct concrete types
/// behind this trait rather than a shared base class.
pub trait Sink: Send + Sync {
    fn log(&self, record: &Map<String, Value>) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationType {
    File,
    Gelf,
}

fn default_true() -> bool {
    true
}

fn default_max_message_size() -> usize {
    8192
}

/// On-disk representation of a single destination (§3 Destination).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DestinationType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub add_log_data: Vec<FieldSpec>,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default)]
    pub file: Option<file::FileSinkConfig>,
    #[serde(default)]
    pub gelf: Option<gelf::GelfSinkConfig>,
}

/// Owns every configured, enabled sink.
pub struct SinkManager {
    sinks: HashMap<String, Arc<dyn Sink>>,
    enabled_names: Vec<String>,
    /// Per-destination add_log_data and message-size cap, keyed by name —
    /// needed by the log handler's fan-out loop even though it isn't part
    /// of the `Sink` trait itself.
    destinations: HashMap<String, DestinationConfig>,
}

impl SinkManager {
    pub fn from_configs(configs: &[DestinationConfig]) -> anyhow::Result<Self> {
        let mut sinks: HashMap<String, Arc<dyn Sink>> = HashMap::new();
        let mut enabled_names = Vec::new();
        let mut destinations = HashMap::new();

        for cfg in configs {
            destinations.insert(cfg.name.clone(), cfg.clone());
            if !cfg.enabled {
                continue;
            }
            let sink: Arc<dyn Sink> = match cfg.kind {
                DestinationType::File => Arc::new(file::FileSink::new(cfg)?),
                DestinationType::Gelf => Arc::new(gelf::GelfSink::new(cfg)?),
            };
            enabled_names.push(cfg.name.clone());
            sinks.insert(cfg.name.clone(), sink);
        }

        Ok(Self {
            sinks,
            enabled_names,
            destinations,
        })
    }

    /// Names of sinks that are enabled and were successfully initialized.
    pub fn enabled_names(&self) -> &[String] {
        &self.enabled_names
    }

    pub fn destination(&self, name: &str) -> Option<&DestinationConfig> {
        self.destinations.get(name)
    }

    pub fn log(&self, name: &str, record: &Map<String, Value>) -> Result<(), SinkError> {
        self.sinks
            .get(name)
            .ok_or_else(|| SinkError::Unknown(name.to_string()))?
            .log(record)
    }
}
