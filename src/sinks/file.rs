//! Rotating file sink: appends one JSON record per line, rotating to
//! `<path>.1`, `<path>.2`, … once the current file crosses `max_size_bytes`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Sink, SinkError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSinkConfig {
    pub path: String,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
}

fn default_max_size_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_max_backups() -> u32 {
    5
}

struct State {
    file: File,
    size: u64,
}

pub struct FileSink {
    config: FileSinkConfig,
    state: Mutex<State>,
}

impl FileSink {
    pub fn new(cfg: &super::DestinationConfig) -> anyhow::Result<Self> {
        let file_cfg = cfg
            .file
            .clone()
            .ok_or_else(|| anyhow::anyhow!("destination {:?} is type=file but has no [file] config", cfg.name))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_cfg.path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            config: file_cfg,
            state: Mutex::new(State { file, size }),
        })
    }

    fn rotate(&self, state: &mut State) -> std::io::Result<()> {
        for gen in (1..self.config.max_backups).rev() {
            let from = format!("{}.{gen}", self.config.path);
            let to = format!("{}.{}", self.config.path, gen + 1);
            if fs::metadata(&from).is_ok() {
                fs::rename(&from, &to)?;
            }
        }
        if self.config.max_backups > 0 {
            fs::rename(&self.config.path, format!("{}.1", self.config.path))?;
        }
        state.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)?;
        state.size = 0;
        Ok(())
    }
}

impl Sink for FileSink {
    fn log(&self, record: &Map<String, Value>) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.size + line.len() as u64 > self.config.max_size_bytes && self.config.max_backups > 0 {
            self.rotate(&mut state)?;
        }
        state.file.write_all(&line)?;
        state.size += line.len() as u64;
        Ok(())
    }
}
