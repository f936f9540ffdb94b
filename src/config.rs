//! Configuration: a TOML file loaded with `serde`, overlaid with `clap`
//! command-line flags. Flags win when both are given.

use crate::error::{Error, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    File,
    Partition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host_identifier: String,
    pub host_rank: i32,
    pub total_hosts: i32,
    pub mount_directory: PathBuf,
    pub devices: Vec<String>,
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_storage_mode")]
    pub storage_mode: StorageMode,
}

fn default_worker_threads() -> usize {
    8
}

fn default_storage_mode() -> StorageMode {
    StorageMode::Partition
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| Error::invalid_state(format!("{}: {e}", path.display())))
    }

    fn apply_overrides(&mut self, cli: &CliArgs) {
        if let Some(v) = &cli.host_identifier {
            self.host_identifier = v.clone();
        }
        if let Some(v) = cli.host_rank {
            self.host_rank = v;
        }
        if let Some(v) = cli.total_hosts {
            self.total_hosts = v;
        }
        if let Some(v) = &cli.mount_directory {
            self.mount_directory = v.clone();
        }
        if let Some(v) = cli.worker_threads {
            self.worker_threads = v;
        }
    }
}

/// Command-line overlay for [`Config`]. Every field is optional: only what
/// the caller actually passes overrides the config file.
#[derive(Debug, Parser)]
#[command(name = "mdsd", about = "distributed metadata server daemon")]
pub struct CliArgs {
    /// Path to the TOML config file.
    #[arg(long, default_value = "mdsd.toml")]
    pub config: PathBuf,

    #[arg(long)]
    pub host_identifier: Option<String>,

    #[arg(long)]
    pub host_rank: Option<i32>,

    #[arg(long)]
    pub total_hosts: Option<i32>,

    #[arg(long)]
    pub mount_directory: Option<PathBuf>,

    #[arg(long)]
    pub worker_threads: Option<usize>,
}

impl CliArgs {
    /// Loads the config file named by `--config` and applies every other
    /// flag as an override.
    pub fn resolve(&self) -> Result<Config> {
        let mut config = Config::load(&self.config)?;
        config.apply_overrides(self);
        Ok(config)
    }
}
