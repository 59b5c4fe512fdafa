//! Application configuration: one input, one output.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use dvb_input::DvbConfig;
use file_input::FileConfig;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Input selection, discriminated by `kind`.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InputConfig {
    Dvb {
        #[serde(flatten)]
        dvb: DvbConfig,
        /// PIDs joined at startup (ignored in budget mode, where the
        /// full band is captured through a single filter).
        #[serde(default)]
        pids: Vec<u16>,
    },
    File {
        #[serde(flatten)]
        file: FileConfig,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputConfig {
    /// Output file path; absent or `-` writes to stdout.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}
