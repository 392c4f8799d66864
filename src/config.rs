use serde::Deserialize;
use std::path::PathBuf;

use crate::error::BuildError;

/// One stage record from the pipeline configuration. `prev`/`next` are
/// configuration-time adjacency references resolved by the chain builder:
/// the entry stage names itself as `prev`, the terminal names itself as
/// `next`. `params` stays opaque here; the factory registered for `kind`
/// decodes it.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub prev: String,
    pub next: String,
    pub kind: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub show: bool,
    #[serde(default)]
    pub save: bool,
}

impl StageConfig {
    /// Decode the type-specific parameter block. An absent block decodes
    /// to the param type's defaults; a present-but-invalid block is a
    /// fatal build error.
    pub fn decode_params<T>(&self) -> Result<T, BuildError>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        if self.params.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(self.params.clone()).map_err(|e| BuildError::InvalidParams {
            name: self.name.clone(),
            source: e,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_command_port")]
    pub command_port: u16,
    #[serde(default = "default_data_port")]
    pub data_port: u16,
    #[serde(default = "default_info_port")]
    pub info_port: u16,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            command_port: default_command_port(),
            data_port: default_data_port(),
            info_port: default_info_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_command_port() -> u16 {
    47801
}

fn default_data_port() -> u16 {
    47802
}

fn default_info_port() -> u16 {
    47803
}

/// Full run settings: frame pacing, source directories, output directory,
/// host link endpoints, and the stage list.
#[derive(Debug, Clone, Deserialize)]
pub struct RunSettings {
    /// Negative: no inter-frame wait. Non-negative: wait up to this many
    /// milliseconds for a key between frames.
    #[serde(default = "default_pause_ms")]
    pub pause_ms: i64,
    #[serde(default)]
    pub stereo: bool,
    pub left_dir: Option<PathBuf>,
    pub right_dir: Option<PathBuf>,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default)]
    pub link: LinkSettings,
    pub stages: Vec<StageConfig>,
}

fn default_pause_ms() -> i64 {
    -1
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("tmp")
}

impl RunSettings {
    /// Load from a settings file, with `STEREOFLOW_`-prefixed environment
    /// variables layered on top.
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("STEREOFLOW").separator("__"))
            .build()?;
        settings.try_deserialize()
    }
}
