//! Whole-application configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use plotscan_export::CompileOptions;
use plotscan_pipeline::PipelineConfig;

use crate::artifacts::{ArtifactStore, DEFAULT_ARTIFACT_DIR};
use crate::stream::StreamConfig;

/// Errors loading a [`PlotConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("could not read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The JSON is malformed or has wrongly typed fields.
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Every tunable in one place. Missing fields take their defaults, so
/// `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    /// Vision pipeline parameters.
    pub pipeline: PipelineConfig,
    /// Toolpath compiler parameters.
    pub compile: CompileOptions,
    /// Serial streaming parameters.
    pub stream: StreamConfig,
    /// Where the SVG and G-code artifacts are written.
    pub artifact_dir: PathBuf,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            compile: CompileOptions::default(),
            stream: StreamConfig::default(),
            artifact_dir: PathBuf::from(DEFAULT_ARTIFACT_DIR),
        }
    }
}

impl PlotConfig {
    /// Parse a JSON config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed input.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, or
    /// [`ConfigError::Json`] if it does not parse.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Artifact store for [`artifact_dir`](Self::artifact_dir).
    #[must_use]
    pub fn artifact_store(&self) -> ArtifactStore {
        ArtifactStore::new(&self.artifact_dir)
    }
}
