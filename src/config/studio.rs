//! Studio configuration (`langgraph.json`): which graphs the development
//! server exposes and which `.env` file to load before reading settings.

use crate::utils::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_STUDIO_CONFIG: &str = "src/config/langgraph.json";
pub const DEFAULT_GRAPH_NAME: &str = "hcc_pipeline";
/// The only graph kind this crate can build.
pub const HCC_GRAPH_KIND: &str = "hcc";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudioConfig {
    /// Graph name -> graph kind.
    pub graphs: BTreeMap<String, String>,
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Directory the config was loaded from; relative paths resolve against it.
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            graphs: BTreeMap::from([(DEFAULT_GRAPH_NAME.to_string(), HCC_GRAPH_KIND.to_string())]),
            env: None,
            dependencies: Vec::new(),
            base_dir: None,
        }
    }
}

impl StudioConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!(
                "Cannot read studio config {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config = Self::from_json_str(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| PipelineError::config(format!("Invalid studio config: {}", e)))?;
        config.validate_graphs()?;
        Ok(config)
    }

    /// Missing file falls back to the single default graph.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_file() {
            Self::from_file(path)
        } else {
            tracing::info!(
                "Studio config {} not found, serving '{}' only",
                path.display(),
                DEFAULT_GRAPH_NAME
            );
            Ok(Self::default())
        }
    }

    fn validate_graphs(&self) -> Result<()> {
        if self.graphs.is_empty() {
            return Err(PipelineError::MissingConfigError {
                field: "graphs".to_string(),
            });
        }
        for (name, kind) in &self.graphs {
            if name.trim().is_empty() {
                return Err(PipelineError::config("Graph names cannot be empty"));
            }
            if kind != HCC_GRAPH_KIND {
                return Err(PipelineError::InvalidConfigValueError {
                    field: format!("graphs.{}", name),
                    value: kind.clone(),
                    reason: format!("Unknown graph kind, expected '{}'", HCC_GRAPH_KIND),
                });
            }
        }
        Ok(())
    }

    /// Path of the configured env file, relative to the config's directory.
    pub fn env_path(&self) -> Option<PathBuf> {
        let env = self.env.as_deref()?;
        let env = Path::new(env);
        Some(match &self.base_dir {
            Some(base) if env.is_relative() => base.join(env),
            _ => env.to_path_buf(),
        })
    }

    /// Loads the env file if one is configured and present.
    /// Variables already in the environment are kept.
    pub fn load_env(&self) -> Result<Option<PathBuf>> {
        let Some(path) = self.env_path() else {
            return Ok(None);
        };
        if !path.is_file() {
            tracing::warn!("Env file {} not found, skipping", path.display());
            return Ok(None);
        }
        dotenvy::from_path(&path).map_err(|e| {
            PipelineError::config(format!("Cannot load env file {}: {}", path.display(), e))
        })?;
        tracing::info!("Loaded environment from {}", path.display());
        Ok(Some(path))
    }
}
