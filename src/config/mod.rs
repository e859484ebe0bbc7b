pub mod studio;

use crate::utils::error::{PipelineError, Result};
use crate::utils::validation::{self, Validate};
use clap::{Args, Parser};
use serde::Serialize;
use std::path::PathBuf;

pub const DEFAULT_GCP_PROJECT: &str = "hcc_ai_pipeline";
pub const DEFAULT_GCP_LOCATION: &str = "us-central1";
pub const DEFAULT_INPUT_DIR: &str = "data/input";
pub const DEFAULT_OUTPUT_DIR: &str = "data/output";
pub const DEFAULT_HCC_CSV_PATH: &str = "data/hcc_codes.csv";
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_LLM_MAX_RETRIES: usize = 5;

/// Runtime settings shared by the CLI and the server.
///
/// Every field can be given as a flag; otherwise the environment variable
/// (possibly loaded from `.env`) and finally the default applies.
#[derive(Debug, Clone, Args, Serialize)]
pub struct Settings {
    /// Google Cloud project; empty disables the Vertex AI extractor
    #[arg(long, env = "GCP_PROJECT", default_value = DEFAULT_GCP_PROJECT)]
    pub gcp_project: String,

    #[arg(long, env = "GCP_LOCATION", default_value = DEFAULT_GCP_LOCATION)]
    pub gcp_location: String,

    /// Service account JSON key
    #[arg(long = "credentials", env = "GOOGLE_APPLICATION_CREDENTIALS", default_value = "")]
    pub gcp_credentials_path: String,

    #[arg(long, env = "INPUT_DIR", default_value = DEFAULT_INPUT_DIR)]
    pub input_dir: String,

    #[arg(long, env = "OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: String,

    #[arg(long, env = "HCC_CSV_PATH", default_value = DEFAULT_HCC_CSV_PATH)]
    pub hcc_csv_path: String,

    /// Notes processed concurrently
    #[arg(long, env = "WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    #[arg(long, env = "LLM_MAX_RETRIES", default_value_t = DEFAULT_LLM_MAX_RETRIES)]
    pub llm_max_retries: usize,

    /// Override for the Vertex AI base URL (tests, private endpoints)
    #[arg(long, env = "VERTEX_ENDPOINT")]
    pub vertex_endpoint: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gcp_project: DEFAULT_GCP_PROJECT.to_string(),
            gcp_location: DEFAULT_GCP_LOCATION.to_string(),
            gcp_credentials_path: String::new(),
            input_dir: DEFAULT_INPUT_DIR.to_string(),
            output_dir: DEFAULT_OUTPUT_DIR.to_string(),
            hcc_csv_path: DEFAULT_HCC_CSV_PATH.to_string(),
            workers: DEFAULT_WORKERS,
            llm_max_retries: DEFAULT_LLM_MAX_RETRIES,
            vertex_endpoint: None,
        }
    }
}

#[derive(Parser)]
struct EnvOnly {
    #[command(flatten)]
    settings: Settings,
}

impl Settings {
    /// Settings from environment variables and defaults only (no flags).
    pub fn from_env() -> Result<Self> {
        EnvOnly::try_parse_from([env!("CARGO_PKG_NAME")])
            .map(|parsed| parsed.settings)
            .map_err(|e| PipelineError::config(format!("Invalid environment settings: {}", e)))
    }

    /// Vertex AI is used only when a project is configured.
    pub fn llm_enabled(&self) -> bool {
        !self.gcp_project.trim().is_empty()
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        validation::validate_path("input_dir", &self.input_dir)?;
        validation::validate_path("output_dir", &self.output_dir)?;
        validation::validate_path("hcc_csv_path", &self.hcc_csv_path)?;
        validation::validate_positive_number("workers", self.workers, 1)?;
        validation::validate_range("llm_max_retries", self.llm_max_retries, 0, 20)?;

        if self.llm_enabled() {
            validation::validate_non_empty_string("gcp_location", &self.gcp_location)?;
        }
        if let Some(endpoint) = &self.vertex_endpoint {
            validation::validate_url("vertex_endpoint", endpoint)?;
        }

        Ok(())
    }
}

/// Logs the outcome of loading `.env`. Call once the logger is up.
/// A missing file is normal; anything else is reported and returned.
pub fn log_dotenv_result(
    result: &std::result::Result<PathBuf, dotenvy::Error>,
) -> Option<String> {
    match result {
        Ok(path) => {
            tracing::debug!("Loaded environment from {}", path.display());
            None
        }
        Err(e) if e.not_found() => None,
        Err(e) => {
            tracing::warn!("⚠️ Could not load .env: {}", e);
            Some(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert!(settings.llm_enabled());
        assert_eq!(settings.workers, 8);
    }

    #[test]
    fn test_flags_override_defaults() {
        #[derive(Parser)]
        struct Cli {
            #[command(flatten)]
            settings: Settings,
        }

        let cli = Cli::parse_from([
            "hcc-pipeline",
            "--gcp-project",
            "",
            "--workers",
            "3",
            "--input-dir",
            "notes",
            "--vertex-endpoint",
            "http://127.0.0.1:9000",
        ]);
        assert!(!cli.settings.llm_enabled());
        assert_eq!(cli.settings.workers, 3);
        assert_eq!(cli.settings.input_dir, "notes");
        assert!(cli.settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_settings() {
        let zero_workers = Settings {
            workers: 0,
            ..Settings::default()
        };
        assert!(zero_workers.validate().is_err());

        let bad_endpoint = Settings {
            vertex_endpoint: Some("ftp://vertex".to_string()),
            ..Settings::default()
        };
        assert!(bad_endpoint.validate().is_err());

        let empty_output = Settings {
            output_dir: " ".to_string(),
            ..Settings::default()
        };
        assert!(empty_output.validate().is_err());
    }

    #[test]
    fn test_dotenv_result_reporting() {
        let temp_dir = tempfile::TempDir::new().unwrap();

        let missing = dotenvy::from_path(temp_dir.path().join(".env")).map(|_| PathBuf::new());
        assert_eq!(log_dotenv_result(&missing), None);

        let broken_path = temp_dir.path().join("broken.env");
        std::fs::write(&broken_path, "HCC_DOTENV_BROKEN='unterminated\n").unwrap();
        let broken = dotenvy::from_path(&broken_path).map(|_| broken_path.clone());
        assert!(broken.is_err());
        assert!(log_dotenv_result(&broken).is_some());

        assert_eq!(log_dotenv_result(&Ok(broken_path)), None);
    }
}
