use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("DOCX archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Failed to extract text from {file}: {message}")]
    DocumentError { file: String, message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Credentials error: {message}")]
    CredentialsError { message: String },

    #[error("Language model request failed: {message}")]
    LlmError { status: Option<u16>, message: String },

    #[error("Graph error: {message}")]
    GraphError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

pub const EXIT_SUCCESS: i32 = 0;
/// 處理或設定錯誤
pub const EXIT_FAILURE: i32 = 1;
/// 部分筆記失敗
pub const EXIT_PARTIAL_FAILURE: i32 = 2;
/// 系統錯誤（I/O）
pub const EXIT_SYSTEM_FAILURE: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Io,
    Data,
    Network,
    Configuration,
    Authentication,
    Model,
    Pipeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// 可重試的錯誤訊息關鍵字（Vertex AI / gRPC 狀態）
const RETRYABLE_MARKERS: &[&str] = &[
    "429",
    "too many requests",
    "resource_exhausted",
    "resource exhausted",
    "quota",
    "503",
    "unavailable",
    "500",
    "internal",
    "502",
    "504",
    "deadline",
    "timeout",
    "timed out",
];

const NON_RETRYABLE_MARKERS: &[&str] = &[
    "unauthenticated",
    "permission_denied",
    "permission denied",
    "invalid_argument",
    "invalid argument",
    "not_found",
];

/// Decide from an error message whether a model call is worth retrying.
/// Non-retryable markers win over retryable ones.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    if NON_RETRYABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }
    RETRYABLE_MARKERS.iter().any(|m| lower.contains(m))
}

impl PipelineError {
    pub fn config(message: impl Into<String>) -> Self {
        PipelineError::ConfigError {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        PipelineError::ProcessingError {
            message: message.into(),
        }
    }

    pub fn credentials(message: impl Into<String>) -> Self {
        PipelineError::CredentialsError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::IoError(_) => ErrorCategory::Io,
            PipelineError::CsvError(_)
            | PipelineError::SerializationError(_)
            | PipelineError::ZipError(_)
            | PipelineError::DocumentError { .. }
            | PipelineError::ValidationError { .. } => ErrorCategory::Data,
            PipelineError::HttpError(_) => ErrorCategory::Network,
            PipelineError::ConfigError { .. }
            | PipelineError::MissingConfigError { .. }
            | PipelineError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            PipelineError::CredentialsError { .. } => ErrorCategory::Authentication,
            PipelineError::LlmError { .. } => ErrorCategory::Model,
            PipelineError::GraphError { .. } | PipelineError::ProcessingError { .. } => {
                ErrorCategory::Pipeline
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PipelineError::IoError(_) => ErrorSeverity::Critical,
            PipelineError::HttpError(_) | PipelineError::LlmError { .. } => {
                if self.is_retryable() {
                    ErrorSeverity::Medium
                } else {
                    ErrorSeverity::High
                }
            }
            _ => ErrorSeverity::High,
        }
    }

    /// Process exit code for a run that stopped on this error.
    /// An error that ends the run is never reported as success.
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Critical => EXIT_SYSTEM_FAILURE,
            ErrorSeverity::Low | ErrorSeverity::Medium | ErrorSeverity::High => EXIT_FAILURE,
        }
    }

    /// Transient failures: rate limits, server-side errors, timeouts.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::HttpError(e) => {
                if e.is_timeout() || e.is_connect() {
                    return true;
                }
                match e.status() {
                    Some(status) => is_retryable_status(status.as_u16()),
                    None => false,
                }
            }
            PipelineError::LlmError { status, message } => match status {
                Some(code) if is_retryable_status(*code) => true,
                Some(code) if (400..500).contains(code) => false,
                _ => is_retryable_message(message),
            },
            _ => false,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Io => "Check that the input/output directories exist and are writable",
            ErrorCategory::Data => {
                "Check the input notes and the HCC CSV (it needs a 'Description' column)"
            }
            ErrorCategory::Network => "Check network connectivity to Google Cloud and retry",
            ErrorCategory::Configuration => {
                "Review the .env file and command line flags (GCP_PROJECT, INPUT_DIR, OUTPUT_DIR, HCC_CSV_PATH)"
            }
            ErrorCategory::Authentication => {
                "Set GOOGLE_APPLICATION_CREDENTIALS to a valid service account JSON key file"
            }
            ErrorCategory::Model => {
                "The model request failed; retry later or check the Vertex AI quota for the project"
            }
            ErrorCategory::Pipeline => "Run with --verbose to see which pipeline step failed",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Io => format!("File system problem: {}", self),
            ErrorCategory::Data => format!("Could not read the input data: {}", self),
            ErrorCategory::Network => format!("Network problem: {}", self),
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::Authentication => format!("Google Cloud authentication failed: {}", self),
            ErrorCategory::Model => format!("The language model call failed: {}", self),
            ErrorCategory::Pipeline => format!("Pipeline failed: {}", self),
        }
    }
}

pub fn is_retryable_status(code: u16) -> bool {
    matches!(code, 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_messages() {
        assert!(is_retryable_message("429 Too Many Requests"));
        assert!(is_retryable_message("quota exceeded"));
        assert!(is_retryable_message("503 Service Unavailable"));
        assert!(is_retryable_message("RESOURCE_EXHAUSTED"));
        assert!(!is_retryable_message("unauthenticated"));
        assert!(!is_retryable_message("permission_denied"));
        assert!(!is_retryable_message("invalid_argument: bad request"));
        assert!(!is_retryable_message("something odd"));
    }

    #[test]
    fn test_llm_error_retry_by_status() {
        let throttled = PipelineError::LlmError {
            status: Some(429),
            message: "slow down".to_string(),
        };
        assert!(throttled.is_retryable());
        assert_eq!(throttled.severity(), ErrorSeverity::Medium);

        let bad_request = PipelineError::LlmError {
            status: Some(400),
            message: "INTERNAL looking text but a 400".to_string(),
        };
        assert!(!bad_request.is_retryable());
        assert_eq!(bad_request.severity(), ErrorSeverity::High);

        let unknown = PipelineError::LlmError {
            status: None,
            message: "deadline exceeded".to_string(),
        };
        assert!(unknown.is_retryable());
    }

    #[test]
    fn test_category_and_severity() {
        let io = PipelineError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        assert_eq!(io.category(), ErrorCategory::Io);
        assert_eq!(io.severity(), ErrorSeverity::Critical);

        let creds = PipelineError::credentials("no key");
        assert_eq!(creds.category(), ErrorCategory::Authentication);
        assert!(creds.user_friendly_message().contains("no key"));
        assert!(creds
            .recovery_suggestion()
            .contains("GOOGLE_APPLICATION_CREDENTIALS"));
    }

    #[test]
    fn test_exit_codes() {
        let io = PipelineError::IoError(std::io::Error::other("disk full"));
        assert_eq!(io.exit_code(), EXIT_SYSTEM_FAILURE);

        assert_eq!(PipelineError::config("bad").exit_code(), EXIT_FAILURE);
        assert_eq!(PipelineError::processing("bad").exit_code(), EXIT_FAILURE);
        assert_eq!(PipelineError::credentials("bad").exit_code(), EXIT_FAILURE);

        let invalid = PipelineError::ValidationError {
            message: "bad row".to_string(),
        };
        assert_eq!(invalid.severity(), ErrorSeverity::High);
        assert_eq!(invalid.exit_code(), EXIT_FAILURE);

        // 可重試的錯誤在整批中止時仍是失敗
        let throttled = PipelineError::LlmError {
            status: Some(503),
            message: "unavailable".to_string(),
        };
        assert_eq!(throttled.severity(), ErrorSeverity::Medium);
        assert_eq!(throttled.exit_code(), EXIT_FAILURE);
    }
}
