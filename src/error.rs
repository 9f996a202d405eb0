use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited{}", format_retry_after(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("API key rejected: {0}")]
    Auth(String),

    /// One key was refused but others in the pool are still enabled.
    #[error("API key {key} rejected, switching keys: {message}")]
    KeyRejected { key: String, message: String },

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to parse {format} file: {message}")]
    Parse { format: String, message: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No API keys configured. Set GEMINI_API_KEYS=key1,key2 or run `gemtranslate keys add`")]
    NoApiKeys,

    #[error("Translation cancelled")]
    Cancelled,

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl TranslateError {
    /// Whether a request that failed with this error is worth sending again.
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslateError::RateLimited { .. }
            | TranslateError::KeyRejected { .. }
            | TranslateError::InvalidResponse(_) => true,
            TranslateError::Api { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504),
            TranslateError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, TranslateError>;

fn format_retry_after(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(" (retry after {:.1}s)", d.as_secs_f64()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TranslateError::RateLimited { retry_after: None }.is_retryable());
        assert!(TranslateError::InvalidResponse("missing keys".into()).is_retryable());
        assert!(TranslateError::Api {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!TranslateError::Api {
            status: 404,
            message: "no such model".into()
        }
        .is_retryable());
        assert!(!TranslateError::Auth("bad key".into()).is_retryable());
        assert!(TranslateError::KeyRejected {
            key: "...abcd".into(),
            message: "API key not valid".into()
        }
        .is_retryable());
        assert!(!TranslateError::Cancelled.is_retryable());
    }

    #[test]
    fn test_rate_limited_message() {
        let err = TranslateError::RateLimited {
            retry_after: Some(Duration::from_millis(2500)),
        };
        assert_eq!(err.to_string(), "Rate limited (retry after 2.5s)");
        let err = TranslateError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "Rate limited");
    }
}
