use std::env;
use std::fmt;

use url::Url;

use crate::workflows::roles::DocumentPolicy;

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:54321";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }

    /// Log level used when `APP_LOG_LEVEL` is unset.
    pub fn default_log_level(self) -> &'static str {
        match self {
            Self::Development => "debug",
            Self::Test => "warn",
            Self::Production => "info",
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub backend: BackendConfig,
    pub documents: DocumentPolicy,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let raw_url = env::var("BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());
        let url = Url::parse(raw_url.trim()).map_err(|source| ConfigError::InvalidBackendUrl {
            value: raw_url.clone(),
            source,
        })?;
        let anon_key = env::var("BACKEND_ANON_KEY").unwrap_or_default();

        let mut documents = DocumentPolicy::default();
        if let Some(limit) = parse_var::<usize>("MAX_DOCUMENTS")? {
            documents.max_documents = limit;
        }
        if let Some(bytes) = parse_var::<u64>("MAX_DOCUMENT_BYTES")? {
            documents.max_file_bytes = bytes;
        }

        let log_level = env::var("APP_LOG_LEVEL")
            .unwrap_or_else(|_| environment.default_log_level().to_string());

        Ok(Self {
            environment,
            backend: BackendConfig { url, anon_key },
            documents,
            telemetry: TelemetryConfig { log_level },
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name }),
        Err(_) => Ok(None),
    }
}

/// Location and public key of the hosted auth/table/storage backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: Url,
    pub anon_key: String,
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidBackendUrl {
        value: String,
        source: url::ParseError,
    },
    InvalidNumber {
        name: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidBackendUrl { value, .. } => {
                write!(f, "BACKEND_URL '{value}' is not a valid absolute URL")
            }
            ConfigError::InvalidNumber { name } => {
                write!(f, "{name} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidBackendUrl { source, .. } => Some(source),
            ConfigError::InvalidNumber { .. } => None,
        }
    }
}
