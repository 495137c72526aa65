//! Error types shared by every wazo-plugind crate.

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Result type for plugind operations.
pub type Result<T> = std::result::Result<T, PlugindError>;

/// Per-field validation details, keyed by the offending field name.
pub type ValidationDetails = Map<String, Value>;

/// Error taxonomy of the daemon.
///
/// Variants that reach the HTTP layer or the bus are rendered through
/// [`PlugindError::api_error`] into the shared
/// `{error_id, message, resource, details}` envelope.
#[derive(Debug, Error)]
pub enum PlugindError {
    /// An external command exited with a non-zero status.
    #[error("{command} returned {code}")]
    CommandExecutionFailed { command: String, code: i32 },

    /// The exact (namespace, name, version) is already installed and
    /// `reinstall` was not requested. Converted to `completed` by the
    /// install pipeline, never published as an error.
    #[error("{namespace}/{name} is already installed")]
    PluginAlreadyInstalled { namespace: String, name: String },

    /// A market download found nothing to do because the plugin already
    /// satisfies the request. Converted to `completed` by the pipeline.
    #[error("dependency is already installed")]
    DependencyAlreadyInstalled,

    /// Plugin metadata failed schema validation.
    #[error("Validation error")]
    Validation { details: ValidationDetails },

    /// A request body or query string has the wrong shape.
    #[error("Invalid data")]
    InvalidData { details: ValidationDetails },

    /// The requested sort column holds values that are not mutually
    /// orderable.
    #[error("\"{column}\" values are not orderable")]
    InvalidSortParam { column: String },

    /// The install method is neither `git` nor `market`.
    #[error("Unsupported download method")]
    UnsupportedDownloadMethod,

    /// The target plugin is not installed or not in the catalog.
    #[error("Plugin not found {namespace}/{name}")]
    PluginNotFound { namespace: String, name: String },

    /// The market catalog could not be fetched.
    #[error("Market Service Unavailable")]
    MarketUnavailable,

    /// The master tenant has not been learned from the identity service yet.
    #[error("wazo-plugind is not initialized")]
    NotInitialized,

    /// The provided token was rejected by the identity service.
    #[error("Authentication error")]
    Unauthorized,

    /// A native package name does not follow the reserved naming scheme.
    #[error("invalid debian package name {0}")]
    InvalidPackageName(String),

    /// A version string could not be interpreted.
    #[error("invalid version {0}")]
    InvalidVersion(String),

    /// The privileged worker process is gone.
    #[error("root worker is not available")]
    WorkerUnavailable,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl PlugindError {
    /// The wire-facing `error_id` for this error.
    pub fn error_id(&self) -> &'static str {
        match self {
            PlugindError::CommandExecutionFailed { .. } => "install-error",
            PlugindError::Validation { .. } => "validation-error",
            PlugindError::InvalidData { .. } => "invalid-data",
            PlugindError::InvalidSortParam { .. } => "invalid-sort-params",
            PlugindError::UnsupportedDownloadMethod => "unsupported-download-method",
            PlugindError::PluginNotFound { .. } => "plugin-not-found",
            PlugindError::MarketUnavailable => "market-service-unavailable",
            PlugindError::NotInitialized => "not-initialized",
            PlugindError::Unauthorized => "unauthorized",
            _ => "internal-error",
        }
    }

    /// Render this error into the shared API envelope.
    pub fn api_error(&self) -> ApiError {
        match self {
            PlugindError::Validation { details } => ApiError {
                error_id: self.error_id().to_string(),
                message: "Validation error".to_string(),
                resource: Some("plugins".to_string()),
                details: Some(Value::Object(details.clone())),
            },
            PlugindError::InvalidData { details } => ApiError {
                error_id: self.error_id().to_string(),
                message: "Invalid data".to_string(),
                resource: Some("plugins".to_string()),
                details: Some(Value::Object(details.clone())),
            },
            PlugindError::InvalidSortParam { column } => {
                let mut details = Map::new();
                details.insert(
                    column.clone(),
                    json!({
                        "constraint_id": "orderable",
                        "message": format!("\"{column}\" values are not orderable"),
                    }),
                );
                ApiError {
                    error_id: self.error_id().to_string(),
                    message: "Invalid sort parameters".to_string(),
                    resource: Some("market".to_string()),
                    details: Some(Value::Object(details)),
                }
            }
            PlugindError::PluginNotFound { namespace, name } => ApiError {
                error_id: self.error_id().to_string(),
                message: format!("Plugin not found {namespace}/{name}"),
                resource: Some("plugins".to_string()),
                details: Some(json!({"namespace": namespace, "name": name})),
            },
            PlugindError::MarketUnavailable => ApiError {
                error_id: self.error_id().to_string(),
                message: "Market Service Unavailable".to_string(),
                resource: Some("market".to_string()),
                details: Some(json!({})),
            },
            _ => ApiError {
                error_id: self.error_id().to_string(),
                message: self.to_string(),
                resource: Some("plugins".to_string()),
                details: None,
            },
        }
    }
}

impl From<config::ConfigError> for PlugindError {
    fn from(err: config::ConfigError) -> Self {
        PlugindError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for PlugindError {
    fn from(err: serde_yaml::Error) -> Self {
        PlugindError::Metadata(err.to_string())
    }
}

impl From<serde_json::Error> for PlugindError {
    fn from(err: serde_json::Error) -> Self {
        PlugindError::Metadata(err.to_string())
    }
}

/// The error envelope shared by HTTP responses and bus error events.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub error_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// A single schema violation, serialized into [`ValidationDetails`] values.
#[derive(Debug, Clone, Serialize)]
pub struct ConstraintViolation {
    pub constraint_id: &'static str,
    pub constraint: Value,
    pub message: String,
}

impl ConstraintViolation {
    pub fn required() -> Self {
        Self {
            constraint_id: "required",
            constraint: Value::String("required".to_string()),
            message: "Missing data for required field.".to_string(),
        }
    }

    pub fn regex(pattern: &str) -> Self {
        Self {
            constraint_id: "regex",
            constraint: Value::String(pattern.to_string()),
            message: "String does not match expected pattern.".to_string(),
        }
    }

    pub fn type_error(expected: &str) -> Self {
        Self {
            constraint_id: "type",
            constraint: Value::String(expected.to_string()),
            message: format!("Not a valid {expected}."),
        }
    }

    pub fn range_min(min: impl Serialize) -> Self {
        let min = serde_json::to_value(min).unwrap_or(Value::Null);
        Self {
            constraint_id: "range",
            constraint: json!({ "min": min }),
            message: format!("Must be greater than or equal to {}.", render(&min)),
        }
    }

    pub fn range_max(max: impl Serialize) -> Self {
        let max = serde_json::to_value(max).unwrap_or(Value::Null);
        Self {
            constraint_id: "range",
            constraint: json!({ "max": max }),
            message: format!("Must be less than or equal to {}.", render(&max)),
        }
    }

    pub fn length_min(min: u64) -> Self {
        Self {
            constraint_id: "length",
            constraint: json!({ "min": min }),
            message: format!("Shorter than minimum length {min}."),
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
