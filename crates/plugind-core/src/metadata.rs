//! Plugin metadata model and install request options.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConstraintViolation, PlugindError, Result};

/// Regex for valid plugin names.
pub const PLUGIN_NAME_PATTERN: &str = "^[a-z0-9-]+$";

/// Regex for valid plugin namespaces.
pub const PLUGIN_NAMESPACE_PATTERN: &str = "^[a-z0-9]+$";

/// Validated plugin metadata, as declared in `wazo/plugin.yml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    pub namespace: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub plugin_format_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_wazo_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wazo_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<DependencyEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debian_depends: Vec<String>,
}

/// One declared plugin dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEntry {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DependencyEntry {
    /// A dependency entry is usable when both identity halves are present.
    pub fn is_valid(&self) -> bool {
        !self.namespace.is_empty() && !self.name.is_empty()
    }
}

/// Install parameters carried on the query string.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InstallParams {
    #[serde(default)]
    pub reinstall: bool,
}

/// Method-specific install options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstallOptions {
    Git(GitInstallOptions),
    Market(MarketInstallOptions),
}

impl InstallOptions {
    /// The download method this variant belongs to.
    pub fn method(&self) -> &'static str {
        match self {
            InstallOptions::Git(_) => "git",
            InstallOptions::Market(_) => "market",
        }
    }

    /// Serialize the options for inclusion in error details.
    pub fn as_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parse a `{method, options}` pair from an HTTP body or a market
    /// version row.
    ///
    /// An unknown method maps to `unsupported-download-method`; a known
    /// method with malformed options maps to `invalid-data` with per-field
    /// details.
    pub fn from_method(method: &str, options: &Value) -> Result<Self> {
        match method {
            "git" => {
                let options: GitInstallOptions = parse_options(options)?;
                if options.url.is_empty() {
                    return Err(invalid_option("url", ConstraintViolation::length_min(1)));
                }
                if options.git_ref.is_empty() {
                    return Err(invalid_option("ref", ConstraintViolation::length_min(1)));
                }
                Ok(InstallOptions::Git(options))
            }
            "market" => {
                let options: MarketInstallOptions = parse_options(options)?;
                if options.namespace.is_empty() {
                    return Err(invalid_option(
                        "namespace",
                        ConstraintViolation::length_min(1),
                    ));
                }
                if options.name.is_empty() {
                    return Err(invalid_option("name", ConstraintViolation::length_min(1)));
                }
                Ok(InstallOptions::Market(options))
            }
            _ => Err(PlugindError::UnsupportedDownloadMethod),
        }
    }
}

fn parse_options<T: serde::de::DeserializeOwned>(options: &Value) -> Result<T> {
    serde_json::from_value(options.clone()).map_err(|e| {
        tracing::debug!("rejecting install options: {e}");
        let mut details = Map::new();
        details.insert(
            "options".to_string(),
            ConstraintViolation::type_error("object").into_value(),
        );
        PlugindError::InvalidData { details }
    })
}

fn invalid_option(field: &str, violation: ConstraintViolation) -> PlugindError {
    let mut details = Map::new();
    details.insert(field.to_string(), violation.into_value());
    PlugindError::InvalidData { details }
}

/// Options of a git install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitInstallOptions {
    pub url: String,
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdirectory: Option<String>,
}

fn default_ref() -> String {
    "master".to_string()
}

/// Options of a market install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketInstallOptions {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl From<&DependencyEntry> for MarketInstallOptions {
    fn from(dep: &DependencyEntry) -> Self {
        Self {
            namespace: dep.namespace.clone(),
            name: dep.name.clone(),
            version: dep.version.clone(),
        }
    }
}
