//! Plugin metadata validation.
//!
//! The validator checks the raw metadata document read from the plugin
//! tree against the schema, with the host version as an input-dependent
//! bound. All violations are collected into a single `validation-error`
//! keyed by field.

use regex::Regex;
use serde_json::{Map, Value};

use crate::config::MAX_PLUGIN_FORMAT_VERSION;
use crate::error::{ConstraintViolation, PlugindError, Result, ValidationDetails};
use crate::metadata::{
    InstallParams, PluginMetadata, PLUGIN_NAMESPACE_PATTERN, PLUGIN_NAME_PATTERN,
};
use crate::registry::PluginRegistry;
use crate::version;

const VERSION_FIELDS: [&str; 3] = ["version", "min_wazo_version", "max_wazo_version"];

/// Validates plugin metadata against the schema and the host version.
pub struct MetadataValidator {
    registry: PluginRegistry,
    current_version: String,
    namespace_re: Regex,
    name_re: Regex,
}

impl MetadataValidator {
    pub fn new(registry: PluginRegistry, current_version: impl Into<String>) -> Self {
        Self {
            registry,
            current_version: current_version.into(),
            namespace_re: Regex::new(PLUGIN_NAMESPACE_PATTERN).expect("static pattern"),
            name_re: Regex::new(PLUGIN_NAME_PATTERN).expect("static pattern"),
        }
    }

    /// Validate `raw` and return the typed metadata.
    ///
    /// With `reinstall` unset, an exact `(namespace, name, version)` match
    /// in the registry raises [`PlugindError::PluginAlreadyInstalled`],
    /// which the pipeline converts to a `completed` outcome.
    pub async fn validate(
        &self,
        raw: &Value,
        install_params: &InstallParams,
    ) -> Result<PluginMetadata> {
        tracing::debug!("validating metadata against version {}", self.current_version);

        let mut document = match raw {
            Value::Object(map) => map.clone(),
            _ => {
                let mut details = ValidationDetails::new();
                details.insert(
                    "metadata".to_string(),
                    ConstraintViolation::type_error("object").into_value(),
                );
                return Err(PlugindError::Validation { details });
            }
        };
        coerce_version_fields(&mut document);

        let mut details = ValidationDetails::new();
        self.check_identity(&document, &mut details);
        self.check_format_version(&document, &mut details);
        self.check_version_bounds(&document, &mut details);
        self.check_depends(&document, &mut details);

        if !details.is_empty() {
            return Err(PlugindError::Validation { details });
        }

        let metadata: PluginMetadata = serde_json::from_value(Value::Object(document))
            .map_err(|e| PlugindError::Metadata(e.to_string()))?;

        if !install_params.reinstall
            && self
                .registry
                .is_installed(&metadata.namespace, &metadata.name, Some(&metadata.version))
                .await
        {
            return Err(PlugindError::PluginAlreadyInstalled {
                namespace: metadata.namespace,
                name: metadata.name,
            });
        }

        Ok(metadata)
    }

    fn check_identity(&self, document: &Map<String, Value>, details: &mut ValidationDetails) {
        check_string_field(document, "namespace", Some(&self.namespace_re), details);
        check_string_field(document, "name", Some(&self.name_re), details);
        check_string_field(document, "version", None, details);
    }

    fn check_format_version(&self, document: &Map<String, Value>, details: &mut ValidationDetails) {
        let value = match document.get("plugin_format_version") {
            None => return,
            Some(value) => value,
        };
        match value.as_u64() {
            Some(version) if version <= u64::from(MAX_PLUGIN_FORMAT_VERSION) => {}
            Some(_) => {
                details.insert(
                    "plugin_format_version".to_string(),
                    ConstraintViolation::range_max(MAX_PLUGIN_FORMAT_VERSION).into_value(),
                );
            }
            None => {
                details.insert(
                    "plugin_format_version".to_string(),
                    ConstraintViolation::type_error("integer").into_value(),
                );
            }
        }
    }

    fn check_version_bounds(&self, document: &Map<String, Value>, details: &mut ValidationDetails) {
        let current = self.current_version.as_str();

        if let Some(min) = document.get("min_wazo_version") {
            match min.as_str() {
                Some(min) if version::less_than(Some(current), Some(min)) => {
                    details.insert(
                        "min_wazo_version".to_string(),
                        ConstraintViolation::range_max(current).into_value(),
                    );
                }
                Some(_) => {}
                None => {
                    details.insert(
                        "min_wazo_version".to_string(),
                        ConstraintViolation::type_error("string").into_value(),
                    );
                }
            }
        }

        if let Some(max) = document.get("max_wazo_version") {
            match max.as_str() {
                Some(max) if version::less_than(Some(max), Some(current)) => {
                    details.insert(
                        "max_wazo_version".to_string(),
                        ConstraintViolation::range_min(current).into_value(),
                    );
                }
                Some(_) => {}
                None => {
                    details.insert(
                        "max_wazo_version".to_string(),
                        ConstraintViolation::type_error("string").into_value(),
                    );
                }
            }
        }
    }

    fn check_depends(&self, document: &Map<String, Value>, details: &mut ValidationDetails) {
        let depends = match document.get("depends") {
            None | Some(Value::Null) => return,
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                details.insert(
                    "depends".to_string(),
                    ConstraintViolation::type_error("list").into_value(),
                );
                return;
            }
        };

        for (index, entry) in depends.iter().enumerate() {
            let valid = entry
                .as_object()
                .map(|object| {
                    is_non_empty_string(object.get("namespace"))
                        && is_non_empty_string(object.get("name"))
                })
                .unwrap_or(false);
            if !valid {
                details.insert(
                    format!("depends.{index}"),
                    ConstraintViolation::length_min(1).into_value(),
                );
            }
        }
    }
}

fn is_non_empty_string(value: Option<&Value>) -> bool {
    matches!(value, Some(Value::String(s)) if !s.is_empty())
}

fn check_string_field(
    document: &Map<String, Value>,
    field: &str,
    pattern: Option<&Regex>,
    details: &mut ValidationDetails,
) {
    match document.get(field) {
        None | Some(Value::Null) => {
            details.insert(field.to_string(), ConstraintViolation::required().into_value());
        }
        Some(Value::String(value)) => {
            if let Some(pattern) = pattern {
                if !pattern.is_match(value) {
                    details.insert(
                        field.to_string(),
                        ConstraintViolation::regex(pattern.as_str()).into_value(),
                    );
                }
            }
        }
        Some(_) => {
            details.insert(
                field.to_string(),
                ConstraintViolation::type_error("string").into_value(),
            );
        }
    }
}

/// Version fields supplied as YAML numbers are compared as strings; coerce
/// them before validation.
fn coerce_version_fields(document: &mut Map<String, Value>) {
    for field in VERSION_FIELDS {
        if let Some(value) = document.get(field) {
            if let Value::Number(number) = value {
                document.insert(field.to_string(), Value::String(number.to_string()));
            }
        }
    }
}
