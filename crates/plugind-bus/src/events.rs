//! Typed progress events.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use plugind_core::error::ApiError;

/// Event name of install progress messages.
pub const PLUGIN_INSTALL_PROGRESS: &str = "plugin_install_progress";

/// Event name of uninstall progress messages.
pub const PLUGIN_UNINSTALL_PROGRESS: &str = "plugin_uninstall_progress";

/// The error payload attached to a terminal `error` event.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressError {
    pub error_id: String,
    pub message: String,
    pub resource: String,
    pub details: Value,
}

impl ProgressError {
    pub fn new(error_id: impl Into<String>, message: impl Into<String>, details: Value) -> Self {
        Self {
            error_id: error_id.into(),
            message: message.into(),
            resource: "plugins".to_string(),
            details,
        }
    }
}

impl From<ApiError> for ProgressError {
    fn from(api: ApiError) -> Self {
        Self {
            error_id: api.error_id,
            message: api.message,
            resource: api.resource.unwrap_or_else(|| "plugins".to_string()),
            details: api.details.unwrap_or_else(|| Value::Object(Default::default())),
        }
    }
}

/// One progress event, ready to publish.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Event name, also set as the `name` routing header.
    pub name: &'static str,
    pub uuid: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ProgressError>,
}

impl ProgressEvent {
    pub fn install(uuid: Uuid, status: impl Into<String>) -> Self {
        Self {
            name: PLUGIN_INSTALL_PROGRESS,
            uuid,
            status: status.into(),
            errors: None,
        }
    }

    pub fn install_error(uuid: Uuid, error: ProgressError) -> Self {
        Self {
            name: PLUGIN_INSTALL_PROGRESS,
            uuid,
            status: "error".to_string(),
            errors: Some(error),
        }
    }

    pub fn uninstall(uuid: Uuid, status: impl Into<String>) -> Self {
        Self {
            name: PLUGIN_UNINSTALL_PROGRESS,
            uuid,
            status: status.into(),
            errors: None,
        }
    }

    pub fn uninstall_error(uuid: Uuid, error: ProgressError) -> Self {
        Self {
            name: PLUGIN_UNINSTALL_PROGRESS,
            uuid,
            status: "error".to_string(),
            errors: Some(error),
        }
    }

    /// The message body: `{name, origin_uuid?, data: {uuid, status,
    /// errors?}}`.
    pub fn payload(&self, origin_uuid: Option<&str>) -> Value {
        let mut data = serde_json::json!({
            "uuid": self.uuid,
            "status": self.status,
        });
        if let Some(errors) = &self.errors {
            data["errors"] = serde_json::to_value(errors).unwrap_or(Value::Null);
        }

        let mut body = serde_json::json!({
            "name": self.name,
            "data": data,
        });
        if let Some(origin) = origin_uuid {
            body["origin_uuid"] = Value::String(origin.to_string());
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_payload() {
        let uuid = Uuid::new_v4();
        let event = ProgressEvent::install(uuid, "starting");
        let payload = event.payload(Some("service-uuid"));

        assert_eq!(payload["name"], "plugin_install_progress");
        assert_eq!(payload["origin_uuid"], "service-uuid");
        assert_eq!(payload["data"]["uuid"], uuid.to_string());
        assert_eq!(payload["data"]["status"], "starting");
        assert!(payload["data"].get("errors").is_none());
    }

    #[test]
    fn test_error_payload() {
        let uuid = Uuid::new_v4();
        let error = ProgressError::new(
            "install-error",
            "Installation error",
            serde_json::json!({"step": "building"}),
        );
        let event = ProgressEvent::install_error(uuid, error);
        let payload = event.payload(None);

        assert_eq!(payload["data"]["status"], "error");
        assert_eq!(payload["data"]["errors"]["error_id"], "install-error");
        assert_eq!(payload["data"]["errors"]["resource"], "plugins");
        assert_eq!(payload["data"]["errors"]["details"]["step"], "building");
        assert!(payload.get("origin_uuid").is_none());
    }

    #[test]
    fn test_uninstall_event_name() {
        let event = ProgressEvent::uninstall(Uuid::new_v4(), "removing");
        assert_eq!(event.name, PLUGIN_UNINSTALL_PROGRESS);
    }
}
