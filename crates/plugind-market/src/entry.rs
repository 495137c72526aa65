//! Catalog entry model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One plugin advertised by the market.
///
/// The catalog carries free-form descriptive fields (author, tags,
/// screenshots, ...); they are preserved in `extra` so filtering, search
/// and sort can see them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEntry {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub versions: Vec<MarketVersion>,
    #[serde(default)]
    pub installed_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One installable version row of a catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketVersion {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_wazo_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wazo_version: Option<String>,
    #[serde(default)]
    pub upgradable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

impl MarketEntry {
    /// The entry as a JSON object, for field-based filtering and sorting.
    pub fn as_object(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extra_fields_are_preserved() {
        let entry: MarketEntry = serde_json::from_value(json!({
            "namespace": "official",
            "name": "admin-ui-conference",
            "author": "Wazo",
            "tags": ["conference", "admin"],
            "versions": [{"version": "1.0.0"}],
        }))
        .unwrap();

        assert_eq!(entry.extra["author"], "Wazo");
        let object = entry.as_object();
        assert_eq!(object["name"], "admin-ui-conference");
        assert_eq!(object["tags"], json!(["conference", "admin"]));
    }
}
