//! Catalog queries over a market snapshot.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use deunicode::deunicode;
use serde::Deserialize;
use serde_json::Value;

use plugind_core::registry::PluginRegistry;
use plugind_core::version::less_than;
use plugind_core::{PlugindError, Result};

use crate::entry::MarketEntry;
use crate::proxy::MarketProxy;

/// Sort direction of a catalog listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Query parameters of a catalog listing.
#[derive(Debug, Clone)]
pub struct MarketListParams {
    /// Case-insensitive, accent-stripped substring search over every
    /// string or list value of an entry.
    pub search: Option<String>,
    pub order: String,
    pub direction: SortDirection,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Synthetic filter on the annotated `installed_version`.
    pub installed: Option<bool>,
    /// Remaining query parameters, applied as strict equality filters.
    pub extra_filters: BTreeMap<String, String>,
}

impl Default for MarketListParams {
    fn default() -> Self {
        Self {
            search: None,
            order: "name".to_string(),
            direction: SortDirection::Asc,
            limit: None,
            offset: 0,
            installed: None,
            extra_filters: BTreeMap::new(),
        }
    }
}

impl MarketListParams {
    fn has_filters(&self) -> bool {
        self.search.is_some() || self.installed.is_some() || !self.extra_filters.is_empty()
    }
}

/// Query engine over one catalog snapshot.
pub struct MarketDb {
    proxy: Arc<MarketProxy>,
    current_version: String,
    registry: PluginRegistry,
}

impl MarketDb {
    pub fn new(
        proxy: Arc<MarketProxy>,
        current_version: impl Into<String>,
        registry: PluginRegistry,
    ) -> Self {
        Self {
            proxy,
            current_version: current_version.into(),
            registry,
        }
    }

    /// Number of entries: filtered when any non-paging filter is active
    /// and `filtered` is requested, raw otherwise.
    pub async fn count(&self, params: &MarketListParams, filtered: bool) -> Result<usize> {
        let entries = self.annotated().await?;
        if !filtered || !params.has_filters() {
            return Ok(entries.len());
        }
        let entries = strict_filter(entries, params);
        let entries = search_filter(entries, params.search.as_deref());
        Ok(entries.len())
    }

    /// Filter, search, sort and paginate the catalog.
    pub async fn list(&self, params: &MarketListParams) -> Result<Vec<MarketEntry>> {
        let entries = self.annotated().await?;
        let entries = strict_filter(entries, params);
        let entries = search_filter(entries, params.search.as_deref());
        let entries = sort(entries, &params.order, params.direction)?;
        Ok(paginate(entries, params.limit, params.offset))
    }

    /// One entry by exact identity.
    pub async fn get(&self, namespace: &str, name: &str) -> Result<MarketEntry> {
        let entries = self.annotated().await?;
        entries
            .into_iter()
            .find(|entry| entry.namespace == namespace && entry.name == name)
            .ok_or_else(|| PlugindError::PluginNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn annotated(&self) -> Result<Vec<MarketEntry>> {
        let mut entries = self.proxy.content().await?.to_vec();
        for entry in &mut entries {
            self.annotate(entry).await;
        }
        Ok(entries)
    }

    /// Fill `installed_version` from the registry and compute
    /// `upgradable` for every version row.
    async fn annotate(&self, entry: &mut MarketEntry) {
        let plugin = self.registry.get_plugin(&entry.namespace, &entry.name);
        let installed_version = plugin.metadata().await.ok().map(|m| m.version);
        entry.installed_version = installed_version.clone();

        let current = self.current_version.as_str();
        for row in &mut entry.versions {
            let min = row.min_wazo_version.as_deref().unwrap_or(current);
            let max = row.max_wazo_version.as_deref().unwrap_or(current);

            row.upgradable = if less_than(Some(current), Some(min)) {
                false
            } else if less_than(Some(max), Some(current)) {
                false
            } else if let Some(installed) = &installed_version {
                // still upgradable only when the row is strictly newer
                less_than(Some(installed), row.version.as_deref())
            } else {
                true
            };
        }
    }
}

fn strict_filter(entries: Vec<MarketEntry>, params: &MarketListParams) -> Vec<MarketEntry> {
    entries
        .into_iter()
        .filter(|entry| {
            if let Some(installed) = params.installed {
                if entry.installed_version.is_some() != installed {
                    return false;
                }
            }
            if params.extra_filters.is_empty() {
                return true;
            }
            let object = entry.as_object();
            params.extra_filters.iter().all(|(key, expected)| {
                matches!(object.get(key), Some(Value::String(actual)) if actual == expected)
            })
        })
        .collect()
}

fn search_filter(entries: Vec<MarketEntry>, search: Option<&str>) -> Vec<MarketEntry> {
    let search = match search {
        Some(search) if !search.is_empty() => normalize_caseless(search),
        _ => return entries,
    };

    entries
        .into_iter()
        .filter(|entry| {
            entry.as_object().values().any(|value| match value {
                Value::String(s) => normalize_caseless(s).contains(&search),
                Value::Array(items) => items.iter().any(
                    |item| matches!(item, Value::String(s) if normalize_caseless(s).contains(&search)),
                ),
                _ => false,
            })
        })
        .collect()
}

/// Accent-stripped, case-folded form used for searching.
fn normalize_caseless(s: &str) -> String {
    deunicode(s).to_lowercase()
}

#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Text(String),
    Number(f64),
}

fn sort(
    entries: Vec<MarketEntry>,
    order: &str,
    direction: SortDirection,
) -> Result<Vec<MarketEntry>> {
    let mut keyed: Vec<(Option<SortKey>, MarketEntry)> = Vec::with_capacity(entries.len());
    let mut seen_text = false;
    let mut seen_number = false;

    for entry in entries {
        let key = match entry.as_object().get(order) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => {
                seen_text = true;
                Some(SortKey::Text(s.clone()))
            }
            Some(Value::Number(n)) => {
                seen_number = true;
                Some(SortKey::Number(n.as_f64().unwrap_or(f64::NAN)))
            }
            Some(_) => {
                return Err(PlugindError::InvalidSortParam {
                    column: order.to_string(),
                })
            }
        };
        keyed.push((key, entry));
    }

    if seen_text && seen_number {
        return Err(PlugindError::InvalidSortParam {
            column: order.to_string(),
        });
    }

    // stable sort: ties and missing keys keep their input order; entries
    // without the sort key always order last (first in descending order)
    keyed.sort_by(|(left, _), (right, _)| {
        let ordering = match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(SortKey::Text(l)), Some(SortKey::Text(r))) => l.cmp(r),
            (Some(SortKey::Number(l)), Some(SortKey::Number(r))) => {
                l.partial_cmp(r).unwrap_or(Ordering::Equal)
            }
            _ => Ordering::Equal,
        };
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });

    Ok(keyed.into_iter().map(|(_, entry)| entry).collect())
}

fn paginate(entries: Vec<MarketEntry>, limit: Option<usize>, offset: usize) -> Vec<MarketEntry> {
    entries
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugind_core::Config;
    use serde_json::json;
    use tempfile::TempDir;

    const CURRENT_VERSION: &str = "17.12";

    struct Fixture {
        _metadata_dir: TempDir,
        db: MarketDb,
    }

    async fn fixture(content: Value, installed: &[(&str, &str, &str)]) -> Fixture {
        let metadata_dir = TempDir::new().unwrap();
        for (namespace, name, version) in installed {
            let path = metadata_dir
                .path()
                .join(namespace)
                .join(name)
                .join("wazo/plugin.yml");
            tokio::fs::create_dir_all(path.parent().unwrap())
                .await
                .unwrap();
            tokio::fs::write(
                &path,
                format!("namespace: {namespace}\nname: {name}\nversion: '{version}'\n"),
            )
            .await
            .unwrap();
        }

        let config = Config {
            metadata_dir: metadata_dir.path().to_path_buf(),
            ..Config::default()
        };
        let registry = PluginRegistry::new(Arc::new(config));
        let entries: Vec<MarketEntry> = serde_json::from_value(content).unwrap();
        let proxy = Arc::new(MarketProxy::preloaded(entries));

        Fixture {
            _metadata_dir: metadata_dir,
            db: MarketDb::new(proxy, CURRENT_VERSION, registry),
        }
    }

    fn entry(namespace: &str, name: &str, versions: Value) -> Value {
        json!({"namespace": namespace, "name": name, "versions": versions})
    }

    #[tokio::test]
    async fn test_installed_version_is_added() {
        let fixture = fixture(
            json!([entry("foobar", "foo", json!([]))]),
            &[("foobar", "foo", "0.0.1")],
        )
        .await;

        let result = fixture.db.get("foobar", "foo").await.unwrap();
        assert_eq!(result.installed_version.as_deref(), Some("0.0.1"));
    }

    #[tokio::test]
    async fn test_upgradable_with_min_version_too_high() {
        let fixture = fixture(
            json!([entry("foobar", "foo", json!([{"min_wazo_version": "17.13"}]))]),
            &[],
        )
        .await;

        let result = fixture.db.get("foobar", "foo").await.unwrap();
        assert!(!result.versions[0].upgradable);
    }

    #[tokio::test]
    async fn test_upgradable_with_min_version_that_is_ok() {
        let fixture = fixture(
            json!([entry("foobar", "foo", json!([{"min_wazo_version": CURRENT_VERSION}]))]),
            &[],
        )
        .await;

        let result = fixture.db.get("foobar", "foo").await.unwrap();
        assert!(result.versions[0].upgradable);
    }

    #[tokio::test]
    async fn test_upgradable_with_max_version_too_low() {
        let fixture = fixture(
            json!([entry("foobar", "foo", json!([{"max_wazo_version": "17.11"}]))]),
            &[],
        )
        .await;

        let result = fixture.db.get("foobar", "foo").await.unwrap();
        assert!(!result.versions[0].upgradable);
    }

    #[tokio::test]
    async fn test_upgradable_against_installed_version() {
        let fixture = fixture(
            json!([entry(
                "foobar",
                "foo",
                json!([
                    {"version": "0.0.1"},
                    {"version": "0.0.2"},
                    {"version": "0.0.3"},
                ])
            )]),
            &[("foobar", "foo", "0.0.2")],
        )
        .await;

        let result = fixture.db.get("foobar", "foo").await.unwrap();
        let upgradable: Vec<bool> = result.versions.iter().map(|v| v.upgradable).collect();
        // older and equal versions are not upgradable, newer is
        assert_eq!(upgradable, vec![false, false, true]);
    }

    #[tokio::test]
    async fn test_get_missing_plugin() {
        let fixture = fixture(json!([]), &[]).await;
        let err = fixture.db.get("foobar", "foo").await.unwrap_err();
        assert!(matches!(err, PlugindError::PluginNotFound { .. }));
    }

    #[tokio::test]
    async fn test_search_is_accent_and_case_insensitive() {
        let fixture = fixture(
            json!([
                entry("official", "admin-ui-conference", json!([])),
                entry("official", "admin-ui-moh", json!([])),
            ]),
            &[],
        )
        .await;

        let params = MarketListParams {
            search: Some("CONFÉRENCE".to_string()),
            ..MarketListParams::default()
        };
        let result = fixture.db.list(&params).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "admin-ui-conference");
    }

    #[tokio::test]
    async fn test_search_matches_list_values() {
        let fixture = fixture(
            json!([
                {"namespace": "official", "name": "foo", "tags": ["conference"], "versions": []},
                {"namespace": "official", "name": "bar", "tags": ["queue"], "versions": []},
            ]),
            &[],
        )
        .await;

        let params = MarketListParams {
            search: Some("conference".to_string()),
            ..MarketListParams::default()
        };
        let result = fixture.db.list(&params).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "foo");
    }

    #[tokio::test]
    async fn test_installed_filter() {
        let fixture = fixture(
            json!([
                entry("official", "installed-one", json!([])),
                entry("official", "other", json!([])),
            ]),
            &[("official", "installed-one", "1.0")],
        )
        .await;

        let params = MarketListParams {
            installed: Some(true),
            ..MarketListParams::default()
        };
        let result = fixture.db.list(&params).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "installed-one");

        let params = MarketListParams {
            installed: Some(false),
            ..MarketListParams::default()
        };
        let result = fixture.db.list(&params).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "other");
    }

    #[tokio::test]
    async fn test_strict_filters() {
        let fixture = fixture(
            json!([
                entry("official", "foo", json!([])),
                entry("community", "foo", json!([])),
            ]),
            &[],
        )
        .await;

        let params = MarketListParams {
            extra_filters: BTreeMap::from([("namespace".to_string(), "community".to_string())]),
            ..MarketListParams::default()
        };
        let result = fixture.db.list(&params).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].namespace, "community");
    }

    #[tokio::test]
    async fn test_sort_and_paginate() {
        let fixture = fixture(
            json!([
                entry("official", "c", json!([])),
                entry("official", "a", json!([])),
                entry("official", "b", json!([])),
            ]),
            &[],
        )
        .await;

        let params = MarketListParams {
            order: "name".to_string(),
            direction: SortDirection::Desc,
            limit: Some(2),
            offset: 1,
            ..MarketListParams::default()
        };
        let result = fixture.db.list(&params).await.unwrap();
        let names: Vec<&str> = result.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_sort_on_unorderable_column() {
        let fixture = fixture(
            json!([
                entry("official", "a", json!([{"version": "1.0"}])),
                entry("official", "b", json!([{"version": "2.0"}])),
            ]),
            &[],
        )
        .await;

        let params = MarketListParams {
            order: "versions".to_string(),
            ..MarketListParams::default()
        };
        let err = fixture.db.list(&params).await.unwrap_err();
        assert!(matches!(err, PlugindError::InvalidSortParam { .. }));
    }

    #[tokio::test]
    async fn test_missing_sort_key_orders_last() {
        let fixture = fixture(
            json!([
                {"namespace": "official", "name": "b", "author": "zed", "versions": []},
                {"namespace": "official", "name": "a", "versions": []},
                {"namespace": "official", "name": "c", "author": "alice", "versions": []},
            ]),
            &[],
        )
        .await;

        let params = MarketListParams {
            order: "author".to_string(),
            ..MarketListParams::default()
        };
        let result = fixture.db.list(&params).await.unwrap();
        let names: Vec<&str> = result.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_counts() {
        let fixture = fixture(
            json!([
                entry("official", "admin-ui-conference", json!([])),
                entry("official", "other", json!([])),
            ]),
            &[],
        )
        .await;

        let params = MarketListParams {
            search: Some("conference".to_string()),
            ..MarketListParams::default()
        };
        assert_eq!(fixture.db.count(&params, false).await.unwrap(), 2);
        assert_eq!(fixture.db.count(&params, true).await.unwrap(), 1);
    }
}
