//! One-shot market catalog fetch.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::OnceCell;

use plugind_core::config::MarketConfig;
use plugind_core::{PlugindError, Result};

use crate::entry::MarketEntry;

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    items: Vec<MarketEntry>,
}

/// Fetches the catalog once and serves it for the lifetime of a request.
///
/// A proxy is created per HTTP request or per download so several queries
/// (list + counts, or get + version selection) share one fetch.
pub struct MarketProxy {
    client: reqwest::Client,
    url: String,
    content: OnceCell<Vec<MarketEntry>>,
}

impl MarketProxy {
    pub fn new(config: &MarketConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("wazo-plugind")
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: config.url.clone(),
            content: OnceCell::new(),
        }
    }

    /// A proxy pre-loaded with catalog content, bypassing the network.
    pub fn preloaded(entries: Vec<MarketEntry>) -> Self {
        let content = OnceCell::new();
        let _ = content.set(entries);
        Self {
            client: reqwest::Client::new(),
            url: String::new(),
            content,
        }
    }

    /// The catalog snapshot, fetching it on first access.
    pub async fn content(&self) -> Result<&[MarketEntry]> {
        let entries = self
            .content
            .get_or_try_init(|| self.fetch_plugin_list())
            .await?;
        Ok(entries)
    }

    async fn fetch_plugin_list(&self) -> Result<Vec<MarketEntry>> {
        let url = format!("{}/plugins", self.url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            tracing::info!("failed to fetch plugins from the market: {e}");
            PlugindError::MarketUnavailable
        })?;

        if !response.status().is_success() {
            tracing::info!(
                "failed to fetch plugins from the market: {}",
                response.status()
            );
            return Err(PlugindError::MarketUnavailable);
        }

        let catalog: CatalogResponse = response.json().await.map_err(|e| {
            tracing::info!("unexpected market payload: {e}");
            PlugindError::MarketUnavailable
        })?;
        Ok(catalog.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"namespace": "official", "name": "admin-ui-conference"}],
                "total": 1,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let proxy = MarketProxy::new(&MarketConfig { url: server.uri() });
        let first = proxy.content().await.unwrap().len();
        let second = proxy.content().await.unwrap().len();
        assert_eq!(first, 1);
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn test_unreachable_market() {
        let proxy = MarketProxy::new(&MarketConfig {
            url: "http://127.0.0.1:1/market".to_string(),
        });
        let err = proxy.content().await.unwrap_err();
        assert!(matches!(err, PlugindError::MarketUnavailable));
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/plugins"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let proxy = MarketProxy::new(&MarketConfig { url: server.uri() });
        assert!(matches!(
            proxy.content().await.unwrap_err(),
            PlugindError::MarketUnavailable
        ));
    }
}
