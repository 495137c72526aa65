//! Host version discovery.

use serde::Deserialize;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::error::{PlugindError, Result};

#[derive(Debug, Deserialize)]
struct InfosResponse {
    wazo_version: String,
}

/// Resolves the running appliance's version.
///
/// Resolution order: the `WAZO_VERSION` environment variable, the static
/// `wazo_version` configuration value, then a query to the configuration
/// service. The answer is cached for the daemon's lifetime.
pub struct WazoVersionFinder {
    confd_url: String,
    configured: Option<String>,
    client: reqwest::Client,
    cached: OnceCell<String>,
}

impl WazoVersionFinder {
    pub fn new(config: &Config) -> Self {
        Self {
            confd_url: config.confd.url.clone(),
            configured: config.wazo_version.clone(),
            client: reqwest::Client::new(),
            cached: OnceCell::new(),
        }
    }

    /// The host version string.
    pub async fn version(&self) -> Result<String> {
        let version = self
            .cached
            .get_or_try_init(|| async {
                if let Ok(version) = std::env::var("WAZO_VERSION") {
                    if !version.is_empty() {
                        return Ok(version);
                    }
                }
                if let Some(version) = &self.configured {
                    return Ok(version.clone());
                }
                self.query_confd().await
            })
            .await?;
        Ok(version.clone())
    }

    async fn query_confd(&self) -> Result<String> {
        tracing::debug!("querying confd for the current version");
        let url = format!("{}/infos", self.confd_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PlugindError::Internal(format!("confd is unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(PlugindError::Internal(format!(
                "confd answered {} on {url}",
                response.status()
            )));
        }

        let infos: InfosResponse = response
            .json()
            .await
            .map_err(|e| PlugindError::Internal(format!("unexpected confd payload: {e}")))?;
        Ok(infos.wazo_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_configured_version_wins_over_confd() {
        let config = Config {
            wazo_version: Some("17.12".to_string()),
            ..Config::default()
        };
        let finder = WazoVersionFinder::new(&config);
        assert_eq!(finder.version().await.unwrap(), "17.12");
    }

    #[tokio::test]
    async fn test_confd_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/infos"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "uuid": "0c4a92cf-2b0c-4a4a-bb94-8a2a2a20ef2b",
                    "wazo_version": "23.05",
                })),
            )
            .mount(&server)
            .await;

        let config = Config {
            wazo_version: None,
            confd: crate::config::ConfdConfig { url: server.uri() },
            ..Config::default()
        };
        let finder = WazoVersionFinder::new(&config);
        assert_eq!(finder.version().await.unwrap(), "23.05");
    }
}
