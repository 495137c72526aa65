//! Thin client over the identity service.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use plugind_core::config::AuthConfig;
use plugind_core::{PlugindError, Result};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    data: TokenData,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    #[serde(default)]
    metadata: TokenMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct TokenMetadata {
    #[serde(default)]
    tenant_uuid: Option<String>,
}

/// Outcome of a token check.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub tenant_uuid: Option<String>,
}

/// Client for token validation and master-tenant discovery.
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl AuthClient {
    pub fn new(config: &AuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("wazo-plugind")
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    /// Validate a caller token and return its tenant.
    pub async fn check_token(&self, token: &str) -> Result<TokenInfo> {
        let url = format!("{}/token/{}", self.base_url, token);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|_| PlugindError::Unauthorized)?;

        if !response.status().is_success() {
            return Err(PlugindError::Unauthorized);
        }

        let body: TokenResponse = response.json().await.map_err(|_| PlugindError::Unauthorized)?;
        Ok(TokenInfo {
            tenant_uuid: body.data.metadata.tenant_uuid,
        })
    }

    /// Create a token with the service credentials and return its tenant:
    /// the master tenant the API gates on.
    pub async fn master_tenant(&self) -> Result<String> {
        let (username, password) = match (&self.username, &self.password) {
            (Some(username), Some(password)) => (username.clone(), password.clone()),
            _ => {
                return Err(PlugindError::Config(
                    "auth service credentials are not configured".to_string(),
                ))
            }
        };

        let url = format!("{}/token", self.base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(username, Some(password))
            .json(&json!({"expiration": 60}))
            .send()
            .await
            .map_err(|e| PlugindError::Internal(format!("auth service is unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(PlugindError::Internal(format!(
                "auth service answered {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| PlugindError::Internal(format!("unexpected auth payload: {e}")))?;
        body.data.metadata.tenant_uuid.ok_or_else(|| {
            PlugindError::Internal("the service token carries no tenant".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn auth_config(url: String) -> AuthConfig {
        AuthConfig {
            url,
            username: Some("wazo-plugind".to_string()),
            password: Some("secret".to_string()),
            ..AuthConfig::default()
        }
    }

    #[tokio::test]
    async fn test_check_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token/valid-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"metadata": {"tenant_uuid": "the-master-tenant"}}
            })))
            .mount(&server)
            .await;

        let client = AuthClient::new(&auth_config(server.uri()));
        let info = client.check_token("valid-token").await.unwrap();
        assert_eq!(info.tenant_uuid.as_deref(), Some("the-master-tenant"));

        let err = client.check_token("unknown-token").await.unwrap_err();
        assert!(matches!(err, PlugindError::Unauthorized));
    }

    #[tokio::test]
    async fn test_master_tenant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"token": "t", "metadata": {"tenant_uuid": "the-master-tenant"}}
            })))
            .mount(&server)
            .await;

        let client = AuthClient::new(&auth_config(server.uri()));
        assert_eq!(client.master_tenant().await.unwrap(), "the-master-tenant");
    }
}
