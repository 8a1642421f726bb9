//! RPC endpoint resolution.

use async_trait::async_trait;

use ayia_proto::{Endpoint, RemoteConfig};

use crate::error::Error;

/// Source of the RPC endpoint, consulted before every fresh connection.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Resolve the endpoint to connect to.
    async fn resolve(&self) -> Result<Endpoint, Error>;
}

/// Fetches `GET {base}/config` and reads `web_services.{host,port}`.
#[derive(Debug, Clone)]
pub struct HttpConfigResolver {
    client: reqwest::Client,
    config_url: String,
}

impl HttpConfigResolver {
    /// Resolve against the web application at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            config_url: format!("{}/config", base_url.trim_end_matches('/')),
        }
    }

    /// Full URL of the configuration document.
    pub fn config_url(&self) -> &str {
        &self.config_url
    }

    /// Fetch and decode the configuration document.
    pub async fn fetch_config(&self) -> Result<RemoteConfig, Error> {
        let response = self
            .client
            .get(&self.config_url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| Error::Config(format!("GET {}: {}", self.config_url, e)))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Config(format!("GET {}: {}", self.config_url, e)))?;

        let config = RemoteConfig::from_value(body)?;
        tracing::debug!(url = %self.config_url, ?config, "configuration fetched");
        Ok(config)
    }
}

#[async_trait]
impl EndpointResolver for HttpConfigResolver {
    async fn resolve(&self) -> Result<Endpoint, Error> {
        let endpoint = self.fetch_config().await?.endpoint()?;
        tracing::info!(url = %self.config_url, endpoint = %endpoint, "endpoint resolved");
        Ok(endpoint)
    }
}

/// Always yields the same endpoint.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    endpoint: Endpoint,
}

impl StaticResolver {
    /// Create a resolver for `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl EndpointResolver for StaticResolver {
    async fn resolve(&self) -> Result<Endpoint, Error> {
        Ok(self.endpoint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_resolver() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "verbosity": 2,
                "web_services": {"host": "rpc.example.org", "port": 443},
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resolver = HttpConfigResolver::new(&format!("{}/", server.uri()));
        assert_eq!(resolver.config_url(), format!("{}/config", server.uri()));

        let endpoint = resolver.resolve().await.unwrap();
        assert_eq!(endpoint.host(), "rpc.example.org");
        assert_eq!(endpoint.url(), "wss://rpc.example.org:443");
    }

    #[tokio::test]
    async fn test_http_resolver_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = HttpConfigResolver::new(&server.uri())
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_http_resolver_bad_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"web": {}})))
            .mount(&server)
            .await;

        let err = HttpConfigResolver::new(&server.uri())
            .resolve()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let endpoint = Endpoint::new("localhost", 4000).unwrap();
        let resolved = StaticResolver::new(endpoint.clone()).resolve().await.unwrap();
        assert_eq!(resolved, endpoint);
    }
}
