//! reqwest-backed transport for the hosted database API.

use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::debug;

use stationsync_common::{Error, Result};

use crate::config::ClientConfig;
use crate::request::PageRequest;
use crate::transport::{PageTransport, RawResponse};

/// HTTP transport authenticating with a database token.
pub struct HttpTransport {
    http: Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// Create a transport from validated settings.
    ///
    /// # Errors
    /// - Configuration fails validation
    /// - The HTTP client cannot be built
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let http = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Settings this transport was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.config.credential.expose())
    }

    fn map_send_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout(self.config.request_timeout)
        } else {
            Error::Network(format!("Failed to reach upstream: {}", err))
        }
    }
}

#[async_trait]
impl PageTransport for HttpTransport {
    async fn send(&self, request: &PageRequest) -> Result<RawResponse> {
        let url = self.config.collection_url(&request.collection_path)?;

        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, self.auth_header())
            .query(&request.query_pairs())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_send_error(e))?
            .to_vec();

        debug!(
            collection = %request.collection_path,
            offset = ?request.offset(),
            status,
            bytes = body.len(),
            "Page response received"
        );

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
