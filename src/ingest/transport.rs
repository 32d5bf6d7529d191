// src/ingest/transport.rs
//! HTTP seam for adapters. Production uses `ReqwestTransport`; tests inject
//! their own implementation and never touch the network.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::error::FetchError;

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET `url` and return the body. Non-2xx statuses map to `FetchError::Status`.
    async fn get_text(&self, url: &str, headers: &[(&str, &str)]) -> Result<String, FetchError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(4).min(timeout))
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Misconfigured(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get_text(&self, url: &str, headers: &[(&str, &str)]) -> Result<String, FetchError> {
        let mut req = self.client.get(url);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                code: status.as_u16(),
            });
        }
        Ok(resp.text().await?)
    }
}
