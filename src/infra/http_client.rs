use crate::app::ports::{HttpClientPort, HttpGetResult};
use crate::config::HttpSettings;
use crate::error::{Result, ScraperError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

pub struct ReqwestHttp {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ReqwestHttp {
    pub fn new(settings: &HttpSettings, retry: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .gzip(true)
            .build()?;
        Ok(Self { client, retry })
    }

    async fn get_once(&self, url: &str) -> Result<HttpGetResult> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        if status == 429 || status >= 500 {
            return Err(ScraperError::Status { url: final_url, status });
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = resp.bytes().await?.to_vec();
        debug!("GET {} -> {} ({} bytes)", url, status, bytes.len());
        Ok(HttpGetResult {
            status,
            final_url,
            bytes,
            content_type,
        })
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str) -> Result<HttpGetResult> {
        self.retry
            .run(&format!("GET {url}"), |_| self.get_once(url))
            .await
    }
}
