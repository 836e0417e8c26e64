use crate::app::page::{Located, Page, Paginator};
use crate::error::{Result, ScraperError};
use async_trait::async_trait;

// Fetch-side ports
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    /// GET a URL. Non-success statuses are returned, not raised, except for
    /// throttling and server errors which the adapter retries.
    async fn get(&self, url: &str) -> Result<HttpGetResult>;
}

#[derive(Clone, Debug)]
pub struct HttpGetResult {
    pub status: u16,
    /// URL after redirects.
    pub final_url: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl HttpGetResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Fails on any non-success status.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ScraperError::Status {
                url: self.final_url,
                status: self.status,
            })
        }
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }
}

/// Page-level capability the scrapers drive: open a page, query it with
/// selectors, follow pagination links.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<Page>;

    async fn locate(&self, url: &str, selector: &str) -> Result<Vec<Located>> {
        self.navigate(url).await?.locate(selector)
    }

    fn paginate(&self, start_url: &str, next_selector: &str) -> Paginator {
        Paginator::new(start_url, next_selector)
    }
}
