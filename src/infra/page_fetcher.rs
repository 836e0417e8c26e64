use crate::app::page::Page;
use crate::app::ports::{HttpClientPort, PageFetcher};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Page navigation over plain HTTP. Pages are not rendered, so sites that
/// need JavaScript only expose what their server-side markup contains.
pub struct HttpPageFetcher {
    http: Arc<dyn HttpClientPort>,
    delay: Duration,
}

impl HttpPageFetcher {
    pub fn new(http: Arc<dyn HttpClientPort>, delay: Duration) -> Self {
        Self { http, delay }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn navigate(&self, url: &str) -> Result<Page> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self.http.get(url).await?;
        Ok(Page::new(response.final_url.clone(), response.status, response.text()))
    }
}
