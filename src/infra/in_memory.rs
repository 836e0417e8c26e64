//! In-memory web for development and testing: canned responses keyed by exact URL.
//!
//! `StaticWeb` implements both fetch ports, so a `Pipeline` can run a source
//! offline against recorded pages. Unknown URLs answer 404.

use crate::app::page::Page;
use crate::app::ports::{HttpClientPort, HttpGetResult, PageFetcher};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct CannedResponse {
    status: u16,
    final_url: Option<String>,
    body: Vec<u8>,
    content_type: String,
}

/// In-memory web implementation for development/testing
#[derive(Debug, Default)]
pub struct StaticWeb {
    responses: HashMap<String, CannedResponse>,
    requests: Mutex<Vec<String>>,
}

impl StaticWeb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.with_response(url, 200, html.as_bytes(), "text/html")
    }

    pub fn with_json(self, url: &str, body: &str) -> Self {
        self.with_response(url, 200, body.as_bytes(), "application/json")
    }

    pub fn with_response(mut self, url: &str, status: u16, body: &[u8], content_type: &str) -> Self {
        self.responses.insert(
            url.to_string(),
            CannedResponse {
                status,
                final_url: None,
                body: body.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        self
    }

    /// Serves `html` as if `url` had redirected to `final_url`.
    pub fn with_redirect(mut self, url: &str, final_url: &str, html: &str) -> Self {
        self.responses.insert(
            url.to_string(),
            CannedResponse {
                status: 200,
                final_url: Some(final_url.to_string()),
                body: html.as_bytes().to_vec(),
                content_type: "text/html".to_string(),
            },
        );
        self
    }

    /// Every URL requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HttpClientPort for StaticWeb {
    async fn get(&self, url: &str) -> Result<HttpGetResult> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(url.to_string());
        }
        Ok(match self.responses.get(url) {
            Some(canned) => HttpGetResult {
                status: canned.status,
                final_url: canned.final_url.clone().unwrap_or_else(|| url.to_string()),
                bytes: canned.body.clone(),
                content_type: canned.content_type.clone(),
            },
            None => HttpGetResult {
                status: 404,
                final_url: url.to_string(),
                bytes: b"<html><head><title>Not Found</title></head></html>".to_vec(),
                content_type: "text/html".to_string(),
            },
        })
    }
}

#[async_trait]
impl PageFetcher for StaticWeb {
    async fn navigate(&self, url: &str) -> Result<Page> {
        let response = HttpClientPort::get(self, url).await?;
        Ok(Page::new(response.final_url.clone(), response.status, response.text()))
    }
}
