use crate::error::{Result, ScraperError};
use crate::types::{AcquireContext, RawDataAcquirer, RawPayload};
use tracing::{info, instrument};

/// Downloads the configured `URL` verbatim.
pub struct Download;

#[async_trait::async_trait]
impl RawDataAcquirer for Download {
    #[instrument(skip(self, ctx), fields(url = %ctx.config.url))]
    async fn acquire(&self, ctx: &AcquireContext) -> Result<RawPayload> {
        let bytes = fetch_bytes(ctx, &ctx.config.url).await?;
        info!("Downloaded {} bytes", bytes.len());
        Ok(RawPayload::Bytes(bytes))
    }
}

pub async fn fetch_bytes(ctx: &AcquireContext, url: &str) -> Result<Vec<u8>> {
    if url.trim().is_empty() {
        return Err(ScraperError::Config("URL is not configured".into()));
    }
    let response = ctx.http.get(url).await?.error_for_status()?;
    Ok(response.bytes)
}
