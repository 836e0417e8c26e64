use crate::app::page::Page;
use crate::app::ports::{HttpClientPort, PageFetcher};
use crate::config::SourceConfig;
use crate::error::Result;
use crate::normalize::DedupPolicy;
use crate::raw_data::RawFormat;
use crate::retry::RetryPolicy;
use crate::tagpack::{CanonicalTag, PackHeader};
use std::sync::Arc;

/// One as-scraped record, shaped however the source delivers it.
pub type RawRecord = serde_json::Value;

/// What an acquirer hands back for persisting.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// A verbatim download, stored byte for byte.
    Bytes(Vec<u8>),
    /// Scraped records, serialized in the source's raw format.
    Records(Vec<RawRecord>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquireMode {
    #[default]
    Fresh,
    /// Continue from the records already on disk.
    Update,
}

/// Everything an acquirer may use while fetching.
#[derive(Clone)]
pub struct AcquireContext {
    pub config: SourceConfig,
    pub http: Arc<dyn HttpClientPort>,
    pub pages: Arc<dyn PageFetcher>,
    pub retry: RetryPolicy,
    pub mode: AcquireMode,
    /// Records from a previous run, only loaded in update mode.
    pub existing: Vec<RawRecord>,
}

impl AcquireContext {
    pub fn new(
        config: SourceConfig,
        http: Arc<dyn HttpClientPort>,
        pages: Arc<dyn PageFetcher>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            config,
            http,
            pages,
            retry,
            mode: AcquireMode::Fresh,
            existing: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: AcquireMode, existing: Vec<RawRecord>) -> Self {
        self.mode = mode;
        self.existing = existing;
        self
    }

    /// Navigates until `selector` is present on the page, within the retry
    /// budget.
    pub async fn open_page(&self, url: &str, selector: &str) -> Result<Page> {
        self.retry
            .run(&format!("open {url}"), |_| async move {
                let page = self.pages.navigate(url).await?;
                page.require(selector)?;
                Ok(page)
            })
            .await
    }
}

/// Fetches a source's raw data.
#[async_trait::async_trait]
pub trait RawDataAcquirer: Send + Sync {
    async fn acquire(&self, ctx: &AcquireContext) -> Result<RawPayload>;
}

pub struct NormalizeContext<'a> {
    pub config: &'a SourceConfig,
}

/// Maps raw records to canonical tags.
pub trait RecordNormalizer: Send + Sync {
    /// Keys a row must carry (non-null) to be considered at all.
    fn required_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Tags for one row. An error skips the row with a warning.
    fn normalize(&self, row: &RawRecord, ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastmodPolicy {
    /// Modification date of the raw data file.
    RawFileModified,
    /// The day the TagPack is generated.
    Today,
}

/// Everything the pipeline needs to run one source.
pub struct SourceDefinition {
    pub name: &'static str,
    pub raw_format: RawFormat,
    pub acquirer: Box<dyn RawDataAcquirer>,
    pub normalizer: Box<dyn RecordNormalizer>,
    pub header: PackHeader,
    pub dedup: DedupPolicy,
    pub lastmod: LastmodPolicy,
}
