use crate::app::ports::{HttpClientPort, PageFetcher};
use crate::config::{AppConfig, SourceConfig};
use crate::error::Result;
use crate::infra::http_client::ReqwestHttp;
use crate::infra::page_fetcher::HttpPageFetcher;
use crate::normalize::{normalize_rows, NormalizeOutcome};
use crate::raw_data::RawStore;
use crate::retry::RetryPolicy;
use crate::tagpack::{TagPackDocument, TagPackEmitter};
use crate::types::{AcquireContext, AcquireMode, LastmodPolicy, NormalizeContext, SourceDefinition};
use chrono::{Local, NaiveDate};
use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// How `acquire` treats an existing raw file.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireOptions {
    /// Fetch again even if the raw file exists.
    pub force: bool,
    pub mode: AcquireMode,
}

/// Result of one source run
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub source: String,
    /// False when an existing raw file was reused.
    pub acquired: bool,
    pub raw_file: String,
    pub rows_total: usize,
    pub rows_skipped: usize,
    pub invalid_tags: usize,
    pub duplicates: usize,
    pub tags_emitted: usize,
    pub lastmod: NaiveDate,
    pub output_file: String,
}

/// Acquire, normalize and emit for one source at a time.
pub struct Pipeline {
    http: Arc<dyn HttpClientPort>,
    pages: Arc<dyn PageFetcher>,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(http: Arc<dyn HttpClientPort>, pages: Arc<dyn PageFetcher>, retry: RetryPolicy) -> Self {
        Self { http, pages, retry }
    }

    /// Real HTTP stack from the global settings.
    pub fn from_config(app: &AppConfig) -> Result<Self> {
        let retry = app.retry.policy();
        let http: Arc<dyn HttpClientPort> = Arc::new(ReqwestHttp::new(&app.http, retry)?);
        let pages = Arc::new(HttpPageFetcher::new(
            http.clone(),
            Duration::from_millis(app.http.delay_ms),
        ));
        Ok(Self::new(http, pages, retry))
    }

    /// Fetches and persists the raw data. Returns false when an existing raw
    /// file was kept.
    #[instrument(skip(self, definition, config), fields(source = definition.name))]
    pub async fn acquire(
        &self,
        definition: &SourceDefinition,
        config: &SourceConfig,
        options: AcquireOptions,
    ) -> Result<bool> {
        let store = RawStore::new(config.raw_path(), definition.raw_format);
        let updating = options.mode == AcquireMode::Update;
        if store.exists() && !options.force && !updating {
            info!("Raw data {} exists, reusing it", store.path().display());
            return Ok(false);
        }

        let existing = if updating && store.exists() {
            store.read()?
        } else {
            Vec::new()
        };
        debug!("Acquiring with {} existing records", existing.len());
        let ctx = AcquireContext::new(config.clone(), self.http.clone(), self.pages.clone(), self.retry)
            .with_mode(options.mode, existing);

        let started = Instant::now();
        let payload = definition.acquirer.acquire(&ctx).await?;
        histogram!("tagpack_acquire_duration_seconds", "source" => definition.name)
            .record(started.elapsed().as_secs_f64());
        store.persist(&payload)?;
        info!("Saved raw data to {}", store.path().display());
        Ok(true)
    }

    /// Reads the raw file and builds the TagPack document.
    pub fn build_document(
        definition: &SourceDefinition,
        config: &SourceConfig,
    ) -> Result<(TagPackDocument, NormalizeOutcome)> {
        let store = RawStore::new(config.raw_path(), definition.raw_format);
        let rows = store.read()?;
        let ctx = NormalizeContext { config };
        let outcome = normalize_rows(
            definition.name,
            &rows,
            definition.normalizer.as_ref(),
            &ctx,
            definition.header.currency.as_ref(),
            config.dedup.unwrap_or(definition.dedup),
        );
        let lastmod = Self::lastmod(definition, config, &store)?;
        let document = TagPackEmitter::assemble(config, &definition.header, lastmod, outcome.tags.clone())?;
        Ok((document, outcome))
    }

    /// `LASTMOD` from the configuration wins over the source's policy.
    fn lastmod(definition: &SourceDefinition, config: &SourceConfig, store: &RawStore) -> Result<NaiveDate> {
        if let Some(lastmod) = config.lastmod {
            return Ok(lastmod);
        }
        match definition.lastmod {
            LastmodPolicy::RawFileModified => store.modified_date(),
            LastmodPolicy::Today => Ok(Local::now().date_naive()),
        }
    }

    /// Normalizes the existing raw file and writes the TagPack.
    #[instrument(skip(definition, config), fields(source = definition.name))]
    pub fn generate(definition: &SourceDefinition, config: &SourceConfig) -> Result<PipelineResult> {
        let (document, outcome) = Self::build_document(definition, config)?;
        let output = config.tagpack_path();
        TagPackEmitter::write(&document, &output)?;

        counter!("tagpack_tags_emitted_total", "source" => definition.name)
            .increment(document.tags.len() as u64);
        counter!("tagpack_invalid_tags_total", "source" => definition.name).increment(outcome.invalid as u64);
        counter!("tagpack_duplicate_tags_total", "source" => definition.name)
            .increment(outcome.duplicates as u64);
        info!("Wrote {} tags to {}", document.tags.len(), output.display());

        Ok(PipelineResult {
            source: definition.name.to_string(),
            acquired: false,
            raw_file: config.raw_path().display().to_string(),
            rows_total: outcome.rows_total,
            rows_skipped: outcome.rows_skipped,
            invalid_tags: outcome.invalid,
            duplicates: outcome.duplicates,
            tags_emitted: document.tags.len(),
            lastmod: document.lastmod,
            output_file: output.display().to_string(),
        })
    }

    /// Acquire then generate.
    pub async fn run(
        &self,
        definition: &SourceDefinition,
        config: &SourceConfig,
        options: AcquireOptions,
    ) -> Result<PipelineResult> {
        counter!("tagpack_pipeline_runs_total", "source" => definition.name).increment(1);
        let started = Instant::now();
        let acquired = self.acquire(definition, config, options).await?;
        let mut result = Self::generate(definition, config)?;
        result.acquired = acquired;
        histogram!("tagpack_pipeline_duration_seconds", "source" => definition.name)
            .record(started.elapsed().as_secs_f64());
        Ok(result)
    }
}
