use crate::address::ADDRESS_PATTERNS;
use crate::constants::SCAM_SEARCH;
use crate::error::{Result, ScraperError};
use crate::normalize::{date_field, int_field, required_str, DedupPolicy};
use crate::raw_data::RawFormat;
use crate::tagpack::{CanonicalTag, Category, Confidence, Currency, PackHeader};
use crate::types::{
    AcquireContext, LastmodPolicy, NormalizeContext, RawDataAcquirer, RawPayload, RawRecord,
    RecordNormalizer, SourceDefinition,
};
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: SCAM_SEARCH,
        raw_format: RawFormat::JsonLines,
        acquirer: Box::new(ScamListingAcquirer),
        normalizer: Box::new(ScamReportNormalizer),
        header: PackHeader::new()
            .category(Category::Perpetrator)
            .confidence(Confidence::WebCrawl),
        dedup: DedupPolicy::None,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

pub fn report_url(address: &str) -> String {
    format!("https://scamsearch.io/search_report?searchoption=all&search={address}")
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ListingSettings {
    pub address_buttons: String,
    pub next_page: String,
    /// Give up after this many consecutive pages without a new address.
    pub no_news_interval: usize,
}

impl Default for ListingSettings {
    fn default() -> Self {
        Self {
            address_buttons: "button.looklink".into(),
            next_page: "li.uk-active + li a".into(),
            no_news_interval: 100,
        }
    }
}

pub struct ScamListingAcquirer;

#[async_trait::async_trait]
impl RawDataAcquirer for ScamListingAcquirer {
    #[instrument(skip(self, ctx))]
    async fn acquire(&self, ctx: &AcquireContext) -> Result<RawPayload> {
        let settings: ListingSettings = ctx.config.selectors()?;
        let mut scraped: HashSet<String> = HashSet::new();
        let mut records = Vec::new();
        let mut last_page_with_news = 1usize;

        let mut listing = ctx.pages.paginate(&ctx.config.url, &settings.next_page);
        while let Some(page) = listing.next_page(ctx.pages.as_ref()).await? {
            let page_index = listing.pages_seen();
            for button in page.locate(&settings.address_buttons)? {
                let address = button.text;
                if scraped.contains(&address) {
                    continue;
                }
                let Some(currency) = ADDRESS_PATTERNS.detect(&address) else {
                    continue;
                };
                match fetch_report(ctx, &address, &currency).await {
                    Ok(Some(record)) => records.push(record),
                    Ok(None) => warn!("No report page for {}", address),
                    Err(e) if e.is_fetch_failure() => return Err(e),
                    Err(e) => warn!("Unreadable report for {}: {}", address, e),
                }
                scraped.insert(address);
                last_page_with_news = page_index;
            }
            if page_index - last_page_with_news > settings.no_news_interval {
                debug!("No new addresses since page {}", last_page_with_news);
                break;
            }
        }
        info!("Collected {} reports from {} pages", records.len(), listing.pages_seen());
        Ok(RawPayload::Records(records))
    }
}

/// `None` when the site has no report page for the address.
async fn fetch_report(ctx: &AcquireContext, address: &str, currency: &Currency) -> Result<Option<RawRecord>> {
    let url = report_url(address);
    let page = ctx.pages.navigate(&url).await?;
    match page.status() {
        404 => return Ok(None),
        200..=299 => {}
        status => return Err(ScraperError::Status { url, status }),
    }
    let cell = |label: &str| {
        page.labeled_cell(label)
            .map(|c| c.text)
            .ok_or_else(|| ScraperError::MissingField(label.to_string()))
    };
    let count: i64 = cell("Report Count")?
        .parse()
        .map_err(|_| ScraperError::parse("report count is not a number"))?;
    let latest = cell("Latest Report")?;
    let latest = NaiveDateTime::parse_from_str(&latest, "%a, %d %b %Y %H:%M:%S")
        .map_err(|e| ScraperError::parse(format!("latest report '{latest}': {e}")))?;

    Ok(Some(json!({
        "address": address,
        "currency": currency.as_str(),
        "date": latest.date().to_string(),
        "count": count,
    })))
}

pub struct ScamReportNormalizer;

impl RecordNormalizer for ScamReportNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["address", "currency", "count"]
    }

    fn normalize(&self, row: &RawRecord, _ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let address = required_str(row, "address")?;
        let currency: Currency = required_str(row, "currency")?.parse()?;
        let label = match int_field(row, "count") {
            Some(1) => "Abuse report at ScamSearch.io",
            _ => "Abuse reports at ScamSearch.io",
        };
        let mut tag = CanonicalTag::new(address)
            .currency(currency)
            .label(label)
            .source(report_url(address));
        if let Some(date) = date_field(row, "date") {
            tag = tag.lastmod(date);
        }
        Ok(vec![tag])
    }
}
