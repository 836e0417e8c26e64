use crate::app::page::Located;
use crate::constants::SEEKOIN;
use crate::error::Result;
use crate::normalize::{required_str, str_field, DedupPolicy};
use crate::raw_data::RawFormat;
use crate::tagpack::{CanonicalTag, Category, Confidence, Currency, PackHeader};
use crate::types::{
    AcquireContext, LastmodPolicy, NormalizeContext, RawDataAcquirer, RawPayload, RawRecord,
    RecordNormalizer, SourceDefinition,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

const NEXT_PAGE: &str = ">>>";
const END_OF_TABLE: &str = "<<<";

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: SEEKOIN,
        raw_format: RawFormat::JsonLines,
        acquirer: Box::new(AddressTableAcquirer),
        normalizer: Box::new(AddressTableNormalizer),
        header: PackHeader::new(),
        dedup: DedupPolicy::None,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TableSelectors {
    pub row: String,
    pub link: String,
    pub cell: String,
}

impl Default for TableSelectors {
    fn default() -> Self {
        Self {
            row: "table tr".into(),
            link: "td a".into(),
            cell: "td".into(),
        }
    }
}

/// Walks the address table page by page. The last link of a row is either
/// the address, `>>>` (next page) or `<<<` (end of the table).
pub struct AddressTableAcquirer;

#[async_trait::async_trait]
impl RawDataAcquirer for AddressTableAcquirer {
    #[instrument(skip(self, ctx))]
    async fn acquire(&self, ctx: &AcquireContext) -> Result<RawPayload> {
        let selectors: TableSelectors = ctx.config.selectors()?;
        let mut records = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(ctx.config.url.clone());

        'pages: while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                warn!("Table pagination looped back to {}", url);
                break;
            }
            let page = ctx.open_page(&url, &selectors.row).await?;
            let links = page.rows(&selectors.row, &selectors.link)?;
            let cells = page.rows(&selectors.row, &selectors.cell)?;
            debug!("{} rows on {}", links.len(), url);

            for (row_links, row_cells) in links.iter().zip(cells.iter()) {
                let Some(link) = row_links.last() else {
                    continue;
                };
                match link.text.as_str() {
                    NEXT_PAGE => {
                        next = link.attr("href").and_then(|href| page.resolve(href));
                        continue 'pages;
                    }
                    END_OF_TABLE => break 'pages,
                    address => match table_row(address, row_cells) {
                        Some(record) => records.push(record),
                        None => warn!("Skipping malformed row for {}", address),
                    },
                }
            }
        }
        info!("Collected {} table rows", records.len());
        Ok(RawPayload::Records(records))
    }
}

/// Date, type, hits and comment sit in the second to fifth cell.
fn table_row(address: &str, cells: &[Located]) -> Option<RawRecord> {
    let text = |index: usize| cells.get(index).map(|c| c.text.clone());
    let hits: i64 = text(3)?.replace(',', "").parse().ok()?;
    Some(json!({
        "address": address,
        "date": text(1)?,
        "type": text(2)?,
        "hits": hits,
        "comment": text(4)?,
    }))
}

pub struct AddressTableNormalizer;

impl RecordNormalizer for AddressTableNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["address", "type"]
    }

    fn normalize(&self, row: &RawRecord, ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let address = required_str(row, "address")?;
        let kind = required_str(row, "type")?;
        let comment = str_field(row, "comment").unwrap_or_default();
        Ok(vec![CanonicalTag::new(address)
            .currency(Currency::Btc)
            .label(format!("{kind} (comment: \"{comment}…\")"))
            .source(ctx.config.source.clone())
            .category(Category::User)
            .confidence(Confidence::WebCrawl)])
    }
}
