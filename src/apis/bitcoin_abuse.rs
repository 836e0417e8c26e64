use crate::app::page::Page;
use crate::constants::BITCOIN_ABUSE;
use crate::error::{Result, ScraperError};
use crate::normalize::{date_field, int_field, required_str, DedupPolicy};
use crate::raw_data::{JsonLayout, RawFormat};
use crate::tagpack::{CanonicalTag, Category, Confidence, Currency, PackHeader};
use crate::types::{
    AcquireContext, LastmodPolicy, NormalizeContext, RawDataAcquirer, RawPayload, RawRecord,
    RecordNormalizer, SourceDefinition,
};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

const REPORT_URL_PREFIX: &str = "https://www.bitcoinabuse.com/reports/";

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: BITCOIN_ABUSE,
        raw_format: RawFormat::Json(JsonLayout::KeyedObject("report_url")),
        acquirer: Box::new(ReportAcquirer),
        normalizer: Box::new(ReportNormalizer),
        header: PackHeader::new()
            .currency(Currency::Btc)
            .category(Category::User)
            .confidence(Confidence::WebCrawl)
            .with_source(),
        dedup: DedupPolicy::None,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReportSelectors {
    pub report_links: String,
    pub next_page: String,
    /// Reports that redirect here are gone for good.
    pub banned_host: String,
}

impl Default for ReportSelectors {
    fn default() -> Self {
        Self {
            report_links: r#"a[href*="/reports/1"], a[href*="/reports/3"], a[href*="/reports/bc1"]"#.into(),
            next_page: "ul.pagination li.active + li a".into(),
            banned_host: "chainabuse.com".into(),
        }
    }
}

/// Walks the report listing and opens every report once.
pub struct ReportAcquirer;

#[async_trait::async_trait]
impl RawDataAcquirer for ReportAcquirer {
    #[instrument(skip(self, ctx))]
    async fn acquire(&self, ctx: &AcquireContext) -> Result<RawPayload> {
        let selectors: ReportSelectors = ctx.config.selectors()?;
        let mut reports = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut banned = 0usize;

        let mut listing = ctx.pages.paginate(&ctx.config.url, &selectors.next_page);
        while let Some(page) = listing.next_page(ctx.pages.as_ref()).await? {
            let links: Vec<String> = page
                .locate(&selectors.report_links)?
                .iter()
                .filter_map(|link| link.attr("href"))
                .filter_map(|href| page.resolve(href))
                .collect();
            debug!("{} report links on {}", links.len(), page.url());

            for report_url in links {
                if !seen.insert(report_url.clone()) {
                    continue;
                }
                match fetch_report(ctx, &report_url, &selectors.banned_host).await? {
                    Some(report) => reports.push(report),
                    None => banned += 1,
                }
            }
        }
        info!(
            "Collected {} reports from {} listing pages ({} banned)",
            reports.len(),
            listing.pages_seen(),
            banned
        );
        Ok(RawPayload::Records(reports))
    }
}

/// Opens a report, retrying until it renders. `None` for reports that
/// redirect to the banned host.
async fn fetch_report(ctx: &AcquireContext, report_url: &str, banned_host: &str) -> Result<Option<RawRecord>> {
    let page = ctx
        .retry
        .run(&format!("report {report_url}"), |_| async move {
            let page = ctx.pages.navigate(report_url).await?;
            if page.url().contains(banned_host) {
                return Ok(None);
            }
            if page.labeled_cell("Address").is_none() {
                return Err(ScraperError::ElementMissing {
                    selector: "Address".into(),
                    url: report_url.to_string(),
                });
            }
            Ok(Some(page))
        })
        .await?;
    let Some(page) = page else {
        debug!("Banned report {}", report_url);
        return Ok(None);
    };
    match parse_report(&page, report_url) {
        Ok(report) => Ok(Some(report)),
        Err(e) => {
            warn!("Skipping report {}: {}", report_url, e);
            Ok(None)
        }
    }
}

pub fn parse_report(page: &Page, report_url: &str) -> Result<RawRecord> {
    let cell = |label: &str| {
        page.labeled_cell(label)
            .ok_or_else(|| ScraperError::MissingField(label.to_string()))
    };
    let address_cell = cell("Address")?;
    let address = address_cell
        .locate("i")?
        .into_iter()
        .next()
        .map(|i| i.text)
        .unwrap_or(address_cell.text);
    let count: i64 = cell("Report Count")?
        .text
        .parse()
        .map_err(|_| ScraperError::parse("report count is not a number"))?;
    let latest = cell("Latest Report")?;
    let first_line = latest.lines.first().map(String::as_str).unwrap_or_default();
    let latest_date = DateTime::parse_from_str(first_line, "%a, %d %b %y %H:%M:%S %z")
        .map_err(|e| ScraperError::parse(format!("latest report date '{first_line}': {e}")))?;

    Ok(json!({
        "report_url": report_url,
        "address": address,
        "count": count,
        "latest_date": latest_date.to_rfc3339(),
    }))
}

pub struct ReportNormalizer;

impl RecordNormalizer for ReportNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["address", "count"]
    }

    fn normalize(&self, row: &RawRecord, _ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let address = required_str(row, "address")?;
        let label = match int_field(row, "count") {
            Some(1) => "Abuse report",
            _ => "Abuse reports",
        };
        let mut tag = CanonicalTag::new(address)
            .label(label)
            .source(format!("{REPORT_URL_PREFIX}{address}"));
        if let Some(lastmod) = date_field(row, "latest_date") {
            tag = tag.lastmod(lastmod);
        }
        Ok(vec![tag])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::test_support::{config, context};
    use crate::infra::in_memory::StaticWeb;
    use chrono::NaiveDate;

    const LISTING: &str = "https://www.bitcoinabuse.com/reports";

    fn report_page(address: &str, count: u32) -> String {
        format!(
            r#"<html><body><table>
            <tr><th>Address</th><td><i>{address}</i></td></tr>
            <tr><th>Report Count</th><td>{count}</td></tr>
            <tr><th>Latest Report</th><td>Tue, 01 Mar 22 10:00:00 +0000<br>3 months ago</td></tr>
            </table></body></html>"#
        )
    }

    #[test]
    fn single_report_gets_singular_label() {
        let config = config("");
        let ctx = NormalizeContext { config: &config };
        let row = json!({"address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "count": 1});
        let tags = ReportNormalizer.normalize(&row, &ctx).unwrap();
        assert_eq!(tags[0].label.as_deref(), Some("Abuse report"));
        assert_eq!(
            tags[0].source.as_deref(),
            Some("https://www.bitcoinabuse.com/reports/1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa")
        );
        assert!(tags[0].lastmod.is_none());
    }

    #[test]
    fn report_details_are_read_from_labelled_cells() {
        let page = Page::new("https://www.bitcoinabuse.com/reports/1A1z", 200, report_page("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", 4));
        let report = parse_report(&page, page.url()).unwrap();
        assert_eq!(report["count"], 4);
        assert_eq!(report["latest_date"], "2022-03-01T10:00:00+00:00");

        let config = config("");
        let ctx = NormalizeContext { config: &config };
        let tags = ReportNormalizer.normalize(&report, &ctx).unwrap();
        assert_eq!(tags[0].label.as_deref(), Some("Abuse reports"));
        assert_eq!(tags[0].lastmod, NaiveDate::from_ymd_opt(2022, 3, 1));
    }

    #[tokio::test]
    async fn listing_pages_are_walked_and_banned_reports_skipped() {
        let listing_1 = r#"<html><body>
            <a href="/reports/1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa">1A1z</a>
            <a href="/reports/3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy">3J98</a>
            <a href="/about">About</a>
            <ul class="pagination"><li class="active"><a href="?page=1">1</a></li><li><a href="?page=2">2</a></li></ul>
            </body></html>"#;
        let listing_2 = r#"<html><body>
            <a href="/reports/1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa">again</a>
            <a href="/reports/bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq">bc1q</a>
            <ul class="pagination"><li><a href="?page=1">1</a></li><li class="active"><a href="?page=2">2</a></li></ul>
            </body></html>"#;
        let web = StaticWeb::new()
            .with_page(LISTING, listing_1)
            .with_page(&format!("{LISTING}?page=2"), listing_2)
            .with_page(
                &format!("{REPORT_URL_PREFIX}1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"),
                &report_page("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", 1),
            )
            .with_redirect(
                &format!("{REPORT_URL_PREFIX}3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy"),
                "https://www.chainabuse.com/",
                "<html></html>",
            )
            .with_page(
                &format!("{REPORT_URL_PREFIX}bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"),
                &report_page("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", 2),
            );
        let (_, ctx) = context(web, config(&format!("URL: {LISTING}\n")));

        let RawPayload::Records(reports) = ReportAcquirer.acquire(&ctx).await.unwrap() else {
            panic!("expected records");
        };
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[1]["address"], "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq");
        assert_eq!(
            reports[0]["report_url"],
            "https://www.bitcoinabuse.com/reports/1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"
        );
    }
}
