use crate::address::ADDRESS_PATTERNS;
use crate::app::page::Page;
use crate::constants::PIPEFLARE;
use crate::error::{Result, ScraperError};
use crate::normalize::{date_field, required_str, DedupPolicy};
use crate::raw_data::{JsonLayout, RawFormat};
use crate::tagpack::{CanonicalTag, Category, Confidence, Currency, PackHeader};
use crate::types::{
    AcquireContext, LastmodPolicy, NormalizeContext, RawDataAcquirer, RawPayload, RawRecord,
    RecordNormalizer, SourceDefinition,
};
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::json;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: PIPEFLARE,
        raw_format: RawFormat::Json(JsonLayout::KeyedObject("address")),
        acquirer: Box::new(FaucetPayoutAcquirer),
        normalizer: Box::new(FaucetPayoutNormalizer),
        header: PackHeader::new(),
        dedup: DedupPolicy::EarliestDate,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

/// A paginated leaderboard. The next-page link is the first (or last)
/// `next_selector` match, optionally only among links whose markup
/// contains `marker`.
#[derive(Debug, Clone, Deserialize)]
pub struct Leaderboard {
    pub url: String,
    pub next_selector: String,
    #[serde(default)]
    pub marker: Option<String>,
    #[serde(default)]
    pub last: bool,
}

impl Leaderboard {
    fn next_url(&self, page: &Page) -> Result<Option<String>> {
        let candidates = page.locate(&self.next_selector)?;
        let mut matching = candidates.iter().filter(|link| {
            self.marker.as_deref().map_or(true, |marker| link.html.contains(marker))
        });
        let link = if self.last { matching.last() } else { matching.next() };
        Ok(link
            .and_then(|link| link.attr("href"))
            .and_then(|href| page.resolve(href)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PayoutSettings {
    /// Transaction links are recognised by this prefix.
    pub explorer_prefix: String,
    pub leaderboards: Vec<Leaderboard>,
    /// Stop a leaderboard after this many pages without new transactions.
    pub no_news_interval: usize,
    pub received_label: String,
    pub inputs_heading: String,
    pub input_links: String,
}

impl Default for PayoutSettings {
    fn default() -> Self {
        Self {
            explorer_prefix: "https://explorer.zcha.in/transactions/".into(),
            leaderboards: vec![
                Leaderboard {
                    url: "https://pipeflare.io/game/leaderboard".into(),
                    next_selector: "a".into(),
                    marker: Some("fa-angle-left".into()),
                    last: false,
                },
                Leaderboard {
                    url: "https://pipeflare.io/referral/leaderboard".into(),
                    next_selector: "#wrap-leader-board > div > a.btn-primary".into(),
                    marker: None,
                    last: true,
                },
            ],
            no_news_interval: 40,
            received_label: "Received Time".into(),
            inputs_heading: "Inputs (".into(),
            input_links: "div > span > span > span > a".into(),
        }
    }
}

/// Explorer transaction links in discovery order, each with the page it
/// was last seen on.
#[derive(Debug, Default)]
struct TxLinks {
    order: Vec<String>,
    seen_on: HashMap<String, String>,
}

impl TxLinks {
    /// Records the links found on `page`; true if any was new.
    fn add(&mut self, page: &Page, selector: &str, explorer_prefix: &str) -> Result<bool> {
        let mut added = false;
        for link in page.locate(selector)? {
            let Some(href) = link.attr("href") else {
                continue;
            };
            if href == explorer_prefix {
                continue;
            }
            if self.seen_on.insert(href.to_string(), page.url().to_string()).is_none() {
                self.order.push(href.to_string());
                added = true;
            }
        }
        Ok(added)
    }
}

/// Payout transactions listed on the faucet's pages, resolved to their
/// receiving addresses on the block explorer.
pub struct FaucetPayoutAcquirer;

#[async_trait::async_trait]
impl RawDataAcquirer for FaucetPayoutAcquirer {
    #[instrument(skip(self, ctx))]
    async fn acquire(&self, ctx: &AcquireContext) -> Result<RawPayload> {
        let settings: PayoutSettings = ctx.config.selectors()?;
        let link_selector = format!("a[href^=\"{}\"]", settings.explorer_prefix);
        let mut links = TxLinks::default();

        let transactions = ctx.pages.navigate(&ctx.config.url).await?;
        links.add(&transactions, &link_selector, &settings.explorer_prefix)?;

        for board in &settings.leaderboards {
            walk_leaderboard(ctx, board, &settings, &link_selector, &mut links).await?;
        }
        info!("Found {} payout transactions", links.order.len());

        let mut order: Vec<String> = Vec::new();
        let mut earliest: HashMap<String, (NaiveDateTime, String)> = HashMap::new();
        for link in &links.order {
            let source = links.seen_on.get(link).cloned().unwrap_or_default();
            let (received, inputs) = match payout(ctx, &settings, link).await {
                Ok(payout) => payout,
                Err(e) if e.is_fetch_failure() => return Err(e),
                Err(e) => {
                    warn!("Skipping transaction {}: {}", link, e);
                    continue;
                }
            };
            for address in inputs {
                match earliest.entry(address) {
                    Entry::Vacant(slot) => {
                        order.push(slot.key().clone());
                        slot.insert((received, source.clone()));
                    }
                    Entry::Occupied(mut slot) => {
                        if received < slot.get().0 {
                            slot.insert((received, source.clone()));
                        }
                    }
                }
            }
        }

        let records = order
            .into_iter()
            .filter_map(|address| {
                let (date, source) = earliest.remove(&address)?;
                Some(json!({
                    "address": address,
                    "date": date.format("%Y-%m-%dT%H:%M:%S").to_string(),
                    "source": source,
                }))
            })
            .collect();
        Ok(RawPayload::Records(records))
    }
}

async fn walk_leaderboard(
    ctx: &AcquireContext,
    board: &Leaderboard,
    settings: &PayoutSettings,
    link_selector: &str,
    links: &mut TxLinks,
) -> Result<()> {
    let mut visited = HashSet::new();
    let mut next = Some(board.url.clone());
    let mut page_index = 0usize;
    let mut last_page_with_news = 1usize;

    while let Some(url) = next.take() {
        if !visited.insert(url.clone()) {
            break;
        }
        let page = ctx.pages.navigate(&url).await?;
        page_index += 1;
        debug!("Processing {}", page.url());
        if links.add(&page, link_selector, &settings.explorer_prefix)? {
            last_page_with_news = page_index;
        }
        if page_index - last_page_with_news > settings.no_news_interval {
            break;
        }
        next = board.next_url(&page)?;
    }
    Ok(())
}

/// Receive time and input addresses of one transaction.
async fn payout(
    ctx: &AcquireContext,
    settings: &PayoutSettings,
    link: &str,
) -> Result<(NaiveDateTime, Vec<String>)> {
    let label = settings.received_label.as_str();
    let (page, received) = ctx
        .retry
        .run(&format!("transaction {link}"), |_| async move {
            let page = ctx.pages.navigate(link).await?;
            if !(200..300).contains(&page.status()) {
                return Err(ScraperError::Status { url: link.to_string(), status: page.status() });
            }
            let received = page.next_to("div", label)?.ok_or_else(|| ScraperError::ElementMissing {
                selector: label.to_string(),
                url: link.to_string(),
            })?;
            Ok((page, received.text))
        })
        .await?;
    let received = parse_received(&received)?;

    let mut inputs = Vec::new();
    if let Some(section) = page.parent_of("div", &settings.inputs_heading)? {
        for input in section.locate(&settings.input_links)? {
            if ADDRESS_PATTERNS.starts_like(&Currency::Zec, &input.text) {
                inputs.push(input.text);
            } else {
                warn!("{} is not a ZEC address", input.text);
            }
        }
    }
    Ok((received, inputs))
}

/// `Mon 05 Apr 2021 10:20:30 (2 years ago)`, the relative part is dropped.
fn parse_received(text: &str) -> Result<NaiveDateTime> {
    let absolute = text.split('(').next().unwrap_or_default().trim();
    NaiveDateTime::parse_from_str(absolute, "%a %d %b %Y %H:%M:%S")
        .map_err(|e| ScraperError::parse(format!("received time '{absolute}': {e}")))
}

pub struct FaucetPayoutNormalizer;

impl RecordNormalizer for FaucetPayoutNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["address", "date", "source"]
    }

    fn normalize(&self, row: &RawRecord, _ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let address = required_str(row, "address")?;
        let mut tag = CanonicalTag::new(address)
            .currency(Currency::Zec)
            .label("PipeFlare")
            .source(required_str(row, "source")?)
            .category(Category::Faucet)
            .confidence(Confidence::WebCrawl);
        if let Some(date) = date_field(row, "date") {
            tag = tag.lastmod(date);
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

    const TRANSACTIONS: &str = "https://pipeflare.io/transactions";
    const EXPLORER: &str = "https://explorer.zcha.in/transactions/";
    const ALICE: &str = "t1Rv4exT7bqhZqi2j7xz8bUHDMxwosrjADU";
    const BOB: &str = "t1TVBNyk2Q8uZPLGYW4YNkmMYA1NuVaXEUU";

    fn tx_page(received: &str, inputs: &[&str]) -> String {
        let inputs: String = inputs
            .iter()
            .map(|a| format!("<div><span><span><span><a href=\"/accounts/{a}\">{a}</a></span></span></span></div>"))
            .collect();
        format!(
            "<html><body>\
             <div><div>Received Time</div><div>{received}</div></div>\
             <div><div>Inputs (1)</div>{inputs}</div>\
             </body></html>"
        )
    }

    fn web() -> StaticWeb {
        StaticWeb::new()
            .with_page(
                TRANSACTIONS,
                &format!("<a href=\"{EXPLORER}aa\">aa</a><a href=\"{EXPLORER}\">explorer</a>"),
            )
            .with_page(
                "https://pipeflare.io/game/leaderboard",
                &format!(
                    "<a href=\"{EXPLORER}aa\">aa</a><a href=\"/game/leaderboard?page=2\"><i class=\"fa fa-angle-left\"></i></a><a href=\"/help\">help</a>"
                ),
            )
            .with_page(
                "https://pipeflare.io/game/leaderboard?page=2",
                &format!("<a href=\"{EXPLORER}bb\">bb</a>"),
            )
            .with_page(
                &format!("{EXPLORER}aa"),
                &tx_page("Mon 05 Apr 2021 10:20:30 (2 years ago)", &[ALICE]),
            )
            .with_page(
                &format!("{EXPLORER}bb"),
                &tx_page("Sat 03 Apr 2021 08:00:00", &[ALICE, BOB]),
            )
    }

    #[tokio::test]
    async fn earliest_payout_per_address_is_kept() {
        let (web, ctx) = context(web(), config(&format!("URL: {TRANSACTIONS}\n")));
        let RawPayload::Records(records) = FaucetPayoutAcquirer.acquire(&ctx).await.unwrap() else {
            panic!("expected records");
        };

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["address"], ALICE);
        assert_eq!(records[0]["date"], "2021-04-03T08:00:00");
        assert_eq!(records[0]["source"], "https://pipeflare.io/game/leaderboard?page=2");
        assert_eq!(records[1]["address"], BOB);
        assert!(!web.requests().contains(&EXPLORER.to_string()));
    }

    #[tokio::test]
    async fn unreachable_transaction_fails_the_acquisition() {
        let failing = format!("{EXPLORER}bb");
        let web = web().with_response(&failing, 502, b"bad gateway", "text/html");
        let (web, ctx) = context(web, config(&format!("URL: {TRANSACTIONS}\n")));

        let result = FaucetPayoutAcquirer.acquire(&ctx).await;

        assert!(matches!(result, Err(ScraperError::RetriesExhausted { attempts: 2, .. })));
        assert_eq!(web.requests().iter().filter(|u| **u == failing).count(), 2);
    }

    #[test]
    fn received_time_ignores_relative_suffix() {
        let parsed = parse_received("Mon 05 Apr 2021 10:20:30 (2 years ago)").unwrap();
        assert_eq!(parsed.date(), NaiveDate::from_ymd_opt(2021, 4, 5).unwrap());
        assert!(parse_received("yesterday").is_err());
    }

    #[test]
    fn payouts_become_faucet_tags() {
        let config = config("");
        let ctx = NormalizeContext { config: &config };
        let row = json!({"address": ALICE, "date": "2021-04-03T08:00:00", "source": TRANSACTIONS});
        let tags = FaucetPayoutNormalizer.normalize(&row, &ctx).unwrap();
        assert_eq!(tags[0].currency, Some(Currency::Zec));
        assert_eq!(tags[0].category, Some(Category::Faucet));
        assert_eq!(tags[0].lastmod, NaiveDate::from_ymd_opt(2021, 4, 3));
    }
}
