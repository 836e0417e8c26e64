//! Faucet payouts listed on CoinPayU.
//!
//! One collector task per currency listing walks the paginated payout table
//! and sends every explorer link it finds over a bounded channel. The
//! acquirer itself consumes the channel, opens each transaction on its block
//! explorer and records the sending addresses. Every collector finishes
//! with a `Done` message, so the consumer knows when all listings are
//! exhausted, or with `Failed`, which aborts the whole acquisition.

use crate::app::page::Page;
use crate::constants::COINPAYU;
use crate::error::{Result, ScraperError};
use crate::normalize::{date_field, required_str, DedupPolicy};
use crate::raw_data::{JsonLayout, RawFormat};
use crate::tagpack::{CanonicalTag, Category, Confidence, Currency, PackHeader};
use crate::types::{
    AcquireContext, LastmodPolicy, NormalizeContext, RawDataAcquirer, RawPayload, RawRecord,
    RecordNormalizer, SourceDefinition,
};
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

static BLOCKCHAIR_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"date: (\d{4}-\d{2}-\d{2})").expect("blockchair date pattern compiles"));
static ETHERSCAN_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([^)]+)\)").expect("etherscan date pattern compiles"));

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: COINPAYU,
        raw_format: RawFormat::Json(JsonLayout::KeyedObject("address")),
        acquirer: Box::new(PayoutExplorerAcquirer),
        normalizer: Box::new(PayoutNormalizer),
        header: PackHeader::new()
            .label("CoinPayU")
            .category(Category::Faucet)
            .confidence(Confidence::WebCrawl)
            .with_source(),
        dedup: DedupPolicy::LatestDate,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PayoutSettings {
    /// Currency filters of the payout listing, one collector each.
    pub options: Vec<String>,
    /// Query parameter carrying the selected filter.
    pub option_param: String,
    pub table_rows: String,
    pub check_links: String,
    pub next_text: String,
    pub channel_capacity: usize,
    pub blockchair_inputs: String,
    pub etherscan_timestamp: String,
    pub etherscan_sender: String,
    pub tronscan_owner: String,
}

impl Default for PayoutSettings {
    fn default() -> Self {
        Self {
            options: vec![
                "Bitcoin (BTC)".into(),
                "Bitcoin Cash (BCH)".into(),
                "Litecoin (LTC)".into(),
                "Ethereum (ETH)".into(),
                "Tether TRC20 (USDT)".into(),
            ],
            option_param: "currency".into(),
            table_rows: "tbody tr".into(),
            check_links: r#"a[title="check"]"#.into(),
            next_text: "»".into(),
            channel_capacity: 256,
            blockchair_inputs: r#"[id^="io-inputs"] a[href*="address"]"#.into(),
            etherscan_timestamp: "#ContentPlaceHolder1_divTimeStamp div.row > div:nth-of-type(2)".into(),
            etherscan_sender: r#"a[href*="/address/"]"#.into(),
            tronscan_owner: "#n_owner_address a div".into(),
        }
    }
}

impl PayoutSettings {
    fn listing_url(&self, base: &str, option: &str) -> String {
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}{}={}", self.option_param, urlencoding::encode(option))
    }
}

#[derive(Debug)]
pub enum CollectorMessage {
    Link(String),
    Done,
    /// The listing could not be walked to its end.
    Failed(ScraperError),
}

/// Block explorers payouts link to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Explorer {
    Blockchair,
    /// Forwards to Blockchair, whose timestamps are UTC.
    BtcCom,
    Etherscan,
    Tronscan,
}

impl Explorer {
    pub fn for_link(link: &str) -> Option<(Explorer, Currency)> {
        if link.starts_with("https://blockchair.com/bitcoin/transaction/") {
            Some((Explorer::Blockchair, Currency::Btc))
        } else if link.starts_with("https://bch.btc.com/") {
            Some((Explorer::BtcCom, Currency::Bch))
        } else if link.starts_with("https://blockchair.com/litecoin/transaction/") {
            Some((Explorer::Blockchair, Currency::Ltc))
        } else if link.starts_with("https://etherscan.io/tx/") {
            Some((Explorer::Etherscan, Currency::Eth))
        } else if link.starts_with("https://tronscan.org/#/transaction/") {
            Some((Explorer::Tronscan, Currency::Usdt))
        } else {
            None
        }
    }
}

/// Date and sending addresses of one payout.
#[derive(Debug, Clone, PartialEq)]
pub struct Payout {
    pub date: NaiveDateTime,
    pub addresses: Vec<String>,
}

pub struct PayoutExplorerAcquirer;

#[async_trait::async_trait]
impl RawDataAcquirer for PayoutExplorerAcquirer {
    #[instrument(skip(self, ctx))]
    async fn acquire(&self, ctx: &AcquireContext) -> Result<RawPayload> {
        let settings: PayoutSettings = ctx.config.selectors()?;
        let (tx, mut rx) = mpsc::channel(settings.channel_capacity.max(1));

        let collectors = settings.options.len();
        for option in &settings.options {
            let url = settings.listing_url(&ctx.config.url, option);
            let ctx = ctx.clone();
            let settings = settings.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let message = match collect_links(&ctx, &settings, &url, &tx).await {
                    Ok(()) => CollectorMessage::Done,
                    Err(e) => {
                        warn!("Collecting links from {} failed: {}", url, e);
                        CollectorMessage::Failed(e)
                    }
                };
                let _ = tx.send(message).await;
            });
        }
        drop(tx);

        let mut payouts = Payouts::default();
        let mut finished = 0;
        while finished < collectors {
            let Some(message) = rx.recv().await else {
                break;
            };
            let link = match message {
                CollectorMessage::Done => {
                    finished += 1;
                    continue;
                }
                CollectorMessage::Failed(e) => return Err(e),
                CollectorMessage::Link(link) => link,
            };
            let Some((explorer, currency)) = Explorer::for_link(&link) else {
                warn!("No explorer handles {}", link);
                continue;
            };
            debug!("Opening {}", link);
            match fetch_payout(ctx, &settings, explorer, &link).await {
                Ok(Some(payout)) => payouts.add(payout, currency),
                Ok(None) => warn!("Explorer has no information about {}", link),
                Err(e) if e.is_fetch_failure() => return Err(e),
                Err(e) => warn!("Skipping {}: {}", link, e),
            }
        }
        info!("Collected {} payout addresses", payouts.order.len());
        Ok(RawPayload::Records(payouts.into_records()))
    }
}

/// Walks one listing, sending every explorer link not sent before.
async fn collect_links(
    ctx: &AcquireContext,
    settings: &PayoutSettings,
    start_url: &str,
    tx: &mpsc::Sender<CollectorMessage>,
) -> Result<()> {
    let mut collected = HashSet::new();
    let mut visited = HashSet::new();
    let mut next = Some(start_url.to_string());

    while let Some(url) = next.take() {
        if !visited.insert(url.clone()) {
            break;
        }
        let page = ctx.open_page(&url, &settings.table_rows).await?;
        for link in page.locate(&settings.check_links)? {
            let Some(href) = link.attr("href").and_then(|href| page.resolve(href)) else {
                continue;
            };
            if collected.insert(href.clone()) && tx.send(CollectorMessage::Link(href)).await.is_err() {
                return Ok(());
            }
        }
        next = page
            .locate("a")?
            .into_iter()
            .find(|a| a.text == settings.next_text)
            .and_then(|a| a.attr("href").and_then(|href| page.resolve(href)));
    }
    Ok(())
}

/// `None` when the explorer does not know the transaction.
pub async fn fetch_payout(
    ctx: &AcquireContext,
    settings: &PayoutSettings,
    explorer: Explorer,
    link: &str,
) -> Result<Option<Payout>> {
    let Some(page) = open_explorer(ctx, link).await? else {
        return Ok(None);
    };
    match explorer {
        Explorer::Blockchair => blockchair_payout(&page, settings),
        Explorer::BtcCom => {
            let forward = page
                .locate("a")?
                .into_iter()
                .find(|a| a.text == "BLOCKCHAIR")
                .and_then(|a| a.attr("href").and_then(|href| page.resolve(href)))
                .ok_or_else(|| ScraperError::ElementMissing {
                    selector: "BLOCKCHAIR".into(),
                    url: link.to_string(),
                })?;
            let Some(page) = open_explorer(ctx, &forward).await? else {
                return Ok(None);
            };
            blockchair_payout(&page, settings)
        }
        Explorer::Etherscan => etherscan_payout(&page, settings).map(Some),
        Explorer::Tronscan => tronscan_payout(&page, settings).map(Some),
    }
}

/// `None` on the explorer's not-found page; other error statuses fail.
async fn open_explorer(ctx: &AcquireContext, url: &str) -> Result<Option<Page>> {
    let page = ctx.pages.navigate(url).await?;
    match page.status() {
        404 => Ok(None),
        200..=299 => Ok(Some(page)),
        status => Err(ScraperError::Status { url: page.url().to_string(), status }),
    }
}

fn blockchair_payout(page: &Page, settings: &PayoutSettings) -> Result<Option<Payout>> {
    let Some(description) = page.locate_first(r#"meta[name="description"]"#)? else {
        return Ok(None);
    };
    let content = description.attr("content").unwrap_or_default();
    let day = BLOCKCHAIR_DATE
        .captures(content)
        .and_then(|c| c.get(1))
        .ok_or_else(|| ScraperError::parse(format!("no date in '{content}'")))?;
    let date = NaiveDate::parse_from_str(day.as_str(), "%Y-%m-%d")
        .map_err(|e| ScraperError::parse(e.to_string()))?
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ScraperError::parse("midnight out of range"))?;
    let addresses = page
        .locate(&settings.blockchair_inputs)?
        .into_iter()
        .map(|a| a.text)
        .collect();
    Ok(Some(Payout { date, addresses }))
}

fn etherscan_payout(page: &Page, settings: &PayoutSettings) -> Result<Payout> {
    let stamp = page.require(&settings.etherscan_timestamp)?.text;
    let inner = ETHERSCAN_DATE
        .captures(&stamp)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches("+UTC").trim())
        .ok_or_else(|| ScraperError::parse(format!("no date in '{stamp}'")))?;
    let date = NaiveDateTime::parse_from_str(inner, "%b-%d-%Y %I:%M:%S %p")
        .map_err(|e| ScraperError::parse(format!("etherscan date '{inner}': {e}")))?;
    let sender = page.require(&settings.etherscan_sender)?.text;
    Ok(Payout { date, addresses: vec![sender] })
}

fn tronscan_payout(page: &Page, settings: &PayoutSettings) -> Result<Payout> {
    let owner = page.require(&settings.tronscan_owner)?.text;
    let time = page
        .labeled_cell("Time")
        .ok_or_else(|| ScraperError::MissingField("Time".into()))?;
    let text = time.text.trim_end_matches("(Local)").trim();
    let date = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| ScraperError::parse(format!("tronscan date '{text}': {e}")))?;
    Ok(Payout { date, addresses: vec![owner] })
}

/// Per address the first currency seen, with the latest payout date in
/// that currency.
#[derive(Debug, Default)]
struct Payouts {
    order: Vec<String>,
    latest: HashMap<String, (NaiveDateTime, Currency)>,
}

impl Payouts {
    fn add(&mut self, payout: Payout, currency: Currency) {
        for address in payout.addresses {
            match self.latest.entry(address) {
                Entry::Vacant(slot) => {
                    self.order.push(slot.key().clone());
                    slot.insert((payout.date, currency.clone()));
                }
                Entry::Occupied(mut slot) => {
                    let (date, known) = slot.get_mut();
                    if *known == currency && *date < payout.date {
                        *date = payout.date;
                    }
                }
            }
        }
    }

    fn into_records(mut self) -> Vec<RawRecord> {
        self.order
            .into_iter()
            .filter_map(|address| {
                let (date, currency) = self.latest.remove(&address)?;
                Some(json!({
                    "address": address,
                    "date": date.format("%Y-%m-%dT%H:%M:%S").to_string(),
                    "currency": currency.as_str(),
                }))
            })
            .collect()
    }
}

pub struct PayoutNormalizer;

impl RecordNormalizer for PayoutNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["address", "date", "currency"]
    }

    fn normalize(&self, row: &RawRecord, _ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let address = required_str(row, "address")?;
        let currency: Currency = required_str(row, "currency")?.parse()?;
        let mut tag = CanonicalTag::new(address).currency(currency);
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

    const LISTING: &str = "https://www.coinpayu.com/payouts";
    const BTC_TX: &str = "https://blockchair.com/bitcoin/transaction/aa";
    const BTC_TX_2: &str = "https://blockchair.com/bitcoin/transaction/bb";
    const ETH_TX: &str = "https://etherscan.io/tx/0xcc";
    const SENDER: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
    const ETH_SENDER: &str = "0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe";

    fn listing(links: &[&str], next: Option<&str>) -> String {
        let rows: String = links
            .iter()
            .map(|l| format!("<tr><td><a title=\"check\" href=\"{l}\">check</a></td></tr>"))
            .collect();
        let next = next.map(|n| format!("<a href=\"{n}\">»</a>")).unwrap_or_default();
        format!("<html><body><table><tbody>{rows}</tbody></table>{next}</body></html>")
    }

    fn blockchair(date: &str) -> String {
        format!(
            "<html><head><meta name=\"description\" content=\"Bitcoin transaction, date: {date} 10:00\"></head>\
             <body><div id=\"io-inputs-1\"><a href=\"/bitcoin/address/{SENDER}\">{SENDER}</a></div></body></html>"
        )
    }

    fn web() -> StaticWeb {
        let settings = PayoutSettings {
            options: vec!["Bitcoin (BTC)".into(), "Ethereum (ETH)".into()],
            ..PayoutSettings::default()
        };
        let btc = settings.listing_url(LISTING, "Bitcoin (BTC)");
        let eth = settings.listing_url(LISTING, "Ethereum (ETH)");
        StaticWeb::new()
            .with_page(&btc, &listing(&[BTC_TX], Some("/payouts?currency=Bitcoin%20%28BTC%29&page=2")))
            .with_page(
                "https://www.coinpayu.com/payouts?currency=Bitcoin%20%28BTC%29&page=2",
                &listing(&[BTC_TX, BTC_TX_2, "https://unknown.example/tx/1"], None),
            )
            .with_page(&eth, &listing(&[ETH_TX], None))
            .with_page(BTC_TX, &blockchair("2022-05-01"))
            .with_page(BTC_TX_2, &blockchair("2022-06-01"))
            .with_page(
                ETH_TX,
                &format!(
                    "<html><body><div id=\"ContentPlaceHolder1_divTimeStamp\"><div class=\"row\"><div>Timestamp:</div>\
                     <div>5 days ago (Jul-04-2022 01:02:03 PM +UTC)</div></div></div>\
                     <a href=\"/address/{ETH_SENDER}\">{ETH_SENDER}</a></body></html>"
                ),
            )
    }

    #[tokio::test]
    async fn collectors_feed_the_explorer_consumer() {
        let config = config(&format!(
            "URL: {LISTING}\nSELECTORS:\n  options: [\"Bitcoin (BTC)\", \"Ethereum (ETH)\"]\n"
        ));
        let (web, ctx) = context(web(), config);
        let RawPayload::Records(records) = PayoutExplorerAcquirer.acquire(&ctx).await.unwrap() else {
            panic!("expected records");
        };

        let by_address: HashMap<&str, &RawRecord> =
            records.iter().map(|r| (r["address"].as_str().unwrap(), r)).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(by_address[SENDER]["currency"], "BTC");
        assert_eq!(by_address[SENDER]["date"], "2022-06-01T00:00:00");
        assert_eq!(by_address[ETH_SENDER]["date"], "2022-07-04T13:02:03");
        let explorer_fetches = web.requests().iter().filter(|u| u.starts_with("https://blockchair.com")).count();
        assert_eq!(explorer_fetches, 2);
    }

    #[tokio::test]
    async fn listing_that_never_renders_fails_the_acquisition() {
        let settings = PayoutSettings::default();
        let eth = settings.listing_url(LISTING, "Ethereum (ETH)");
        let web = web().with_page(&eth, "<html><body><p>Loading...</p></body></html>");
        let config = config(&format!(
            "URL: {LISTING}\nSELECTORS:\n  options: [\"Bitcoin (BTC)\", \"Ethereum (ETH)\"]\n"
        ));
        let (web, ctx) = context(web, config);

        let result = PayoutExplorerAcquirer.acquire(&ctx).await;

        assert!(matches!(result, Err(ScraperError::RetriesExhausted { .. })));
        assert_eq!(web.requests().iter().filter(|u| **u == eth).count(), 2);
    }

    #[tokio::test]
    async fn unreachable_explorer_fails_the_acquisition() {
        let web = web().with_response(ETH_TX, 503, b"unavailable", "text/html");
        let config = config(&format!(
            "URL: {LISTING}\nSELECTORS:\n  options: [\"Ethereum (ETH)\"]\n"
        ));
        let (_, ctx) = context(web, config);

        let result = PayoutExplorerAcquirer.acquire(&ctx).await;

        assert!(matches!(result, Err(ScraperError::Status { status: 503, .. })));
    }

    #[test]
    fn links_are_dispatched_by_explorer() {
        assert_eq!(
            Explorer::for_link("https://tronscan.org/#/transaction/abc"),
            Some((Explorer::Tronscan, Currency::Usdt))
        );
        assert_eq!(
            Explorer::for_link("https://bch.btc.com/abc"),
            Some((Explorer::BtcCom, Currency::Bch))
        );
        assert_eq!(Explorer::for_link("https://example.org/tx"), None);
    }

    #[test]
    fn earlier_payout_in_other_currency_keeps_first_currency() {
        let date = |d: u32| NaiveDate::from_ymd_opt(2022, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let mut payouts = Payouts::default();
        payouts.add(Payout { date: date(2), addresses: vec![SENDER.into()] }, Currency::Btc);
        payouts.add(Payout { date: date(9), addresses: vec![SENDER.into()] }, Currency::Bch);
        payouts.add(Payout { date: date(5), addresses: vec![SENDER.into()] }, Currency::Btc);
        let records = payouts.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["currency"], "BTC");
        assert_eq!(records[0]["date"], "2022-01-05T00:00:00");
    }

    #[test]
    fn payout_rows_become_tags_with_lastmod() {
        let config = config("");
        let ctx = NormalizeContext { config: &config };
        let row = json!({"address": SENDER, "date": "2022-06-01T00:00:00", "currency": "BTC"});
        let tags = PayoutNormalizer.normalize(&row, &ctx).unwrap();
        assert_eq!(tags[0].currency, Some(Currency::Btc));
        assert_eq!(tags[0].lastmod, NaiveDate::from_ymd_opt(2022, 6, 1));
    }
}
