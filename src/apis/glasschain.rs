use crate::address::ADDRESS_PATTERNS;
use crate::app::page::{Located, Page};
use crate::constants::GLASSCHAIN;
use crate::error::{Result, ScraperError};
use crate::normalize::{date_field, required_str, str_field, DedupPolicy};
use crate::raw_data::{JsonLayout, RawFormat};
use crate::tagpack::{CanonicalTag, Category, Currency, PackHeader};
use crate::types::{
    AcquireContext, LastmodPolicy, NormalizeContext, RawDataAcquirer, RawPayload, RawRecord,
    RecordNormalizer, SourceDefinition,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use url::Url;

const SITE: &str = "https://glasschain.org/";
const NO_WALLETS: &str = "No Wallets identified yet";

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: GLASSCHAIN,
        raw_format: RawFormat::Json(JsonLayout::KeyedObject("provider")),
        acquirer: Box::new(ProviderAcquirer),
        normalizer: Box::new(WalletNormalizer),
        header: PackHeader::new().currency(Currency::Btc),
        dedup: DedupPolicy::None,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GlasschainSettings {
    pub table_rows: String,
    /// `{id}` is replaced by the wallet id.
    pub addresses_url: String,
    pub kpi_url: String,
    /// Page through every address of a wallet instead of only the first
    /// page, using the KPI API for the address count.
    pub full_pagination: bool,
}

impl Default for GlasschainSettings {
    fn default() -> Self {
        Self {
            table_rows: "main table tr".into(),
            addresses_url: "https://glasschain.org/views/wallet/Addresses.cfm?ref={id}&page={page}&paging={paging}".into(),
            kpi_url: "https://api.glasschain.io/taffy/api/index.cfm?endpoint=/wallet/getWalletKPI&walletid={id}".into(),
            full_pagination: false,
        }
    }
}

impl GlasschainSettings {
    fn addresses_page(&self, wallet_id: &str, page: usize) -> String {
        let paging = if self.full_pagination { "100000" } else { "11" };
        self.addresses_url
            .replace("{id}", wallet_id)
            .replace("{page}", &page.to_string())
            .replace("{paging}", paging)
    }
}

/// Provider table, then each provider's wallets, then each wallet's
/// addresses.
pub struct ProviderAcquirer;

#[async_trait::async_trait]
impl RawDataAcquirer for ProviderAcquirer {
    #[instrument(skip(self, ctx))]
    async fn acquire(&self, ctx: &AcquireContext) -> Result<RawPayload> {
        let settings: GlasschainSettings = ctx.config.selectors()?;
        let index = ctx.open_page(&ctx.config.url, &settings.table_rows).await?;

        let mut providers = Vec::new();
        for cells in index.rows(&settings.table_rows, "td")? {
            let Some(provider) = provider_row(&index, &cells)? else {
                continue;
            };
            if provider.wallet_count == 0 {
                debug!("Skipping provider {} without wallets", provider.name);
                continue;
            }
            info!("Downloading provider {}", provider.name);
            let wallets = match provider_wallets(ctx, &settings, &provider.link).await? {
                Some(wallets) => wallets,
                None => {
                    warn!("Provider {} not found", provider.name);
                    Vec::new()
                }
            };
            providers.push(json!({
                "provider": provider.name,
                "category": provider.category,
                "wallets": wallets,
            }));
        }
        info!("Collected {} providers", providers.len());
        Ok(RawPayload::Records(providers))
    }
}

struct ProviderRow {
    name: String,
    link: String,
    category: String,
    wallet_count: u64,
}

fn provider_row(page: &Page, cells: &[Located]) -> Result<Option<ProviderRow>> {
    if cells.len() < 3 {
        return Ok(None);
    }
    let Some(link) = cells[0].locate("a")?.into_iter().next() else {
        return Ok(None);
    };
    let wallet_count = cells[2]
        .locate("span")?
        .first()
        .and_then(|span| span.text.parse().ok())
        .unwrap_or(0);
    let href = link.attr("href").and_then(|href| page.resolve(href)).unwrap_or_default();
    Ok(Some(ProviderRow {
        name: link.text,
        link: href,
        category: cells[1].text.clone(),
        wallet_count,
    }))
}

/// `None` when the provider page redirects to the 404 page.
async fn provider_wallets(
    ctx: &AcquireContext,
    settings: &GlasschainSettings,
    link: &str,
) -> Result<Option<Vec<Value>>> {
    let page = ctx.pages.navigate(link).await?;
    if page.url().trim_end_matches('/').ends_with("/404") {
        return Ok(None);
    }

    let mut wallets = Vec::new();
    for cells in page.rows(&settings.table_rows, "td")? {
        if cells.is_empty() || (cells.len() == 1 && cells[0].text == NO_WALLETS) {
            continue;
        }
        let Some(mut wallet) = wallet_row(&cells)? else {
            warn!("Malformed wallet row on {}", link);
            continue;
        };
        let source = wallet["source"].as_str().unwrap_or_default().to_string();
        let wallet_id = source.rsplit('/').next().unwrap_or_default().to_string();
        info!("Downloading wallet {}", wallet["label"]);
        wallet["addresses"] = json!(wallet_addresses(ctx, settings, &wallet_id).await?);
        wallets.push(wallet);
    }
    Ok(Some(wallets))
}

/// Link in the first cell; label and "<date> by <creator>" in the second.
fn wallet_row(cells: &[Located]) -> Result<Option<Value>> {
    let (Some(first), Some(second)) = (cells.first(), cells.get(1)) else {
        return Ok(None);
    };
    let source = first.locate("a")?.first().and_then(|a| a.attr("href").map(str::to_string));
    let label = second.locate("b")?.into_iter().next().map(|b| b.text);
    let byline = second.locate("label")?.into_iter().next().map(|l| l.text);
    let (Some(source), Some(label), Some(byline)) = (source, label, byline) else {
        return Ok(None);
    };
    let Some((lastmod, creator)) = byline.split_once(" by ") else {
        return Ok(None);
    };
    Ok(Some(json!({
        "source": source,
        "label": label,
        "lastmod": lastmod.trim(),
        "creator": creator.trim(),
        "addresses": [],
    })))
}

async fn wallet_addresses(
    ctx: &AcquireContext,
    settings: &GlasschainSettings,
    wallet_id: &str,
) -> Result<Vec<String>> {
    let expected = if settings.full_pagination {
        wallet_address_count(ctx, settings, wallet_id).await?
    } else {
        0
    };

    let mut addresses = Vec::new();
    let mut page_index = 0;
    loop {
        let url = settings.addresses_page(wallet_id, page_index);
        let page = ctx.pages.navigate(&url).await?;
        let before = addresses.len();
        for link in page.locate("a")? {
            if ADDRESS_PATTERNS.starts_like(&Currency::Btc, &link.text) {
                addresses.push(link.text);
            } else {
                warn!("Address {} has wrong format", link.text);
            }
        }
        page_index += 1;
        let exhausted = addresses.len() == before;
        if !settings.full_pagination || exhausted || addresses.len() as u64 >= expected {
            break;
        }
        debug!("Fetched {} of {} addresses of wallet {}", addresses.len(), expected, wallet_id);
    }
    Ok(addresses)
}

async fn wallet_address_count(
    ctx: &AcquireContext,
    settings: &GlasschainSettings,
    wallet_id: &str,
) -> Result<u64> {
    let url = settings.kpi_url.replace("{id}", wallet_id);
    let kpi: Value = ctx.http.get(&url).await?.error_for_status()?.json()?;
    kpi.pointer("/data/0/DSP_INT_WALLET_ADDRESSES")
        .and_then(Value::as_u64)
        .ok_or_else(|| ScraperError::MissingField("DSP_INT_WALLET_ADDRESSES".into()))
}

fn provider_category(category: &str) -> Option<Category> {
    let category = match category {
        "Advertising Networks" | "Media Platforms" => Category::Organization,
        "CoinJoin Providers" => Category::Coinjoin,
        "Criminal Entities" => Category::Perpetrator,
        "Cryptocurrency Mixers" => Category::MixingService,
        "Crypto Exchanges" | "P2P Crypto Exchanges" | "Telegram Trading Chat" => Category::Exchange,
        "Darknet Markets" => Category::Market,
        "Miner" | "Mining Pools" => Category::Miner,
        "Payment Providers" => Category::PaymentProcessor,
        "Wallet Providers" => Category::WalletService,
        _ => return None,
    };
    Some(category)
}

fn wallet_label(label: &str) -> &str {
    match label {
        "WSM Hot Wallet" => "Wall Street Market Hot Wallet",
        "Garantex Deposit" => "Garantex Deposit Wallet",
        "Nucleus Wallet" => "Nucleus Market Wallet",
        other => other,
    }
}

/// One tag per wallet address. Only bitcoin wallets labelled by Glasschain
/// itself are taken.
pub struct WalletNormalizer;

impl RecordNormalizer for WalletNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["provider", "category", "wallets"]
    }

    fn normalize(&self, row: &RawRecord, _ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let provider = required_str(row, "provider")?;
        let raw_category = required_str(row, "category")?;
        let category = provider_category(raw_category)
            .ok_or_else(|| ScraperError::parse(format!("unknown provider category '{raw_category}'")))?;
        debug!("Processing provider {}", provider);

        let mut tags = Vec::new();
        for wallet in row["wallets"].as_array().into_iter().flatten() {
            let label = wallet_label(str_field(wallet, "label").unwrap_or_default());
            let source = str_field(wallet, "source").unwrap_or_default();
            let creator = str_field(wallet, "creator").unwrap_or_default();
            if creator != "Glasschain" {
                warn!("Creator of wallet {} is {}, not Glasschain", label, creator);
                continue;
            }
            if !source.contains("/btc/") {
                warn!("Unknown currency for wallet source {}", source);
                continue;
            }
            let source = Url::parse(SITE)
                .and_then(|site| site.join(source))
                .map(String::from)
                .map_err(|e| ScraperError::parse(format!("wallet source '{source}': {e}")))?;
            let lastmod = date_field(wallet, "lastmod");

            for address in wallet["addresses"].as_array().into_iter().flatten().filter_map(Value::as_str) {
                let mut tag = CanonicalTag::new(address)
                    .label(label)
                    .source(source.clone())
                    .category(category.clone());
                if let Some(lastmod) = lastmod {
                    tag = tag.lastmod(lastmod);
                }
                tags.push(tag);
            }
        }
        Ok(tags)
    }
}
