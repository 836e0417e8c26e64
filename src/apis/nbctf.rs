use crate::address::ADDRESS_PATTERNS;
use crate::constants::NBCTF;
use crate::error::Result;
use crate::normalize::{required_str, DedupPolicy};
use crate::raw_data::RawFormat;
use crate::tagpack::{CanonicalTag, Category, Currency, PackHeader};
use crate::types::{
    AcquireContext, LastmodPolicy, NormalizeContext, RawDataAcquirer, RawPayload, RawRecord,
    RecordNormalizer, SourceDefinition,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: NBCTF,
        raw_format: RawFormat::Csv,
        acquirer: Box::new(SeizureTableAcquirer),
        normalizer: Box::new(SeizureNormalizer),
        header: PackHeader::new()
            .category(Category::Perpetrator)
            .abuse("terrorism")
            .with_source(),
        dedup: DedupPolicy::FirstSeen,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SeizureSelectors {
    pub rows: String,
}

impl Default for SeizureSelectors {
    fn default() -> Self {
        Self {
            rows: "table:nth-of-type(2) tr".into(),
        }
    }
}

/// Scrapes the seizure order table. The listed currency column is
/// unreliable, so currencies are recognised from the address format.
pub struct SeizureTableAcquirer;

#[async_trait::async_trait]
impl RawDataAcquirer for SeizureTableAcquirer {
    #[instrument(skip(self, ctx))]
    async fn acquire(&self, ctx: &AcquireContext) -> Result<RawPayload> {
        let selectors: SeizureSelectors = ctx.config.selectors()?;
        let page = ctx.open_page(&ctx.config.url, &selectors.rows).await?;

        let header_len = page
            .rows(&selectors.rows, "th")?
            .first()
            .map(Vec::len)
            .unwrap_or_default();
        let rows: Vec<Vec<String>> = page
            .rows(&selectors.rows, "td")?
            .into_iter()
            .filter(|cells| !cells.is_empty())
            .map(|cells| cells.into_iter().map(|c| c.text).collect())
            .collect();
        let records = extract_seizures(&rows, header_len);
        info!("Found {} seized addresses", records.len());
        Ok(RawPayload::Records(records))
    }
}

/// Order ids only appear in full-width rows; continuation rows inherit the
/// previous order id.
pub fn extract_seizures(rows: &[Vec<String>], column_count: usize) -> Vec<RawRecord> {
    let mut found: Vec<(String, String, Currency)> = Vec::new();
    let mut order_id = String::new();
    for cells in rows {
        let full_row = cells.len() == column_count;
        if full_row {
            order_id = cells[0].split_whitespace().collect::<Vec<_>>().join(" ");
        }
        for cell in cells.iter().skip(usize::from(full_row)) {
            // Legacy and P2SH bitcoin addresses also fit the BCH and LTC
            // patterns; within a cell the first currency wins.
            for (currency, address) in ADDRESS_PATTERNS.find_all(cell) {
                found.push((order_id.clone(), address, currency));
            }
        }
    }
    found
        .into_iter()
        .map(|(order, address, currency)| {
            json!({"Order ID": order, "Address": address, "Currency": currency.as_str()})
        })
        .collect()
}

pub struct SeizureNormalizer;

impl RecordNormalizer for SeizureNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["Order ID", "Address", "Currency"]
    }

    fn normalize(&self, row: &RawRecord, _ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let address = required_str(row, "Address")?;
        let currency: Currency = required_str(row, "Currency")?.parse()?;
        let order_id = row.get("Order ID").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(vec![CanonicalTag::new(address)
            .currency(currency)
            .label(format!("Seized by NBCTF of Israel (order ID: {order_id})"))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::test_support::{config, context};
    use crate::infra::in_memory::StaticWeb;
    use crate::normalize::normalize_rows;

    const PAGE_URL: &str = "https://nbctf.mod.gov.il/en/seizures/Pages/Blockchain1.aspx";
    const PAGE: &str = r#"<html><body>
        <table><tr><td>navigation</td></tr></table>
        <table><tbody>
          <tr><th>Order ID</th><th>Full name</th><th>Address</th></tr>
          <tr><td>ASO 7/21</td><td>Someone</td><td>3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy</td></tr>
          <tr><td>0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe</td></tr>
          <tr><td>ASO 8/21</td><td>Other person</td><td>no address here</td></tr>
        </tbody></table>
        </body></html>"#;

    #[tokio::test]
    async fn table_rows_become_order_address_pairs() {
        let web = StaticWeb::new().with_page(PAGE_URL, PAGE);
        let (_, ctx) = context(web, config(&format!("URL: {PAGE_URL}\n")));
        let RawPayload::Records(records) = SeizureTableAcquirer.acquire(&ctx).await.unwrap() else {
            panic!("expected records");
        };

        let currencies: Vec<_> = records.iter().map(|r| r["Currency"].as_str().unwrap()).collect();
        assert_eq!(currencies, vec!["BTC", "ETH"]);
        assert_eq!(records[0]["Order ID"], "ASO 7/21");
        assert_eq!(records[0]["Address"], "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy");
        assert_eq!(records[1]["Order ID"], "ASO 7/21");
        assert_eq!(records[1]["Address"], "0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe");
    }

    #[test]
    fn bitcoin_addresses_are_not_echoed_as_other_currencies() {
        let rows = vec![
            vec!["ASO 1/22".to_string(), "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy".to_string()],
            vec!["1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa and LTC LVg2kJoFNg45Nbpy53h7Fe1wKyeXVRhMH9".to_string()],
        ];
        let records = extract_seizures(&rows, 2);
        let found: Vec<_> = records
            .iter()
            .map(|r| (r["Address"].as_str().unwrap(), r["Currency"].as_str().unwrap()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy", "BTC"),
                ("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "BTC"),
                ("LVg2kJoFNg45Nbpy53h7Fe1wKyeXVRhMH9", "LTC"),
            ]
        );
        assert_eq!(records[1]["Order ID"], "ASO 1/22");
    }

    #[test]
    fn first_seen_address_wins() {
        let rows = vec![
            json!({"Order ID": "ASO 7/21", "Address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "Currency": "BTC"}),
            json!({"Order ID": "ASO 9/21", "Address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "Currency": "BCH"}),
        ];
        let config = config("");
        let ctx = NormalizeContext { config: &config };
        let outcome = normalize_rows(NBCTF, &rows, &SeizureNormalizer, &ctx, None, DedupPolicy::FirstSeen);
        assert_eq!(outcome.tags.len(), 1);
        assert_eq!(
            outcome.tags[0].label.as_deref(),
            Some("Seized by NBCTF of Israel (order ID: ASO 7/21)")
        );
    }
}
