use crate::address::ADDRESS_PATTERNS;
use crate::apis::download::Download;
use crate::constants::ETHER_SCAM_DB;
use crate::error::{Result, ScraperError};
use crate::normalize::{required_str, DedupPolicy};
use crate::raw_data::RawFormat;
use crate::tagpack::{CanonicalTag, Category, Confidence, PackHeader};
use crate::types::{LastmodPolicy, NormalizeContext, RawRecord, RecordNormalizer, SourceDefinition};
use serde_json::Value;
use tracing::warn;

pub const REQUIRED_FIELDS: &[&str] = &["addresses", "coin", "name", "reporter", "category"];

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: ETHER_SCAM_DB,
        raw_format: RawFormat::Yaml,
        acquirer: Box::new(Download),
        normalizer: Box::new(ScamDbNormalizer),
        header: PackHeader::new(),
        dedup: DedupPolicy::None,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

/// Reporter names that stand for the scam database itself.
pub fn reporter_source(reporter: &str) -> String {
    if reporter == "MyCrypto" {
        "https://cryptoscamdb.org/".to_string()
    } else {
        reporter.to_string()
    }
}

/// Listed addresses of an entry; a single string counts as one address.
pub fn listed_addresses(row: &RawRecord) -> Vec<&str> {
    match row.get("addresses") {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::trim).collect(),
        Some(Value::String(single)) => vec![single.trim()],
        _ => Vec::new(),
    }
}

fn category_and_abuse(category: &str) -> Option<(Category, &'static str)> {
    match category {
        "Phishing" => Some((Category::Perpetrator, "phishing")),
        "Fake ICO" => Some((Category::Perpetrator, "investment_fraud")),
        "Scamming" | "Scam" => Some((Category::Perpetrator, "scam")),
        _ => None,
    }
}

/// Scam entries with the currency re-derived from each address's format.
pub struct ScamDbNormalizer;

impl RecordNormalizer for ScamDbNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        REQUIRED_FIELDS
    }

    fn normalize(&self, row: &RawRecord, _ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let name = required_str(row, "name")?;
        let reporter = required_str(row, "reporter")?;
        let category = required_str(row, "category")?;
        let (category, abuse) = category_and_abuse(category)
            .ok_or_else(|| ScraperError::parse(format!("unknown scam category '{category}'")))?;

        let mut tags = Vec::new();
        for address in listed_addresses(row) {
            let Some(currency) = ADDRESS_PATTERNS.detect(address) else {
                warn!("Unknown address format: {}", address);
                continue;
            };
            tags.push(
                CanonicalTag::new(address)
                    .currency(currency)
                    .label(format!("Scam at {name}"))
                    .source(reporter_source(reporter))
                    .category(category.clone())
                    .abuse(abuse)
                    .confidence(Confidence::WebCrawl),
            );
        }
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::test_support::config;
    use crate::normalize::normalize_rows;
    use crate::raw_data::decode;
    use crate::tagpack::Currency;

    const RAW: &str = r#"
- name: myetherwallet-login.com
  url: http://myetherwallet-login.com
  coin: ETH
  category: Phishing
  reporter: MyCrypto
  addresses:
    - 0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe
    - 1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa
    - not-an-address
- name: fake-token-sale
  coin: ETH
  category: Fake ICO
  reporter: https://twitter.com/someone
  addresses:
    - 0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe
- name: no-reporter
  coin: ETH
  category: Scam
  addresses: [0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe]
- name: odd-category
  coin: ETH
  category: Hacked
  reporter: MyCrypto
  addresses: [0xde0B295669a9FD93d5F28D9Ec85E40f4cb697BAe]
"#;

    #[test]
    fn entries_map_to_scam_tags() {
        let rows = decode(RAW, RawFormat::Yaml).unwrap();
        let config = config("");
        let ctx = NormalizeContext { config: &config };
        let outcome = normalize_rows(ETHER_SCAM_DB, &rows, &ScamDbNormalizer, &ctx, None, DedupPolicy::None);

        assert_eq!(outcome.rows_skipped, 2);
        assert_eq!(outcome.tags.len(), 3);
        let first = &outcome.tags[0];
        assert_eq!(first.currency, Some(Currency::Eth));
        assert_eq!(first.label.as_deref(), Some("Scam at myetherwallet-login.com"));
        assert_eq!(first.source.as_deref(), Some("https://cryptoscamdb.org/"));
        assert_eq!(first.abuse.as_deref(), Some("phishing"));
        assert_eq!(outcome.tags[1].currency, Some(Currency::Btc));
        assert_eq!(outcome.tags[2].abuse.as_deref(), Some("investment_fraud"));
        assert_eq!(outcome.tags[2].source.as_deref(), Some("https://twitter.com/someone"));
    }
}
