use crate::apis::download::Download;
use crate::constants::RANSOMWHERE;
use crate::error::Result;
use crate::normalize::{required_str, DedupPolicy};
use crate::raw_data::{JsonLayout, RawFormat};
use crate::tagpack::{CanonicalTag, Category, Currency, PackHeader};
use crate::types::{LastmodPolicy, NormalizeContext, RawRecord, RecordNormalizer, SourceDefinition};

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: RANSOMWHERE,
        raw_format: RawFormat::Json(JsonLayout::ArrayAt("result")),
        acquirer: Box::new(Download),
        normalizer: Box::new(RansomwareNormalizer),
        header: PackHeader::new(),
        dedup: DedupPolicy::None,
        lastmod: LastmodPolicy::Today,
    }
}

/// Ransom payment addresses, labelled with the ransomware family.
pub struct RansomwareNormalizer;

impl RecordNormalizer for RansomwareNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["address", "blockchain", "family"]
    }

    fn normalize(&self, row: &RawRecord, ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let address = required_str(row, "address")?;
        let currency = Currency::from_chain_name(required_str(row, "blockchain")?);
        let family = required_str(row, "family")?;

        let mut tag = CanonicalTag::new(address)
            .currency(currency)
            .label(format!("Ransomware: {family}"))
            .category(Category::Perpetrator)
            .abuse("ransomware");
        if !ctx.config.source.is_empty() {
            tag = tag.source(ctx.config.source.clone());
        }
        Ok(vec![tag])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::test_support::config;
    use crate::normalize::normalize_rows;
    use crate::raw_data::decode;

    #[test]
    fn blockchain_names_resolve_to_codes() {
        let raw = r#"{"result": [
            {"address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "blockchain": "bitcoin", "family": "Locky", "balance": 0},
            {"address": "D8vFz4p1L37jdg47HXKtSHA5uYLYxbGgPD", "blockchain": "dogecoin", "family": "Ryuk"},
            {"address": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "blockchain": "bitcoin"}
        ]}"#;
        let rows = decode(raw, RawFormat::Json(JsonLayout::ArrayAt("result"))).unwrap();
        let config = config("");
        let ctx = NormalizeContext { config: &config };
        let outcome = normalize_rows(RANSOMWHERE, &rows, &RansomwareNormalizer, &ctx, None, DedupPolicy::None);

        assert_eq!(outcome.rows_skipped, 1);
        assert_eq!(outcome.tags.len(), 2);
        let locky = &outcome.tags[0];
        assert_eq!(locky.currency, Some(Currency::Btc));
        assert_eq!(locky.label.as_deref(), Some("Ransomware: Locky"));
        assert_eq!(locky.category, Some(Category::Perpetrator));
        assert_eq!(locky.abuse.as_deref(), Some("ransomware"));
        assert_eq!(locky.source.as_deref(), Some("https://source.example/"));
        assert_eq!(outcome.tags[1].currency, Some(Currency::Other("DOGE".into())));
    }
}
