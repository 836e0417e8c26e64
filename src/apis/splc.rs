use crate::apis::download::Download;
use crate::constants::SPLC;
use crate::error::Result;
use crate::normalize::{required_str, str_field, DedupPolicy};
use crate::raw_data::RawFormat;
use crate::tagpack::{CanonicalTag, Category, Currency, PackHeader};
use crate::types::{LastmodPolicy, NormalizeContext, RawRecord, RecordNormalizer, SourceDefinition};

/// Report columns holding newline-separated addresses.
const ADDRESS_COLUMNS: &[(&str, Currency)] = &[
    ("Bitcoin Addresses", Currency::Btc),
    ("Ethereum Addresses", Currency::Eth),
    ("Litecoin Addresses", Currency::Ltc),
    ("Monero Address", Currency::Xmr),
];

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: SPLC,
        raw_format: RawFormat::Csv,
        acquirer: Box::new(Download),
        normalizer: Box::new(ReportNormalizer),
        header: PackHeader::new(),
        dedup: DedupPolicy::None,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

pub struct ReportNormalizer;

impl RecordNormalizer for ReportNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["Entity"]
    }

    fn normalize(&self, row: &RawRecord, ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let entity = required_str(row, "Entity")?;
        let mut tags = Vec::new();
        for (column, currency) in ADDRESS_COLUMNS {
            let Some(cell) = str_field(row, column) else {
                continue;
            };
            for address in cell.split('\n').map(str::trim).filter(|a| !a.is_empty()) {
                tags.push(
                    CanonicalTag::new(address)
                        .currency(currency.clone())
                        .label(entity)
                        .source(ctx.config.source.clone())
                        .category(Category::User),
                );
            }
        }
        Ok(tags)
    }
}
