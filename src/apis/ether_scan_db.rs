use crate::apis::download::Download;
use crate::apis::ether_scam_db::{listed_addresses, reporter_source, REQUIRED_FIELDS};
use crate::constants::ETHER_SCAN_DB;
use crate::error::Result;
use crate::normalize::{required_str, DedupPolicy};
use crate::raw_data::RawFormat;
use crate::tagpack::{CanonicalTag, Category, Currency, PackHeader};
use crate::types::{LastmodPolicy, NormalizeContext, RawRecord, RecordNormalizer, SourceDefinition};

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: ETHER_SCAN_DB,
        raw_format: RawFormat::Yaml,
        acquirer: Box::new(Download),
        normalizer: Box::new(ScanDbNormalizer),
        header: PackHeader::new(),
        dedup: DedupPolicy::None,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

/// Same entry layout as the scam database, but the listed coin is trusted
/// and the entry name is the label.
pub struct ScanDbNormalizer;

impl RecordNormalizer for ScanDbNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        REQUIRED_FIELDS
    }

    fn normalize(&self, row: &RawRecord, _ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let currency: Currency = required_str(row, "coin")?.parse()?;
        let name = required_str(row, "name")?;
        let source = reporter_source(required_str(row, "reporter")?);
        let category: Category = required_str(row, "category")?.parse()?;

        Ok(listed_addresses(row)
            .into_iter()
            .filter(|address| !address.is_empty())
            .map(|address| {
                CanonicalTag::new(address)
                    .currency(currency.clone())
                    .label(name)
                    .source(source.clone())
                    .category(category.clone())
            })
            .collect())
    }
}
