use crate::apis::download::Download;
use crate::constants::OFAC_SDN;
use crate::error::Result;
use crate::normalize::{required_str, DedupPolicy};
use crate::raw_data::RawFormat;
use crate::tagpack::{CanonicalTag, Currency, PackHeader};
use crate::types::{LastmodPolicy, NormalizeContext, RawRecord, RecordNormalizer, SourceDefinition};

const MARKER: &str = "Digital Currency Address";

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: OFAC_SDN,
        raw_format: RawFormat::Text,
        acquirer: Box::new(Download),
        normalizer: Box::new(SdnListNormalizer),
        // label and category come from the source configuration
        header: PackHeader::new().with_source(),
        dedup: DedupPolicy::FirstSeen,
        lastmod: LastmodPolicy::Today,
    }
}

/// Extracts `Digital Currency Address - <CODE> <address>` entries from the
/// plain-text SDN list.
pub struct SdnListNormalizer;

impl RecordNormalizer for SdnListNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["text"]
    }

    fn normalize(&self, row: &RawRecord, _ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let text = required_str(row, "text")?;
        Ok(extract_addresses(text)
            .into_iter()
            .map(|(currency, address)| CanonicalTag::new(address).currency(currency))
            .collect())
    }
}

pub fn extract_addresses(text: &str) -> Vec<(Currency, String)> {
    text.replace('\n', " ")
        .split(';')
        .filter(|segment| segment.contains(MARKER))
        .filter_map(|segment| {
            let cleaned = segment.trim_start().replace("alt. ", "");
            let tokens: Vec<&str> = cleaned.split(' ').collect();
            match (tokens.get(4), tokens.get(5)) {
                (Some(code), Some(address)) if !address.is_empty() => {
                    Some((Currency::from_code(code), address.to_string()))
                }
                _ => None,
            }
        })
        .collect()
}
