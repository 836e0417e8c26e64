pub mod bitcoin_abuse;
pub mod bitcoin_otc;
pub mod bitcointalk_users;
pub mod coinpayu;
pub mod download;
pub mod ether_scam_db;
pub mod ether_scan_db;
pub mod glasschain;
pub mod nbctf;
pub mod ofac_sdn;
pub mod pipeflare;
pub mod ransomwhere;
pub mod scam_search;
pub mod seekoin;
pub mod splc;

use crate::constants;
use crate::types::SourceDefinition;

/// Builds the definition of a registered source.
pub fn create_source(name: &str) -> Option<SourceDefinition> {
    match name {
        constants::BITCOIN_ABUSE => Some(bitcoin_abuse::definition()),
        constants::BITCOIN_OTC => Some(bitcoin_otc::definition()),
        constants::BITCOINTALK_USERS => Some(bitcointalk_users::definition()),
        constants::COINPAYU => Some(coinpayu::definition()),
        constants::ETHER_SCAM_DB => Some(ether_scam_db::definition()),
        constants::ETHER_SCAN_DB => Some(ether_scan_db::definition()),
        constants::GLASSCHAIN => Some(glasschain::definition()),
        constants::NBCTF => Some(nbctf::definition()),
        constants::OFAC_SDN => Some(ofac_sdn::definition()),
        constants::PIPEFLARE => Some(pipeflare::definition()),
        constants::RANSOMWHERE => Some(ransomwhere::definition()),
        constants::SCAM_SEARCH => Some(scam_search::definition()),
        constants::SEEKOIN => Some(seekoin::definition()),
        constants::SPLC => Some(splc::definition()),
        _ => None,
    }
}
