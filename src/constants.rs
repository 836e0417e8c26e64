/// Source id constants, used on the CLI and as directory names under the
/// sources directory.
pub const BITCOIN_ABUSE: &str = "bitcoin_abuse";
pub const BITCOIN_OTC: &str = "bitcoin_otc";
pub const BITCOINTALK_USERS: &str = "bitcointalk_users";
pub const COINPAYU: &str = "coinpayu";
pub const ETHER_SCAM_DB: &str = "ether_scam_db";
pub const ETHER_SCAN_DB: &str = "ether_scan_db";
pub const GLASSCHAIN: &str = "glasschain";
pub const NBCTF: &str = "nbctf";
pub const OFAC_SDN: &str = "ofac_sdn";
pub const PIPEFLARE: &str = "pipeflare";
pub const RANSOMWHERE: &str = "ransomwhere";
pub const SCAM_SEARCH: &str = "scam_search";
pub const SEEKOIN: &str = "seekoin";
pub const SPLC: &str = "splc";

/// Get all supported source ids, in the order `run` processes them.
pub fn get_supported_sources() -> Vec<&'static str> {
    vec![
        BITCOIN_ABUSE,
        BITCOIN_OTC,
        BITCOINTALK_USERS,
        COINPAYU,
        ETHER_SCAM_DB,
        ETHER_SCAN_DB,
        GLASSCHAIN,
        NBCTF,
        OFAC_SDN,
        PIPEFLARE,
        RANSOMWHERE,
        SCAM_SEARCH,
        SEEKOIN,
        SPLC,
    ]
}

pub const DEFAULT_CONFIG_FILE: &str = "scraper.toml";
pub const SOURCE_CONFIG_FILE: &str = "config.yaml";
