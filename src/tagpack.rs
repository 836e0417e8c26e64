//! TagPack domain model and its serializer.
//!
//! A TagPack is a header (title, creator, description, lastmod and optional
//! defaults every tag inherits) followed by the list of address tags. Field
//! order of the structs below is the key order of the emitted document.

use crate::config::SourceConfig;
use crate::error::{Result, ScraperError};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

macro_rules! string_enum_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Currency {
    Btc,
    Bch,
    Ltc,
    Zec,
    Eth,
    Usdt,
    Xmr,
    /// Codes we pass through without an address pattern.
    Other(String),
}

impl Currency {
    pub fn as_str(&self) -> &str {
        match self {
            Currency::Btc => "BTC",
            Currency::Bch => "BCH",
            Currency::Ltc => "LTC",
            Currency::Zec => "ZEC",
            Currency::Eth => "ETH",
            Currency::Usdt => "USDT",
            Currency::Xmr => "XMR",
            Currency::Other(code) => code,
        }
    }

    /// Resolves a ticker, including aliases such as `XBT`.
    pub fn from_code(code: &str) -> Currency {
        match code.trim().to_ascii_uppercase().as_str() {
            "BTC" | "XBT" => Currency::Btc,
            "BCH" => Currency::Bch,
            "LTC" => Currency::Ltc,
            "ZEC" => Currency::Zec,
            "ETH" => Currency::Eth,
            "USDT" => Currency::Usdt,
            "XMR" => Currency::Xmr,
            other => Currency::Other(other.to_string()),
        }
    }

    /// Resolves blockchain names as used by ransomware trackers.
    pub fn from_chain_name(name: &str) -> Currency {
        let code = match name.trim().to_lowercase().as_str() {
            "ada" => "ADA",
            "bitcoin cash" => "BCH",
            "binance" => "BNB",
            "bitcoin sv" => "BSV",
            "bitcoin" => "BTC",
            "dash" => "DASH",
            "dogecoin" => "DOGE",
            "eos" => "EOS",
            "ethereum" => "ETH",
            "litecoin" => "LTC",
            "vertcoin" => "VTC",
            "stellar lumen" => "XLM",
            "monero" => "XMR",
            "ripple" => "XRP",
            "tez" => "XTZ",
            "zcash" => "ZEC",
            _ => return Currency::Other(name.trim().to_string()),
        };
        Currency::from_code(code)
    }
}

impl FromStr for Currency {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Err(ScraperError::parse("empty currency code"));
        }
        Ok(Currency::from_code(s))
    }
}

string_enum_serde!(Currency);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    User,
    Perpetrator,
    Faucet,
    Organization,
    Coinjoin,
    MixingService,
    Exchange,
    Market,
    Miner,
    PaymentProcessor,
    WalletService,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::User => "user",
            Category::Perpetrator => "perpetrator",
            Category::Faucet => "faucet",
            Category::Organization => "organization",
            Category::Coinjoin => "coinjoin",
            Category::MixingService => "mixing_service",
            Category::Exchange => "exchange",
            Category::Market => "market",
            Category::Miner => "miner",
            Category::PaymentProcessor => "payment_processor",
            Category::WalletService => "wallet_service",
            Category::Other(text) => text,
        }
    }
}

impl FromStr for Category {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self> {
        let category = match s.trim().to_lowercase().as_str() {
            "" => return Err(ScraperError::parse("empty category")),
            "user" => Category::User,
            "perpetrator" => Category::Perpetrator,
            "faucet" => Category::Faucet,
            "organization" => Category::Organization,
            "coinjoin" => Category::Coinjoin,
            "mixing_service" => Category::MixingService,
            "exchange" => Category::Exchange,
            "market" => Category::Market,
            "miner" => Category::Miner,
            "payment_processor" => Category::PaymentProcessor,
            "wallet_service" => Category::WalletService,
            _ => Category::Other(s.trim().to_string()),
        };
        Ok(category)
    }
}

string_enum_serde!(Category);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Confidence {
    WebCrawl,
    Ownership,
    Authority,
    Forensic,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::WebCrawl => "web_crawl",
            Confidence::Ownership => "ownership",
            Confidence::Authority => "authority",
            Confidence::Forensic => "forensic",
        }
    }
}

impl FromStr for Confidence {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "web_crawl" => Ok(Confidence::WebCrawl),
            "ownership" => Ok(Confidence::Ownership),
            "authority" => Ok(Confidence::Authority),
            "forensic" => Ok(Confidence::Forensic),
            other => Err(ScraperError::parse(format!("unknown confidence '{other}'"))),
        }
    }
}

string_enum_serde!(Confidence);

/// One address record. Unset fields are inherited from the pack header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTag {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abuse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastmod: Option<NaiveDate>,
}

impl CanonicalTag {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            currency: None,
            label: None,
            source: None,
            category: None,
            abuse: None,
            confidence: None,
            lastmod: None,
        }
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn abuse(mut self, abuse: impl Into<String>) -> Self {
        self.abuse = Some(abuse.into());
        self
    }

    pub fn confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn lastmod(mut self, lastmod: NaiveDate) -> Self {
        self.lastmod = Some(lastmod);
        self
    }
}

/// Header defaults a source contributes on top of its configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackHeader {
    pub label: Option<String>,
    pub currency: Option<Currency>,
    pub category: Option<Category>,
    pub abuse: Option<String>,
    pub confidence: Option<Confidence>,
    /// Copy the configured `SOURCE` URL into the header.
    pub with_source: bool,
}

impl PackHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn abuse(mut self, abuse: impl Into<String>) -> Self {
        self.abuse = Some(abuse.into());
        self
    }

    pub fn confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_source(mut self) -> Self {
        self.with_source = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagPackDocument {
    pub title: String,
    pub creator: String,
    pub description: String,
    pub lastmod: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<Currency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abuse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    pub tags: Vec<CanonicalTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

impl OutputFormat {
    pub fn for_path(path: &Path) -> OutputFormat {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => OutputFormat::Json,
            _ => OutputFormat::Yaml,
        }
    }
}

pub struct TagPackEmitter;

impl TagPackEmitter {
    /// Merges configuration, source header defaults and tags. Configured
    /// LABEL / CATEGORY / ABUSE win over the source defaults.
    pub fn assemble(
        config: &SourceConfig,
        header: &PackHeader,
        lastmod: NaiveDate,
        tags: Vec<CanonicalTag>,
    ) -> Result<TagPackDocument> {
        let category = match &config.category {
            Some(raw) => Some(raw.parse::<Category>()?),
            None => header.category.clone(),
        };
        let source = if header.with_source && !config.source.is_empty() {
            Some(config.source.clone())
        } else {
            None
        };
        Ok(TagPackDocument {
            title: config.title.clone(),
            creator: config.creator.clone(),
            description: config.description.clone(),
            lastmod,
            label: config.label.clone().or_else(|| header.label.clone()),
            source,
            currency: header.currency.clone(),
            category,
            abuse: config.abuse.clone().or_else(|| header.abuse.clone()),
            confidence: header.confidence,
            tags,
        })
    }

    pub fn render(document: &TagPackDocument, format: OutputFormat) -> Result<String> {
        match format {
            OutputFormat::Yaml => Ok(serde_yaml::to_string(document)?),
            OutputFormat::Json => {
                let mut json = serde_json::to_string_pretty(document)?;
                json.push('\n');
                Ok(json)
            }
        }
    }

    /// Writes through a temporary file so a failed run never leaves a
    /// truncated TagPack behind.
    pub fn write(document: &TagPackDocument, path: &Path) -> Result<()> {
        let rendered = Self::render(document, OutputFormat::for_path(path))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("part");
        fs::write(&tmp, rendered)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SourceConfig {
        SourceConfig::from_yaml(
            "TITLE: Test pack\nCREATOR: Tester\nDESCRIPTION: Unit test\nSOURCE: https://example.org\n\
             RAW_FILE_NAME: raw.json\nTAGPACK_FILE_NAME: out.yaml\n",
        )
        .unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 5, 17).unwrap()
    }

    #[test]
    fn currency_aliases_resolve() {
        assert_eq!(Currency::from_code("XBT"), Currency::Btc);
        assert_eq!(Currency::from_code("usdt"), Currency::Usdt);
        assert_eq!(Currency::from_chain_name("Bitcoin Cash"), Currency::Bch);
        assert_eq!(Currency::from_chain_name("dogecoin"), Currency::Other("DOGE".into()));
        assert_eq!(Currency::from_chain_name("tron"), Currency::Other("tron".into()));
    }

    #[test]
    fn category_parsing_is_case_insensitive() {
        assert_eq!("User".parse::<Category>().unwrap(), Category::User);
        assert_eq!("mixing_service".parse::<Category>().unwrap(), Category::MixingService);
        assert_eq!("Locky".parse::<Category>().unwrap(), Category::Other("Locky".into()));
    }

    #[test]
    fn yaml_keeps_header_and_tag_key_order() {
        let header = PackHeader::new()
            .currency(Currency::Btc)
            .category(Category::User)
            .confidence(Confidence::WebCrawl)
            .with_source();
        let tags = vec![
            CanonicalTag::new("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").label("Abuse report").lastmod(date()),
        ];
        let doc = TagPackEmitter::assemble(&config(), &header, date(), tags).unwrap();
        let yaml = TagPackEmitter::render(&doc, OutputFormat::Yaml).unwrap();

        let keys: Vec<&str> = yaml
            .lines()
            .filter(|l| !l.starts_with(' ') && !l.starts_with('-'))
            .filter_map(|l| l.split(':').next())
            .collect();
        assert_eq!(
            keys,
            vec!["title", "creator", "description", "lastmod", "source", "currency", "category", "confidence", "tags"]
        );
        let address_at = yaml.find("address:").unwrap();
        let label_at = yaml.find("label: Abuse report").unwrap();
        assert!(address_at < label_at);
        assert!(!yaml.contains("abuse:"));
    }

    #[test]
    fn configured_overrides_win_over_source_defaults() {
        let mut config = config();
        config.label = Some("OFAC".into());
        config.category = Some("perpetrator".into());
        let header = PackHeader::new().label("default").category(Category::User);
        let doc = TagPackEmitter::assemble(&config, &header, date(), vec![]).unwrap();
        assert_eq!(doc.label.as_deref(), Some("OFAC"));
        assert_eq!(doc.category, Some(Category::Perpetrator));
        assert!(doc.source.is_none());
    }

    #[test]
    fn json_output_round_trips() {
        let doc = TagPackEmitter::assemble(
            &config(),
            &PackHeader::new(),
            date(),
            vec![CanonicalTag::new("t1Z9v9Yx6cKq8dtPUvEwZJXWcQJ9U1vUcmQ").currency(Currency::Zec)],
        )
        .unwrap();
        let json = TagPackEmitter::render(&doc, OutputFormat::Json).unwrap();
        let parsed: TagPackDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, doc);
        assert!(json.contains("\"lastmod\": \"2023-05-17\""));
    }

    #[test]
    fn write_picks_format_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let doc = TagPackEmitter::assemble(&config(), &PackHeader::new(), date(), vec![]).unwrap();
        let path = dir.path().join("pack.json");
        TagPackEmitter::write(&doc, &path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.trim_start().starts_with('{'));
        assert!(!dir.path().join("pack.part").exists());
    }
}
