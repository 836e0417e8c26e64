//! Address format table: one ordered list of currency patterns, compiled
//! once. Order matters, the first currency whose pattern matches wins.

use crate::tagpack::Currency;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

const PATTERNS: &[(&str, &str)] = &[
    (
        "BTC",
        r"\b((bc(0([ac-hj-np-z02-9]{39}|[ac-hj-np-z02-9]{59})|1[ac-hj-np-z02-9]{8,87}))|[13][a-km-zA-HJ-NP-Z1-9]{25,34})\b",
    ),
    (
        "BCH",
        r"\b(((?:bitcoincash|bchtest):)?([13][0-9a-zA-Z]{33}))|\b(((?:bitcoincash|bchtest):)?(qp)?[0-9a-zA-Z]{40})\b",
    ),
    ("LTC", r"\b([LM3][a-km-zA-HJ-NP-Z1-9]{25,33})\b"),
    ("ZEC", r"\b([tz][13][a-km-zA-HJ-NP-Z1-9]{33})\b"),
    ("ETH", r"\b((0x)?[0-9a-fA-F]{40})\b"),
    ("USDT", r"\b(T[A-Za-z1-9]{33})\b"),
];

pub static ADDRESS_PATTERNS: Lazy<AddressPatterns> = Lazy::new(AddressPatterns::standard);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressCheck {
    Valid,
    Invalid,
    /// No pattern is known for the currency.
    Unchecked,
}

struct Pattern {
    currency: Currency,
    search: Regex,
    full: Regex,
}

pub struct AddressPatterns {
    patterns: Vec<Pattern>,
}

impl AddressPatterns {
    fn standard() -> Self {
        let patterns = PATTERNS
            .iter()
            .map(|(code, pattern)| Pattern {
                currency: Currency::from_code(code),
                search: Regex::new(pattern).expect("address search pattern compiles"),
                full: Regex::new(&format!("^(?:{pattern})$")).expect("address full pattern compiles"),
            })
            .collect();
        Self { patterns }
    }

    /// First currency whose pattern matches the whole string.
    pub fn detect(&self, address: &str) -> Option<Currency> {
        self.patterns
            .iter()
            .find(|p| p.full.is_match(address))
            .map(|p| p.currency.clone())
    }

    /// Every match of every pattern, currency by currency. The same string
    /// may be reported under several currencies.
    pub fn scan(&self, text: &str) -> Vec<(Currency, String)> {
        self.patterns
            .iter()
            .flat_map(|p| {
                p.search
                    .find_iter(text)
                    .map(|m| (p.currency.clone(), m.as_str().to_string()))
            })
            .collect()
    }

    /// Every address-looking substring in free text. An address is reported
    /// once, with the first currency that found it.
    pub fn find_all(&self, text: &str) -> Vec<(Currency, String)> {
        let mut seen = HashSet::new();
        self.scan(text)
            .into_iter()
            .filter(|(_, address)| seen.insert(address.clone()))
            .collect()
    }

    pub fn validate(&self, currency: &Currency, address: &str) -> AddressCheck {
        match self.patterns.iter().find(|p| &p.currency == currency) {
            Some(p) if p.full.is_match(address) => AddressCheck::Valid,
            Some(_) => AddressCheck::Invalid,
            None => AddressCheck::Unchecked,
        }
    }

    /// Whether the string starts with something shaped like the currency's
    /// address (prefix match, as used when filtering scraped link texts).
    pub fn starts_like(&self, currency: &Currency, text: &str) -> bool {
        self.patterns
            .iter()
            .find(|p| &p.currency == currency)
            .and_then(|p| p.search.find(text))
            .map(|m| m.start() == 0)
            .unwrap_or(false)
    }
}
