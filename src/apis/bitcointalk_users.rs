use crate::address::ADDRESS_PATTERNS;
use crate::app::page::Page;
use crate::constants::BITCOINTALK_USERS;
use crate::error::{Result, ScraperError};
use crate::normalize::{int_field, required_str, DedupPolicy};
use crate::raw_data::RawFormat;
use crate::tagpack::{CanonicalTag, Category, Currency, PackHeader};
use crate::types::{
    AcquireContext, AcquireMode, LastmodPolicy, NormalizeContext, RawDataAcquirer, RawPayload,
    RawRecord, RecordNormalizer, SourceDefinition,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument};

const NO_PROFILE_TITLE: &str = "An Error Has Occurred!";
const INTEGER_KEYS: &[&str] = &["posts", "activity", "merit", "age"];

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: BITCOINTALK_USERS,
        raw_format: RawFormat::JsonLines,
        acquirer: Box::new(ProfileAcquirer),
        normalizer: Box::new(ProfileNormalizer),
        header: PackHeader::new(),
        dedup: DedupPolicy::None,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileSettings {
    /// Profile URL with an `{id}` placeholder.
    pub profile_url: String,
    pub entries: String,
    pub signature: String,
    pub avatar: String,
    /// Give up after this many consecutive ids without a profile.
    pub max_misses: u64,
    /// Pause between profile requests, as the forum rules ask.
    pub delay_ms: u64,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            profile_url: "https://bitcointalk.org/index.php?action=profile;u={id}".into(),
            entries: "table > tbody > tr > td > table > tbody > tr:nth-of-type(2) > td:nth-of-type(1) > table > tbody > tr"
                .into(),
            signature: "div.signature".into(),
            avatar: "img.avatar".into(),
            max_misses: 1000,
            delay_ms: 1000,
        }
    }
}

impl ProfileSettings {
    pub fn profile_url(&self, user_id: u64) -> String {
        self.profile_url.replace("{id}", &user_id.to_string())
    }
}

/// Crawls forum profiles by ascending user id.
pub struct ProfileAcquirer;

#[async_trait::async_trait]
impl RawDataAcquirer for ProfileAcquirer {
    #[instrument(skip(self, ctx), fields(mode = ?ctx.mode))]
    async fn acquire(&self, ctx: &AcquireContext) -> Result<RawPayload> {
        let settings: ProfileSettings = ctx.config.selectors()?;
        let mut profiles = match ctx.mode {
            AcquireMode::Update => ctx.existing.clone(),
            AcquireMode::Fresh => Vec::new(),
        };
        let start = max_user_id(&profiles) + 1;
        info!("Starting with user ID {}", start);

        let mut user_id = start;
        let mut last_valid = start;
        while user_id - last_valid < settings.max_misses {
            if let Some(profile) = fetch_profile(ctx, &settings, user_id).await? {
                last_valid = user_id;
                profiles.push(profile);
            }
            pause(&settings).await;
            user_id += 1;
        }

        let missing = missing_user_ids(&profiles);
        info!("Found {} missing user IDs; trying to re-fetch them", missing.len());
        for user_id in missing {
            if let Some(profile) = fetch_profile(ctx, &settings, user_id).await? {
                profiles.push(profile);
            }
            pause(&settings).await;
        }
        Ok(RawPayload::Records(profiles))
    }
}

async fn pause(settings: &ProfileSettings) {
    if settings.delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(settings.delay_ms)).await;
    }
}

async fn fetch_profile(ctx: &AcquireContext, settings: &ProfileSettings, user_id: u64) -> Result<Option<RawRecord>> {
    let url = settings.profile_url(user_id);
    let page = ctx.pages.navigate(&url).await?;
    if page.status() == 404 || page.title().as_deref() == Some(NO_PROFILE_TITLE) {
        debug!("No profile for user {}", user_id);
        return Ok(None);
    }
    parse_profile(&page, settings, user_id).map(Some)
}

/// Profile fields as `key: value`, keys lowercased with spaces turned into
/// underscores. Hidden e-mail and age entries are left out.
pub fn parse_profile(page: &Page, settings: &ProfileSettings, user_id: u64) -> Result<RawRecord> {
    let mut data = Map::new();
    data.insert("user_id".into(), Value::from(user_id));

    for cells in page.rows(&settings.entries, "td")? {
        let (Some(key_cell), Some(value_cell)) = (cells.first(), cells.get(1)) else {
            continue;
        };
        let Some(key) = key_cell.locate("b")?.into_iter().next() else {
            continue;
        };
        let key = key.text.trim().to_lowercase().replace(':', "").replace(' ', "_");
        let value = value_cell.text.trim();
        if key.is_empty() || value.is_empty() || key == "email" || (key == "age" && value == "N/A") {
            continue;
        }
        let value = if INTEGER_KEYS.contains(&key.as_str()) {
            match value.replace(',', "").parse::<i64>() {
                Ok(number) => Value::from(number),
                Err(_) => {
                    debug!("Non-numeric {} '{}' for user {}", key, value, user_id);
                    continue;
                }
            }
        } else {
            Value::from(value)
        };
        data.insert(key, value);
    }

    if let Some(signature) = page.locate_first(&settings.signature)? {
        if !signature.text.is_empty() {
            data.insert("signature".into(), Value::from(signature.lines.join("\n")));
        }
    }
    if let Some(src) = page
        .locate_first(&settings.avatar)?
        .and_then(|avatar| avatar.attr("src").map(str::to_string))
        .filter(|src| !src.is_empty())
    {
        data.insert("avatar_url".into(), Value::from(page.resolve(&src).unwrap_or(src)));
    }
    Ok(Value::Object(data))
}

fn max_user_id(profiles: &[RawRecord]) -> u64 {
    profiles
        .iter()
        .filter_map(|p| int_field(p, "user_id"))
        .max()
        .map_or(0, |id| id.max(0) as u64)
}

/// Ids between 1 and the highest known id without a profile.
pub fn missing_user_ids(profiles: &[RawRecord]) -> Vec<u64> {
    let known: HashSet<u64> = profiles
        .iter()
        .filter_map(|p| int_field(p, "user_id"))
        .map(|id| id.max(0) as u64)
        .collect();
    (1..=max_user_id(profiles)).filter(|id| !known.contains(id)).collect()
}

/// Tags every address-shaped string in a profile.
pub struct ProfileNormalizer;

impl RecordNormalizer for ProfileNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["user_id", "name"]
    }

    fn normalize(&self, row: &RawRecord, ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let name = required_str(row, "name")?;
        let user_id = int_field(row, "user_id")
            .ok_or_else(|| ScraperError::parse("user_id is not a number"))?;
        let settings: ProfileSettings = ctx.config.selectors()?;
        let source = settings.profile_url(user_id.max(0) as u64);

        let mut seen = HashSet::new();
        let mut found: Vec<(Currency, String)> = Vec::new();
        let strings = row.as_object().into_iter().flat_map(|o| o.values()).filter_map(Value::as_str);
        for value in strings {
            for (currency, address) in ADDRESS_PATTERNS.find_all(value) {
                if seen.insert(address.clone()) {
                    found.push((currency, address));
                }
            }
        }

        Ok(found
            .into_iter()
            .map(|(currency, address)| {
                CanonicalTag::new(address)
                    .currency(currency)
                    .label(format!("User {name} at BitcoinTalk forum"))
                    .source(source.clone())
                    .category(Category::User)
            })
            .collect())
    }
}
