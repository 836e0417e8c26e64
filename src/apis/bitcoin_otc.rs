use crate::apis::download::fetch_bytes;
use crate::constants::BITCOIN_OTC;
use crate::error::Result;
use crate::normalize::{required_str, str_field, DedupPolicy};
use crate::raw_data::{JsonLayout, RawFormat};
use crate::tagpack::{CanonicalTag, Category, Confidence, Currency, PackHeader};
use crate::types::{
    AcquireContext, LastmodPolicy, NormalizeContext, RawDataAcquirer, RawPayload, RawRecord,
    RecordNormalizer, SourceDefinition,
};
use serde_json::Value;
use tracing::{info, instrument, warn};
use url::Url;

const SKS_LOOKUP_URL: &str = "https://sks.pod01.fleetstreetops.com/pks/lookup";

pub fn definition() -> SourceDefinition {
    SourceDefinition {
        name: BITCOIN_OTC,
        raw_format: RawFormat::Json(JsonLayout::Array),
        acquirer: Box::new(WebOfTrustAcquirer),
        normalizer: Box::new(WebOfTrustNormalizer),
        header: PackHeader::new()
            .currency(Currency::Btc)
            .category(Category::User)
            .confidence(Confidence::WebCrawl)
            .with_source(),
        dedup: DedupPolicy::None,
        lastmod: LastmodPolicy::RawFileModified,
    }
}

/// Downloads the web-of-trust user list and attaches the OpenPGP user ids
/// published for each user's key.
pub struct WebOfTrustAcquirer;

#[async_trait::async_trait]
impl RawDataAcquirer for WebOfTrustAcquirer {
    #[instrument(skip(self, ctx))]
    async fn acquire(&self, ctx: &AcquireContext) -> Result<RawPayload> {
        let bytes = fetch_bytes(ctx, &ctx.config.url).await?;
        let users: Vec<RawRecord> = serde_json::from_slice(&bytes)?;
        info!("Fetched {} users", users.len());

        let mut records = Vec::with_capacity(users.len());
        for mut user in users {
            // No address, no tag: skip the lookup
            let keyid = str_field(&user, "bitcoinaddress")
                .and(str_field(&user, "keyid"))
                .map(str::to_string);
            if let Some(keyid) = keyid {
                let uids = lookup_uids(ctx, &keyid).await?;
                if let Some(object) = user.as_object_mut() {
                    object.insert("uids".into(), Value::from(uids));
                }
            }
            records.push(user);
        }
        Ok(RawPayload::Records(records))
    }
}

/// User ids of a key from the SKS keyserver index. An error status only
/// costs the label its uids; an unreachable keyserver fails the run.
async fn lookup_uids(ctx: &AcquireContext, keyid: &str) -> Result<Vec<String>> {
    let search = format!("0x{keyid}");
    let url = match Url::parse_with_params(
        SKS_LOOKUP_URL,
        &[("search", search.as_str()), ("fingerprint", "on"), ("op", "index")],
    ) {
        Ok(url) => url,
        Err(e) => {
            warn!("Cannot build lookup URL for key {}: {}", keyid, e);
            return Ok(Vec::new());
        }
    };
    let response = ctx.http.get(url.as_str()).await?;
    if response.is_success() {
        return Ok(parse_uid_lines(&response.text()));
    }
    if response.status != 404 {
        warn!("HTTP {} from {}", response.status, url);
    }
    Ok(Vec::new())
}

/// `uid:<percent-encoded user id>:...` lines of a machine-readable index.
pub fn parse_uid_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter(|line| line.starts_with("uid:"))
        .filter_map(|line| line.split(':').nth(1))
        .map(|uid| {
            urlencoding::decode(uid)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| uid.to_string())
        })
        .collect()
}

pub struct WebOfTrustNormalizer;

impl RecordNormalizer for WebOfTrustNormalizer {
    fn required_fields(&self) -> &'static [&'static str] {
        &["bitcoinaddress", "nick"]
    }

    fn normalize(&self, row: &RawRecord, _ctx: &NormalizeContext<'_>) -> Result<Vec<CanonicalTag>> {
        let address = required_str(row, "bitcoinaddress")?;
        let nick = required_str(row, "nick")?;

        let mut label = vec![format!("User {nick} at Libera IRC #bitcoin-otc channel")];
        if let Some(keyid) = str_field(row, "keyid") {
            label.push(format!("OpenPGP key id: {keyid}"));
            if let Some(uids) = row.get("uids").and_then(Value::as_array) {
                label.extend(uids.iter().filter_map(Value::as_str).map(str::to_string));
            }
        }
        Ok(vec![CanonicalTag::new(address).label(label.join(", "))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::test_support::{config, context};
    use crate::error::ScraperError;
    use crate::infra::in_memory::StaticWeb;
    use crate::normalize::normalize_rows;
    use serde_json::json;

    const LIST_URL: &str = "https://bitcoin-otc.com/viewgpg.php?outformat=json";

    fn normalize(rows: &[RawRecord]) -> Vec<CanonicalTag> {
        let config = config("");
        let ctx = NormalizeContext { config: &config };
        normalize_rows(BITCOIN_OTC, rows, &WebOfTrustNormalizer, &ctx, Some(&Currency::Btc), DedupPolicy::None).tags
    }

    #[test]
    fn rows_without_address_produce_no_tag() {
        let tags = normalize(&[json!({"bitcoinaddress": null, "nick": "alice", "keyid": null})]);
        assert!(tags.is_empty());
    }

    #[test]
    fn label_carries_key_id_and_uids() {
        let tags = normalize(&[json!({
            "bitcoinaddress": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
            "nick": "bob",
            "keyid": "ABCDEF0123456789",
            "uids": ["Bob <bob@example.org>"]
        })]);
        assert_eq!(
            tags[0].label.as_deref(),
            Some("User bob at Libera IRC #bitcoin-otc channel, OpenPGP key id: ABCDEF0123456789, Bob <bob@example.org>")
        );
    }

    #[test]
    fn uid_lines_are_percent_decoded() {
        let body = "info:1:1\npub:ABCDEF:1:2048:1400000000::\nuid:Bob%20%3Cbob@example.org%3E:1400000000::\nuid:Robert:1::";
        assert_eq!(parse_uid_lines(body), vec!["Bob <bob@example.org>", "Robert"]);
    }

    #[tokio::test]
    async fn acquisition_enriches_users_with_key_uids() {
        let users = r#"[
            {"nick": "bob", "bitcoinaddress": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "keyid": "ABCD"},
            {"nick": "carol", "bitcoinaddress": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "keyid": "FFFF"},
            {"nick": "dave", "bitcoinaddress": null, "keyid": "EEEE"}
        ]"#;
        let web = StaticWeb::new()
            .with_json(LIST_URL, users)
            .with_page(
                &format!("{SKS_LOOKUP_URL}?search=0xABCD&fingerprint=on&op=index"),
                "uid:Bob%20Smith:1::\n",
            );
        let (web, ctx) = context(web, config(&format!("URL: \"{LIST_URL}\"\n")));

        let RawPayload::Records(records) = WebOfTrustAcquirer.acquire(&ctx).await.unwrap() else {
            panic!("expected records");
        };
        assert_eq!(records[0]["uids"], json!(["Bob Smith"]));
        // carol's key is unknown to the keyserver (404)
        assert_eq!(records[1]["uids"], json!([]));
        assert!(records[2].get("uids").is_none());
        assert_eq!(web.requests().len(), 3);
    }

    /// Serves the user list but cannot reach the keyserver.
    struct KeyserverDown(StaticWeb);

    #[async_trait::async_trait]
    impl crate::app::ports::HttpClientPort for KeyserverDown {
        async fn get(&self, url: &str) -> Result<crate::app::ports::HttpGetResult> {
            if url.starts_with(SKS_LOOKUP_URL) {
                return Err(ScraperError::RetriesExhausted {
                    what: format!("GET {url}"),
                    attempts: 3,
                    last_error: "connection refused".into(),
                });
            }
            crate::app::ports::HttpClientPort::get(&self.0, url).await
        }
    }

    #[tokio::test]
    async fn unreachable_keyserver_fails_the_acquisition() {
        let users = r#"[{"nick": "bob", "bitcoinaddress": "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", "keyid": "ABCD"}]"#;
        let http = std::sync::Arc::new(KeyserverDown(StaticWeb::new().with_json(LIST_URL, users)));
        let ctx = AcquireContext::new(
            config(&format!("URL: \"{LIST_URL}\"\n")),
            http,
            std::sync::Arc::new(StaticWeb::new()),
            crate::retry::RetryPolicy::immediate(1),
        );

        let result = WebOfTrustAcquirer.acquire(&ctx).await;

        assert!(matches!(result, Err(ScraperError::RetriesExhausted { .. })));
    }
}
