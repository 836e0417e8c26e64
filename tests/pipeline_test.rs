use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tagpack_scraper::apis::create_source;
use tagpack_scraper::config::{AppConfig, SourceConfig};
use tagpack_scraper::constants::{self, BITCOIN_ABUSE, BITCOIN_OTC, RANSOMWHERE, SOURCE_CONFIG_FILE};
use tagpack_scraper::infra::in_memory::StaticWeb;
use tagpack_scraper::pipeline::{AcquireOptions, Pipeline};
use tagpack_scraper::retry::RetryPolicy;
use tagpack_scraper::tagpack::{Category, Currency, TagPackDocument};
use tempfile::TempDir;

const GENESIS: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
const P2SH: &str = "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy";

fn write_config(dir: &TempDir, yaml: &str) -> SourceConfig {
    let path = dir.path().join(SOURCE_CONFIG_FILE);
    fs::write(&path, yaml).unwrap();
    SourceConfig::load(&path).unwrap()
}

fn read_yaml(path: &Path) -> TagPackDocument {
    serde_yaml::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn rows_without_address_produce_no_tags() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        &dir,
        "TITLE: Bitcoin OTC\nCREATOR: Tester\nDESCRIPTION: Web of trust\n\
         SOURCE: https://bitcoin-otc.com/\nRAW_FILE_NAME: raw.json\n\
         TAGPACK_FILE_NAME: tagpack.yaml\nLASTMOD: 2023-05-01\n",
    );
    let raw = serde_json::json!([
        {"nick": "alice", "bitcoinaddress": GENESIS, "keyid": null},
        {"nick": "bob", "bitcoinaddress": null, "keyid": null}
    ]);
    fs::write(config.raw_path(), raw.to_string()).unwrap();

    let definition = create_source(BITCOIN_OTC).unwrap();
    let result = Pipeline::generate(&definition, &config).unwrap();

    assert_eq!(result.rows_total, 2);
    assert_eq!(result.rows_skipped, 1);
    assert_eq!(result.tags_emitted, 1);

    let document = read_yaml(&config.tagpack_path());
    assert_eq!(document.lastmod, NaiveDate::from_ymd_opt(2023, 5, 1).unwrap());
    assert_eq!(document.currency, Some(Currency::Btc));
    assert_eq!(document.source.as_deref(), Some("https://bitcoin-otc.com/"));
    assert_eq!(document.tags.len(), 1);
    assert_eq!(document.tags[0].address, GENESIS);
    assert_eq!(
        document.tags[0].label.as_deref(),
        Some("User alice at Libera IRC #bitcoin-otc channel")
    );
}

#[test]
fn abuse_report_labels_follow_report_count() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        &dir,
        "TITLE: BitcoinAbuse\nCREATOR: Tester\nDESCRIPTION: Reports\n\
         SOURCE: https://www.bitcoinabuse.com/\nRAW_FILE_NAME: raw.json\n\
         TAGPACK_FILE_NAME: tagpack.yaml\nLASTMOD: 2023-05-01\n",
    );
    let raw = serde_json::json!({
        "https://www.bitcoinabuse.com/reports/a": {
            "address": GENESIS, "count": 1, "latest_date": "2022-03-01T10:00:00+00:00"
        },
        "https://www.bitcoinabuse.com/reports/b": {
            "address": P2SH, "count": 4, "latest_date": "2022-04-02T08:30:00+00:00"
        }
    });
    fs::write(config.raw_path(), raw.to_string()).unwrap();

    let definition = create_source(BITCOIN_ABUSE).unwrap();
    Pipeline::generate(&definition, &config).unwrap();

    let document = read_yaml(&config.tagpack_path());
    assert_eq!(document.category, Some(Category::User));
    let labels: Vec<_> = document.tags.iter().map(|t| t.label.as_deref()).collect();
    assert_eq!(labels, vec![Some("Abuse report"), Some("Abuse reports")]);
    assert_eq!(
        document.tags[0].source.as_deref(),
        Some(format!("https://www.bitcoinabuse.com/reports/{GENESIS}").as_str())
    );
    assert_eq!(document.tags[1].lastmod, NaiveDate::from_ymd_opt(2022, 4, 2));
}

#[tokio::test]
async fn download_source_runs_end_to_end_with_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        &dir,
        "TITLE: Ransomwhere\nCREATOR: Tester\nDESCRIPTION: Ransom payments\n\
         URL: https://api.ransomwhe.re/export\nSOURCE: https://ransomwhe.re/\n\
         RAW_FILE_NAME: raw.json\nTAGPACK_FILE_NAME: tagpack.json\nLASTMOD: 2023-05-01\n",
    );
    let export = serde_json::json!({"result": [
        {"address": GENESIS, "blockchain": "bitcoin", "family": "Locky"},
        {"address": "not-an-address", "blockchain": "bitcoin", "family": "Ryuk"},
        {"address": GENESIS, "blockchain": "bitcoin", "family": "Locky"}
    ]});
    let web = Arc::new(StaticWeb::new().with_json("https://api.ransomwhe.re/export", &export.to_string()));
    let pipeline = Pipeline::new(web.clone(), web.clone(), RetryPolicy::immediate(1));
    let definition = create_source(RANSOMWHERE).unwrap();

    let result = pipeline.run(&definition, &config, AcquireOptions::default()).await.unwrap();

    assert!(result.acquired);
    assert_eq!(web.requests(), vec!["https://api.ransomwhe.re/export".to_string()]);
    assert_eq!(result.invalid_tags, 1);
    assert_eq!(result.tags_emitted, 2);
    assert!(config.raw_path().exists());

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(config.tagpack_path()).unwrap()).unwrap();
    assert_eq!(json["title"], "Ransomwhere");
    assert_eq!(json["tags"][0]["label"], "Ransomware: Locky");
    assert_eq!(json["tags"][0]["abuse"], "ransomware");
}

#[tokio::test]
async fn failed_download_leaves_no_raw_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        &dir,
        "TITLE: Ransomwhere\nCREATOR: Tester\nDESCRIPTION: Ransom payments\n\
         URL: https://api.ransomwhe.re/export\nRAW_FILE_NAME: raw.json\n\
         TAGPACK_FILE_NAME: tagpack.yaml\n",
    );
    let web = Arc::new(StaticWeb::new());
    let pipeline = Pipeline::new(web.clone(), web, RetryPolicy::immediate(1));
    let definition = create_source(RANSOMWHERE).unwrap();

    assert!(pipeline.run(&definition, &config, AcquireOptions::default()).await.is_err());
    assert!(!config.raw_path().exists());
    assert!(!config.tagpack_path().exists());
}

#[test]
fn shipped_source_configs_load() {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let app = AppConfig::load(&root.join(constants::DEFAULT_CONFIG_FILE)).unwrap();
    for name in constants::get_supported_sources() {
        let path = root.join(app.source_dir(name)).join(SOURCE_CONFIG_FILE);
        let config = SourceConfig::load(&path).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert!(!config.url.is_empty(), "{name} has no URL");
        assert!(create_source(name).is_some());
    }
}
