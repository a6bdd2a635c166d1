/*!
 * Tests for configuration loading and validation
 */

use anyhow::Result;
use booktrans::app_config::{Config, LogLevel, TranslationProvider};
use crate::common;

/// A missing configuration file is created with defaults
#[test]
fn test_loadOrCreate_withMissingFile_shouldWriteDefaults() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = temp_dir.path().join("conf.json");

    let created = Config::load_or_create(&path)?;
    assert!(path.exists());
    assert_eq!(created.chunking.word_budget, 600);
    assert_eq!(created.controller.grace_period_ms, 3000);
    assert_eq!(created.controller.log_tail_chars, 4000);
    assert_eq!(created.controller.url_prefix, "/data/jobs");

    let reloaded = Config::load_or_create(&path)?;
    assert_eq!(reloaded.target_language, created.target_language);
    assert_eq!(reloaded.translation.provider, TranslationProvider::Ollama);
    Ok(())
}

/// Sections left out of the file fall back to their defaults
#[test]
fn test_loadOrCreate_withMinimalFile_shouldFillDefaults() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(
        temp_dir.path(),
        "conf.json",
        r#"{
            "source_language": "en",
            "target_language": "uk",
            "translation": {"provider": "echo"},
            "log_level": "debug"
        }"#,
    )?;

    let config = Config::load_or_create(&path)?;
    assert_eq!(config.translation.provider, TranslationProvider::Echo);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.chunking.word_budget, 600);
    assert!(config.glossary.keep_terms.iter().any(|t| t == "Kubernetes"));
    config.validate()?;
    Ok(())
}

/// Unknown languages are rejected
#[test]
fn test_validate_withUnknownLanguage_shouldFail() {
    let mut config = common::echo_config();
    config.target_language = "xx-not-a-language".to_string();
    assert!(config.validate().is_err());
}

/// Malformed files are reported instead of replaced
#[test]
fn test_loadOrCreate_withMalformedFile_shouldFail() -> Result<()> {
    let temp_dir = common::create_temp_dir()?;
    let path = common::create_test_file(temp_dir.path(), "conf.json", "{ not json")?;

    assert!(Config::load_or_create(&path).is_err());
    assert_eq!(std::fs::read_to_string(&path)?, "{ not json");
    Ok(())
}
