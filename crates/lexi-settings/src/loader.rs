//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LexiSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate ranges that serde cannot express

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::LexiSettings;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// `~/.lexi/settings.json`
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".lexi").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<LexiSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides. A missing file means
/// defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<LexiSettings> {
    let mut settings = read_file(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    validate(&settings)?;
    Ok(settings)
}

fn read_file(path: &Path) -> Result<LexiSettings> {
    let defaults = serde_json::to_value(LexiSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Values that fail to parse or fall outside their range are logged and
/// ignored, leaving the file or default value in place.
pub fn apply_env_overrides<F>(settings: &mut LexiSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("LEXI_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("LEXI_PORT", |s| parse_u16_range(s, 1, 65535)) {
        settings.server.port = v;
    }

    if let Some(v) = env.string("LEXI_MODEL") {
        settings.model.name = v;
    }
    if let Some(v) = env.parsed("LEXI_MAX_TOKENS", |s| parse_usize_range(s, 1, 200_000)) {
        // bounded above, so the cast cannot truncate
        settings.model.max_tokens = v as u32;
    }
    if let Some(v) = env.string("LEXI_API_BASE_URL") {
        settings.model.base_url = v;
    }
    if let Some(v) = env.string("ANTHROPIC_API_KEY") {
        settings.model.api_key = Some(SecretString::from(v));
    }

    if let Some(v) = env.parsed("LEXI_HISTORY_CAP", |s| parse_usize_range(s, 1, 10_000)) {
        settings.history.cap = v;
    }
    if let Some(v) = env.parsed("LEXI_MAX_ROUNDS", |s| parse_usize_range(s, 1, 100)) {
        settings.engine.max_rounds = v as u32;
    }
    if let Some(v) = env.parsed("LEXI_TOOL_TIMEOUT_SECS", |s| parse_usize_range(s, 1, 3_600)) {
        settings.engine.tool_timeout_secs = v as u64;
    }
    if let Some(v) = env.parsed("LEXI_SIMILARITY_THRESHOLD", |s| parse_f64_range(s, 0.0, 1.0)) {
        settings.documents.similarity_threshold = v;
    }

    if let Some(v) = env.parsed("LEXI_LOG_LEVEL", parse_log_level) {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("LEXI_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

/// Reject values a file could set that the server cannot run with.
pub fn validate(settings: &LexiSettings) -> Result<()> {
    let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));

    if settings.server.host.trim().is_empty() {
        return invalid("server.host must not be empty");
    }
    if settings.model.max_tokens == 0 {
        return invalid("model.max_tokens must be at least 1");
    }
    if settings.engine.max_rounds == 0 {
        return invalid("engine.max_rounds must be at least 1");
    }
    if settings.engine.tool_timeout_secs == 0 {
        return invalid("engine.tool_timeout_secs must be at least 1");
    }
    if settings.history.cap == 0 {
        return invalid("history.cap must be at least 1");
    }
    if !(0.0..=1.0).contains(&settings.documents.similarity_threshold) {
        return invalid("documents.similarity_threshold must be between 0 and 1");
    }
    if parse_log_level(&settings.logging.level).is_none() {
        return Err(SettingsError::InvalidValue(format!(
            "logging.level must be one of {}",
            LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// NaN never parses as in range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn parse_log_level(val: &str) -> Option<String> {
    let level = val.trim().to_lowercase();
    LOG_LEVELS.contains(&level.as_str()).then_some(level)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_recurses_and_skips_nulls() {
        let target = json!({"server": {"host": "0.0.0.0", "port": 8000}, "tags": [1, 2]});
        let source = json!({"server": {"port": 9000, "host": null}, "tags": [3]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
        assert_eq!(merged["server"]["port"], 9000);
        assert_eq!(merged["tags"], json!([3]));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.model.max_tokens, 4096);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": {{"port": 9100}}, "engine": {{"system_prompt": "Be brief."}}, "history": {{"cap": 6}}}}"#
        )
        .unwrap();

        let settings = read_file(file.path()).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.engine.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(settings.engine.max_rounds, 10);
        assert_eq!(settings.history.cap, 6);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(read_file(file.path()), Err(SettingsError::Json(_))));
    }

    #[test]
    fn env_overrides_win() {
        let mut settings = LexiSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("LEXI_HOST", "127.0.0.1"),
                ("LEXI_PORT", "9200"),
                ("LEXI_MODEL", "claude-test"),
                ("LEXI_MAX_TOKENS", "1024"),
                ("ANTHROPIC_API_KEY", "sk-env"),
                ("LEXI_HISTORY_CAP", "8"),
                ("LEXI_MAX_ROUNDS", "4"),
                ("LEXI_TOOL_TIMEOUT_SECS", "5"),
                ("LEXI_SIMILARITY_THRESHOLD", "0.75"),
                ("LEXI_LOG_LEVEL", "DEBUG"),
                ("LEXI_LOG_JSON", "yes"),
            ]),
        );

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9200);
        assert_eq!(settings.model.name, "claude-test");
        assert_eq!(settings.model.max_tokens, 1024);
        assert_eq!(settings.model.api_key.as_ref().unwrap().expose_secret(), "sk-env");
        assert_eq!(settings.history.cap, 8);
        assert_eq!(settings.engine.max_rounds, 4);
        assert_eq!(settings.engine.tool_timeout_secs, 5);
        assert_eq!(settings.documents.similarity_threshold, 0.75);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = LexiSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("LEXI_PORT", "0"),
                ("LEXI_HISTORY_CAP", "many"),
                ("LEXI_SIMILARITY_THRESHOLD", "1.5"),
                ("LEXI_LOG_LEVEL", "loud"),
                ("LEXI_LOG_JSON", "maybe"),
                ("LEXI_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.history.cap, 20);
        assert_eq!(settings.documents.similarity_threshold, 0.5);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
    }

    #[test]
    fn validate_rejects_out_of_range_file_values() {
        let mut settings = LexiSettings::default();
        assert!(validate(&settings).is_ok());

        settings.history.cap = 0;
        assert!(matches!(validate(&settings), Err(SettingsError::InvalidValue(_))));

        let mut settings = LexiSettings::default();
        settings.documents.similarity_threshold = 2.0;
        assert!(validate(&settings).is_err());

        let mut settings = LexiSettings::default();
        settings.logging.level = "verbose".into();
        assert!(validate(&settings).unwrap_err().to_string().contains("logging.level"));
    }

    #[test]
    fn parsers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nope"), None);

        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_usize_range(" 12 ", 1, 20), Some(12));
        assert_eq!(parse_usize_range("21", 1, 20), None);

        assert_eq!(parse_f64_range("0.3", 0.0, 1.0), Some(0.3));
        assert_eq!(parse_f64_range("NaN", 0.0, 1.0), None);
        assert_eq!(parse_f64_range("-0.1", 0.0, 1.0), None);
    }
}
