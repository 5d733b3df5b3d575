//! Settings type definitions.
//!
//! Every group is `#[serde(default)]`, so a settings file only needs the
//! keys it changes.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Root settings for the LexiDoc server.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LexiSettings {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub retry: RetrySettings,
    pub engine: EngineSettings,
    pub history: HistorySettings,
    pub documents: DocumentSettings,
    pub logging: LoggingSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Model service connection.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub name: String,
    pub max_tokens: u32,
    pub base_url: String,
    /// Never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<SecretString>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 4096,
            base_url: "https://api.anthropic.com".to_string(),
            api_key: None,
        }
    }
}

/// Retry and circuit breaker policy for opening model streams.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown_ms: 60_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Model calls allowed in one turn.
    pub max_rounds: u32,
    pub tool_timeout_secs: u64,
    /// Replaces the built-in system prompt when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            tool_timeout_secs: 60,
            system_prompt: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Messages kept per session.
    pub cap: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self { cap: 20 }
    }
}

/// Line pairing for document diffs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSettings {
    pub similarity_threshold: f64,
    pub max_pair_comparisons: usize,
    pub pair_window: usize,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            max_pair_comparisons: 10_000,
            pair_window: 50,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of trace, debug, info, warn, error.
    pub level: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn partial_json_fills_defaults() {
        let settings: LexiSettings = serde_json::from_str(r#"{"server": {"port": 9100}}"#).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.history.cap, 20);
        assert_eq!(settings.engine.max_rounds, 10);
    }

    #[test]
    fn api_key_is_read_but_never_written() {
        let settings: LexiSettings = serde_json::from_str(r#"{"model": {"api_key": "sk-test"}}"#).unwrap();
        let key = settings.model.api_key.as_ref().unwrap();
        assert_eq!(key.expose_secret(), "sk-test");

        let json = serde_json::to_value(&settings).unwrap();
        assert!(json["model"].get("api_key").is_none());
        assert!(!format!("{:?}", settings.model).contains("sk-test"));
    }

    #[test]
    fn system_prompt_omitted_when_unset() {
        let json = serde_json::to_value(LexiSettings::default()).unwrap();
        assert!(json["engine"].get("system_prompt").is_none());
        assert_eq!(json["documents"]["similarity_threshold"], 0.5);
    }
}
