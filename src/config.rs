//! TOML configuration.
//!
//! Every field has a default so a missing file or an empty table still
//! yields a working config. Secrets never live in the file: the Mastodon
//! access token and the LLM API key come from the environment
//! (`MASTODON_ACCESS_TOKEN`, `OPENAI_API_KEY`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub mastodon: MastodonConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub bot: BotConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tootloom.db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct MastodonConfig {
    /// Instance base URL, e.g. `https://mastodon.example`. Required for
    /// any command that touches the network.
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_mastodon_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for MastodonConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: default_mastodon_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_mastodon_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_model(),
            image_model: default_image_model(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_image_model() -> String {
    "dall-e-3".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    /// The persona instruction sent as the system message of every chat.
    #[serde(default = "default_persona")]
    pub persona: String,
    /// Replies longer than this are split into a chain of posts.
    #[serde(default = "default_max_post_chars")]
    pub max_post_chars: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// How many recent cross-user messages feed the context primer.
    #[serde(default = "default_recent_context")]
    pub recent_context_messages: i64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            persona: default_persona(),
            max_post_chars: default_max_post_chars(),
            poll_interval_secs: default_poll_interval(),
            recent_context_messages: default_recent_context(),
        }
    }
}

fn default_persona() -> String {
    "You are a friendly, concise assistant replying to posts on the fediverse.".to_string()
}
fn default_max_post_chars() -> usize {
    450
}
fn default_poll_interval() -> u64 {
    30
}
fn default_recent_context() -> i64 {
    20
}

/// Loads and validates a config file. A missing file is an error; use
/// [`Config::default`] when no file is expected.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.bot.max_post_chars == 0 {
        anyhow::bail!("bot.max_post_chars must be > 0");
    }
    if config.bot.poll_interval_secs == 0 {
        anyhow::bail!("bot.poll_interval_secs must be > 0");
    }
    if config.llm.model.is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }

    Ok(config)
}

/// Loads the config file if it exists, otherwise falls back to defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::default())
    }
}

/// The commented scaffold written by `tootloom init`.
pub fn default_config_toml() -> &'static str {
    r#"# tootloom configuration.
# Secrets are read from the environment, never from this file:
#   MASTODON_ACCESS_TOKEN  - Mastodon API access token
#   OPENAI_API_KEY         - LLM API key

[db]
path = "tootloom.db"

[mastodon]
# Instance base URL. Required for serve / reply-to / reconcile / history.
base_url = ""
timeout_secs = 30
max_retries = 3

[llm]
base_url = "https://api.openai.com/v1"
model = "gpt-4o-mini"
image_model = "dall-e-3"
timeout_secs = 60
max_retries = 3

[bot]
persona = "You are a friendly, concise assistant replying to posts on the fediverse."
max_post_chars = 450
poll_interval_secs = 30
recent_context_messages = 20
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.db.path, PathBuf::from("tootloom.db"));
        assert_eq!(config.bot.max_post_chars, 450);
        assert_eq!(config.bot.poll_interval_secs, 30);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.mastodon.timeout_secs, 30);
    }

    #[test]
    fn scaffold_parses_and_matches_defaults() {
        let config: Config = toml::from_str(default_config_toml()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.bot.persona, defaults.bot.persona);
        assert_eq!(config.llm.base_url, defaults.llm.base_url);
        assert_eq!(config.bot.recent_context_messages, 20);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: Config = toml::from_str("[bot]\nmax_post_chars = 200\n").unwrap();
        assert_eq!(config.bot.max_post_chars, 200);
        assert_eq!(config.bot.poll_interval_secs, 30);
    }

    #[test]
    fn load_rejects_zero_post_chars() {
        let dir = std::env::temp_dir().join("tootloom-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "[bot]\nmax_post_chars = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_post_chars"));
    }
}
