//! Bot configuration.
//!
//! Reads the `[bot]` and `[persona]` tables of `config/default.toml`. Every
//! field has a default, so a missing file or table is not an error; a file
//! that exists but does not parse is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use murmur_agent::{
    DEFAULT_SEPARATOR, OrchestratorConfig, Pacer, Persona, PoolLimits, SafetySetting,
};

// ---------------------------------------------------------------------------
// Bot configuration
// ---------------------------------------------------------------------------

/// Settings loaded from the `[bot]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub separator: String,
    pub max_message_len: usize,
    pub typing_interval_secs: u64,
    pub char_delay_min_ms: u64,
    pub char_delay_max_ms: u64,
    pub turn_timeout_secs: u64,
    pub send_attempts: u32,
    pub poll_timeout: u64,
    pub media_group_wait_ms: u64,
    pub model: String,
    /// Names that summon the bot in group chats.
    pub trigger_names: Vec<String>,
    /// Language of user-facing messages.
    pub language: String,
    /// Telegram ids alerted on failures, in addition to developers.
    pub operators: Vec<i64>,
    pub query_cap: u64,
    pub cooldown_secs: u64,
    pub window_quota: u32,
    pub session_idle_secs: u64,
    pub database: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_owned(),
            max_message_len: 4096,
            typing_interval_secs: 2,
            char_delay_min_ms: 30,
            char_delay_max_ms: 60,
            turn_timeout_secs: 180,
            send_attempts: 3,
            poll_timeout: 30,
            media_group_wait_ms: 1200,
            model: "gemini-1.5-pro-latest".to_owned(),
            trigger_names: vec!["swifie".to_owned(), "свифи".to_owned()],
            language: "en".to_owned(),
            operators: Vec::new(),
            query_cap: 1000,
            cooldown_secs: 60,
            window_quota: 1,
            session_idle_secs: 6 * 60 * 60,
            database: PathBuf::from("data/murmur.db"),
        }
    }
}

impl BotConfig {
    pub fn pool_limits(&self) -> PoolLimits {
        PoolLimits {
            query_cap: self.query_cap,
            window: Duration::from_secs(self.cooldown_secs),
            window_quota: self.window_quota.max(1),
        }
    }

    pub fn pacer(&self) -> Pacer {
        Pacer::new(
            Duration::from_millis(self.char_delay_min_ms),
            Duration::from_millis(self.char_delay_max_ms),
        )
    }

    pub fn orchestrator_config(&self, apology: String) -> OrchestratorConfig {
        OrchestratorConfig {
            separator: self.separator.clone(),
            max_message_len: self.max_message_len.max(1),
            turn_timeout: Duration::from_secs(self.turn_timeout_secs),
            send_attempts: self.send_attempts.max(1),
            typing_interval: Duration::from_secs(self.typing_interval_secs.max(1)),
            apology,
            safety: SafetySetting::permissive(),
            operators: self.operators.clone(),
        }
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn media_group_wait(&self) -> Duration {
        Duration::from_millis(self.media_group_wait_ms)
    }

    /// Case-insensitive matcher for any trigger name, or `None` when no
    /// names are configured.
    pub fn trigger_pattern(&self) -> Result<Option<Regex>> {
        let names: Vec<String> = self
            .trigger_names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .map(regex::escape)
            .collect();
        if names.is_empty() {
            return Ok(None);
        }
        let pattern = format!(r"(?iu)\b(?:{})\b", names.join("|"));
        let regex = Regex::new(&pattern).context("invalid trigger names")?;
        Ok(Some(regex))
    }
}

// ---------------------------------------------------------------------------
// Persona
// ---------------------------------------------------------------------------

/// Settings loaded from the `[persona]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub name: String,
    pub default_persona: String,
    pub rules: Vec<String>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        let persona = Persona::default();
        Self {
            name: persona.name,
            default_persona: persona.default_persona,
            rules: persona.rules,
        }
    }
}

impl From<PersonaConfig> for Persona {
    fn from(config: PersonaConfig) -> Self {
        Persona {
            name: config.name,
            rules: config.rules,
            default_persona: config.default_persona,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub bot: BotConfig,
    pub persona: PersonaConfig,
}

impl ConfigFile {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse configuration")
    }
}

/// Load configuration from `path`, falling back to defaults if the file
/// does not exist.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            ConfigFile::parse(&content).with_context(|| format!("in {}", path.display()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Ok(ConfigFile::default())
        }
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}
