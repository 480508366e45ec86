//! User-facing message templates.
//!
//! Built-in English and Russian tables, optionally overridden per key by
//! `config/messages/<lang>.toml`. Nested tables in the override file are
//! flattened into dot-separated keys (e.g. `bot.greeting`).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Message keys
// ---------------------------------------------------------------------------

pub mod keys {
    pub const GREETING: &str = "bot.greeting";
    pub const CLEARED: &str = "bot.cleared";
    pub const PROMPT_CURRENT: &str = "bot.prompt_current";
    pub const PROMPT_DEFAULT: &str = "bot.prompt_default";
    pub const PROMPT_UPDATED: &str = "bot.prompt_updated";
    pub const PROMPT_RESET: &str = "bot.prompt_reset";

    pub const ERROR_GENERAL: &str = "errors.general";
}

const EN: &[(&str, &str)] = &[
    (
        keys::GREETING,
        "Hi! My name is {name}. In group chats call me by name or reply to my message; \
         in private chats just write.",
    ),
    (keys::CLEARED, "Done, I've forgotten our conversation."),
    (keys::PROMPT_CURRENT, "Current instructions for this chat:\n{prompt}"),
    (
        keys::PROMPT_DEFAULT,
        "This chat uses my default personality. Send /prompt <text> to change it.",
    ),
    (keys::PROMPT_UPDATED, "Instructions updated."),
    (keys::PROMPT_RESET, "Back to my default personality."),
    (
        keys::ERROR_GENERAL,
        "Sorry, something went wrong. Please try again a bit later.",
    ),
];

const RU: &[(&str, &str)] = &[
    (
        keys::GREETING,
        "Привет! Меня зовут {name}. В беседах обращайтесь ко мне по имени или отвечайте на \
         мои сообщения, в личных диалогах это необязательно.",
    ),
    (keys::CLEARED, "Готово, я забыла наш разговор."),
    (keys::PROMPT_CURRENT, "Текущие инструкции для этого чата:\n{prompt}"),
    (
        keys::PROMPT_DEFAULT,
        "В этом чате используется мой обычный характер. Отправьте /prompt <текст>, чтобы его изменить.",
    ),
    (keys::PROMPT_UPDATED, "Инструкции обновлены."),
    (keys::PROMPT_RESET, "Вернулась к обычному характеру."),
    (
        keys::ERROR_GENERAL,
        "Извините, что-то пошло не так. Попробуйте чуть позже.",
    ),
];

// ---------------------------------------------------------------------------
// Messages store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Messages {
    templates: HashMap<String, String>,
}

impl Messages {
    /// Built-in templates for `lang`, falling back to English per key.
    pub fn builtin(lang: &str) -> Self {
        let mut templates: HashMap<String, String> = EN
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        match lang {
            "ru" => templates.extend(RU.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))),
            "en" => {}
            other => warn!(lang = other, "no built-in messages for language, using English"),
        }
        Self { templates }
    }

    /// Built-in templates overlaid with `<dir>/<lang>.toml`, if present.
    pub fn load(lang: &str, dir: &Path) -> Result<Self> {
        let mut messages = Self::builtin(lang);
        let path = dir.join(format!("{lang}.toml"));
        if !path.exists() {
            return Ok(messages);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let table: toml::Table = content
            .parse()
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let before = messages.templates.len();
        flatten_table("", &table, &mut messages.templates);
        info!(
            path = %path.display(),
            overridden = table.len(),
            added = messages.templates.len() - before,
            "loaded message overrides"
        );
        Ok(messages)
    }

    /// The template for `key`, or the key itself when unknown.
    pub fn get(&self, key: &str) -> String {
        self.templates
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// Get a message with `{name}` placeholders replaced.
    pub fn get_with(&self, key: &str, vars: &[(&str, &str)]) -> String {
        let mut msg = self.get(key);
        for (name, value) in vars {
            msg = msg.replace(&format!("{{{name}}}"), value);
        }
        msg
    }
}

fn flatten_table(prefix: &str, table: &toml::Table, out: &mut HashMap<String, String>) {
    for (key, value) in table {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::String(s) => {
                out.insert(full_key, s.clone());
            }
            toml::Value::Table(t) => flatten_table(&full_key, t, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tables_cover_the_same_keys() {
        let en: Vec<&str> = EN.iter().map(|(k, _)| *k).collect();
        let ru: Vec<&str> = RU.iter().map(|(k, _)| *k).collect();
        assert_eq!(en, ru);
    }

    #[test]
    fn get_with_substitutes_placeholders() {
        let messages = Messages::builtin("en");
        let greeting = messages.get_with(keys::GREETING, &[("name", "Swifie")]);
        assert!(greeting.starts_with("Hi! My name is Swifie."));
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        let messages = Messages::builtin("xx");
        assert_eq!(messages.get(keys::PROMPT_UPDATED), "Instructions updated.");
    }

    #[test]
    fn unknown_key_returns_key() {
        assert_eq!(Messages::builtin("en").get("nope.missing"), "nope.missing");
    }

    #[test]
    fn override_file_is_flattened() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ru.toml"),
            "[bot]\ncleared = \"Всё стёрто.\"\n[custom]\nfarewell = \"Пока\"\n",
        )
        .unwrap();

        let messages = Messages::load("ru", dir.path()).unwrap();
        assert_eq!(messages.get(keys::CLEARED), "Всё стёрто.");
        assert_eq!(messages.get("custom.farewell"), "Пока");
        assert_eq!(messages.get(keys::PROMPT_UPDATED), "Инструкции обновлены.");
    }

    #[test]
    fn missing_override_file_uses_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let messages = Messages::load("en", dir.path()).unwrap();
        assert_eq!(messages.get(keys::PROMPT_RESET), "Back to my default personality.");
    }
}
