use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Openrouter,
    Ollama,
    #[default]
    Openai,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
            LlmProvider::Openai => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Language every answer is written in
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: String::new(),
            base_url: String::new(),
            api_key: String::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            language: default_language(),
        }
    }
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return &self.base_url;
        }
        match self.provider {
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
            LlmProvider::Openai => "https://api.openai.com/v1",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Empty means everyone may use the bot
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
    /// Download images and send them inline instead of passing Telegram file URLs
    #[serde(default = "default_inline_images")]
    pub inline_images: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_user_ids: Vec::new(),
            inline_images: default_inline_images(),
        }
    }
}

impl TelegramConfig {
    pub fn is_allowed(&self, user_id: Option<u64>) -> bool {
        if self.allowed_user_ids.is_empty() {
            return true;
        }
        user_id.is_some_and(|id| self.allowed_user_ids.contains(&id))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AggregationConfig {
    /// Quiet period after the latest part of a media group
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound on total collection time per group; 0 disables the cap
    #[serde(default = "default_max_collect_ms")]
    pub max_collect_ms: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_collect_ms: default_max_collect_ms(),
        }
    }
}

impl AggregationConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn max_collect(&self) -> Option<Duration> {
        (self.max_collect_ms > 0).then(|| Duration::from_millis(self.max_collect_ms))
    }
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_language() -> String {
    "Ukrainian".to_string()
}

fn default_inline_images() -> bool {
    true
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_max_collect_ms() -> u64 {
    30_000
}

impl Config {
    /// Load the TOML file (if present), then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid configuration")
    }

    /// Non-empty values from `lookup` replace the credentials and model.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(model) = get("OPENAI_MODEL") {
            self.llm.model = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("telegram.bot_token is not set (or TELEGRAM_BOT_TOKEN)");
        }
        if self.llm.model.trim().is_empty() {
            bail!("llm.model is not set (or OPENAI_MODEL)");
        }
        // Local Ollama servers run without a key
        if self.llm.api_key.trim().is_empty() && self.llm.provider != LlmProvider::Ollama {
            bail!("llm.api_key is not set (or OPENAI_API_KEY)");
        }
        if self.aggregation.debounce_ms == 0 {
            bail!("aggregation.debounce_ms must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const FULL: &str = r#"
[telegram]
bot_token = "123:abc"
allowed_user_ids = [1, 2]
inline_images = false

[llm]
provider = "openrouter"
model = "openai/gpt-4o"
api_key = "sk-or"
temperature = 0.2

[aggregation]
debounce_ms = 1500
max_collect_ms = 0
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();
        assert_eq!(config.telegram.bot_token, "123:abc");
        assert!(!config.telegram.inline_images);
        assert_eq!(config.llm.provider, LlmProvider::Openrouter);
        assert_eq!(config.llm.effective_base_url(), "https://openrouter.ai/api/v1");
        assert_eq!(config.llm.max_tokens, 500);
        assert_eq!(config.llm.language, "Ukrainian");
        assert_eq!(config.aggregation.debounce(), Duration::from_millis(1500));
        assert_eq!(config.aggregation.max_collect(), None);
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults_for_empty_file() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.aggregation.debounce_ms, 2000);
        assert_eq!(
            config.aggregation.max_collect(),
            Some(Duration::from_secs(30))
        );
        assert!(config.telegram.inline_images);
        assert_eq!(config.llm.effective_base_url(), "https://api.openai.com/v1");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_fill_credentials() {
        let env: HashMap<&str, &str> = [
            ("TELEGRAM_BOT_TOKEN", "999:tok"),
            ("OPENAI_API_KEY", "sk-env"),
            ("OPENAI_MODEL", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::parse(FULL).unwrap();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.telegram.bot_token, "999:tok");
        assert_eq!(config.llm.api_key, "sk-env");
        assert_eq!(config.llm.model, "openai/gpt-4o");
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = Config::parse(
            "[telegram]\nbot_token = \"t\"\n[llm]\nprovider = \"ollama\"\nmodel = \"llava\"\n",
        )
        .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_allow_list() {
        let mut tg = TelegramConfig::default();
        assert!(tg.is_allowed(None));
        tg.allowed_user_ids = vec![5];
        assert!(tg.is_allowed(Some(5)));
        assert!(!tg.is_allowed(Some(6)));
        assert!(!tg.is_allowed(None));
    }
}
