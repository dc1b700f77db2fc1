use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::events::MessageTrigger;
use crate::knowledge::chunker::ChunkParams;
use crate::llm::LlmBackend;
use crate::scope::ScopePolicy;

const DEFAULT_CONFIG_FILE: &str = "behind_bars.toml";

/// Bot configuration: defaults, then an optional TOML file, then environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub discord: DiscordConfig,
    pub llm: LlmConfig,
    pub knowledge: KnowledgeConfig,
    pub conversation: ConversationConfig,
    pub debug: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub token: String,
    /// Guilds to register commands in instantly. Empty registers globally.
    pub sync_guilds: Vec<u64>,
    /// Channels the bot answers in. Empty means every channel.
    pub allowed_channels: Vec<u64>,
    pub admin_ids: Vec<u64>,
    pub scope: ScopePolicy,
    pub message_trigger: MessageTrigger,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub base_url: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::OpenAi,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.3,
            max_tokens: 1024,
            timeout_secs: 60,
            max_attempts: 3,
            retry_base_ms: 500,
        }
    }
}

impl LlmConfig {
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.backend.default_base_url().to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub disable_embeddings: bool,
    pub embedding_model: String,
    pub embedding_base_url: Option<String>,
    pub embedding_api_key: Option<String>,
    pub readme_url: Option<String>,
    /// Online docs consulted when local search finds nothing.
    pub fallback_url: Option<String>,
    /// `tokens` parameter sent to the online docs endpoint.
    pub fallback_tokens: u32,
    pub reload_interval_secs: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./knowledge"),
            chunk_size: 2000,
            chunk_overlap: 300,
            top_k: 5,
            disable_embeddings: false,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_base_url: None,
            embedding_api_key: None,
            readme_url: None,
            fallback_url: None,
            fallback_tokens: 10_000,
            reload_interval_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub max_turns: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { max_turns: 10 }
    }
}

impl BotConfig {
    /// Load `.env`, the config file (if any) and environment overrides, then validate.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();

        let explicit = dotenv::var("BEHIND_BARS_CONFIG_PATH")
            .ok()
            .map(|p| PathBuf::from(strip_quotes(&p)));
        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_env(|key| dotenv::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Override file values with environment variables.
    ///
    /// Prefixed names win over the legacy unprefixed ones.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| -> Option<(String, String)> {
            keys.iter().find_map(|key| {
                lookup(key)
                    .map(|v| strip_quotes(&v))
                    .filter(|v| !v.is_empty())
                    .map(|v| (key.to_string(), v))
            })
        };

        if let Some((_, v)) = get(&["BEHIND_BARS_DISCORD_TOKEN", "DISCORD_BOT_TOKEN"]) {
            self.discord.token = v;
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_SYNC_GUILDS", "DISCORD_SYNC_GUILDS"]) {
            self.discord.sync_guilds = parse_id_list(&k, &v)?;
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_CHANNELS"]) {
            self.discord.allowed_channels = parse_id_list(&k, &v)?;
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_ADMIN_IDS"]) {
            self.discord.admin_ids = parse_id_list(&k, &v)?;
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_SCOPE", "DISCORD_BOT_SCOPE"]) {
            self.discord.scope = parse_value(&k, &v)?;
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_MESSAGE_TRIGGER"]) {
            self.discord.message_trigger = parse_value(&k, &v)?;
        }

        if let Some((k, v)) = get(&["BEHIND_BARS_LLM_BACKEND"]) {
            self.llm.backend = parse_value(&k, &v)?;
        }
        if let Some((_, v)) = get(&["BEHIND_BARS_LLM_BASE_URL"]) {
            self.llm.base_url = Some(v);
        }
        if let Some((_, v)) = get(&["BEHIND_BARS_LLM_MODEL"]) {
            self.llm.model = v;
        }
        if let Some((_, v)) = get(&["BEHIND_BARS_LLM_API_KEY"]) {
            self.llm.api_key = Some(v);
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_LLM_TIMEOUT_SECS"]) {
            self.llm.timeout_secs = parse_value(&k, &v)?;
        }

        if let Some((_, v)) = get(&["BEHIND_BARS_KNOWLEDGE_PATH"]) {
            self.knowledge.path = PathBuf::from(v);
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_CHUNK_SIZE"]) {
            self.knowledge.chunk_size = parse_value(&k, &v)?;
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_CHUNK_OVERLAP"]) {
            self.knowledge.chunk_overlap = parse_value(&k, &v)?;
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_TOP_K"]) {
            self.knowledge.top_k = parse_value(&k, &v)?;
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_DISABLE_EMBEDDINGS"]) {
            self.knowledge.disable_embeddings = parse_bool(&k, &v)?;
        }
        if let Some((_, v)) = get(&["BEHIND_BARS_EMBEDDING_MODEL"]) {
            self.knowledge.embedding_model = v;
        }
        if let Some((_, v)) = get(&["BEHIND_BARS_EMBEDDING_BASE_URL"]) {
            self.knowledge.embedding_base_url = Some(v);
        }
        if let Some((_, v)) = get(&["BEHIND_BARS_EMBEDDING_API_KEY"]) {
            self.knowledge.embedding_api_key = Some(v);
        }
        if let Some((_, v)) = get(&["BEHIND_BARS_README_URL"]) {
            self.knowledge.readme_url = Some(v);
        }
        if let Some((_, v)) = get(&["BEHIND_BARS_FALLBACK_URL"]) {
            self.knowledge.fallback_url = Some(v);
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_FALLBACK_TOKENS"]) {
            self.knowledge.fallback_tokens = parse_value(&k, &v)?;
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_RELOAD_INTERVAL_SECS"]) {
            self.knowledge.reload_interval_secs = parse_value(&k, &v)?;
        }

        if let Some((k, v)) = get(&["BEHIND_BARS_MAX_HISTORY"]) {
            self.conversation.max_turns = parse_value(&k, &v)?;
        }
        if let Some((k, v)) = get(&["BEHIND_BARS_DEBUG", "DISCORD_DEBUG"]) {
            self.debug = parse_bool(&k, &v)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.llm.backend.requires_api_key()
            && self.llm.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingApiKey {
                backend: self.llm.backend.to_string(),
            });
        }
        if self.llm.backend == LlmBackend::Custom && self.llm.base_url.is_none() {
            return Err(ConfigError::InvalidValue {
                key: "llm.base_url".to_string(),
                value: "(unset, required by the custom backend)".to_string(),
            });
        }
        self.chunk_params()?;
        if self.knowledge.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                key: "knowledge.top_k".to_string(),
                value: "0".to_string(),
            });
        }
        if self.llm.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "llm.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn chunk_params(&self) -> Result<ChunkParams, ConfigError> {
        ChunkParams::new(self.knowledge.chunk_size, self.knowledge.chunk_overlap)
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        self.discord.admin_ids.contains(&user_id)
    }

    pub fn channel_allowed(&self, channel_id: u64) -> bool {
        self.discord.allowed_channels.is_empty()
            || self.discord.allowed_channels.contains(&channel_id)
    }

    /// Embedding service credentials fall back to the chat backend's.
    pub fn embedding_base_url(&self) -> String {
        self.knowledge
            .embedding_base_url
            .clone()
            .unwrap_or_else(|| self.llm.resolved_base_url())
    }

    pub fn embedding_api_key(&self) -> Option<String> {
        self.knowledge
            .embedding_api_key
            .clone()
            .or_else(|| self.llm.api_key.clone())
    }
}

fn strip_quotes(value: &str) -> String {
    value
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_string()
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_id_list(key: &str, value: &str) -> Result<Vec<u64>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_value(key, s))
        .collect()
}
