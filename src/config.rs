use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Headlines per page of the feed
    #[serde(default = "default_headline_limit")]
    pub headline_limit: i64,
    /// Headlines older than this are dropped
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: i64,
    pub feeds: Vec<FeedConfig>,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub replicate: ReplicateConfig,
    #[serde(default)]
    pub elevenlabs: ElevenLabsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_headline_limit() -> i64 {
    5
}

fn default_max_age_hours() -> i64 {
    48
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilterConfig {
    /// Source whitelist. Empty means every source is accepted.
    #[serde(default)]
    pub allowed_sources: Vec<String>,
    #[serde(default)]
    pub extra_excluded_keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub exclude_sports: bool,
    #[serde(default = "default_true")]
    pub exclude_finance: bool,
    #[serde(default = "default_true")]
    pub exclude_tv: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            allowed_sources: Vec::new(),
            extra_excluded_keywords: Vec::new(),
            exclude_sports: true,
            exclude_finance: true,
            exclude_tv: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cartoon_ttl")]
    pub cartoon_ttl_hours: i64,
    #[serde(default = "default_explanation_ttl")]
    pub explanation_ttl_hours: i64,
    #[serde(default = "default_tts_ttl")]
    pub tts_ttl_hours: i64,
}

fn default_cartoon_ttl() -> i64 {
    24 * 7
}

fn default_explanation_ttl() -> i64 {
    24 * 7
}

fn default_tts_ttl() -> i64 {
    24 * 30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cartoon_ttl_hours: default_cartoon_ttl(),
            explanation_ttl_hours: default_explanation_ttl(),
            tts_ttl_hours: default_tts_ttl(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_openai_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    200
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_url(),
            model: default_openai_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplicateConfig {
    #[serde(default = "default_replicate_url")]
    pub base_url: String,
    #[serde(default = "default_model_version")]
    pub model_version: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// `{headline}` is replaced with the headline text
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

fn default_replicate_url() -> String {
    "https://api.replicate.com".to_string()
}

fn default_model_version() -> String {
    "black-forest-labs/flux-schnell".to_string()
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_polls() -> u32 {
    60
}

fn default_prompt_template() -> String {
    "A bright, friendly cartoon illustration for young children about this news story: \
     {headline}. Simple shapes, warm colors, no text, nothing scary."
        .to_string()
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            base_url: default_replicate_url(),
            model_version: default_model_version(),
            poll_interval_ms: default_poll_interval(),
            max_polls: default_max_polls(),
            prompt_template: default_prompt_template(),
        }
    }
}

impl ReplicateConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ElevenLabsConfig {
    #[serde(default = "default_elevenlabs_url")]
    pub base_url: String,
    #[serde(default = "default_voice_id")]
    pub default_voice_id: String,
    #[serde(default = "default_tts_model")]
    pub model_id: String,
}

fn default_elevenlabs_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_voice_id() -> String {
    "21m00Tcm4TlvDq8ikWAM".to_string()
}

fn default_tts_model() -> String {
    "eleven_turbo_v2".to_string()
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            base_url: default_elevenlabs_url(),
            default_voice_id: default_voice_id(),
            model_id: default_tts_model(),
        }
    }
}

/// Fixed-backoff retry settings shared by every outbound call
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

/// API keys. These never live in the config file.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub replicate_api_token: Option<String>,
    pub elevenlabs_api_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            openai_api_key: read("OPENAI_API_KEY"),
            replicate_api_token: read("REPLICATE_API_TOKEN"),
            elevenlabs_api_key: read("ELEVENLABS_API_KEY"),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
