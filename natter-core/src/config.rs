// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones
use crate::paths;
use crate::scheduler::BackoffPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub chatter: ChatterConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Path to the JSON character card
    #[serde(default)]
    pub character_path: String,
    /// Number of history messages sent with each generation request
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            character_path: String::new(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Quiet period after the last message before replying
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Delay multiplier while someone is typing
    #[serde(default = "default_backoff_factor")]
    pub typing_backoff_factor: u32,
    /// Longest delay the typing back-off may reach
    #[serde(default = "default_backoff_cap_secs")]
    pub typing_backoff_cap_secs: u64,
    /// Bounds of the random pause between consecutive replies
    #[serde(default = "default_pacing_min_ms")]
    pub pacing_min_ms: u64,
    #[serde(default = "default_pacing_max_ms")]
    pub pacing_max_ms: u64,
    /// Context appended to the memory prompt in direct messages
    #[serde(default = "default_dm_prompt")]
    pub dm_prompt: String,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            typing_backoff_factor: default_backoff_factor(),
            typing_backoff_cap_secs: default_backoff_cap_secs(),
            pacing_min_ms: default_pacing_min_ms(),
            pacing_max_ms: default_pacing_max_ms(),
            dm_prompt: default_dm_prompt(),
        }
    }
}

impl TurnConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            factor: self.typing_backoff_factor,
            cap: Duration::from_secs(self.typing_backoff_cap_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding one memory file per persona
    #[serde(default = "default_memory_dir")]
    pub dir: String,
    /// Summarize each conversation into new memory entries before replying
    #[serde(default)]
    pub integrate_concepts: bool,
    #[serde(default = "default_summary_retries")]
    pub max_summary_retries: u32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: default_memory_dir(),
            integrate_concepts: false,
            max_summary_retries: default_summary_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between idle-chatter polls
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Chance per poll of chattering
    #[serde(default = "default_probability")]
    pub probability: f64,
    /// Local hour the chatter window opens (inclusive)
    #[serde(default = "default_window_start")]
    pub window_start_hour: u32,
    /// Local hour the chatter window closes (exclusive); may wrap past midnight
    #[serde(default = "default_window_end")]
    pub window_end_hour: u32,
    /// Minimum hours since the bot last spoke in the channel
    #[serde(default = "default_quiet_hours")]
    pub quiet_hours: i64,
    /// IANA timezone used for the window. Defaults to the system timezone.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Text of the synthesized system message
    #[serde(default = "default_chatter_prompt")]
    pub prompt: String,
}

impl Default for ChatterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_secs: default_poll_secs(),
            probability: default_probability(),
            window_start_hour: default_window_start(),
            window_end_hour: default_window_end(),
            quiet_hours: default_quiet_hours(),
            timezone: default_timezone(),
            prompt: default_chatter_prompt(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend type: "openai" or "kobold"
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: String,
    /// Base URL of the completion API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// Custom Debug impl to redact api_key
impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("backend_type", &self.backend_type)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend_type: default_backend_type(),
            base_url: None,
            api_key: None,
            model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_console_channel")]
    pub channel_id: String,
    /// Name the local user chats under
    #[serde(default = "default_console_user")]
    pub user_name: String,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            channel_id: default_console_channel(),
            user_name: default_console_user(),
        }
    }
}

fn default_history_limit() -> usize {
    10
}

fn default_debounce_ms() -> u64 {
    5000
}

fn default_backoff_factor() -> u32 {
    10
}

fn default_backoff_cap_secs() -> u64 {
    300 // 5 minutes
}

fn default_pacing_min_ms() -> u64 {
    100
}

fn default_pacing_max_ms() -> u64 {
    2100
}

fn default_dm_prompt() -> String {
    "This is a private chat. ".to_string()
}

fn default_memory_dir() -> String {
    "./memory".to_string()
}

fn default_summary_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_poll_secs() -> u64 {
    60
}

fn default_probability() -> f64 {
    0.01
}

fn default_window_start() -> u32 {
    17
}

fn default_window_end() -> u32 {
    1
}

fn default_quiet_hours() -> i64 {
    12
}

fn default_chatter_prompt() -> String {
    "Several hours passed. Greet, complain about your boring or propose a conversation theme"
        .to_string()
}

fn default_backend_type() -> String {
    "openai".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    crate::prompt::DEFAULT_MAX_TOKENS
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_console_channel() -> String {
    "console".to_string()
}

fn default_console_user() -> String {
    "you".to_string()
}

fn default_timezone() -> String {
    // Try to detect system timezone, fall back to UTC
    // Always validate that the timezone is parseable by chrono-tz
    if let Ok(tz) = std::env::var("TZ") {
        if tz.parse::<chrono_tz::Tz>().is_ok() {
            return tz;
        }
    }
    // On Unix systems, try to read /etc/localtime symlink
    #[cfg(unix)]
    {
        if let Ok(link) = std::fs::read_link("/etc/localtime") {
            if let Some(tz) = link.to_str() {
                // Extract timezone from path like /usr/share/zoneinfo/America/Chicago
                if let Some(pos) = tz.find("zoneinfo/") {
                    let detected = tz[pos + 9..].to_string();
                    if detected.parse::<chrono_tz::Tz>().is_ok() {
                        return detected;
                    }
                }
            }
        }
    }
    "UTC".to_string()
}

/// Expand tilde (~) to home directory in paths
fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs
                .home_dir()
                .join(stripped)
                .to_string_lossy()
                .to_string();
        }
        tracing::warn!(path = %path, "Failed to expand tilde: could not determine home directory");
    }
    path.to_string()
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
    val.parse::<T>()
        .map_err(|_| anyhow::anyhow!("{} must be a valid number, got: {}", key, val))
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. NATTER_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/natter/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("NATTER_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Parse a TOML document without applying overrides or validation
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config TOML")
    }

    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        Self::load_with(None, None)
    }

    /// Load a specific file, then apply environment overrides and validate
    pub fn load_path(path: &Path) -> Result<Self> {
        Self::load_with(Some(path), None)
    }

    /// Load `path` (or the discovered config file), apply environment
    /// overrides, then a character card given on the command line, and validate
    pub fn load_with(path: Option<&Path>, character: Option<&Path>) -> Result<Self> {
        let mut config = match path.map(Path::to_path_buf).or_else(Self::find_config_file) {
            Some(path) => Self::load_from(&path)?,
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                Config::default()
            }
        };
        config.apply_env_overrides()?;
        if let Some(character) = character {
            config.persona.character_path = character.to_string_lossy().into_owned();
        }
        config.persona.character_path = expand_tilde(&config.persona.character_path);
        config.memory.dir = expand_tilde(&config.memory.dir);
        config.validate()?;
        Ok(config)
    }

    fn load_from(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("BOT_CHARACTER_CARD_PATH") {
            self.persona.character_path = val;
        }
        if let Ok(val) = std::env::var("BOT_HISTORY_LIMIT") {
            self.persona.history_limit = parse_env("BOT_HISTORY_LIMIT", &val)?;
        }
        if let Ok(val) = std::env::var("BOT_TEMPERATURE") {
            self.backend.temperature = parse_env("BOT_TEMPERATURE", &val)?;
        }
        if let Ok(val) = std::env::var("AI_PROVIDER") {
            self.backend.backend_type = val.to_lowercase();
        }
        if let Ok(val) = std::env::var("BACKEND_BASE_URL") {
            self.backend.base_url = Some(val);
        }
        // Legacy env var support
        if let Ok(val) = std::env::var("KOBOLD_ADDRESS") {
            self.backend.base_url = Some(val);
        }
        if let Ok(val) = std::env::var("OPENROUTER_API_KEY") {
            self.backend.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("BACKEND_API_KEY") {
            self.backend.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("OPENROUTER_MODEL") {
            self.backend.model = Some(val);
        }
        if let Ok(val) = std::env::var("BACKEND_MODEL") {
            self.backend.model = Some(val);
        }
        if let Ok(val) = std::env::var("MEMORY_DIR") {
            self.memory.dir = val;
        }
        if let Ok(val) = std::env::var("CHATTER_TIMEZONE") {
            self.chatter.timezone = val;
        }
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.persona.character_path.trim().is_empty() {
            anyhow::bail!(
                "persona.character_path is required (set in config.toml or BOT_CHARACTER_CARD_PATH env var)"
            );
        }
        if self.persona.history_limit == 0 {
            anyhow::bail!("persona.history_limit must be at least 1");
        }
        if self.turn.pacing_min_ms > self.turn.pacing_max_ms {
            anyhow::bail!(
                "turn.pacing_min_ms ({}) must not exceed turn.pacing_max_ms ({})",
                self.turn.pacing_min_ms,
                self.turn.pacing_max_ms
            );
        }
        if !(0.0..=1.0).contains(&self.chatter.probability) {
            anyhow::bail!(
                "chatter.probability must be between 0 and 1, got {}",
                self.chatter.probability
            );
        }
        if self.chatter.window_start_hour > 23 || self.chatter.window_end_hour > 23 {
            anyhow::bail!("chatter window hours must be between 0 and 23");
        }
        if self.chatter.poll_secs == 0 {
            anyhow::bail!("chatter.poll_secs must be at least 1");
        }
        if self.chatter.timezone.parse::<chrono_tz::Tz>().is_err() {
            anyhow::bail!(
                "Invalid timezone '{}'. Use IANA timezone names like 'America/Chicago', 'Europe/London', 'UTC'",
                self.chatter.timezone
            );
        }
        Ok(())
    }

    /// Parsed chatter timezone; falls back to UTC if validation was skipped
    pub fn chatter_timezone(&self) -> chrono_tz::Tz {
        self.chatter.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.persona.history_limit, 10);
        assert_eq!(config.turn.debounce_ms, 5000);
        assert_eq!(config.turn.typing_backoff_factor, 10);
        assert_eq!(config.turn.dm_prompt, "This is a private chat. ");
        assert_eq!(config.memory.max_summary_retries, 3);
        assert!(!config.memory.integrate_concepts);
        assert!(config.chatter.enabled);
        assert_eq!(config.chatter.window_start_hour, 17);
        assert_eq!(config.chatter.window_end_hour, 1);
        assert_eq!(config.chatter.quiet_hours, 12);
        assert_eq!(config.backend.backend_type, "openai");
        assert_eq!(config.backend.max_tokens, 300);
        assert_eq!(config.console.channel_id, "console");
    }

    #[test]
    fn test_parse_full() {
        let config = Config::parse(
            r#"
                [persona]
                character_path = "cards/aiko.json"
                history_limit = 20

                [turn]
                debounce_ms = 2000
                typing_backoff_cap_secs = 60

                [memory]
                dir = "/var/lib/natter"
                integrate_concepts = true

                [chatter]
                enabled = false
                timezone = "Europe/Madrid"

                [backend]
                type = "kobold"
                base_url = "http://localhost:5001"
            "#,
        )
        .unwrap();
        assert_eq!(config.persona.character_path, "cards/aiko.json");
        assert_eq!(config.turn.debounce(), Duration::from_secs(2));
        assert_eq!(
            config.turn.backoff_policy(),
            BackoffPolicy {
                factor: 10,
                cap: Duration::from_secs(60)
            }
        );
        assert!(config.memory.integrate_concepts);
        assert!(!config.chatter.enabled);
        assert_eq!(config.chatter_timezone(), chrono_tz::Europe::Madrid);
        assert_eq!(config.backend.backend_type, "kobold");
    }

    #[test]
    fn test_backend_debug_redacts_api_key() {
        let backend = BackendConfig {
            api_key: Some("sk-secret".to_string()),
            ..BackendConfig::default()
        };
        let debug_str = format!("{:?}", backend);
        assert!(!debug_str.contains("sk-secret"));
        assert!(debug_str.contains("[REDACTED]"));
    }

    fn valid() -> Config {
        let mut config = Config::default();
        config.persona.character_path = "aiko.json".to_string();
        config.chatter.timezone = "UTC".to_string();
        config
    }

    #[test]
    fn test_validate_accepts_defaults_with_character() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_character_path() {
        let mut config = valid();
        config.persona.character_path = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid();
        config.turn.pacing_min_ms = 5000;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.chatter.probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.chatter.window_end_hour = 24;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.chatter.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }
}
