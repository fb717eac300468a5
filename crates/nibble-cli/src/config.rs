//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use nibble_ai::providers::{get_api_key, google};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Configuration for nibble
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gemini model id
    pub model: Option<String>,
    /// Bound on each model turn and each tool request
    pub request_timeout_secs: Option<u64>,
    /// Model calls allowed per reasoning loop
    pub max_turns: Option<u32>,
    /// Retries for transient model API failures
    pub max_retries: Option<u32>,
    /// Answer a question given with an image in the same run
    pub chain_follow_up: Option<bool>,
    /// Offer the Wikipedia lookup tool to follow-up answers
    pub encyclopedia: Option<bool>,
    /// Forget conversation threads idle for this long
    pub state_ttl_secs: Option<u64>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub gemini: Option<String>,
    pub nutritionix_app_id: Option<String>,
    pub nutritionix_api_key: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nibble")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("NIBBLE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load config from file, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match Self::from_toml(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            model: Some(nibble_ai::models::DEFAULT_MODEL_ID.to_string()),
            request_timeout_secs: Some(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_turns: Some(nibble_agent::DEFAULT_MAX_TURNS),
            max_retries: Some(0),
            chain_follow_up: Some(true),
            encyclopedia: Some(false),
            state_ttl_secs: None,
            api_keys: ApiKeys::default(),
        };

        default_config.save()?;
        Ok(path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(
            self.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )
    }

    pub fn state_ttl(&self) -> Option<Duration> {
        self.state_ttl_secs.map(Duration::from_secs)
    }

    /// Gemini key from config, then `GEMINI_API_KEY` / `GOOGLE_API_KEY`
    pub fn gemini_api_key(&self) -> Option<String> {
        get_api_key(self.api_keys.gemini.as_deref(), google::API_KEY_ENV_VARS).ok()
    }

    /// Nutritionix app id and key from config, then environment
    pub fn nutritionix_credentials(&self) -> Option<(String, String)> {
        let app_id = get_api_key(
            self.api_keys.nutritionix_app_id.as_deref(),
            &["NUTRITIONIX_APP_ID"],
        )
        .ok()?;
        let api_key = get_api_key(
            self.api_keys.nutritionix_api_key.as_deref(),
            &["NUTRITIONIX_API_KEY"],
        )
        .ok()?;
        Some((app_id, api_key))
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# nibble configuration file
# Place at ~/.config/nibble/config.toml (Linux) or set NIBBLE_CONFIG_PATH

# Gemini model used for image understanding and answers
model = "gemini-2.5-flash"

# Seconds allowed for each model turn or tool request
request_timeout_secs = 60

# Model calls allowed per reasoning loop before giving up
max_turns = 5

# Retries for transient model API failures (0 = fail fast)
max_retries = 0

# Answer --question right after analysing --image in the same run
chain_follow_up = true

# Let follow-up answers consult Wikipedia summaries
encyclopedia = false

# Forget conversations idle for this many seconds (unset = keep)
# state_ttl_secs = 3600

# API keys (optional - environment variables and .env also work:
# GEMINI_API_KEY, NUTRITIONIX_APP_ID, NUTRITIONIX_API_KEY)
[api_keys]
# gemini = "..."
# nutritionix_app_id = "..."
# nutritionix_api_key = "..."
"#
}
