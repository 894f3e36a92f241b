use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, ScraperError};

/// The `ScraperConfig` struct holds the configuration settings for the scraper application.
/// It includes the output location, browser automation settings, and LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// The directory under which one folder per run is created.
    pub output_dir: PathBuf,
    /// The model used when the caller does not pick one.
    pub default_model: String,
    /// The browser automation settings.
    pub browser: BrowserConfig,
    /// The configuration settings for the Language Model (LLM).
    pub llm: LLMConfig,
}

/// The `BrowserConfig` struct holds the settings for the browser session used to render pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Whether the browser runs without a visible window.
    pub headless: bool,
    /// The browser window width in pixels.
    pub window_width: u32,
    /// The browser window height in pixels.
    pub window_height: u32,
    /// Whether one session is shared by every URL of a run instead of one per URL.
    pub reuse_session: bool,
    /// Lower bound of the randomized pause between scroll steps, in milliseconds.
    pub scroll_pause_min_ms: u64,
    /// Upper bound of the randomized pause between scroll steps, in milliseconds.
    pub scroll_pause_max_ms: u64,
    /// How long a page navigation may take, in seconds.
    pub navigation_timeout_secs: u64,
    /// An optional user agent override.
    pub user_agent: Option<String>,
}

/// The `LLMConfig` struct holds the configuration settings for the Language Model (LLM).
/// It includes the endpoint URL, credential location, and the prompt token budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    /// The base URL of the generative-text REST API.
    pub endpoint: String,
    /// The environment variable holding the API key.
    pub api_key_env: String,
    /// The maximum number of tokens allowed in the prompt.
    pub max_input_tokens: usize,
    /// The sampling temperature; the provider default is used when unset.
    pub temperature: Option<f32>,
    /// The HTTP request timeout in seconds; the client default is used when unset.
    pub request_timeout_secs: Option<u64>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            default_model: String::from("gemini-1.5-flash"),
            browser: BrowserConfig::default(),
            llm: LLMConfig::default(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1280,
            window_height: 800,
            reuse_session: false,
            scroll_pause_min_ms: crate::DEFAULT_SCROLL_PAUSE_MIN.as_millis() as u64,
            scroll_pause_max_ms: crate::DEFAULT_SCROLL_PAUSE_MAX.as_millis() as u64,
            navigation_timeout_secs: crate::DEFAULT_NAVIGATION_TIMEOUT.as_secs(),
            user_agent: None,
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            endpoint: String::from("https://generativelanguage.googleapis.com/v1beta"),
            api_key_env: String::from("GEMINI_API_KEY"),
            max_input_tokens: crate::DEFAULT_MAX_INPUT_TOKENS,
            temperature: None,
            request_timeout_secs: None,
        }
    }
}

impl BrowserConfig {
    /// The scroll pause range as durations, with the bounds put in order.
    pub fn scroll_pause_range(&self) -> (Duration, Duration) {
        let min = self.scroll_pause_min_ms.min(self.scroll_pause_max_ms);
        let max = self.scroll_pause_min_ms.max(self.scroll_pause_max_ms);
        (Duration::from_millis(min), Duration::from_millis(max))
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

impl LLMConfig {
    /// Reads the API key from the environment variable named by `api_key_env`.
    ///
    /// # Returns
    ///
    /// The key, or `ScraperError::MissingCredential` when it is unset or blank.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(ScraperError::MissingCredential(self.api_key_env.clone())),
        }
    }
}

impl ScraperConfig {
    /// Loads the configuration from built-in defaults, an optional TOML file, and
    /// `SCRAPER__`-prefixed environment variables, in increasing priority.
    ///
    /// # Arguments
    ///
    /// * `path` - The configuration file; a missing file is not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&ScraperConfig::default())?)
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                ::config::Environment::with_prefix("SCRAPER")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_original_pacing() {
        let config = ScraperConfig::default();
        let (min, max) = config.browser.scroll_pause_range();

        assert_eq!(min, Duration::from_millis(1100));
        assert_eq!(max, Duration::from_millis(1800));
        assert_eq!(config.llm.max_input_tokens, 120_000);
        assert_eq!(config.default_model, "gemini-1.5-flash");
        assert!(!config.browser.reuse_session);
    }

    #[test]
    fn test_scroll_pause_range_orders_bounds() {
        let browser = BrowserConfig {
            scroll_pause_min_ms: 900,
            scroll_pause_max_ms: 300,
            ..Default::default()
        };

        assert_eq!(
            browser.scroll_pause_range(),
            (Duration::from_millis(300), Duration::from_millis(900))
        );
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "output_dir = \"runs\"\n[llm]\nmax_input_tokens = 5000\n[browser]\nheadless = false"
        )
        .unwrap();

        let config = ScraperConfig::load(file.path()).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("runs"));
        assert_eq!(config.llm.max_input_tokens, 5000);
        assert!(!config.browser.headless);
        assert_eq!(config.llm.api_key_env, "GEMINI_API_KEY");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = ScraperConfig::load("does-not-exist.toml").unwrap();
        assert_eq!(config.output_dir, PathBuf::from("output"));
    }

    #[test]
    fn test_missing_credential() {
        let llm = LLMConfig {
            api_key_env: "UNIVERSAL_SCRAPER_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };

        let err = llm.api_key().unwrap_err();
        assert!(matches!(err, ScraperError::MissingCredential(ref name) if name == "UNIVERSAL_SCRAPER_TEST_UNSET_KEY"));
        assert!(err.is_config_error());
    }
}
