use std::time::Duration;
use thiserror::Error;

pub mod app;
pub mod config;
pub mod export;
pub mod fetcher;
pub mod llm;
pub mod normalizer;
pub mod persist;
pub mod pipeline;
pub mod prompt;
pub mod schema;
pub mod tokenizer;
pub mod types;

// Re-export commonly used types
pub use app::{App, AppState};
pub use config::ScraperConfig;
pub use llm::{Extractor, GeminiClient, GenerativeClient, ModelId};
pub use pipeline::Pipeline;
pub use schema::{ContainerSchema, RecordSchema};
pub use types::{ExtractedData, ExtractionResult, Record, RunOutput, TokenUsage, UrlResult};

/// The `ScraperError` enum represents the errors that can occur while scraping and extracting.
#[derive(Error, Debug)]
pub enum ScraperError {
    /// The browser could not be launched or configured.
    #[error("Browser launch failed: {0}")]
    BrowserError(String),
    /// Navigation, scrolling or reading the page source failed.
    #[error("Navigation failed for {url}: {message}")]
    NavigationError { url: String, message: String },
    /// Represents an error that occurs during an HTTP request.
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// Represents an error returned by the generative-text API.
    #[error("LLM processing failed: {0}")]
    LLMError(String),
    /// The API credential is not present in the environment.
    #[error("Missing API credential: set the {0} environment variable")]
    MissingCredential(String),
    /// The selected model has no working implementation.
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),
    /// User input (URL list, field list) is not acceptable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// The model replied with something that does not fit the record schema.
    #[error("Malformed extraction response: {0}")]
    MalformedResponse(String),
    /// The formatted payload handed to the persister was not JSON.
    #[error("The provided formatted data is a string but not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Reading or writing output files failed.
    #[error("File operation failed: {0}")]
    FileIO(#[from] std::io::Error),
    /// Writing the spreadsheet failed.
    #[error("Spreadsheet export failed: {0}")]
    SpreadsheetError(String),
    /// Records cannot be laid out as a flat table.
    #[error("Tabular conversion failed: {0}")]
    TabularConversion(String),
    /// Writing the combined CSV export failed.
    #[error("CSV export failed: {0}")]
    CsvError(#[from] csv::Error),
    /// Loading layered configuration failed.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ::config::ConfigError),
    /// The tokenizer could not encode or decode text.
    #[error("Tokenizer error: {0}")]
    TokenizerError(String),
}

impl ScraperError {
    /// Whether this error is a fatal configuration problem that must be
    /// reported before any network activity.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            ScraperError::MissingCredential(_)
                | ScraperError::UnsupportedModel(_)
                | ScraperError::ConfigError(_)
        )
    }
}

/// A type alias for `Result` with the `ScraperError` error type.
pub type Result<T> = std::result::Result<T, ScraperError>;

// Constants

/// Key under which the container schema wraps the list of records.
pub const LISTINGS_KEY: &str = "listings";
/// The default maximum number of prompt tokens sent to the model.
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 120_000;
/// The default page navigation timeout.
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
/// Lower bound of the randomized pause between scroll steps.
pub const DEFAULT_SCROLL_PAUSE_MIN: Duration = Duration::from_millis(1100);
/// Upper bound of the randomized pause between scroll steps.
pub const DEFAULT_SCROLL_PAUSE_MAX: Duration = Duration::from_millis(1800);
