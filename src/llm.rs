use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::LLMConfig;
use crate::prompt::PromptBuilder;
use crate::schema::ContainerSchema;
use crate::tokenizer::{trim_to_token_limit, TiktokenCounter, TokenCounter};
use crate::types::{ExtractedData, ExtractionResult, TokenUsage};
use crate::{Result, ScraperError};

/// The models offered by the model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelId {
    Gemini15Flash,
    Gpt4oMini,
}

impl ModelId {
    pub const ALL: [ModelId; 2] = [ModelId::Gemini15Flash, ModelId::Gpt4oMini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gemini15Flash => "gemini-1.5-flash",
            ModelId::Gpt4oMini => "gpt-4o-mini",
        }
    }

    /// Only Gemini is wired to a working client.
    pub fn ensure_supported(&self) -> Result<()> {
        match self {
            ModelId::Gemini15Flash => Ok(()),
            other => Err(ScraperError::UnsupportedModel(other.as_str().to_string())),
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self> {
        ModelId::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| ScraperError::UnsupportedModel(s.to_string()))
    }
}

/// One schema-constrained generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub response_schema: Value,
}

/// The model's verbatim reply and its token accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// A generative-text API that can answer with JSON constrained to a schema.
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<Completion>;
}

/// Client for the Gemini `generateContent` REST endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    http_client: Client,
    api_key: String,
    base_url: String,
    temperature: Option<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_mime_type: &'static str,
    response_schema: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GeminiClient {
    /// Create a new Gemini client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            temperature: None,
        }
    }

    /// Create a client from the LLM configuration, reading the key from the environment.
    pub fn from_config(config: &LLMConfig) -> Result<Self> {
        let api_key = config.api_key()?;

        let mut builder = Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            http_client: builder.build()?,
            api_key,
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            temperature: config.temperature,
        })
    }

    /// Set a custom base URL (for proxies or test servers).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl GenerativeClient for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<Completion> {
        let start = Instant::now();

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: &request.response_schema,
                temperature: self.temperature,
            },
        };

        let response = self
            .http_client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, request.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Gemini request failed");
                ScraperError::RequestError(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Gemini API error");
            return Err(ScraperError::LLMError(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ScraperError::LLMError(format!("Unreadable Gemini response: {}", e)))?;

        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ScraperError::LLMError("No candidates in Gemini response".into()))?;

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ScraperError::LLMError(format!(
                "Gemini returned no text (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        let usage = parsed
            .usage_metadata
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Gemini generation"
        );

        Ok(Completion { text, usage })
    }
}

/// The `Extractor` turns normalized page text into records that follow a container schema.
pub struct Extractor {
    model: ModelId,
    client: Box<dyn GenerativeClient>,
    tokenizer: Box<dyn TokenCounter>,
    max_input_tokens: usize,
}

impl Extractor {
    /// Creates an extractor around an existing client.
    ///
    /// Fails with `UnsupportedModel` for models without a working implementation.
    pub fn new(
        model: ModelId,
        client: Box<dyn GenerativeClient>,
        tokenizer: Box<dyn TokenCounter>,
        max_input_tokens: usize,
    ) -> Result<Self> {
        model.ensure_supported()?;
        Ok(Self {
            model,
            client,
            tokenizer,
            max_input_tokens,
        })
    }

    /// Resolves the model and the credential, both before any network activity.
    pub fn from_config(model: &str, config: &LLMConfig) -> Result<Self> {
        let model: ModelId = model.parse()?;
        model.ensure_supported()?;

        let client = GeminiClient::from_config(config)?;
        let tokenizer = TiktokenCounter::for_model(model.as_str())?;

        Self::new(
            model,
            Box::new(client),
            Box::new(tokenizer),
            config.max_input_tokens,
        )
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    /// Sends the page text to the model and checks the reply against the schema.
    ///
    /// The page text is cut so that the whole prompt fits `max_input_tokens`.
    #[instrument(skip(self, text, schema), fields(model = %self.model, text_length = text.len()))]
    pub async fn extract(&self, text: &str, schema: &ContainerSchema) -> Result<ExtractionResult> {
        let builder = PromptBuilder::default();
        let budget = self
            .max_input_tokens
            .saturating_sub(self.tokenizer.count(builder.instructions()));

        let trimmed = trim_to_token_limit(self.tokenizer.as_ref(), text, budget)?;
        if trimmed.was_truncated() {
            // Tokens past the budget are dropped as-is; the cut can land mid-table.
            warn!(
                original_tokens = trimmed.original_tokens,
                kept_tokens = trimmed.kept_tokens,
                "Page text exceeds the token budget and was truncated"
            );
        }

        let prompt = builder.with_content(trimmed.text.as_str()).build();
        let completion = self
            .client
            .generate(GenerationRequest {
                model: self.model.as_str().to_string(),
                prompt,
                response_schema: schema.to_json_schema(),
            })
            .await?;

        let reply: Value = serde_json::from_str(&completion.text).map_err(|e| {
            ScraperError::MalformedResponse(format!("model reply is not JSON: {}", e))
        })?;
        schema.conform(&reply)?;
        let data = ExtractedData::from_value(reply).ok_or_else(|| {
            ScraperError::MalformedResponse("model reply is not a JSON object or array".into())
        })?;

        info!(
            records = data.records().len(),
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "Extraction complete"
        );

        Ok(ExtractionResult {
            raw_json: completion.text,
            data,
            usage: completion.usage,
            truncated: trimmed.was_truncated(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RecordSchema;
    use std::sync::{Arc, Mutex};

    struct CannedClient {
        reply: String,
        seen: Arc<Mutex<Vec<GenerationRequest>>>,
    }

    #[async_trait]
    impl GenerativeClient for CannedClient {
        async fn generate(&self, request: GenerationRequest) -> Result<Completion> {
            self.seen.lock().unwrap().push(request);
            Ok(Completion {
                text: self.reply.clone(),
                usage: TokenUsage { input_tokens: 42, output_tokens: 7 },
            })
        }
    }

    fn extractor(reply: &str, max_tokens: usize) -> (Extractor, Arc<Mutex<Vec<GenerationRequest>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let client = CannedClient { reply: reply.to_string(), seen: seen.clone() };
        let tokenizer = TiktokenCounter::for_model("gemini-1.5-flash").unwrap();
        let extractor = Extractor::new(
            ModelId::Gemini15Flash,
            Box::new(client),
            Box::new(tokenizer),
            max_tokens,
        )
        .unwrap();
        (extractor, seen)
    }

    fn container(fields: &[&str]) -> ContainerSchema {
        ContainerSchema::wrap(RecordSchema::build(fields).unwrap())
    }

    #[test]
    fn test_model_parsing() {
        assert_eq!("gemini-1.5-flash".parse::<ModelId>().unwrap(), ModelId::Gemini15Flash);
        assert_eq!("gpt-4o-mini".parse::<ModelId>().unwrap(), ModelId::Gpt4oMini);
        assert!(matches!("llama3".parse::<ModelId>(), Err(ScraperError::UnsupportedModel(_))));
    }

    #[test]
    fn test_unsupported_model_is_rejected_before_any_call() {
        let err = Extractor::from_config("gpt-4o-mini", &LLMConfig::default()).err().unwrap();
        assert!(matches!(err, ScraperError::UnsupportedModel(ref m) if m == "gpt-4o-mini"));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_missing_key_is_a_config_error() {
        let config = LLMConfig {
            api_key_env: "UNIVERSAL_SCRAPER_TEST_NO_SUCH_KEY".to_string(),
            ..Default::default()
        };
        let err = Extractor::from_config("gemini-1.5-flash", &config).err().unwrap();
        assert!(matches!(err, ScraperError::MissingCredential(_)));
    }

    #[tokio::test]
    async fn test_extract_returns_verbatim_reply_and_usage() {
        let reply = r#"{"listings":[{"title":"A","price":"1"},{"title":"B","price":"2"}]}"#;
        let (extractor, seen) = extractor(reply, 10_000);

        let result = extractor
            .extract("Flat A costs 1. Flat B costs 2.", &container(&["title", "price"]))
            .await
            .unwrap();

        assert_eq!(result.raw_json, reply);
        assert_eq!(result.usage, TokenUsage { input_tokens: 42, output_tokens: 7 });
        assert_eq!(result.data.records().len(), 2);
        assert!(!result.truncated);

        let requests = seen.lock().unwrap();
        assert_eq!(requests[0].model, "gemini-1.5-flash");
        assert!(requests[0].prompt.ends_with("Flat A costs 1. Flat B costs 2."));
        assert_eq!(requests[0].response_schema["required"][0], "listings");
    }

    /// Tests that the whole prompt is held to the token budget.
    #[tokio::test]
    async fn test_extract_truncates_long_text() {
        let (extractor, seen) = extractor(r#"{"listings":[]}"#, 400);
        let text = "listing ".repeat(2000);

        let result = extractor.extract(&text, &container(&["title"])).await.unwrap();
        assert!(result.truncated);

        let counter = TiktokenCounter::for_model("gemini-1.5-flash").unwrap();
        let instructions = counter.count(PromptBuilder::default().instructions());
        let requests = seen.lock().unwrap();
        let sent_text = requests[0]
            .prompt
            .strip_prefix(PromptBuilder::default().instructions())
            .unwrap();
        assert_eq!(counter.count(sent_text), 400 - instructions);
    }

    #[tokio::test]
    async fn test_non_conforming_reply_is_malformed() {
        let (partial, _) = extractor(r#"{"listings":[{"title":"A"}]}"#, 10_000);
        let err = partial
            .extract("text", &container(&["title", "price"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ScraperError::MalformedResponse(_)));

        let (padded, _) = extractor(r#"{"listings":[{"title":"A"}],"total":"1"}"#, 10_000);
        let err = padded.extract("text", &container(&["title"])).await.unwrap_err();
        assert!(matches!(err, ScraperError::MalformedResponse(_)));

        let (renamed, _) = extractor(r#"{"items":[{"title":"A"}]}"#, 10_000);
        let err = renamed.extract("text", &container(&["title"])).await.unwrap_err();
        assert!(matches!(err, ScraperError::MalformedResponse(_)));

        let (prose, _) = extractor("not json at all", 10_000);
        let err = prose.extract("text", &container(&["title"])).await.unwrap_err();
        assert!(matches!(err, ScraperError::MalformedResponse(_)));
    }

    #[test]
    fn test_client_builder() {
        let client = GeminiClient::new("test-key").with_base_url("http://localhost:1234");
        assert_eq!(client.base_url(), "http://localhost:1234");
        assert_eq!(client.api_key, "test-key");
    }
}
