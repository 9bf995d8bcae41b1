//! OCR backends: the one seam through which formula images leave the process.
//!
//! The dispatcher only needs "send this prompt and these labelled images, get
//! text back". [`OcrClient`] captures exactly that and is object-safe, so the
//! orchestrator can hold an `Arc<dyn OcrClient>` and tests can substitute a
//! counting mock.
//!
//! Two implementations ship:
//!
//! * [`OpenRouterClient`] — raw `reqwest` POST to any OpenAI-compatible
//!   chat-completions endpoint (OpenRouter by default) with bearer auth. The
//!   request interleaves a text label before each image.
//! * [`ProviderClient`] — any `edgequake_llm` vision provider (OpenAI,
//!   Anthropic, Gemini, Ollama, …). Providers take images as attachments of a
//!   single user message, so the labels are folded into the prompt text.

use crate::config::FormulaOcrConfig;
use crate::error::FormulaError;
use crate::pipeline::encode::data_url;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A formula image with the label that precedes it in the request.
#[derive(Debug, Clone)]
pub struct LabeledImage {
    pub label: String,
    pub image: ImageData,
}

/// One batch OCR request.
#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub model: String,
    /// Instruction block with the numbered-output contract.
    pub prompt: String,
    /// Images in batch order.
    pub images: Vec<LabeledImage>,
    pub max_tokens: usize,
    pub temperature: f32,
}

/// A backend able to transcribe a batch of formula images.
pub trait OcrClient: Send + Sync {
    /// Send one batch and return the raw completion text.
    fn complete<'a>(&'a self, request: &'a OcrRequest) -> BoxFuture<'a, Result<String, FormulaError>>;
}

/// Build the backend a config asks for.
///
/// A pre-built provider wins; otherwise an API key selects the HTTP client.
pub fn client_from_config(config: &FormulaOcrConfig) -> Result<Arc<dyn OcrClient>, FormulaError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::new(ProviderClient::new(Arc::clone(provider))));
    }
    if config.api_key.trim().is_empty() {
        return Err(FormulaError::ProviderNotConfigured {
            hint: "set an API key (e.g. OPENROUTER_API_KEY) or supply a vision provider".into(),
        });
    }
    Ok(Arc::new(OpenRouterClient::new(
        &config.endpoint,
        &config.api_key,
        config.api_timeout_secs,
    )?))
}

/// Build a named `edgequake_llm` provider (`"openai"`, `"anthropic"`, …).
///
/// The provider reads its own API key from the environment.
pub fn provider_from_name(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, FormulaError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| FormulaError::ProviderNotConfigured {
        hint: format!("provider '{name}': {e}"),
    })
}

// ── HTTP client ──────────────────────────────────────────────────────────

/// Chat-completions client for OpenRouter and compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenRouterClient {
    pub fn new(endpoint: &str, api_key: &str, timeout_secs: u64) -> Result<Self, FormulaError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FormulaError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn send(&self, request: &OcrRequest) -> Result<String, FormulaError> {
        let body = ChatCompletionRequest::from_ocr(request);
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", "https://github.com/pdf2md-formula")
            .header("X-Title", "pdf2md-formula-ocr")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(FormulaError::OcrStatus {
                status: status.as_u16(),
                body: text.chars().take(300).collect(),
            });
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| FormulaError::OcrResponse(format!("{e}; body starts {:?}", excerpt(&text))))?;
        if let Some(usage) = parsed.usage {
            debug!(
                "OCR batch used {} prompt / {} completion tokens",
                usage.prompt_tokens, usage.completion_tokens
            );
        }
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| FormulaError::OcrResponse("completion contained no message content".into()))
    }
}

impl OcrClient for OpenRouterClient {
    fn complete<'a>(&'a self, request: &'a OcrRequest) -> BoxFuture<'a, Result<String, FormulaError>> {
        Box::pin(self.send(request))
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(120).collect()
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

impl<'a> ChatCompletionRequest<'a> {
    fn from_ocr(request: &'a OcrRequest) -> Self {
        let mut content = Vec::with_capacity(1 + 2 * request.images.len());
        content.push(ContentPart::Text {
            text: request.prompt.clone(),
        });
        for labeled in &request.images {
            content.push(ContentPart::Text {
                text: labeled.label.clone(),
            });
            content.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: data_url(&labeled.image),
                },
            });
        }
        Self {
            model: &request.model,
            messages: vec![RequestMessage {
                role: "user",
                content,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ResponseChoice>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ── edgequake-llm provider ───────────────────────────────────────────────

/// OCR through an `edgequake_llm` vision provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    async fn send(&self, request: &OcrRequest) -> Result<String, FormulaError> {
        let labels: Vec<&str> = request.images.iter().map(|i| i.label.as_str()).collect();
        let text = format!(
            "{}\n\nThe images are attached in this order: {}",
            request.prompt,
            labels.join(" ")
        );
        let images: Vec<ImageData> = request.images.iter().map(|i| i.image.clone()).collect();
        let messages = vec![ChatMessage::user_with_images(text.as_str(), images)];
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| FormulaError::OcrTransport(e.to_string()))?;
        debug!(
            "OCR batch used {} prompt / {} completion tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

impl OcrClient for ProviderClient {
    fn complete<'a>(&'a self, request: &'a OcrRequest) -> BoxFuture<'a, Result<String, FormulaError>> {
        Box::pin(self.send(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(n: usize) -> OcrRequest {
        OcrRequest {
            model: "google/gemini-2.5-flash".into(),
            prompt: "transcribe".into(),
            images: (1..=n)
                .map(|i| LabeledImage {
                    label: format!("Image {i}:"),
                    image: ImageData::new("QUJD".to_string(), "image/png"),
                })
                .collect(),
            max_tokens: 4096,
            temperature: 0.0,
        }
    }

    #[test]
    fn request_body_interleaves_labels_and_images() {
        let req = request(2);
        let body = serde_json::to_value(ChatCompletionRequest::from_ocr(&req)).unwrap();

        assert_eq!(body["model"], "google/gemini-2.5-flash");
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["messages"][0]["role"], "user");

        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 5);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "transcribe");
        assert_eq!(content[1]["text"], "Image 1:");
        assert_eq!(content[2]["type"], "image_url");
        assert_eq!(content[2]["image_url"]["url"], "data:image/png;base64,QUJD");
        assert_eq!(content[3]["text"], "Image 2:");
    }

    #[test]
    fn response_content_is_extracted() {
        let json = r#"{"id":"x","choices":[{"message":{"role":"assistant","content":"1: a"}}],
            "usage":{"prompt_tokens":10,"completion_tokens":2,"total_tokens":12}}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("1: a"));
    }

    #[test]
    fn response_without_choices_parses_empty() {
        let parsed: ChatCompletionResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.choices.is_empty());
    }

    #[test]
    fn config_without_credential_has_no_client() {
        let config = FormulaOcrConfig::default();
        assert!(matches!(
            client_from_config(&config),
            Err(FormulaError::ProviderNotConfigured { .. })
        ));
    }

    #[test]
    fn api_key_selects_http_client() {
        let config = FormulaOcrConfig::builder().api_key("sk-or-test").build().unwrap();
        assert!(client_from_config(&config).is_ok());
    }
}
