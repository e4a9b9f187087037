use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::GeminiConfig;

/// Why a single generation attempt failed.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no Gemini API key configured")]
    MissingApiKey,

    #[error("request to Gemini failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Gemini API error ({status}): {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to parse Gemini response: {0}")]
    Malformed(String),

    #[error("Gemini blocked the request: {0}")]
    Blocked(String),

    #[error("Gemini returned no text")]
    Empty,
}

impl GenerationError {
    /// Misconfiguration that will not go away by itself (bad key, unknown
    /// model, rejected prompt). Only used to pick log wording.
    pub fn is_permanent(&self) -> bool {
        match self {
            GenerationError::MissingApiKey | GenerationError::Blocked(_) => true,
            GenerationError::Status { status, .. } => matches!(
                *status,
                StatusCode::BAD_REQUEST
                    | StatusCode::UNAUTHORIZED
                    | StatusCode::FORBIDDEN
                    | StatusCode::NOT_FOUND
            ),
            GenerationError::Transport(_)
            | GenerationError::Malformed(_)
            | GenerationError::Empty => false,
        }
    }
}

/// A text-generation backend: one prompt in, one reply out.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn build_request(prompt: &str, max_output_tokens: Option<u32>) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            role: "user".to_string(),
            parts: vec![RequestPart {
                text: prompt.to_string(),
            }],
        }],
        generation_config: max_output_tokens.map(|max_output_tokens| GenerationConfig {
            max_output_tokens,
        }),
    }
}

/// Join the text parts of the first candidate.
fn extract_text(response: GenerateContentResponse) -> Result<String, GenerationError> {
    let candidate = match response.candidates.into_iter().next() {
        Some(c) => c,
        None => {
            return match response.prompt_feedback.and_then(|f| f.block_reason) {
                Some(reason) => Err(GenerationError::Blocked(reason)),
                None => Err(GenerationError::Empty),
            };
        }
    };

    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.text)
        .collect();

    if !text.trim().is_empty() {
        return Ok(text);
    }

    match candidate.finish_reason.as_deref() {
        Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT")) => {
            Err(GenerationError::Blocked(reason.to_string()))
        }
        _ => Err(GenerationError::Empty),
    }
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, GenerationError> {
        if self.config.api_key.is_empty() {
            return Err(GenerationError::MissingApiKey);
        }

        let url = self.endpoint(model);
        let request = build_request(prompt, self.config.max_output_tokens);

        debug!(model = %model, prompt_len = prompt.len(), "Sending request to Gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GenerationError::Status { status, body });
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;

        extract_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::post,
        Json, Router,
    };
    use serde_json::{json, Value};

    fn parse(value: Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(build_request("Hello", None)).unwrap();
        assert_eq!(
            body,
            json!({"contents": [{"role": "user", "parts": [{"text": "Hello"}]}]})
        );

        let body = serde_json::to_value(build_request("Hello", Some(256))).unwrap();
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn test_extract_joins_text_parts() {
        let response = parse(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hi "}, {"text": "there"}]},
                "finishReason": "STOP"
            }]
        }));
        assert_eq!(extract_text(response).unwrap(), "Hi there");
    }

    #[test]
    fn test_extract_blocked_prompt() {
        let response = parse(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
        let err = extract_text(response).unwrap_err();
        assert!(matches!(err, GenerationError::Blocked(ref r) if r == "SAFETY"));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_extract_safety_finish_without_text() {
        let response = parse(json!({"candidates": [{"finishReason": "SAFETY"}]}));
        assert!(matches!(
            extract_text(response),
            Err(GenerationError::Blocked(_))
        ));
    }

    #[test]
    fn test_extract_no_candidates_is_empty() {
        let response = parse(json!({}));
        assert!(matches!(extract_text(response), Err(GenerationError::Empty)));
    }

    #[test]
    fn test_extract_whitespace_only_is_empty() {
        let response = parse(json!({
            "candidates": [{"content": {"parts": [{"text": "  \n"}]}, "finishReason": "STOP"}]
        }));
        let err = extract_text(response).unwrap_err();
        assert!(matches!(err, GenerationError::Empty));
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_status_classification() {
        let not_found = GenerationError::Status {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        };
        let unavailable = GenerationError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(not_found.is_permanent());
        assert!(!unavailable.is_permanent());
        assert!(GenerationError::MissingApiKey.is_permanent());
    }

    async fn stub_generate(
        Path(action): Path<String>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (AxumStatus, String) {
        if headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
            return (AxumStatus::FORBIDDEN, r#"{"error":{"code":403}}"#.to_string());
        }

        let model = action.trim_end_matches(":generateContent");
        match model {
            "ok-model" => {
                let prompt = body["contents"][0]["parts"][0]["text"]
                    .as_str()
                    .unwrap_or_default();
                let reply = json!({
                    "candidates": [{
                        "content": {"parts": [{"text": format!("echo: {prompt}")}]},
                        "finishReason": "STOP"
                    }]
                });
                (AxumStatus::OK, reply.to_string())
            }
            "garbage-model" => (AxumStatus::OK, "not json".to_string()),
            _ => (
                AxumStatus::NOT_FOUND,
                format!(r#"{{"error":{{"code":404,"message":"models/{model} is not found"}}}}"#),
            ),
        }
    }

    async fn spawn_stub() -> String {
        let app = Router::new().route("/models/{action}", post(stub_generate));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(base_url: String, api_key: &str) -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            api_key: api_key.to_string(),
            base_url,
            timeout_secs: Some(5),
            ..GeminiConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_generate_success() {
        let client = client_for(spawn_stub().await, "test-key");
        let reply = client.generate("ok-model", "Hello").await.unwrap();
        assert_eq!(reply, "echo: Hello");
    }

    #[tokio::test]
    async fn test_generate_unknown_model() {
        let client = client_for(spawn_stub().await, "test-key");
        let err = client.generate("gemini-9-ultra", "Hello").await.unwrap_err();
        match err {
            GenerationError::Status { status, ref body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert!(body.contains("is not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_bad_key() {
        let client = client_for(spawn_stub().await, "wrong-key");
        let err = client.generate("ok-model", "Hello").await.unwrap_err();
        assert!(matches!(err, GenerationError::Status { status, .. } if status == StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_generate_malformed_body() {
        let client = client_for(spawn_stub().await, "test-key");
        let err = client.generate("garbage-model", "Hello").await.unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_generate_without_key_skips_request() {
        // Nothing listens here; reaching the network would yield Transport.
        let client = client_for("http://127.0.0.1:9".to_string(), "");
        let err = client.generate("ok-model", "Hello").await.unwrap_err();
        assert!(matches!(err, GenerationError::MissingApiKey));
    }

    #[tokio::test]
    async fn test_generate_unreachable_host() {
        let client = client_for("http://127.0.0.1:9".to_string(), "test-key");
        let err = client.generate("ok-model", "Hello").await.unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)));
        assert!(!err.is_permanent());
    }
}
