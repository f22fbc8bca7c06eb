//! Gemini-style `generateContent` backend.
//!
//! Sends the ordered part sequence as a single-turn request with inline
//! base64 image data, then extracts the first usable caption from the
//! response candidates.

use super::provider::CaptionService;
use crate::config::ServiceConfig;
use crate::error::CaptionError;
use crate::pool::Credential;
use crate::request::RequestPart;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Remote captioning backend speaking the `generateContent` wire format.
pub struct GeminiService {
    endpoint: String,
    model: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl GeminiService {
    /// Build the service from config, including the optional proxy.
    pub fn new(config: &ServiceConfig) -> Result<Self, CaptionError> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout());

        if let Some(proxy_url) = &config.proxy {
            let mut proxy = reqwest::Proxy::all(proxy_url).map_err(|e| CaptionError::Transient {
                message: format!("Invalid proxy {proxy_url}: {e}"),
                status_code: None,
            })?;
            if let Some(auth) = &config.proxy_auth {
                let (user, pass) = auth.split_once(':').unwrap_or((auth.as_str(), ""));
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| CaptionError::Transient {
            message: format!("Failed to build HTTP client: {e}"),
            status_code: None,
        })?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
            timeout: config.request_timeout(),
        })
    }

    fn generate_url(&self, api_key: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint, self.model, api_key
        )
    }

    fn probe_url(&self, api_key: &str) -> String {
        format!("{}/models/{}?key={}", self.endpoint, self.model, api_key)
    }
}

// --- Request types ---

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Image { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "stopSequences")]
    stop_sequences: Vec<String>,
    temperature: f64,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "topP")]
    top_p: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            stop_sequences: vec![],
            temperature: 0.1,
            top_k: 32,
            top_p: 1.0,
            max_output_tokens: 4096,
        }
    }
}

#[derive(Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

/// Dataset captions routinely trip over-eager filters; every category is
/// set to BLOCK_NONE and refusals are handled from the response instead.
fn permissive_safety() -> Vec<SafetySetting> {
    [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ]
    .into_iter()
    .map(|category| SafetySetting {
        category,
        threshold: "BLOCK_NONE",
    })
    .collect()
}

fn build_body(parts: &[RequestPart]) -> GenerateRequest {
    let parts = parts
        .iter()
        .map(|part| match part {
            RequestPart::Text(text) => Part::Text { text: text.clone() },
            RequestPart::Image(image) => Part::Image {
                inline_data: InlineData {
                    mime_type: image.media_type.clone(),
                    data: image.data.clone(),
                },
            },
        })
        .collect();
    GenerateRequest {
        contents: vec![Content { parts }],
        generation_config: GenerationConfig::default(),
        safety_settings: permissive_safety(),
    }
}

// --- Response types ---

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<ResponseCandidate>>,
    error: Option<ApiError>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct ResponseCandidate {
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

/// Map a non-success HTTP status to the error taxonomy.
fn classify_status(status: u16, body: String) -> CaptionError {
    if status == 429 {
        CaptionError::RateLimited {
            message: format!("HTTP 429: {body}"),
        }
    } else if (500..=599).contains(&status) {
        CaptionError::Transient {
            message: format!("HTTP {status}: {body}"),
            status_code: Some(status),
        }
    } else {
        CaptionError::Refused {
            message: format!("HTTP {status}: {body}"),
        }
    }
}

/// Extract the first usable caption from a parsed response.
///
/// Only candidates that finished with `STOP` count; a response with
/// candidates but none stopping cleanly was cut off by the service and is
/// treated as a refusal, while a structurally broken body is transient.
fn extract_caption(response: GenerateResponse) -> Result<String, CaptionError> {
    if let Some(feedback) = &response.prompt_feedback {
        if let Some(reason) = &feedback.block_reason {
            return Err(CaptionError::Refused {
                message: format!("Prompt blocked: {reason}"),
            });
        }
    }

    let candidates = match response.candidates {
        Some(candidates) => candidates,
        None => {
            if let Some(error) = response.error {
                return Err(CaptionError::Transient {
                    message: format!(
                        "Error in response: {}",
                        error.message.unwrap_or_else(|| "unknown".to_string())
                    ),
                    status_code: None,
                });
            }
            return Err(CaptionError::Transient {
                message: "Invalid response: no candidates".to_string(),
                status_code: None,
            });
        }
    };

    let stopped: Vec<ResponseCandidate> = candidates
        .into_iter()
        .filter(|c| c.finish_reason.as_deref() == Some("STOP"))
        .collect();
    if stopped.is_empty() {
        return Err(CaptionError::Refused {
            message: "No candidates finished with STOP".to_string(),
        });
    }

    let texts: Vec<String> = stopped
        .into_iter()
        .filter_map(|candidate| {
            let text = candidate
                .content?
                .parts?
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>();
            let text = text.trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .collect();

    if texts.len() > 1 {
        tracing::debug!("{} usable candidates in one response", texts.len());
    }
    texts
        .into_iter()
        .next()
        .ok_or_else(|| CaptionError::Transient {
            message: "Invalid response: candidates carried no text".to_string(),
            status_code: None,
        })
}

#[async_trait]
impl CaptionService for GeminiService {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        parts: &[RequestPart],
        credential: &Credential,
    ) -> Result<String, CaptionError> {
        let body = build_body(parts);

        let response = self
            .client
            .post(self.generate_url(&credential.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CaptionError::Transient {
                message: format!("Request failed: {e}"),
                status_code: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), text));
        }

        let parsed: GenerateResponse =
            response.json().await.map_err(|e| CaptionError::Transient {
                message: format!("Failed to parse response: {e}"),
                status_code: None,
            })?;

        extract_caption(parsed)
    }

    async fn probe(&self, credential: &Credential) -> bool {
        match self
            .client
            .get(self.probe_url(&credential.api_key))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Health probe failed: {e}");
                false
            }
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
