use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use serde_json::{json, Value};

use crate::backend::{mime_type_of, BackendError, VisionBackend, EXTRACTION_PROMPT};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini `generateContent` with the image sent inline.
pub struct GeminiBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Point at a different endpoint root (proxies, regional hosts).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(image: &[u8]) -> Value {
        json!({
            "contents": [{
                "parts": [
                    { "text": EXTRACTION_PROMPT },
                    {
                        "inline_data": {
                            "mime_type": mime_type_of(image),
                            "data": general_purpose::STANDARD.encode(image)
                        }
                    }
                ]
            }],
            "generationConfig": {
                "temperature": 0.1,
                "responseMimeType": "application/json"
            }
        })
    }
}

/// Text of the first candidate part.
fn reply_text(response: &Value) -> Result<String, BackendError> {
    response["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BackendError::Malformed("no text in first Gemini candidate".into()))
}

#[async_trait]
impl VisionBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn extract(&self, image: &[u8]) -> Result<String, BackendError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(image))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http { status: status.as_u16(), body });
        }

        let value: Value = response.json().await?;
        reply_text(&value)
    }
}
