use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use serde::{Deserialize, Serialize};

use crate::backend::{mime_type_of, BackendError, VisionBackend, EXTRACTION_PROMPT};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI chat completions with the image passed as a data URL.
pub struct OpenAiBackend {
    http: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
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

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiBackend {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            url: OPENAI_CHAT_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn request(&self, image: &[u8]) -> ChatRequest<'_> {
        let data_url = format!(
            "data:{};base64,{}",
            mime_type_of(image),
            general_purpose::STANDARD.encode(image)
        );
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: EXTRACTION_PROMPT.to_string() },
                    ContentPart::ImageUrl { image_url: ImageUrl { url: data_url } },
                ],
            }],
            temperature: 0.1,
            max_tokens: 4096,
        }
    }
}

fn reply_text(response: ChatResponse) -> Result<String, BackendError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| BackendError::Malformed("no message content in OpenAI reply".into()))
}

#[async_trait]
impl VisionBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn extract(&self, image: &[u8]) -> Result<String, BackendError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request(image))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http { status: status.as_u16(), body });
        }

        let parsed: ChatResponse = response.json().await?;
        reply_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_data_url() {
        let backend = OpenAiBackend::new(reqwest::Client::new(), "k", "gpt-4o");
        let v = serde_json::to_value(backend.request(&[0xFF, 0xD8, 0xFF, 0xE0])).unwrap();
        assert_eq!(v["model"], "gpt-4o");
        let content = &v["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
        let url = content[1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn transport_error_does_not_expose_key() {
        let backend = OpenAiBackend::new(reqwest::Client::new(), "sk-SECRET456", "gpt-4o")
            .with_url("http://127.0.0.1:1/v1/chat/completions");
        let err = backend.extract(b"img").await.unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
        assert!(!err.to_string().contains("sk-SECRET456"));
    }

    #[test]
    fn reply_text_takes_first_choice() {
        let r: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"[]"}}]}"#).unwrap();
        assert_eq!(reply_text(r).unwrap(), "[]");

        let r: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(reply_text(r).is_err());
    }
}
