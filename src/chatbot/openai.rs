//! OpenAI-compatible chat completion, moderation and transcription client.

use reqwest::multipart::{Form, Part as FormPart};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::chatbot::turn::{ConversationTurn, Part};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// One call to the model: `turns` already starts with the system turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub turns: Vec<ConversationTurn>,
    pub max_output_tokens: u32,
    /// End-user identifier forwarded for abuse monitoring.
    pub user: Option<String>,
}

/// A language model the engine can talk to.
pub trait ChatModel: Send + Sync {
    /// Return the raw text of the model's answer.
    fn complete(&self, request: ChatRequest) -> impl Future<Output = Result<String, ModelError>> + Send;

    /// Whether `text` violates the provider's content policy.
    fn moderate(&self, text: &str) -> impl Future<Output = Result<bool, ModelError>> + Send;

    /// Speech to text. `file_name` tells the provider the audio format.
    fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> impl Future<Output = Result<String, ModelError>> + Send;
}

pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    model: String,
    transcription_model: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiContent>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text { text: String },
    ImageUrl { image_url: ApiImageUrl },
}

#[derive(Serialize)]
struct ApiImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct ModerationRequest<'a> {
    input: &'a str,
}

#[derive(Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    flagged: bool,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

fn to_api_message(turn: &ConversationTurn) -> ApiMessage {
    let content = turn
        .content
        .iter()
        .map(|part| match part {
            Part::Text { value } => ApiContent::Text { text: value.clone() },
            Part::Media { url, detail, .. } => ApiContent::ImageUrl {
                image_url: ApiImageUrl {
                    url: url.clone(),
                    detail: detail.as_str(),
                },
            },
        })
        .collect();
    ApiMessage {
        role: turn.role.as_str(),
        content,
    }
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ModelError::Http(e.to_string()))?;

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            http,
        })
    }

    pub fn with_transcription_model(mut self, model: String) -> Self {
        self.transcription_model = model;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post<T: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &T) -> Result<R, ModelError> {
        let request = self.http.post(format!("{}{}", self.base_url, path)).json(body);
        let response = self.send(request).await?;
        response.json().await.map_err(|e| ModelError::Parse(e.to_string()))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ModelError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ModelError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }
        Ok(response)
    }

    fn transcription_form(&self, audio: Vec<u8>, file_name: &str) -> Result<Form, ModelError> {
        let file = FormPart::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| ModelError::Http(e.to_string()))?;
        Ok(Form::new()
            .part("file", file)
            .text("model", self.transcription_model.clone())
            .text("response_format", "json"))
    }
}

impl ChatModel for OpenAiClient {
    async fn complete(&self, request: ChatRequest) -> Result<String, ModelError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: request.turns.iter().map(to_api_message).collect(),
            max_tokens: request.max_output_tokens,
            user: request.user,
        };

        info!("🤖 Requesting completion from {} ({} turns)", self.model, body.messages.len());

        let response: CompletionResponse = self.post("/chat/completions", &body).await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ModelError::Empty)?;

        debug!("Completion: {} chars", text.len());
        Ok(text)
    }

    async fn moderate(&self, text: &str) -> Result<bool, ModelError> {
        let response: ModerationResponse = self
            .post("/moderations", &ModerationRequest { input: text })
            .await?;
        Ok(response.results.iter().any(|r| r.flagged))
    }

    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, ModelError> {
        info!("🎙️ Transcribing {} bytes with {}", audio.len(), self.transcription_model);

        let form = self.transcription_form(audio, file_name)?;
        let request = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        let response: TranscriptionResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| ModelError::Parse(e.to_string()))?;

        let text = response.text.trim();
        if text.is_empty() {
            return Err(ModelError::Empty);
        }
        Ok(text.to_string())
    }
}

#[derive(Debug)]
pub enum ModelError {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::Http(e) => write!(f, "HTTP error: {e}"),
            ModelError::Api(e) => write!(f, "API error: {e}"),
            ModelError::Parse(e) => write!(f, "Parse error: {e}"),
            ModelError::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for ModelError {}
