//! Client for the Gemini `generateContent` endpoint.
//!
//! One prompt in, one reply out. No streaming, no retries, no history.

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt, Snafu};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Moderate randomness: coherent but not deterministic replies.
pub const TEMPERATURE: f64 = 0.7;
pub const MAX_OUTPUT_TOKENS: u32 = 500;

/// Coarse classification of a failed completion, used to decide what the
/// user gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transport,
    MalformedResponse,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompletionError {
    #[snafu(display("no Gemini API key configured"))]
    MissingCredential,

    #[snafu(display("refusing to send an empty prompt"))]
    EmptyPrompt,

    #[snafu(display("request to {endpoint} failed: {source}"))]
    Request {
        endpoint: String,
        source: reqwest::Error,
    },

    #[snafu(display("Gemini API error {status}: {body}"))]
    Status { status: u16, body: String },

    #[snafu(display("could not decode Gemini response: {source}"))]
    Decode { source: serde_json::Error },

    #[snafu(display("Gemini response is missing {missing}"))]
    MissingReply { missing: &'static str },

    #[snafu(display("completion task ended before replying: {source}"))]
    Aborted { source: tokio::task::JoinError },
}

impl CompletionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompletionError::MissingCredential => ErrorKind::Configuration,
            CompletionError::EmptyPrompt
            | CompletionError::Request { .. }
            | CompletionError::Status { .. }
            | CompletionError::Aborted { .. } => ErrorKind::Transport,
            CompletionError::Decode { .. } | CompletionError::MissingReply { .. } => {
                ErrorKind::MalformedResponse
            }
        }
    }
}

pub type CompletionResult<T> = Result<T, CompletionError>;

/// Anything that can turn a prompt into a reply.
///
/// The returned future owns everything it needs so it can be handed to
/// `tokio::spawn` while the UI keeps running.
pub trait CompletionClient: Send + Sync {
    fn complete(&self, prompt: &str) -> BoxFuture<'static, CompletionResult<String>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

fn build_request(prompt: &str) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![RequestContent {
            parts: vec![RequestPart {
                text: prompt.to_string(),
            }],
        }],
        generation_config: GenerationConfig {
            temperature: TEMPERATURE,
            max_output_tokens: MAX_OUTPUT_TOKENS,
        },
    }
}

/// Pull the first candidate's first text part out of a success body.
fn parse_reply(body: &str) -> CompletionResult<String> {
    let response: GenerateContentResponse = serde_json::from_str(body).context(DecodeSnafu)?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .context(MissingReplySnafu { missing: "candidates" })?;
    let content = candidate
        .content
        .context(MissingReplySnafu { missing: "candidate content" })?;
    let part = content
        .parts
        .into_iter()
        .next()
        .context(MissingReplySnafu { missing: "content parts" })?;
    let text = part
        .text
        .context(MissingReplySnafu { missing: "reply text" })?;

    ensure!(
        !text.trim().is_empty(),
        MissingReplySnafu { missing: "reply text" }
    );

    Ok(text.trim_end().to_string())
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Endpoint URL without the credential attached.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    pub async fn query(&self, prompt: &str) -> CompletionResult<String> {
        let api_key = self.api_key.as_deref().context(MissingCredentialSnafu)?;
        ensure!(!prompt.trim().is_empty(), EmptyPromptSnafu);

        let endpoint = self.endpoint();
        let request = build_request(prompt);

        // The key travels as a query parameter; strip the URL from transport
        // errors so it never ends up in a log line.
        let response = self
            .client
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&request)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context(RequestSnafu {
                endpoint: endpoint.as_str(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(reqwest::Error::without_url)
            .context(RequestSnafu {
                endpoint: endpoint.as_str(),
            })?;

        if !status.is_success() {
            return StatusSnafu {
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        parse_reply(&body)
    }
}

impl CompletionClient for GeminiClient {
    fn complete(&self, prompt: &str) -> BoxFuture<'static, CompletionResult<String>> {
        let client = self.clone();
        let prompt = prompt.to_string();
        async move { client.query(&prompt).await }.boxed()
    }
}
