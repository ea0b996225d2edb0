use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use url::Url;

use super::sse::ContentStream;

/// Chat speaker role as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub endpoint: Url,
    pub auth_token: Option<String>,
    pub idle_timeout: Option<Duration>,
}

impl TransportConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            auth_token: None,
            idle_timeout: None,
        }
    }

    /// Attaches a bearer credential. Blank tokens are treated as absent.
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl WireMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// JSON body posted to the chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    pub include_sources: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<WireMessage>, stream: bool) -> Self {
        Self {
            messages,
            stream,
            include_sources: false,
        }
    }
}

/// What the server answered with, decided by the response content type.
pub enum ChatReply {
    /// `text/event-stream` body, already decoded into content fragments.
    Stream(ContentStream),
    /// Any other successful body, parsed as JSON.
    Complete(serde_json::Value),
}

impl std::fmt::Debug for ChatReply {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => formatter.write_str("ChatReply::Stream(..)"),
            Self::Complete(value) => formatter.debug_tuple("ChatReply::Complete").field(value).finish(),
        }
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("endpoint scheme '{scheme}' is not supported"))]
    UnsupportedScheme {
        stage: &'static str,
        scheme: String,
    },
    #[snafu(display("failed to build http client on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {endpoint} failed on `{stage}`, {source}"))]
    SendRequest {
        stage: &'static str,
        endpoint: String,
        source: reqwest::Error,
    },
    #[snafu(display("chat endpoint returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to read response body on `{stage}`, {source}"))]
    ReadBody {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to decode response body on `{stage}`, {source}"))]
    DecodeBody {
        stage: &'static str,
        source: serde_json::Error,
    },
}

impl TransportError {
    /// Pipeline step that produced the error.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::UnsupportedScheme { stage, .. }
            | Self::BuildClient { stage, .. }
            | Self::SendRequest { stage, .. }
            | Self::Status { stage, .. }
            | Self::ReadBody { stage, .. }
            | Self::DecodeBody { stage, .. } => *stage,
        }
    }
}

/// Seam between the chat session and the network.
pub trait ChatTransport: Send + Sync {
    fn endpoint(&self) -> &Url;
    fn send<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, TransportResult<ChatReply>>;
}
