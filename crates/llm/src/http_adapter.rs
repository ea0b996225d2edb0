use reqwest::header::{CONTENT_TYPE, HeaderMap};
use snafu::ResultExt;
use url::Url;

use super::sse::decode_content_stream;
use super::transport::{
    BoxFuture, BuildClientSnafu, ChatReply, ChatRequest, ChatTransport, DecodeBodySnafu,
    ReadBodySnafu, SendRequestSnafu, StatusSnafu, TransportConfig, TransportResult,
};

pub const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Posts chat requests as JSON and negotiates streaming from the response.
pub struct HttpTransport {
    config: TransportConfig,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> TransportResult<Self> {
        let client = reqwest::Client::builder().build().context(BuildClientSnafu {
            stage: "http-transport-new",
        })?;

        Ok(Self { config, client })
    }

    fn is_event_stream(headers: &HeaderMap) -> bool {
        headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.to_ascii_lowercase().contains(EVENT_STREAM_MIME))
    }

    async fn post(&self, request: ChatRequest) -> TransportResult<ChatReply> {
        let endpoint = self.config.endpoint.clone();
        let message_count = request.messages.len();
        let requested_stream = request.stream;

        let mut builder = self.client.post(endpoint.clone()).json(&request);
        if let Some(token) = &self.config.auth_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.context(SendRequestSnafu {
            stage: "send-chat-request",
            endpoint: endpoint.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            // The body is diagnostic only; a failed read must not mask the status.
            let body = response.text().await.unwrap_or_default();
            return StatusSnafu {
                stage: "chat-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        if Self::is_event_stream(response.headers()) {
            tracing::debug!(
                endpoint = %endpoint,
                message_count,
                requested_stream,
                "chat endpoint answered with an event stream"
            );
            return Ok(ChatReply::Stream(decode_content_stream(
                response.bytes_stream(),
                self.config.idle_timeout,
            )));
        }

        let payload = response.text().await.context(ReadBodySnafu {
            stage: "read-chat-response",
        })?;
        let value = serde_json::from_str(&payload).context(DecodeBodySnafu {
            stage: "parse-chat-response",
        })?;

        tracing::debug!(
            endpoint = %endpoint,
            message_count,
            requested_stream,
            "chat endpoint answered with a complete body"
        );
        Ok(ChatReply::Complete(value))
    }
}

impl ChatTransport for HttpTransport {
    fn endpoint(&self) -> &Url {
        &self.config.endpoint
    }

    fn send<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, TransportResult<ChatReply>> {
        Box::pin(self.post(request))
    }
}
