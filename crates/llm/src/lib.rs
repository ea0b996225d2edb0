use std::sync::Arc;

pub mod content;
mod http_adapter;
pub mod sse;
mod transport;

pub use content::{
    ContentPath, RESPONSE_BODY_PRECEDENCE, STREAM_FRAME_PRECEDENCE, extract_content,
    extract_delta_content, extract_message_content,
};
pub use http_adapter::{EVENT_STREAM_MIME, HttpTransport};
pub use sse::{ContentStream, SseDecoder, SseFrame, decode_content_stream};
pub use transport::{
    BoxFuture, ChatReply, ChatRequest, ChatTransport, Role, TransportConfig, TransportError,
    TransportResult, WireMessage,
};

/// Builds the transport matching the endpoint's scheme.
pub fn create_transport(config: TransportConfig) -> TransportResult<Arc<dyn ChatTransport>> {
    match config.endpoint.scheme() {
        "http" | "https" => Ok(Arc::new(HttpTransport::new(config)?)),
        scheme => Err(TransportError::UnsupportedScheme {
            stage: "create-transport",
            scheme: scheme.to_string(),
        }),
    }
}
