use serde_json::Value;

/// One field path where a chat backend may place assistant text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentPath {
    /// `choices[0].delta.content`, OpenAI-style streaming chunks.
    ChoiceDelta,
    /// `choices[0].message.content`, OpenAI-style complete responses.
    ChoiceMessage,
    /// Top-level `content`.
    Content,
    /// `message.content`.
    MessageContent,
    /// Top-level `response`.
    Response,
}

impl ContentPath {
    /// JSON pointer addressing this path inside a payload.
    pub const fn pointer(self) -> &'static str {
        match self {
            Self::ChoiceDelta => "/choices/0/delta/content",
            Self::ChoiceMessage => "/choices/0/message/content",
            Self::Content => "/content",
            Self::MessageContent => "/message/content",
            Self::Response => "/response",
        }
    }
}

/// Lookup order for one `data:` frame of an event stream.
pub const STREAM_FRAME_PRECEDENCE: [ContentPath; 3] = [
    ContentPath::ChoiceDelta,
    ContentPath::Content,
    ContentPath::MessageContent,
];

/// Lookup order for a complete (non-streaming) JSON response body.
pub const RESPONSE_BODY_PRECEDENCE: [ContentPath; 4] = [
    ContentPath::ChoiceMessage,
    ContentPath::Content,
    ContentPath::MessageContent,
    ContentPath::Response,
];

/// Returns the first path in `precedence` that holds a non-empty string.
///
/// Paths holding empty strings or non-string values are skipped, so a payload
/// like `{"choices":[{"delta":{"content":""}}],"content":"x"}` resolves to the
/// top-level `content`. `None` means the payload carries no usable content.
pub fn extract_content<'a>(
    payload: &'a Value,
    precedence: &[ContentPath],
) -> Option<(ContentPath, &'a str)> {
    precedence.iter().find_map(|path| {
        payload
            .pointer(path.pointer())
            .and_then(Value::as_str)
            .filter(|content| !content.is_empty())
            .map(|content| (*path, content))
    })
}

/// Extracts a streamed delta using [`STREAM_FRAME_PRECEDENCE`].
pub fn extract_delta_content(payload: &Value) -> Option<&str> {
    extract_content(payload, &STREAM_FRAME_PRECEDENCE).map(|(_, content)| content)
}

/// Extracts a complete reply using [`RESPONSE_BODY_PRECEDENCE`].
pub fn extract_message_content(payload: &Value) -> Option<&str> {
    extract_content(payload, &RESPONSE_BODY_PRECEDENCE).map(|(_, content)| content)
}
