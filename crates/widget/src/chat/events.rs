use crate::chat::message::{SendId, StreamTransition};

/// One accepted submission, created when a send cycle starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submit {
    pub send_id: SendId,
    pub content: String,
    pub stream: bool,
}

/// How a send cycle ended, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Event stream consumed; `fragments` deltas were appended.
    Streamed { fragments: usize },
    /// Complete body with usable content.
    Completed,
    /// The server answered but carried no usable content; fallback shown.
    NoContent,
    /// Transport failure; error fallback shown.
    Failed { error: String },
}

impl Submit {
    /// Creates a submit event for a trimmed, non-empty message.
    pub fn new(send_id: SendId, content: impl Into<String>, stream: bool) -> Self {
        Self {
            send_id,
            content: content.into(),
            stream,
        }
    }

    /// Returns stream state transition to start the cycle.
    pub fn start_transition(&self) -> StreamTransition {
        StreamTransition::Start(self.send_id)
    }
}

impl SendOutcome {
    /// Maps the outcome to the terminal transition of `send_id`.
    ///
    /// Only transport failures end in `Failed`; a missing-content reply is a
    /// completed cycle that happens to show the fallback text.
    pub fn terminal_transition(&self, send_id: SendId) -> StreamTransition {
        match self {
            Self::Streamed { .. } | Self::Completed | Self::NoContent => {
                StreamTransition::Complete(send_id)
            }
            Self::Failed { error } => StreamTransition::Fail {
                send_id,
                message: error.clone(),
            },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}
