pub use chatlet_llm::Role;
use chatlet_llm::WireMessage;

/// Stable identifier for one message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier for one send cycle.
///
/// Every submit gets a fresh id so terminal transitions from a stale cycle are
/// rejected instead of clobbering the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SendId(pub u64);

impl SendId {
    /// Creates a typed send identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
        }
    }

    pub fn to_wire(&self) -> WireMessage {
        WireMessage::new(self.role, self.content.clone())
    }
}

/// Handle to the assistant message a send cycle writes into.
///
/// Captured when the placeholder is inserted; the index is only trusted while
/// the id at that position still matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveMessage {
    pub id: MessageId,
    index: usize,
}

/// Ordered chat history plus the lifecycle of the current send.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    stream_state: StreamState,
    next_message_id: u64,
}

impl Conversation {
    /// Creates an empty conversation in idle state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn stream_state(&self) -> &StreamState {
        &self.stream_state
    }

    /// The in-flight flag: true while a send cycle is streaming.
    pub fn is_streaming(&self) -> bool {
        self.stream_state.active_send().is_some()
    }

    pub fn message(&self, handle: ActiveMessage) -> Option<&Message> {
        self.messages
            .get(handle.index)
            .filter(|message| message.id == handle.id)
    }

    /// Wire form of the whole history, in display order.
    pub fn to_wire(&self) -> Vec<WireMessage> {
        self.messages.iter().map(Message::to_wire).collect()
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> MessageId {
        self.push(Role::User, content.into()).id
    }

    /// Appends the empty assistant message a send cycle will fill in.
    pub fn push_assistant_placeholder(&mut self) -> ActiveMessage {
        self.push(Role::Assistant, String::new())
    }

    /// Appends a delta to the active message. Returns false for a stale handle.
    pub fn append_delta(&mut self, handle: ActiveMessage, delta: &str) -> bool {
        match self.message_mut(handle) {
            Some(message) => {
                message.content.push_str(delta);
                true
            }
            None => false,
        }
    }

    /// Replaces the active message's content. Returns false for a stale handle.
    pub fn replace_content(&mut self, handle: ActiveMessage, content: impl Into<String>) -> bool {
        match self.message_mut(handle) {
            Some(message) => {
                message.content = content.into();
                true
            }
            None => false,
        }
    }

    /// Applies a deterministic stream transition.
    pub fn apply_stream_transition(
        &mut self,
        transition: StreamTransition,
    ) -> StreamTransitionResult {
        let next_state = self.stream_state.apply(transition)?;
        self.stream_state = next_state.clone();
        Ok(next_state)
    }

    fn push(&mut self, role: Role, content: String) -> ActiveMessage {
        self.next_message_id += 1;
        let id = MessageId::new(self.next_message_id);
        let index = self.messages.len();
        self.messages.push(Message::new(id, role, content));
        ActiveMessage { id, index }
    }

    fn message_mut(&mut self, handle: ActiveMessage) -> Option<&mut Message> {
        self.messages
            .get_mut(handle.index)
            .filter(|message| message.id == handle.id)
    }
}

/// Lifecycle of the conversation's send cycles.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Streaming(SendId),
    Done(SendId),
    Failed {
        send_id: SendId,
        message: String,
    },
    /// The cycle was dropped before finishing; partial content is kept.
    Abandoned(SendId),
}

/// State transition input for the send lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Start(SendId),
    Complete(SendId),
    Fail { send_id: SendId, message: String },
    Abandon(SendId),
    ResetToIdle,
}

/// Rejection reason for illegal stream transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming { active: SendId, attempted: SendId },
    NoActiveStream,
    SendMismatch { active: SendId, attempted: SendId },
}

/// Result type for stream transition application.
pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// Returns the in-flight send if and only if state is `Streaming`.
    pub fn active_send(&self) -> Option<SendId> {
        match self {
            Self::Streaming(send_id) => Some(*send_id),
            Self::Idle | Self::Done(_) | Self::Failed { .. } | Self::Abandoned(_) => None,
        }
    }

    /// Applies one transition deterministically.
    ///
    /// Any non-streaming state may start a new send. Terminal transitions must
    /// name the send that is currently streaming.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Start(send_id) => self.apply_start(send_id),
            StreamTransition::Complete(send_id) => self.finish(send_id, Self::Done(send_id)),
            StreamTransition::Fail { send_id, message } => {
                self.finish(send_id, Self::Failed { send_id, message })
            }
            StreamTransition::Abandon(send_id) => self.finish(send_id, Self::Abandoned(send_id)),
            StreamTransition::ResetToIdle => Ok(Self::Idle),
        }
    }

    fn apply_start(&self, send_id: SendId) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) => Err(StreamTransitionRejection::AlreadyStreaming {
                active: *active,
                attempted: send_id,
            }),
            Self::Idle | Self::Done(_) | Self::Failed { .. } | Self::Abandoned(_) => {
                Ok(Self::Streaming(send_id))
            }
        }
    }

    fn finish(&self, send_id: SendId, next: StreamState) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) if *active == send_id => Ok(next),
            Self::Streaming(active) => Err(StreamTransitionRejection::SendMismatch {
                active: *active,
                attempted: send_id,
            }),
            Self::Idle | Self::Done(_) | Self::Failed { .. } | Self::Abandoned(_) => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_rejected_while_another_send_streams() {
        let state = StreamState::Streaming(SendId::new(1));

        assert_eq!(
            state.apply(StreamTransition::Start(SendId::new(2))),
            Err(StreamTransitionRejection::AlreadyStreaming {
                active: SendId::new(1),
                attempted: SendId::new(2),
            })
        );
    }

    #[test]
    fn terminal_transitions_must_match_active_send() {
        let state = StreamState::Streaming(SendId::new(3));

        assert_eq!(
            state.apply(StreamTransition::Complete(SendId::new(4))),
            Err(StreamTransitionRejection::SendMismatch {
                active: SendId::new(3),
                attempted: SendId::new(4),
            })
        );
        assert_eq!(
            StreamState::Idle.apply(StreamTransition::Abandon(SendId::new(3))),
            Err(StreamTransitionRejection::NoActiveStream)
        );
        assert_eq!(
            state.apply(StreamTransition::Fail {
                send_id: SendId::new(3),
                message: "boom".into(),
            }),
            Ok(StreamState::Failed {
                send_id: SendId::new(3),
                message: "boom".into(),
            })
        );
    }

    #[test]
    fn finished_states_allow_a_new_start() {
        for state in [
            StreamState::Idle,
            StreamState::Done(SendId::new(1)),
            StreamState::Abandoned(SendId::new(1)),
        ] {
            assert_eq!(
                state.apply(StreamTransition::Start(SendId::new(2))),
                Ok(StreamState::Streaming(SendId::new(2)))
            );
        }
    }

    #[test]
    fn deltas_only_reach_the_handled_message() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        let active = conversation.push_assistant_placeholder();

        assert!(conversation.append_delta(active, "Hel"));
        assert!(conversation.append_delta(active, "lo"));

        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.messages()[0].content, "hi");
        assert_eq!(conversation.message(active).map(|m| m.content.as_str()), Some("Hello"));

        assert!(conversation.replace_content(active, "replaced"));
        assert_eq!(conversation.messages()[1].content, "replaced");
        assert_eq!(conversation.messages()[1].role, Role::Assistant);
    }

    #[test]
    fn handle_from_another_conversation_is_refused() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        let active = conversation.push_assistant_placeholder();

        let mut remounted = Conversation::new();
        assert!(!remounted.append_delta(active, "x"));
        assert!(!remounted.replace_content(active, "x"));
        assert!(remounted.is_empty());
    }
}
