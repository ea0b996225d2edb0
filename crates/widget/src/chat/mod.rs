/// Send-cycle events and outcomes.
pub mod events;
/// Domain entities and deterministic stream state boundaries.
pub mod message;
pub mod session;

pub use events::{SendOutcome, Submit};
pub use message::{
    ActiveMessage, Conversation, Message, MessageId, Role, SendId, StreamState, StreamTransition,
    StreamTransitionRejection, StreamTransitionResult,
};
pub use session::{
    ChatSession, ERROR_FALLBACK, NO_CONTENT_FALLBACK, SessionError, SessionResult,
};
