use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chatlet_llm::{ChatReply, ChatRequest, ChatTransport, WireMessage, extract_message_content};
use futures::StreamExt;
use snafu::{Snafu, ensure};
use tokio::sync::watch;

use crate::chat::events::{SendOutcome, Submit};
use crate::chat::message::{
    ActiveMessage, Conversation, SendId, StreamTransition, StreamTransitionRejection,
};

/// Shown when the transport fails.
pub const ERROR_FALLBACK: &str = "Sorry, I encountered an error. Please try again.";
/// Shown when the server answered without usable content.
pub const NO_CONTENT_FALLBACK: &str = "Sorry, I could not process that request.";

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("message is empty after trimming"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("send {attempted:?} rejected while {active:?} is in flight"))]
    AlreadyInFlight {
        stage: &'static str,
        active: SendId,
        attempted: SendId,
    },
    #[snafu(display("send {attempted:?} could not start: {rejection:?}"))]
    StartRejected {
        stage: &'static str,
        attempted: SendId,
        rejection: StreamTransitionRejection,
    },
}

/// Drives send cycles against one transport and owns the conversation.
///
/// The conversation lives in a watch channel: observers call [`subscribe`]
/// and re-render on every change. All mutation goes through the sender, so the
/// single-flight check and the user/assistant insertion happen atomically.
///
/// [`subscribe`]: ChatSession::subscribe
pub struct ChatSession {
    transport: Arc<dyn ChatTransport>,
    stream_by_default: bool,
    state: watch::Sender<Conversation>,
    next_send_id: AtomicU64,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn ChatTransport>, stream_by_default: bool) -> Self {
        let (state, _) = watch::channel(Conversation::new());
        Self {
            transport,
            stream_by_default,
            state,
            next_send_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Conversation> {
        self.state.subscribe()
    }

    /// Snapshot of the conversation as of now.
    pub fn conversation(&self) -> Conversation {
        self.state.borrow().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.borrow().is_streaming()
    }

    /// Sends `content` using the session's default transport mode.
    pub async fn send_message(&self, content: &str) -> SessionResult<SendOutcome> {
        self.send_message_with(content, self.stream_by_default).await
    }

    /// Runs one full send cycle.
    ///
    /// Only precondition violations are errors. Transport failures end the
    /// cycle normally with the error fallback as the assistant's reply and are
    /// reported through [`SendOutcome::Failed`].
    pub async fn send_message_with(
        &self,
        content: &str,
        stream: bool,
    ) -> SessionResult<SendOutcome> {
        let content = content.trim();
        ensure!(
            !content.is_empty(),
            EmptyMessageSnafu {
                stage: "send-message-validate",
            }
        );

        let send_id = SendId::new(self.next_send_id.fetch_add(1, Ordering::Relaxed));
        let submit = Submit::new(send_id, content, stream);
        let (active, history) = self.begin(&submit)?;
        let in_flight = InFlight {
            state: &self.state,
            send_id,
            active,
            finished: false,
        };

        tracing::debug!(
            send_id = send_id.0,
            endpoint = %self.transport.endpoint(),
            message_count = history.len(),
            stream,
            "send cycle started"
        );

        let request = ChatRequest::new(history, submit.stream);
        let outcome = match self.transport.send(request).await {
            Ok(ChatReply::Stream(mut fragments)) => {
                let mut count = 0;
                while let Some(fragment) = fragments.next().await {
                    in_flight.append(&fragment);
                    count += 1;
                }

                if count == 0 {
                    tracing::warn!(send_id = send_id.0, "event stream carried no content");
                    in_flight.replace(NO_CONTENT_FALLBACK);
                    SendOutcome::NoContent
                } else {
                    SendOutcome::Streamed { fragments: count }
                }
            }
            Ok(ChatReply::Complete(body)) => match extract_message_content(&body) {
                Some(reply) => {
                    in_flight.replace(reply);
                    SendOutcome::Completed
                }
                None => {
                    tracing::warn!(send_id = send_id.0, "response body carried no content");
                    in_flight.replace(NO_CONTENT_FALLBACK);
                    SendOutcome::NoContent
                }
            },
            Err(error) => {
                tracing::warn!(
                    send_id = send_id.0,
                    stage = error.stage(),
                    error = %error,
                    "send cycle failed"
                );
                in_flight.replace(ERROR_FALLBACK);
                SendOutcome::Failed {
                    error: error.to_string(),
                }
            }
        };

        in_flight.finish(&outcome);
        tracing::debug!(send_id = send_id.0, outcome = ?outcome, "send cycle finished");
        Ok(outcome)
    }

    /// Starts the cycle: flips the in-flight flag, appends the user message and
    /// the assistant placeholder. Returns the placeholder handle and the
    /// history to send (everything up to and including the user message).
    fn begin(&self, submit: &Submit) -> SessionResult<(ActiveMessage, Vec<WireMessage>)> {
        let mut started = None;
        self.state.send_if_modified(|conversation| {
            match conversation.apply_stream_transition(submit.start_transition()) {
                Ok(_) => {
                    conversation.push_user(submit.content.clone());
                    let history = conversation.to_wire();
                    let active = conversation.push_assistant_placeholder();
                    started = Some(Ok((active, history)));
                    true
                }
                Err(rejection) => {
                    started = Some(Err(rejection));
                    false
                }
            }
        });

        match started {
            Some(Ok(started)) => Ok(started),
            Some(Err(StreamTransitionRejection::AlreadyStreaming { active, attempted })) => {
                tracing::debug!(
                    active = active.0,
                    attempted = attempted.0,
                    "send rejected while another is in flight"
                );
                AlreadyInFlightSnafu {
                    stage: "send-message-start",
                    active,
                    attempted,
                }
                .fail()
            }
            Some(Err(rejection)) => StartRejectedSnafu {
                stage: "send-message-start",
                attempted: submit.send_id,
                rejection,
            }
            .fail(),
            None => StartRejectedSnafu {
                stage: "send-message-start",
                attempted: submit.send_id,
                rejection: StreamTransitionRejection::NoActiveStream,
            }
            .fail(),
        }
    }
}

/// Write access to the active message for the duration of one cycle.
///
/// Dropping it without [`InFlight::finish`] (the send future was abandoned)
/// moves the conversation to `Abandoned`, which clears the in-flight flag and
/// keeps whatever content already arrived.
struct InFlight<'a> {
    state: &'a watch::Sender<Conversation>,
    send_id: SendId,
    active: ActiveMessage,
    finished: bool,
}

impl InFlight<'_> {
    fn append(&self, delta: &str) {
        self.state.send_modify(|conversation| {
            conversation.append_delta(self.active, delta);
        });
    }

    fn replace(&self, content: &str) {
        self.state.send_modify(|conversation| {
            conversation.replace_content(self.active, content);
        });
    }

    fn finish(mut self, outcome: &SendOutcome) {
        self.finished = true;
        self.transition(outcome.terminal_transition(self.send_id));
    }

    fn transition(&self, transition: StreamTransition) {
        self.state.send_modify(|conversation| {
            if let Err(rejection) = conversation.apply_stream_transition(transition) {
                tracing::warn!(
                    send_id = self.send_id.0,
                    rejection = ?rejection,
                    "terminal stream transition rejected"
                );
            }
        });
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(send_id = self.send_id.0, "send cycle abandoned");
            self.transition(StreamTransition::Abandon(self.send_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chatlet_llm::{
        BoxFuture, TransportConfig, TransportError, TransportResult, create_transport,
    };
    use futures::stream;
    use serde_json::json;
    use tokio::sync::{Notify, mpsc};
    use url::Url;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::chat::message::{Role, StreamState};

    enum Scripted {
        Fragments(Vec<&'static str>),
        Body(serde_json::Value),
        Status(u16),
        /// Fragments released one by one by the test.
        Live(mpsc::UnboundedReceiver<String>),
    }

    struct ScriptedTransport {
        endpoint: Url,
        replies: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<ChatRequest>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Scripted>) -> Self {
            Self {
                endpoint: Url::parse("http://scripted.test/api/chat").expect("valid url"),
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
                gate: None,
            }
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    impl ChatTransport for ScriptedTransport {
        fn endpoint(&self) -> &Url {
            &self.endpoint
        }

        fn send<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, TransportResult<ChatReply>> {
            self.requests.lock().expect("requests lock").push(request);
            let reply = self.replies.lock().expect("replies lock").pop_front();
            Box::pin(async move {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                match reply {
                    Some(Scripted::Fragments(fragments)) => Ok(ChatReply::Stream(
                        stream::iter(fragments.into_iter().map(str::to_string)).boxed(),
                    )),
                    Some(Scripted::Live(fragments)) => Ok(ChatReply::Stream(
                        stream::unfold(fragments, |mut fragments| async move {
                            fragments.recv().await.map(|fragment| (fragment, fragments))
                        })
                        .boxed(),
                    )),
                    Some(Scripted::Body(body)) => Ok(ChatReply::Complete(body)),
                    Some(Scripted::Status(status)) => Err(status_error(status)),
                    None => Err(status_error(503)),
                }
            })
        }
    }

    fn status_error(status: u16) -> TransportError {
        TransportError::Status {
            stage: "scripted",
            status,
            body: String::new(),
        }
    }

    fn session_with(replies: Vec<Scripted>) -> (ChatSession, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(replies));
        (ChatSession::new(transport.clone(), true), transport)
    }

    fn contents(conversation: &Conversation) -> Vec<(Role, String)> {
        conversation
            .messages()
            .iter()
            .map(|message| (message.role, message.content.clone()))
            .collect()
    }

    #[tokio::test]
    async fn send_on_empty_conversation_adds_user_and_assistant() {
        let (session, _) = session_with(vec![Scripted::Fragments(vec!["Hel", "lo"])]);

        let outcome = session.send_message("hi").await.expect("send starts");

        assert_eq!(outcome, SendOutcome::Streamed { fragments: 2 });
        let conversation = session.conversation();
        assert_eq!(
            contents(&conversation),
            vec![
                (Role::User, "hi".to_string()),
                (Role::Assistant, "Hello".to_string()),
            ]
        );
        assert!(!conversation.is_streaming());
        assert!(matches!(conversation.stream_state(), StreamState::Done(_)));
    }

    #[tokio::test]
    async fn observers_see_each_fragment_while_streaming() {
        let (fragments, live) = mpsc::unbounded_channel();
        let (session, _) = session_with(vec![Scripted::Live(live)]);
        let session = Arc::new(session);
        let mut updates = session.subscribe();

        let sending = tokio::spawn({
            let session = session.clone();
            async move { session.send_message("hi").await }
        });

        fragments.send("Hel".to_string()).expect("stream open");
        {
            let seen = updates
                .wait_for(|conversation| {
                    conversation
                        .messages()
                        .get(1)
                        .is_some_and(|message| message.content == "Hel")
                })
                .await
                .expect("session alive");
            assert!(seen.is_streaming());
        }

        fragments.send("lo".to_string()).expect("stream open");
        {
            let seen = updates
                .wait_for(|conversation| {
                    conversation
                        .messages()
                        .get(1)
                        .is_some_and(|message| message.content == "Hello")
                })
                .await
                .expect("session alive");
            assert_eq!(seen.len(), 2);
        }

        drop(fragments);
        let outcome = sending.await.expect("send task").expect("send starts");
        assert_eq!(outcome, SendOutcome::Streamed { fragments: 2 });
        assert!(!session.is_streaming());
    }

    #[tokio::test]
    async fn request_carries_prior_history_and_trimmed_content() {
        let (session, transport) = session_with(vec![
            Scripted::Body(json!({ "content": "first reply" })),
            Scripted::Body(json!({ "content": "second reply" })),
        ]);

        session.send_message_with("  one  ", false).await.expect("first send");
        session.send_message_with("two", true).await.expect("second send");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages, vec![WireMessage::new(Role::User, "one")]);
        assert!(!requests[0].stream);
        assert_eq!(
            requests[1].messages,
            vec![
                WireMessage::new(Role::User, "one"),
                WireMessage::new(Role::Assistant, "first reply"),
                WireMessage::new(Role::User, "two"),
            ]
        );
        assert!(requests[1].stream);
        assert!(!requests[1].include_sources);
    }

    #[tokio::test]
    async fn empty_message_is_rejected_without_touching_state() {
        let (session, transport) = session_with(vec![]);

        let error = session.send_message("   ").await.expect_err("blank input");

        assert!(matches!(error, SessionError::EmptyMessage { .. }));
        assert!(session.conversation().is_empty());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn body_without_content_uses_no_content_fallback() {
        let (session, _) = session_with(vec![Scripted::Body(json!({ "unexpected": true }))]);

        let outcome = session.send_message("hi").await.expect("send starts");

        assert_eq!(outcome, SendOutcome::NoContent);
        assert_eq!(session.conversation().messages()[1].content, NO_CONTENT_FALLBACK);
    }

    #[tokio::test]
    async fn empty_stream_uses_no_content_fallback() {
        let (session, _) = session_with(vec![Scripted::Fragments(vec![])]);

        let outcome = session.send_message("hi").await.expect("send starts");

        assert_eq!(outcome, SendOutcome::NoContent);
        assert_eq!(session.conversation().messages()[1].content, NO_CONTENT_FALLBACK);
    }

    #[tokio::test]
    async fn transport_failure_uses_error_fallback_and_clears_flag() {
        let (session, _) = session_with(vec![Scripted::Status(502)]);

        let outcome = session.send_message("hi").await.expect("send starts");

        assert!(outcome.is_failure());
        let conversation = session.conversation();
        assert_eq!(conversation.messages()[1].content, ERROR_FALLBACK);
        assert!(!conversation.is_streaming());
        assert!(matches!(conversation.stream_state(), StreamState::Failed { .. }));
    }

    #[tokio::test]
    async fn second_send_is_rejected_while_first_is_in_flight() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(
            ScriptedTransport::new(vec![Scripted::Body(json!({ "content": "done" }))])
                .gated(gate.clone()),
        );
        let session = Arc::new(ChatSession::new(transport.clone(), false));
        let mut updates = session.subscribe();

        let first = tokio::spawn({
            let session = session.clone();
            async move { session.send_message("first").await }
        });
        updates
            .wait_for(Conversation::is_streaming)
            .await
            .expect("session alive");

        let error = session.send_message("second").await.expect_err("in flight");
        assert!(matches!(error, SessionError::AlreadyInFlight { .. }));
        assert_eq!(session.conversation().len(), 2);

        gate.notify_one();
        let outcome = first.await.expect("task joins").expect("first send");
        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(session.conversation().len(), 2);
        assert_eq!(transport.requests().len(), 1);

        // The next cycle starts fresh once the flag is clear.
        gate.notify_one();
        let outcome = session.send_message("third").await.expect("third send");
        assert!(outcome.is_failure());
        assert_eq!(session.conversation().len(), 4);
    }

    #[tokio::test]
    async fn abandoned_cycle_keeps_partial_state_and_clears_flag() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(
            ScriptedTransport::new(vec![Scripted::Fragments(vec!["never"])]).gated(gate),
        );
        let session = Arc::new(ChatSession::new(transport, true));
        let mut updates = session.subscribe();

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.send_message("hi").await }
        });
        updates
            .wait_for(Conversation::is_streaming)
            .await
            .expect("session alive");

        pending.abort();
        updates
            .wait_for(|conversation| !conversation.is_streaming())
            .await
            .expect("session alive");

        let conversation = session.conversation();
        assert_eq!(conversation.len(), 2);
        assert!(matches!(conversation.stream_state(), StreamState::Abandoned(_)));
        assert_eq!(conversation.messages()[1].content, "");
    }

    async fn http_session(server: &MockServer) -> ChatSession {
        let endpoint = Url::parse(&format!("{}/api/chat", server.uri())).expect("valid url");
        let transport = create_transport(TransportConfig::new(endpoint)).expect("transport");
        ChatSession::new(transport, true)
    }

    #[tokio::test]
    async fn event_stream_frames_assemble_into_one_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "data: {\"content\":\"Hel\"}\n\ndata: {\"content\":\"lo\"}\n\ndata: [DONE]\n\n",
                "text/event-stream",
            ))
            .mount(&server)
            .await;
        let session = http_session(&server).await;

        session.send_message("hi").await.expect("send starts");

        assert_eq!(session.conversation().messages()[1].content, "Hello");
    }

    #[tokio::test]
    async fn complete_json_body_replaces_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": "Hi there" })))
            .mount(&server)
            .await;
        let session = http_session(&server).await;

        let outcome = session.send_message_with("hi", false).await.expect("send starts");

        assert_eq!(outcome, SendOutcome::Completed);
        assert_eq!(session.conversation().messages()[1].content, "Hi there");
    }

    #[tokio::test]
    async fn server_error_status_shows_error_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let session = http_session(&server).await;

        session.send_message("hi").await.expect("send starts");

        let conversation = session.conversation();
        assert_eq!(conversation.messages()[1].content, ERROR_FALLBACK);
        assert!(!session.is_streaming());
    }
}
