use serde::Deserialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::WidgetConfigPatch;
use crate::widget::WidgetHandle;

pub const OPEN_EVENT: &str = "chatbot:open";
pub const CLOSE_EVENT: &str = "chatbot:close";
pub const SEND_MESSAGE_EVENT: &str = "chatbot:sendMessage";
pub const UPDATE_CONFIG_EVENT: &str = "chatbot:updateConfig";

pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BridgeError {
    #[snafu(display("unknown widget event '{name}'"))]
    UnknownEvent { stage: &'static str, name: String },
    #[snafu(display("event '{name}' carries no message"))]
    MissingMessage { stage: &'static str, name: String },
    #[snafu(display("event '{name}' has an invalid detail on `{stage}`: {source}"))]
    InvalidDetail {
        stage: &'static str,
        name: String,
        source: serde_json::Error,
    },
}

/// A host request to the widget, as raised at the page boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WidgetCommand {
    Open,
    Close,
    SendMessage { message: String },
    UpdateConfig(WidgetConfigPatch),
}

#[derive(Deserialize)]
struct SendMessageDetail {
    #[serde(default)]
    message: Option<String>,
}

impl WidgetCommand {
    /// Maps a page event name and its detail payload to a command.
    pub fn from_event(name: &str, detail: Option<&Value>) -> BridgeResult<Self> {
        match name {
            OPEN_EVENT => Ok(Self::Open),
            CLOSE_EVENT => Ok(Self::Close),
            SEND_MESSAGE_EVENT => {
                let detail = detail.cloned().unwrap_or(Value::Null);
                let message = if detail.is_null() {
                    None
                } else {
                    serde_json::from_value::<SendMessageDetail>(detail)
                        .context(InvalidDetailSnafu {
                            stage: "decode-send-message-detail",
                            name,
                        })?
                        .message
                };
                let message = message
                    .filter(|message| !message.is_empty())
                    .context(MissingMessageSnafu {
                        stage: "decode-send-message-detail",
                        name,
                    })?;
                Ok(Self::SendMessage { message })
            }
            UPDATE_CONFIG_EVENT => {
                let patch = match detail {
                    Some(detail) if !detail.is_null() => {
                        serde_json::from_value(detail.clone()).context(InvalidDetailSnafu {
                            stage: "decode-update-config-detail",
                            name,
                        })?
                    }
                    _ => WidgetConfigPatch::default(),
                };
                Ok(Self::UpdateConfig(patch))
            }
            _ => UnknownEventSnafu {
                stage: "map-widget-event",
                name,
            }
            .fail(),
        }
    }
}

/// Sending half of the event bridge. Dispatch never waits for the widget.
#[derive(Debug, Clone)]
pub struct CommandBridge {
    sender: mpsc::UnboundedSender<WidgetCommand>,
}

impl CommandBridge {
    /// Queues `command`; returns false once the bridge task has stopped.
    pub fn dispatch(&self, command: WidgetCommand) -> bool {
        match self.sender.send(command) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(command = ?error.0, "event bridge stopped, dropping command");
                false
            }
        }
    }

    /// Maps and queues a raw page event. Unmappable events are logged and dropped.
    pub fn dispatch_event(&self, name: &str, detail: Option<&Value>) -> bool {
        match WidgetCommand::from_event(name, detail) {
            Ok(command) => self.dispatch(command),
            Err(error) => {
                tracing::warn!(event = name, error = %error, "ignoring widget event");
                false
            }
        }
    }
}

/// Spawns the task that applies bridged commands to `widget`.
///
/// The task ends once every [`CommandBridge`] clone is dropped. Sends run on
/// their own task so open/close are never queued behind a reply.
pub fn spawn_event_bridge(widget: WidgetHandle) -> (CommandBridge, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        while let Some(command) = receiver.recv().await {
            tracing::debug!(command = ?command, "bridged widget command");
            match command {
                WidgetCommand::Open => widget.open(),
                WidgetCommand::Close => widget.close(),
                WidgetCommand::UpdateConfig(patch) => {
                    if let Err(error) = widget.update_config(&patch) {
                        tracing::warn!(error = %error, "rejected bridged config update");
                    }
                }
                WidgetCommand::SendMessage { message } => {
                    let widget = widget.clone();
                    tokio::spawn(async move {
                        widget.send_message(&message).await;
                    });
                }
            }
        }
        tracing::debug!("event bridge closed");
    });

    (CommandBridge { sender }, task)
}
