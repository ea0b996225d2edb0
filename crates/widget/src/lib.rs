#![deny(unsafe_code)]

//! Engine of an embeddable chat widget.
//!
//! A host mounts the widget through [`WidgetHandle::init`] (or the process-wide
//! [`global`] handle), then drives it with `open`, `close`, `send_message` and
//! `update_config`. Replies stream in through the `chatlet-llm` transport and
//! are observed via watch channels.

/// Page-boundary adapter mapping host events to widget commands.
pub mod bridge;
/// Chat domain: messages, stream lifecycle and the send cycle.
pub mod chat;
/// Widget configuration and its override sources.
pub mod config;
pub mod widget;

pub use bridge::{BridgeError, CommandBridge, WidgetCommand, spawn_event_bridge};
pub use config::{ConfigError, ConfigSources, Theme, WidgetConfig, WidgetConfigPatch};
pub use widget::{UiState, WidgetHandle, global};
