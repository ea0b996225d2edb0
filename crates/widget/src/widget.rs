use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use chatlet_llm::create_transport;
use snafu::ResultExt;
use tokio::sync::watch;

use crate::chat::{ChatSession, Conversation, SendOutcome};
use crate::config::state::BuildTransportSnafu;
use crate::config::{ConfigResult, ConfigStore, Theme, WidgetConfig, WidgetConfigPatch};

static WIDGET: OnceLock<WidgetHandle> = OnceLock::new();

/// The process-wide widget handle.
pub fn global() -> &'static WidgetHandle {
    WIDGET.get_or_init(WidgetHandle::new)
}

/// Presentation state the UI renders from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UiState {
    pub open: bool,
    pub expanded: bool,
    pub theme: Theme,
}

/// One mounted widget: live config plus the session it drives.
struct Mount {
    config: ConfigStore,
    session: Arc<ChatSession>,
}

struct WidgetInner {
    mount: ArcSwapOption<Mount>,
    ui: watch::Sender<UiState>,
}

/// Control surface of a widget instance. Clones share the same widget.
#[derive(Clone)]
pub struct WidgetHandle {
    inner: Arc<WidgetInner>,
}

impl Default for WidgetHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl WidgetHandle {
    pub fn new() -> Self {
        let (ui, _) = watch::channel(UiState::default());
        Self {
            inner: Arc::new(WidgetInner {
                mount: ArcSwapOption::empty(),
                ui,
            }),
        }
    }

    /// Mounts a fresh widget from `patch` merged over the defaults.
    ///
    /// Any previous mount is replaced along with its conversation.
    pub fn init(&self, patch: &WidgetConfigPatch) -> ConfigResult<()> {
        let config = WidgetConfig::from_patch(patch)?;
        self.mount(config)
    }

    /// Merges `patch` over the current config and remounts with the result.
    pub fn update_config(&self, patch: &WidgetConfigPatch) -> ConfigResult<()> {
        let base = self
            .config()
            .map(|config| WidgetConfig::clone(&config))
            .unwrap_or_default();
        let config = base.merged(patch)?;
        self.mount(config)
    }

    fn mount(&self, config: WidgetConfig) -> ConfigResult<()> {
        let transport = create_transport(config.to_transport_config()?).context(
            BuildTransportSnafu {
                stage: "mount-widget",
            },
        )?;
        let session = Arc::new(ChatSession::new(transport, config.streaming_enabled));
        let theme = config.theme;
        let endpoint = config.api_endpoint.clone();

        let previous = self.inner.mount.swap(Some(Arc::new(Mount {
            config: ConfigStore::new(config),
            session,
        })));
        self.inner.ui.send_replace(UiState {
            open: false,
            expanded: false,
            theme,
        });

        tracing::info!(
            endpoint = %endpoint,
            theme = theme.name(),
            remounted = previous.is_some(),
            "widget mounted"
        );
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mount.load().is_some()
    }

    pub fn config(&self) -> Option<Arc<WidgetConfig>> {
        self.inner
            .mount
            .load_full()
            .map(|mount| mount.config.config())
    }

    pub fn open(&self) {
        self.update_ui("open", |ui| {
            let changed = !ui.open;
            ui.open = true;
            changed
        });
    }

    pub fn close(&self) {
        self.update_ui("close", |ui| {
            let changed = ui.open;
            ui.open = false;
            changed
        });
    }

    pub fn toggle_expanded(&self) {
        self.update_ui("toggle-expanded", |ui| {
            ui.expanded = !ui.expanded;
            true
        });
    }

    /// Switches theme on the live config without remounting.
    pub fn set_theme(&self, theme: Theme) {
        let Some(mount) = self.inner.mount.load_full() else {
            tracing::debug!(op = "set-theme", "widget not mounted, ignoring");
            return;
        };
        mount.config.set_theme(theme);
        self.inner.ui.send_if_modified(|ui| {
            let changed = ui.theme != theme;
            ui.theme = theme;
            changed
        });
    }

    /// Advances default -> dark -> ocean -> sunset -> default.
    pub fn cycle_theme(&self) {
        if let Some(config) = self.config() {
            self.set_theme(config.theme.next());
        }
    }

    pub fn ui_state(&self) -> UiState {
        *self.inner.ui.borrow()
    }

    /// UI state survives remounts, so one receiver is enough.
    pub fn subscribe_ui(&self) -> watch::Receiver<UiState> {
        self.inner.ui.subscribe()
    }

    pub fn conversation(&self) -> Option<Conversation> {
        self.session().map(|session| session.conversation())
    }

    /// Receiver for the current mount's conversation. A remount starts a new
    /// conversation, so observers should resubscribe after `init`.
    pub fn subscribe_conversation(&self) -> Option<watch::Receiver<Conversation>> {
        self.session().map(|session| session.subscribe())
    }

    /// The greeting shown while the conversation is still empty.
    pub fn welcome_message(&self) -> Option<String> {
        let mount = self.inner.mount.load_full()?;
        let welcome = mount.config.config().welcome_message.clone();
        (mount.session.conversation().is_empty() && !welcome.is_empty()).then_some(welcome)
    }

    pub fn is_streaming(&self) -> bool {
        self.session().is_some_and(|session| session.is_streaming())
    }

    /// Sends `text` through the mounted session.
    ///
    /// Nothing is surfaced to the caller as an error: an unmounted widget, an
    /// empty message or a send rejected while another is in flight are logged
    /// and yield `None`.
    pub async fn send_message(&self, text: &str) -> Option<SendOutcome> {
        let Some(session) = self.session() else {
            tracing::warn!(op = "send-message", "widget not mounted, ignoring");
            return None;
        };

        match session.send_message(text).await {
            Ok(outcome) => {
                if let SendOutcome::Failed { error } = &outcome {
                    tracing::warn!(error = %error, "send_message ended with error fallback");
                }
                Some(outcome)
            }
            Err(error) => {
                tracing::warn!(error = %error, "send_message ignored");
                None
            }
        }
    }

    fn session(&self) -> Option<Arc<ChatSession>> {
        self.inner
            .mount
            .load_full()
            .map(|mount| mount.session.clone())
    }

    fn update_ui(&self, op: &'static str, modify: impl FnOnce(&mut UiState) -> bool) {
        if !self.is_mounted() {
            tracing::debug!(op, "widget not mounted, ignoring");
            return;
        }
        self.inner.ui.send_if_modified(modify);
    }
}
