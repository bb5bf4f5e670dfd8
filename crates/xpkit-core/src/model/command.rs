// A simulator command with a transient "active" state that can be
// monitored through the WebSocket.

use std::sync::RwLock;

use super::{Monitored, MonitorState};

#[derive(Default)]
struct CommandState {
    active: Option<bool>,
    monitor: MonitorState,
    wire_id: Option<i64>,
}

/// A named, triggerable simulator action.
///
/// Owned by the entity registry; at most one instance exists per path
/// per client session.
pub struct Command {
    path: String,
    state: RwLock<CommandState>,
}

impl Command {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(CommandState::default()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last reported active state, `None` until first observation.
    pub fn is_active(&self) -> Option<bool> {
        self.state.read().expect("command lock poisoned").active
    }

    /// Whether an active-state subscription is on the wire.
    pub fn is_monitored(&self) -> bool {
        self.monitor_state().is_active()
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.state.write().expect("command lock poisoned").active = Some(active);
    }

    pub(crate) fn wire_id(&self) -> Option<i64> {
        self.state.read().expect("command lock poisoned").wire_id
    }

    pub(crate) fn set_wire_id(&self, id: i64) {
        self.state.write().expect("command lock poisoned").wire_id = Some(id);
    }
}

impl Monitored for Command {
    fn ident(&self) -> &str {
        &self.path
    }

    fn monitor_state(&self) -> MonitorState {
        self.state.read().expect("command lock poisoned").monitor
    }

    fn set_monitor_state(&self, state: MonitorState) {
        self.state.write().expect("command lock poisoned").monitor = state;
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}
