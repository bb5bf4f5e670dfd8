// ── Callback dispatch ──
//
// Consumer-registered callbacks, ordered per event kind. Registration
// order is preserved, duplicates are permitted (and both fire), and a
// panicking callback is contained so it can neither starve later
// callbacks nor kill the message loop.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use tracing::error;

use crate::model::DatarefValue;

/// Event categories a callback can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// WebSocket opened.
    Open,
    /// WebSocket closed (any reason).
    Close,
    /// A monitored dataref changed value.
    DatarefUpdate,
    /// A monitored command changed active state.
    CommandActive,
    /// Client finished starting (subscriptions primed).
    AfterStart,
    /// Client is about to stop.
    BeforeStop,
}

/// Payload delivered to callbacks.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Open,
    Close,
    DatarefUpdate { name: String, value: DatarefValue },
    CommandActive { path: String, active: bool },
    AfterStart { connected: bool },
    BeforeStop { connected: bool },
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Close => EventKind::Close,
            Self::DatarefUpdate { .. } => EventKind::DatarefUpdate,
            Self::CommandActive { .. } => EventKind::CommandActive,
            Self::AfterStart { .. } => EventKind::AfterStart,
            Self::BeforeStop { .. } => EventKind::BeforeStop,
        }
    }
}

type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Ordered callback lists per event kind.
#[derive(Default)]
pub(crate) struct CallbackDispatcher {
    lists: Mutex<HashMap<EventKind, Vec<Callback>>>,
}

impl CallbackDispatcher {
    /// Append a callback for `kind`. The same function may be registered
    /// more than once; every registration is invoked.
    pub fn add(&self, kind: EventKind, callback: impl Fn(&ClientEvent) + Send + Sync + 'static) {
        self.lists
            .lock()
            .expect("callback lock poisoned")
            .entry(kind)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Invoke every callback registered for the event's kind, in
    /// registration order. Panics are contained per callback and logged.
    pub fn dispatch(&self, event: &ClientEvent) {
        // Clone the handles out so a callback can register callbacks
        // without deadlocking against this dispatch.
        let callbacks: Vec<Callback> = self
            .lists
            .lock()
            .expect("callback lock poisoned")
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!(kind = %event.kind(), "callback panicked");
            }
        }
    }
}
