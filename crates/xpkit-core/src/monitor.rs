// ── Monitoring set management ──
//
// Desired subscription state is kept on the entities themselves (see
// `MonitorState`); this module computes the wire delta for monitor and
// unmonitor calls and applies subscription acknowledgments. Only
// entities whose desired state differs from what is already on the wire
// produce frames.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::model::{Command, Dataref, MonitorState, Monitored};

/// Entities covered by one in-flight subscribe/unsubscribe request.
pub(crate) struct MonitorAck {
    /// true = subscribe, false = unsubscribe.
    pub on: bool,
    pub datarefs: Vec<Arc<Dataref>>,
    pub commands: Vec<Arc<Command>>,
}

/// Outstanding subscription acknowledgments, keyed by request id.
#[derive(Default)]
pub(crate) struct AckBook {
    acks: HashMap<u64, MonitorAck>,
}

impl AckBook {
    pub fn register(&mut self, req_id: u64, ack: MonitorAck) {
        self.acks.insert(req_id, ack);
    }

    pub fn take(&mut self, req_id: u64) -> Option<MonitorAck> {
        self.acks.remove(&req_id)
    }

    pub fn clear(&mut self) {
        self.acks.clear();
    }
}

/// Compute which of `entities` need a subscribe frame.
///
/// Entities already on the wire produce nothing (idempotence). While
/// disconnected, desired state is queued instead and flushed when the
/// connection is primed.
pub(crate) fn plan_monitor<E: Monitored>(entities: &[Arc<E>], connected: bool) -> Vec<Arc<E>> {
    let mut to_send = Vec::new();
    for entity in entities {
        match entity.monitor_state() {
            MonitorState::PendingOn | MonitorState::On => {
                debug!(ident = entity.ident(), "already monitored, nothing to send");
            }
            MonitorState::Off | MonitorState::Queued | MonitorState::PendingOff => {
                if connected {
                    to_send.push(entity.clone());
                } else {
                    entity.set_monitor_state(MonitorState::Queued);
                }
            }
        }
    }
    to_send
}

/// Compute which of `entities` need an unsubscribe frame.
///
/// Queued entities were never sent, so their desired state is simply
/// cleared without wire traffic.
pub(crate) fn plan_unmonitor<E: Monitored>(entities: &[Arc<E>]) -> Vec<Arc<E>> {
    let mut to_send = Vec::new();
    for entity in entities {
        match entity.monitor_state() {
            MonitorState::Queued => {
                debug!(ident = entity.ident(), "never subscribed, clearing desired state");
                entity.set_monitor_state(MonitorState::Off);
            }
            MonitorState::PendingOn | MonitorState::On => to_send.push(entity.clone()),
            MonitorState::Off | MonitorState::PendingOff => {
                debug!(ident = entity.ident(), "not monitored, nothing to remove");
            }
        }
    }
    to_send
}

/// Apply a subscription acknowledgment to every entity it covered.
///
/// Transitions are guarded: an entity whose state changed again while
/// the ack was in flight (e.g. re-subscribed during an unsubscribe) is
/// left alone.
pub(crate) fn apply_ack(ack: &MonitorAck, success: bool) {
    for entity in &ack.datarefs {
        transition(entity.as_ref(), ack.on, success);
    }
    for entity in &ack.commands {
        transition(entity.as_ref(), ack.on, success);
    }
}

fn transition<E: Monitored + ?Sized>(entity: &E, on: bool, success: bool) {
    let state = entity.monitor_state();
    match (on, success, state) {
        (true, true, MonitorState::PendingOn) => entity.set_monitor_state(MonitorState::On),
        (true, false, MonitorState::PendingOn) => {
            warn!(ident = entity.ident(), "subscribe rejected, dropping monitor");
            entity.set_monitor_state(MonitorState::Off);
        }
        (false, true, MonitorState::PendingOff) => entity.set_monitor_state(MonitorState::Off),
        (false, false, MonitorState::PendingOff) => {
            warn!(ident = entity.ident(), "unsubscribe rejected, still monitored");
            entity.set_monitor_state(MonitorState::On);
        }
        _ => debug!(
            ident = entity.ident(),
            state = %state,
            "ack arrived after state changed, leaving as is"
        ),
    }
}
