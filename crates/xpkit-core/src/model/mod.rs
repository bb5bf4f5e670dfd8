// ── Domain entities ──
//
// Datarefs and commands are registry-owned and shared as `Arc`s; all
// mutable per-entity state (cached value, monitor state, resolved wire
// id) lives behind the entity's own lock so consumers can read cached
// values without touching client internals.

mod command;
mod dataref;
mod value;

pub use command::Command;
pub use dataref::Dataref;
pub use value::DatarefValue;

pub(crate) use dataref::DatarefWire;
pub(crate) use value::{parse_array_element, parse_value, value_to_wire};

/// Subscription state of an entity, driven by the monitoring set manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MonitorState {
    /// Not monitored, nothing on the wire.
    #[default]
    Off,
    /// Desired on, but no subscribe frame sent yet (not connected).
    Queued,
    /// Subscribe frame sent, acknowledgment outstanding.
    PendingOn,
    /// Subscription acknowledged by the simulator.
    On,
    /// Unsubscribe frame sent, acknowledgment outstanding.
    PendingOff,
}

impl MonitorState {
    /// Whether a subscribe frame for this entity is on the wire or
    /// acknowledged. Updates may legitimately arrive in any of these
    /// states, ack ordering is not guaranteed by the protocol.
    pub fn is_active(self) -> bool {
        matches!(self, Self::PendingOn | Self::On)
    }
}

/// Common monitoring surface over datarefs and commands, used by the
/// monitoring set manager's delta planning.
pub(crate) trait Monitored {
    fn ident(&self) -> &str;
    fn monitor_state(&self) -> MonitorState;
    fn set_monitor_state(&self, state: MonitorState);
}
