// A dataref as seen by the consumer: a stable path, a cached last value,
// and monitoring state. Array elements are addressed with a bracket
// suffix (`sim/some/values[4]`) and are distinct entities from the whole
// array.

use std::sync::RwLock;

use xpkit_api::DatarefType;

use super::value::DatarefValue;
use super::{Monitored, MonitorState};

/// Wire identity resolved from the metadata cache at subscribe time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DatarefWire {
    pub id: i64,
    pub value_type: DatarefType,
    pub is_writable: bool,
}

#[derive(Default)]
struct DatarefState {
    value: Option<DatarefValue>,
    monitor: MonitorState,
    wire: Option<DatarefWire>,
}

/// A simulator-exposed state variable.
///
/// Owned by the entity registry; at most one instance exists per path
/// per client session. Consumers hold `Arc` references.
pub struct Dataref {
    name: String,
    path: String,
    index: Option<usize>,
    state: RwLock<DatarefState>,
}

impl Dataref {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let (path, index) = split_indexed_path(&name);
        Self {
            path,
            index,
            name,
            state: RwLock::new(DatarefState::default()),
        }
    }

    /// Full identifier, including any `[index]` suffix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base path without the array index.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Array element index, if this entity addresses a single element.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Last value received from the simulator, if any.
    pub fn value(&self) -> Option<DatarefValue> {
        self.state.read().expect("dataref lock poisoned").value.clone()
    }

    /// Whether a subscription for this dataref is on the wire.
    pub fn is_monitored(&self) -> bool {
        self.monitor_state().is_active()
    }

    pub(crate) fn set_value(&self, value: DatarefValue) {
        self.state.write().expect("dataref lock poisoned").value = Some(value);
    }

    pub(crate) fn wire(&self) -> Option<DatarefWire> {
        self.state.read().expect("dataref lock poisoned").wire
    }

    pub(crate) fn set_wire(&self, wire: DatarefWire) {
        self.state.write().expect("dataref lock poisoned").wire = Some(wire);
    }
}

impl Monitored for Dataref {
    fn ident(&self) -> &str {
        &self.name
    }

    fn monitor_state(&self) -> MonitorState {
        self.state.read().expect("dataref lock poisoned").monitor
    }

    fn set_monitor_state(&self, state: MonitorState) {
        self.state.write().expect("dataref lock poisoned").monitor = state;
    }
}

impl std::fmt::Display for Dataref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.value() {
            Some(value) => write!(f, "{}={value}", self.name),
            None => write!(f, "{}=<no value>", self.name),
        }
    }
}

impl std::fmt::Debug for Dataref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataref")
            .field("name", &self.name)
            .field("monitor", &self.monitor_state())
            .finish_non_exhaustive()
    }
}

/// Split `sim/some/values[4]` into `("sim/some/values", Some(4))`.
/// Paths without a well-formed bracket suffix pass through unchanged.
fn split_indexed_path(name: &str) -> (String, Option<usize>) {
    if let (Some(open), Some(close)) = (name.find('['), name.rfind(']')) {
        if close == name.len() - 1 && open < close {
            if let Ok(index) = name[open + 1..close].parse::<usize>() {
                return (name[..open].to_string(), Some(index));
            }
        }
    }
    (name.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path() {
        let d = Dataref::new("sim/cockpit/altitude");
        assert_eq!(d.name(), "sim/cockpit/altitude");
        assert_eq!(d.path(), "sim/cockpit/altitude");
        assert_eq!(d.index(), None);
    }

    #[test]
    fn indexed_path() {
        let d = Dataref::new("sim/some/values[4]");
        assert_eq!(d.name(), "sim/some/values[4]");
        assert_eq!(d.path(), "sim/some/values");
        assert_eq!(d.index(), Some(4));
    }

    #[test]
    fn malformed_index_passes_through() {
        let d = Dataref::new("sim/some/values[x]");
        assert_eq!(d.path(), "sim/some/values[x]");
        assert_eq!(d.index(), None);
    }

    #[test]
    fn value_cache_starts_empty() {
        let d = Dataref::new("sim/cockpit/altitude");
        assert!(d.value().is_none());
        assert!(!d.is_monitored());

        d.set_value(DatarefValue::Float(1500.0));
        assert_eq!(d.value(), Some(DatarefValue::Float(1500.0)));
    }

    #[test]
    fn display_includes_value() {
        let d = Dataref::new("sim/some/values[4]");
        d.set_value(DatarefValue::Float(0.5));
        assert_eq!(d.to_string(), "sim/some/values[4]=0.5");
    }
}
