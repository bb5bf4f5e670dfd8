// ── Entity registry ──
//
// Single source of truth for entity instances: at most one `Dataref` or
// `Command` per identifier per client session, created lazily on first
// reference. Inbound updates are keyed by wire id, so the registry also
// maintains id routes, built when subscribe frames are sent and torn
// down on unsubscribe/disconnect.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::model::{Command, Dataref};

/// Where updates for one wire id should be delivered.
pub(crate) enum DatarefRoute {
    /// Scalar or whole-array subscription.
    Single(Arc<Dataref>),
    /// Element subscriptions, ordered by index. Value arrays arrive in
    /// index order with no gaps, so position i maps to element i here.
    Elements(Vec<Arc<Dataref>>),
}

#[derive(Default)]
pub(crate) struct EntityRegistry {
    datarefs: HashMap<String, Arc<Dataref>>,
    commands: HashMap<String, Arc<Command>>,
    dataref_routes: HashMap<i64, DatarefRoute>,
    command_routes: HashMap<i64, Arc<Command>>,
}

impl EntityRegistry {
    /// Get or lazily create the dataref for `name`.
    pub fn dataref(&mut self, name: &str) -> Arc<Dataref> {
        self.datarefs
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Dataref::new(name)))
            .clone()
    }

    /// Get or lazily create the command for `path`.
    pub fn command(&mut self, path: &str) -> Arc<Command> {
        self.commands
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(Command::new(path)))
            .clone()
    }

    pub fn datarefs(&self) -> impl Iterator<Item = &Arc<Dataref>> {
        self.datarefs.values()
    }

    pub fn commands(&self) -> impl Iterator<Item = &Arc<Command>> {
        self.commands.values()
    }

    // ── Dataref routes ───────────────────────────────────────────────

    pub fn add_dataref_route(&mut self, id: i64, entity: &Arc<Dataref>) {
        if entity.index().is_some() {
            let route = self
                .dataref_routes
                .entry(id)
                .or_insert_with(|| DatarefRoute::Elements(Vec::new()));
            match route {
                DatarefRoute::Elements(elements) => {
                    if !elements.iter().any(|e| e.name() == entity.name()) {
                        elements.push(entity.clone());
                        elements.sort_by_key(|e| e.index());
                    }
                }
                DatarefRoute::Single(_) => {
                    warn!(id, name = entity.name(), "replacing whole-array route with element route");
                    *route = DatarefRoute::Elements(vec![entity.clone()]);
                }
            }
        } else {
            self.dataref_routes.insert(id, DatarefRoute::Single(entity.clone()));
        }
    }

    pub fn remove_dataref_route(&mut self, id: i64, entity: &Arc<Dataref>) {
        let remove_entry = match self.dataref_routes.get_mut(&id) {
            Some(DatarefRoute::Single(_)) | None => true,
            Some(DatarefRoute::Elements(elements)) => {
                elements.retain(|e| e.name() != entity.name());
                elements.is_empty()
            }
        };
        if remove_entry {
            self.dataref_routes.remove(&id);
        }
    }

    pub fn route_dataref(&self, id: i64) -> Option<&DatarefRoute> {
        self.dataref_routes.get(&id)
    }

    // ── Command routes ───────────────────────────────────────────────

    pub fn add_command_route(&mut self, id: i64, entity: &Arc<Command>) {
        self.command_routes.insert(id, entity.clone());
    }

    pub fn remove_command_route(&mut self, id: i64) {
        self.command_routes.remove(&id);
    }

    pub fn route_command(&self, id: i64) -> Option<&Arc<Command>> {
        self.command_routes.get(&id)
    }

    /// Drop all id routes. Entities survive, routes do not -- wire ids
    /// are reassigned on every new connection.
    pub fn clear_routes(&mut self) {
        self.dataref_routes.clear();
        self.command_routes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_instance_per_identifier() {
        let mut registry = EntityRegistry::default();
        let a = registry.dataref("sim/cockpit/altitude");
        let b = registry.dataref("sim/cockpit/altitude");
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.dataref("sim/cockpit/heading");
        assert!(!Arc::ptr_eq(&a, &c));

        let cmd_a = registry.command("sim/operation/pause_toggle");
        let cmd_b = registry.command("sim/operation/pause_toggle");
        assert!(Arc::ptr_eq(&cmd_a, &cmd_b));
    }

    #[test]
    fn single_route_lookup() {
        let mut registry = EntityRegistry::default();
        let d = registry.dataref("sim/cockpit/altitude");
        registry.add_dataref_route(11, &d);

        match registry.route_dataref(11) {
            Some(DatarefRoute::Single(e)) => assert!(Arc::ptr_eq(e, &d)),
            _ => panic!("expected single route"),
        }

        registry.remove_dataref_route(11, &d);
        assert!(registry.route_dataref(11).is_none());
    }

    #[test]
    fn element_routes_stay_sorted_by_index() {
        let mut registry = EntityRegistry::default();
        let e5 = registry.dataref("sim/some/values[5]");
        let e1 = registry.dataref("sim/some/values[1]");
        registry.add_dataref_route(12, &e5);
        registry.add_dataref_route(12, &e1);
        // duplicate add is a no-op
        registry.add_dataref_route(12, &e1);

        match registry.route_dataref(12) {
            Some(DatarefRoute::Elements(elements)) => {
                let indices: Vec<_> = elements.iter().map(|e| e.index()).collect();
                assert_eq!(indices, vec![Some(1), Some(5)]);
            }
            _ => panic!("expected element route"),
        }

        registry.remove_dataref_route(12, &e1);
        match registry.route_dataref(12) {
            Some(DatarefRoute::Elements(elements)) => assert_eq!(elements.len(), 1),
            _ => panic!("expected element route"),
        }

        registry.remove_dataref_route(12, &e5);
        assert!(registry.route_dataref(12).is_none());
    }

    #[test]
    fn clear_routes_keeps_entities() {
        let mut registry = EntityRegistry::default();
        let d = registry.dataref("sim/cockpit/altitude");
        let c = registry.command("sim/operation/pause_toggle");
        registry.add_dataref_route(1, &d);
        registry.add_command_route(2, &c);

        registry.clear_routes();
        assert!(registry.route_dataref(1).is_none());
        assert!(registry.route_command(2).is_none());
        // same instance still owned by the registry
        assert!(Arc::ptr_eq(&registry.dataref("sim/cockpit/altitude"), &d));
    }
}
