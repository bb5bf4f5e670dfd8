// ── Dataref / command metadata ──
//
// The simulator assigns numeric wire identifiers to datarefs and
// commands; all subscription and value traffic is keyed by those ids.
// Ids are NOT stable across simulator restarts or aircraft reloads, so
// the cache must be reloaded for every new connection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Value type of a dataref, as reported by the metadata endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DatarefType {
    Int,
    Float,
    Double,
    IntArray,
    FloatArray,
    /// Opaque byte payload, base64-encoded on the wire.
    Data,
}

impl DatarefType {
    /// Whether values of this type are arrays.
    pub fn is_array(self) -> bool {
        matches!(self, Self::IntArray | Self::FloatArray)
    }
}

/// Metadata for a single dataref.
#[derive(Debug, Clone, Deserialize)]
pub struct DatarefMeta {
    pub id: i64,
    pub name: String,
    pub value_type: DatarefType,
    #[serde(default)]
    pub is_writable: bool,
}

/// Metadata for a single command.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandMeta {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

// ── MetaCache ────────────────────────────────────────────────────────

/// Name- and id-indexed store for one kind of metadata.
///
/// A plain double-indexed map: lookups are on the subscribe path, which
/// runs at human rates, not frame rates.
#[derive(Debug)]
pub struct MetaIndex<M> {
    by_name: HashMap<String, usize>,
    by_id: HashMap<i64, usize>,
    entries: Vec<M>,
}

// Not derived: the derive would demand `M: Default` for no reason.
impl<M> Default for MetaIndex<M> {
    fn default() -> Self {
        Self {
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<M> MetaIndex<M> {
    pub fn build(entries: Vec<M>, name: impl Fn(&M) -> &str, id: impl Fn(&M) -> i64) -> Self {
        let mut by_name = HashMap::with_capacity(entries.len());
        let mut by_id = HashMap::with_capacity(entries.len());
        for (i, m) in entries.iter().enumerate() {
            by_name.insert(name(m).to_string(), i);
            by_id.insert(id(m), i);
        }
        Self {
            by_name,
            by_id,
            entries,
        }
    }

    pub fn get_by_name(&self, name: &str) -> Option<&M> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn get_by_id(&self, id: i64) -> Option<&M> {
        self.by_id.get(&id).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Combined dataref + command metadata cache for one connection.
#[derive(Debug, Default)]
pub struct MetaCache {
    pub datarefs: MetaIndex<DatarefMeta>,
    pub commands: MetaIndex<CommandMeta>,
}

impl MetaCache {
    pub fn new(datarefs: Vec<DatarefMeta>, commands: Vec<CommandMeta>) -> Self {
        Self {
            datarefs: MetaIndex::build(datarefs, |m| &m.name, |m| m.id),
            commands: MetaIndex::build(commands, |m| &m.name, |m| m.id),
        }
    }

    /// Identifier/name equivalence for log lines, e.g. `1234(sim/some/path)`.
    pub fn dataref_equiv(&self, id: i64) -> String {
        match self.datarefs.get_by_id(id) {
            Some(m) => format!("{id}({})", m.name),
            None => format!("{id}(unknown)"),
        }
    }
}
