//! ValueStore - per-unit output storage with DashMap
//!
//! Single map design with lock-free concurrent access. Each cell is the
//! result of one work unit `(node, state-coordinate)`; records are
//! immutable once written (single writer: the completing worker).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;

use crate::value::{format_unit, Bindings, Coord};

/// Identity of one work unit: a node plus its state-array coordinate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitId {
    pub node: Arc<str>,
    pub coord: Coord,
}

impl UnitId {
    pub fn scalar(node: Arc<str>) -> Self {
        Self {
            node,
            coord: Coord::new(),
        }
    }

    pub fn new(node: Arc<str>, coord: Coord) -> Self {
        Self { node, coord }
    }
}

impl fmt::Display for UnitId {
    /// `node` for scalars, `node[i,j]` for fan-out cells
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_unit(&self.node, &self.coord))
    }
}

/// Terminal state of a unit
#[derive(Debug, Clone, PartialEq)]
pub enum UnitStatus {
    /// Executed by a worker
    Done,
    /// Outputs taken from the cache
    Cached,
    /// Worker failure, timeout, or runtime type mismatch
    Failed(String),
    /// Not executed: an upstream dependency failed
    Unreachable(String),
    /// Not executed: the run was cancelled
    Cancelled,
}

/// Result record of one unit
#[derive(Debug, Clone)]
pub struct UnitRecord {
    /// Output bindings (Arc for O(1) cloning; empty on failure)
    pub outputs: Arc<Bindings>,
    pub duration: Duration,
    pub status: UnitStatus,
}

impl UnitRecord {
    pub fn done(outputs: Bindings, duration: Duration) -> Self {
        Self {
            outputs: Arc::new(outputs),
            duration,
            status: UnitStatus::Done,
        }
    }

    pub fn cached(outputs: Bindings) -> Self {
        Self {
            outputs: Arc::new(outputs),
            duration: Duration::ZERO,
            status: UnitStatus::Cached,
        }
    }

    pub fn failed(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            outputs: Arc::new(Bindings::new()),
            duration,
            status: UnitStatus::Failed(error.into()),
        }
    }

    pub fn unreachable(source: impl Into<String>) -> Self {
        Self {
            outputs: Arc::new(Bindings::new()),
            duration: Duration::ZERO,
            status: UnitStatus::Unreachable(source.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            outputs: Arc::new(Bindings::new()),
            duration: Duration::ZERO,
            status: UnitStatus::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, UnitStatus::Done | UnitStatus::Cached)
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            UnitStatus::Failed(e) | UnitStatus::Unreachable(e) => Some(e),
            _ => None,
        }
    }
}

/// Thread-safe storage for unit results (lock-free)
#[derive(Clone, Default)]
pub struct ValueStore {
    cells: Arc<DashMap<UnitId, UnitRecord>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a unit record (single writer per cell)
    pub fn insert(&self, unit: UnitId, record: UnitRecord) {
        self.cells.insert(unit, record);
    }

    pub fn get(&self, unit: &UnitId) -> Option<UnitRecord> {
        self.cells.get(unit).map(|r| r.value().clone())
    }

    pub fn contains(&self, unit: &UnitId) -> bool {
        self.cells.contains_key(unit)
    }

    pub fn is_success(&self, unit: &UnitId) -> bool {
        self.cells.get(unit).is_some_and(|r| r.is_success())
    }

    /// Output bindings of a successful unit (Arc clone, O(1))
    pub fn get_outputs(&self, unit: &UnitId) -> Option<Arc<Bindings>> {
        self.cells
            .get(unit)
            .filter(|r| r.is_success())
            .map(|r| Arc::clone(&r.outputs))
    }

    /// One output field of a successful unit
    pub fn get_field(&self, unit: &UnitId, field: &str) -> Option<Value> {
        self.get_outputs(unit)
            .and_then(|outputs| outputs.get(field).cloned())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use smallvec::smallvec;

    fn unit(node: &str, coord: &[usize]) -> UnitId {
        UnitId::new(Arc::from(node), Coord::from_slice(coord))
    }

    fn outputs(pairs: &[(&str, Value)]) -> Bindings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn display_formats_coordinates() {
        assert_eq!(unit("add", &[]).to_string(), "add");
        assert_eq!(unit("mul", &[2]).to_string(), "mul[2]");
        assert_eq!(unit("mul", &[0, 1]).to_string(), "mul[0,1]");
    }

    #[test]
    fn insert_and_get_record() {
        let store = ValueStore::new();
        store.insert(
            unit("add", &[]),
            UnitRecord::done(outputs(&[("out", json!(5))]), Duration::from_millis(3)),
        );

        let record = store.get(&unit("add", &[])).unwrap();
        assert!(record.is_success());
        assert_eq!(record.outputs["out"], json!(5));
        assert_eq!(store.get_field(&unit("add", &[]), "out"), Some(json!(5)));
    }

    #[test]
    fn failed_record_yields_no_outputs() {
        let store = ValueStore::new();
        store.insert(
            unit("add", &[0]),
            UnitRecord::failed("boom", Duration::ZERO),
        );

        assert!(store.contains(&unit("add", &[0])));
        assert!(!store.is_success(&unit("add", &[0])));
        assert!(store.get_outputs(&unit("add", &[0])).is_none());
        assert_eq!(store.get(&unit("add", &[0])).unwrap().error(), Some("boom"));
    }

    #[test]
    fn cells_are_coordinate_addressed() {
        let store = ValueStore::new();
        store.insert(
            unit("mul", &[0]),
            UnitRecord::done(outputs(&[("out", json!(10))]), Duration::ZERO),
        );
        store.insert(
            unit("mul", &[1]),
            UnitRecord::done(outputs(&[("out", json!(20))]), Duration::ZERO),
        );

        assert_eq!(store.get_field(&unit("mul", &[0]), "out"), Some(json!(10)));
        assert_eq!(store.get_field(&unit("mul", &[1]), "out"), Some(json!(20)));
        assert!(!store.contains(&unit("mul", &[2])));
    }

    #[test]
    fn cached_records_count_as_success() {
        let store = ValueStore::new();
        store.insert(
            unit("add", &[]),
            UnitRecord::cached(outputs(&[("out", json!(5))])),
        );
        assert!(store.is_success(&unit("add", &[])));
    }

    #[test]
    fn clone_is_shallow() {
        let store = ValueStore::new();
        let cloned = store.clone();
        store.insert(
            UnitId::new(Arc::from("a"), smallvec![]),
            UnitRecord::done(Bindings::new(), Duration::ZERO),
        );
        assert!(cloned.contains(&unit("a", &[])));
    }
}
