//! Values, lazy fields and input slots
//!
//! Concrete values are `serde_json::Value`; a binding set is a
//! `BTreeMap` so iteration order (and thus canonicalization) is
//! deterministic. A [`LazyField`] is the placeholder handed out for a
//! not-yet-computed output; [`InputSlot`] is the tagged sum that keeps
//! lazy references distinguishable from concrete values.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::{BraidError, Result};
use crate::types::TypeSpec;

/// Resolved input or output bindings of a single execution
pub type Bindings = BTreeMap<String, Value>;

/// Split-axis identifier, formatted `"{node}.{field}"`
pub type AxisId = Arc<str>;

/// Coordinate into a node's state array; most fan-outs are shallow
pub type Coord = SmallVec<[usize; 4]>;

/// Placeholder for a not-yet-computed output field.
///
/// Created by `NodeHandle::output`; consumed by wiring it into a
/// downstream input. Carries the wire type (already `Seq`-wrapped when
/// the producer combines axes) and the producer's visible axes so the
/// consumer inherits its fan-out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LazyField {
    pub node: Arc<str>,
    pub field: Arc<str>,
    pub ty: TypeSpec,
    pub axes: Vec<AxisId>,
}

impl LazyField {
    /// Lazy fields have no value at construction time; forcing one is
    /// the *lazy-in-condition* misuse.
    pub fn reify(&self) -> Result<Value> {
        Err(BraidError::LazyInCondition {
            node: self.node.to_string(),
            field: self.field.to_string(),
        })
    }
}

/// One bound input of a node: concrete, lazy, or a workflow parameter.
#[derive(Debug, Clone)]
pub enum InputSlot {
    /// Concrete value, validated against the field type at build time
    Concrete(Value),
    /// Reference to an upstream output
    Lazy(LazyField),
    /// Reference to a declared workflow input, substituted at submission
    Param(String),
}

impl InputSlot {
    pub fn is_lazy(&self) -> bool {
        matches!(self, InputSlot::Lazy(_))
    }

    pub fn as_lazy(&self) -> Option<&LazyField> {
        match self {
            InputSlot::Lazy(lazy) => Some(lazy),
            _ => None,
        }
    }

    /// Concrete value or *lazy-in-condition*.
    ///
    /// Constructors use this when a branch predicate must be static.
    pub fn expect_concrete(&self) -> Result<&Value> {
        match self {
            InputSlot::Concrete(value) => Ok(value),
            InputSlot::Lazy(lazy) => Err(BraidError::LazyInCondition {
                node: lazy.node.to_string(),
                field: lazy.field.to_string(),
            }),
            InputSlot::Param(name) => Err(BraidError::LazyInCondition {
                node: "inputs".to_string(),
                field: name.clone(),
            }),
        }
    }
}

impl From<LazyField> for InputSlot {
    fn from(lazy: LazyField) -> Self {
        InputSlot::Lazy(lazy)
    }
}

impl From<Value> for InputSlot {
    fn from(value: Value) -> Self {
        InputSlot::Concrete(value)
    }
}

impl From<i64> for InputSlot {
    fn from(value: i64) -> Self {
        InputSlot::Concrete(Value::from(value))
    }
}

impl From<f64> for InputSlot {
    fn from(value: f64) -> Self {
        InputSlot::Concrete(Value::from(value))
    }
}

impl From<bool> for InputSlot {
    fn from(value: bool) -> Self {
        InputSlot::Concrete(Value::from(value))
    }
}

impl From<&str> for InputSlot {
    fn from(value: &str) -> Self {
        InputSlot::Concrete(Value::from(value))
    }
}

impl From<String> for InputSlot {
    fn from(value: String) -> Self {
        InputSlot::Concrete(Value::from(value))
    }
}

/// Format a unit id the way indexed task ids read in logs: `node`,
/// `node[0]`, `node[1,2]`.
pub fn format_unit(node: &str, coord: &[usize]) -> String {
    if coord.is_empty() {
        node.to_string()
    } else {
        let idx = coord
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("{node}[{idx}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lazy(node: &str, field: &str) -> LazyField {
        LazyField {
            node: Arc::from(node),
            field: Arc::from(field),
            ty: TypeSpec::Int,
            axes: vec![],
        }
    }

    #[test]
    fn concrete_slot_yields_value() {
        let slot = InputSlot::from(42i64);
        assert_eq!(slot.expect_concrete().unwrap(), &json!(42));
    }

    #[test]
    fn lazy_slot_refuses_reification() {
        let slot = InputSlot::from(lazy("add", "out"));
        let err = slot.expect_concrete().unwrap_err();
        assert_eq!(err.code(), "BRAID-005");
        assert!(err.to_string().contains("add.out"));
    }

    #[test]
    fn param_slot_refuses_reification() {
        let slot = InputSlot::Param("depth".to_string());
        assert!(slot.expect_concrete().is_err());
    }

    #[test]
    fn lazy_reify_is_lazy_in_condition() {
        assert_eq!(lazy("a", "out").reify().unwrap_err().code(), "BRAID-005");
    }

    #[test]
    fn unit_formatting() {
        assert_eq!(format_unit("add", &[]), "add");
        assert_eq!(format_unit("mul", &[0]), "mul[0]");
        assert_eq!(format_unit("mul", &[1, 2]), "mul[1,2]");
    }
}
