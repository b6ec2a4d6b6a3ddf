//! State-array shapes and per-state enumeration
//!
//! Every node owns a *state array* indexed by its split axes. The shape
//! lattice follows the propagation rule
//!
//! ```text
//! full(n)    = ⋃ visible(p in producers) ∪ local_splits(n)
//! visible(n) = full(n) − combines(n)
//! ```
//!
//! Consumers index shared axes by their own coordinate; axes the
//! producer combined are gathered into a sequence in lexicographic
//! coordinate order (ties broken by axis insertion order).

use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{BraidError, Result};
use crate::store::{UnitId, ValueStore};
use crate::value::{AxisId, Bindings, Coord, InputSlot, LazyField};

use super::{GraphSpec, Node};

/// One axis of a state shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisInfo {
    pub id: AxisId,
    pub len: usize,
}

/// Ordered axis set describing a node's fan-out; empty = scalar
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateShape {
    pub axes: Vec<AxisInfo>,
}

impl StateShape {
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn is_scalar(&self) -> bool {
        self.axes.is_empty()
    }

    /// Number of states: product of cardinalities (scalar = 1, any
    /// zero-length axis = 0)
    pub fn num_states(&self) -> usize {
        self.axes.iter().map(|a| a.len).product()
    }

    pub fn index_of(&self, axis: &str) -> Option<usize> {
        self.axes.iter().position(|a| &*a.id == axis)
    }

    /// All coordinates in lexicographic order (first axis outermost)
    pub fn coords(&self) -> Vec<Coord> {
        enumerate(&self.axes.iter().map(|a| a.len).collect::<Vec<_>>())
    }
}

/// Resolved shapes of one node
#[derive(Debug, Clone)]
pub struct NodeStates {
    /// Index set of the node's execution array
    pub full: StateShape,
    /// What downstream consumers inherit (`full` minus combined axes)
    pub visible: StateShape,
    pub combined: Vec<AxisId>,
}

/// Resolve the state shape of every node in the spec.
///
/// Walks nodes in insertion order, so every inherited axis was already
/// introduced by an upstream split. Cardinality disagreement on a shared
/// axis is an *axis-mismatch*.
pub fn resolve_shapes(spec: &GraphSpec) -> Result<FxHashMap<Arc<str>, NodeStates>> {
    let mut axis_len: FxHashMap<AxisId, usize> = FxHashMap::default();
    let mut shapes: FxHashMap<Arc<str>, NodeStates> = FxHashMap::default();

    for (name, node) in &spec.nodes {
        let mut full: Vec<AxisInfo> = Vec::new();

        // Axes inherited through lazy inputs, first seen wins the position
        for slot in node.inputs.values() {
            if let InputSlot::Lazy(lazy) = slot {
                for axis in &lazy.axes {
                    if full.iter().any(|a| a.id == *axis) {
                        continue;
                    }
                    let len = *axis_len.get(axis).ok_or_else(|| BraidError::UnknownAxis {
                        node: name.to_string(),
                        axis: axis.to_string(),
                    })?;
                    full.push(AxisInfo {
                        id: Arc::clone(axis),
                        len,
                    });
                }
            }
        }

        // Local split axes
        for group in &node.splits {
            if let Some(existing) = axis_len.get(&group.axis) {
                if *existing != group.len {
                    return Err(BraidError::AxisMismatch {
                        axis: group.axis.to_string(),
                        expected: *existing,
                        actual: group.len,
                    });
                }
            }
            axis_len.insert(Arc::clone(&group.axis), group.len);
            full.push(AxisInfo {
                id: Arc::clone(&group.axis),
                len: group.len,
            });
        }

        for axis in &node.combines {
            if !full.iter().any(|a| a.id == *axis) {
                return Err(BraidError::UnknownAxis {
                    node: name.to_string(),
                    axis: axis.to_string(),
                });
            }
        }

        let visible = StateShape {
            axes: full
                .iter()
                .filter(|a| !node.combines.contains(&a.id))
                .cloned()
                .collect(),
        };

        shapes.insert(
            Arc::clone(name),
            NodeStates {
                full: StateShape { axes: full },
                visible,
                combined: node.combines.clone(),
            },
        );
    }

    Ok(shapes)
}

/// Outcome of resolving one unit's inputs
#[derive(Debug)]
pub enum InputResolution {
    /// All inputs materialized
    Ready(Bindings),
    /// An upstream cell failed or is missing; the unit is unreachable
    Blocked { source: String },
}

/// Construct the concrete input tuple for unit `(node, coord)`.
///
/// Scalar inputs are carried unchanged, split fields are indexed by
/// their axis coordinate, lazy fields are fetched from the producer's
/// state array (gathering producer-combined axes).
pub fn resolve_unit_inputs(
    shapes: &FxHashMap<Arc<str>, NodeStates>,
    node: &Node,
    coord: &Coord,
    store: &ValueStore,
) -> InputResolution {
    let states = &shapes[&node.name];
    let mut bindings = Bindings::new();

    for (field, slot) in &node.inputs {
        let value = match slot {
            InputSlot::Concrete(value) => match node.split_group_for(field) {
                Some(group) => {
                    let pos = states
                        .full
                        .index_of(&group.axis)
                        .expect("split axis is part of the full shape");
                    match value {
                        Value::Array(items) => items[coord[pos]].clone(),
                        _ => unreachable!("split fields are validated as sequences at build"),
                    }
                }
                None => value.clone(),
            },
            // Params are substituted before scheduling
            InputSlot::Param(name) => {
                return InputResolution::Blocked {
                    source: format!("unsubstituted workflow input '{name}'"),
                }
            }
            InputSlot::Lazy(lazy) => {
                let producer = &shapes[&lazy.node];
                let fixed = fix_shared_axes(producer, &states.full, coord);
                match gather_field(&lazy.node, &producer.full, &lazy.field, &fixed, store) {
                    Ok(value) => value,
                    Err(source) => return InputResolution::Blocked { source },
                }
            }
        };
        bindings.insert(field.clone(), value);
    }

    InputResolution::Ready(bindings)
}

/// How a workflow output failed to materialize
#[derive(Debug)]
pub enum OutputError {
    /// The producer fans out over an axis with zero states and never
    /// combines it: there is no value a scalar consumer could receive
    Empty { axis: String },
    /// An upstream unit failed
    Blocked { source: String },
}

/// Materialize an exported output from the producer's state array.
///
/// Scalar producers yield the plain value; producers with visible axes
/// yield a sequence over those axes in lexicographic order; axes the
/// producer combined are gathered per state.
pub fn collect_output(
    shapes: &FxHashMap<Arc<str>, NodeStates>,
    lazy: &LazyField,
    store: &ValueStore,
) -> std::result::Result<Value, OutputError> {
    let producer = &shapes[&lazy.node];
    let visible: Vec<usize> = producer
        .full
        .axes
        .iter()
        .enumerate()
        .filter(|(_, a)| !producer.combined.contains(&a.id))
        .map(|(i, _)| i)
        .collect();

    if let Some(empty) = visible
        .iter()
        .find(|&&i| producer.full.axes[i].len == 0)
    {
        return Err(OutputError::Empty {
            axis: producer.full.axes[*empty].id.to_string(),
        });
    }

    if visible.is_empty() {
        return gather_field(
            &lazy.node,
            &producer.full,
            &lazy.field,
            &vec![None; producer.full.axes.len()],
            store,
        )
        .map_err(|source| OutputError::Blocked { source });
    }

    let lens: Vec<usize> = visible.iter().map(|&i| producer.full.axes[i].len).collect();
    let mut items = Vec::new();
    for combo in enumerate(&lens) {
        let mut fixed = vec![None; producer.full.axes.len()];
        for (slot, &axis_index) in combo.iter().zip(&visible) {
            fixed[axis_index] = Some(*slot);
        }
        let value = gather_field(&lazy.node, &producer.full, &lazy.field, &fixed, store)
            .map_err(|source| OutputError::Blocked { source })?;
        items.push(value);
    }
    Ok(Value::Array(items))
}

/// Fix the coordinates of axes shared between producer and consumer.
///
/// Axes the producer combined are always gathered, even when the
/// consumer carries the same axis through another path — a combined
/// output is a sequence in every state.
fn fix_shared_axes(
    producer: &NodeStates,
    consumer_full: &StateShape,
    coord: &Coord,
) -> Vec<Option<usize>> {
    producer
        .full
        .axes
        .iter()
        .map(|axis| {
            if producer.combined.contains(&axis.id) {
                None
            } else {
                consumer_full.index_of(&axis.id).map(|ci| coord[ci])
            }
        })
        .collect()
}

/// Fetch one field from a producer's state array.
///
/// Axes with a fixed coordinate are indexed; unfixed axes are gathered
/// into a flat sequence in lexicographic order. Returns the failing
/// unit's display id on error.
fn gather_field(
    producer: &Arc<str>,
    producer_full: &StateShape,
    field: &str,
    fixed: &[Option<usize>],
    store: &ValueStore,
) -> std::result::Result<Value, String> {
    let gather_lens: Vec<usize> = producer_full
        .axes
        .iter()
        .zip(fixed)
        .filter(|(_, f)| f.is_none())
        .map(|(a, _)| a.len)
        .collect();

    if gather_lens.is_empty() {
        let coord: Coord = fixed.iter().map(|f| f.expect("all axes fixed")).collect();
        return fetch_cell(producer, coord, field, store);
    }

    let mut items = Vec::new();
    for combo in enumerate(&gather_lens) {
        let mut combo_iter = combo.iter();
        let coord: Coord = fixed
            .iter()
            .map(|f| match f {
                Some(idx) => *idx,
                None => *combo_iter.next().expect("one slot per unfixed axis"),
            })
            .collect();
        items.push(fetch_cell(producer, coord, field, store)?);
    }
    Ok(Value::Array(items))
}

fn fetch_cell(
    producer: &Arc<str>,
    coord: Coord,
    field: &str,
    store: &ValueStore,
) -> std::result::Result<Value, String> {
    let unit = UnitId::new(Arc::clone(producer), coord);
    match store.get_outputs(&unit) {
        Some(outputs) => match outputs.get(field) {
            Some(value) => Ok(value.clone()),
            None => Err(unit.to_string()),
        },
        None => Err(unit.to_string()),
    }
}

/// Odometer enumeration: lexicographic, first position outermost
fn enumerate(lens: &[usize]) -> Vec<Coord> {
    if lens.iter().any(|&len| len == 0) {
        return Vec::new();
    }
    let total: usize = lens.iter().product();
    let mut coords = Vec::with_capacity(total);
    let mut current: Coord = lens.iter().map(|_| 0).collect();
    for _ in 0..total {
        coords.push(current.clone());
        for pos in (0..lens.len()).rev() {
            current[pos] += 1;
            if current[pos] < lens[pos] {
                break;
            }
            current[pos] = 0;
        }
    }
    coords
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Invoke, WorkflowBuilder};
    use crate::store::UnitRecord;
    use crate::task::{FieldSpec, TaskDef};
    use crate::types::TypeSpec;
    use serde_json::json;
    use smallvec::smallvec;
    use std::time::Duration;

    fn mul_task() -> TaskDef {
        TaskDef::function("mul", |inputs| {
            let a = inputs["a"].as_i64().unwrap_or(0);
            let b = inputs["b"].as_i64().unwrap_or(0);
            let mut out = Bindings::new();
            out.insert("out".into(), json!(a * b));
            Ok(out)
        })
        .with_input(FieldSpec::required("a", TypeSpec::Int))
        .with_input(FieldSpec::required("b", TypeSpec::Int))
        .with_output(FieldSpec::out("out", TypeSpec::Int))
    }

    fn sum_task() -> TaskDef {
        TaskDef::function("sum", |inputs| {
            let total: i64 = inputs["x"]
                .as_array()
                .map(|items| items.iter().filter_map(Value::as_i64).sum())
                .unwrap_or(0);
            let mut out = Bindings::new();
            out.insert("out".into(), json!(total));
            Ok(out)
        })
        .with_input(FieldSpec::required("x", TypeSpec::seq(TypeSpec::Int)))
        .with_output(FieldSpec::out("out", TypeSpec::Int))
    }

    #[test]
    fn enumerate_is_lexicographic() {
        let coords = enumerate(&[2, 3]);
        assert_eq!(coords.len(), 6);
        assert_eq!(coords[0].as_slice(), &[0, 0]);
        assert_eq!(coords[1].as_slice(), &[0, 1]);
        assert_eq!(coords[3].as_slice(), &[1, 0]);
        assert_eq!(coords[5].as_slice(), &[1, 2]);
    }

    #[test]
    fn enumerate_empty_axis_yields_nothing() {
        assert!(enumerate(&[2, 0]).is_empty());
        assert_eq!(enumerate(&[]).len(), 1);
    }

    #[test]
    fn cross_product_shape() {
        let spec = WorkflowBuilder::scope("wf", |wf| {
            wf.add(
                Invoke::task(&mul_task())
                    .with("a", json!([1, 2, 3]))
                    .with("b", json!([10, 20]))
                    .split("a")
                    .split("b"),
            )?;
            Ok(())
        })
        .unwrap();

        let shapes = resolve_shapes(&spec).unwrap();
        let states = &shapes[&Arc::<str>::from("mul")];
        assert_eq!(states.full.num_states(), 6);
        assert_eq!(states.visible.num_states(), 6);
    }

    #[test]
    fn combine_removes_axis_from_visible() {
        let spec = WorkflowBuilder::scope("wf", |wf| {
            wf.add(
                Invoke::task(&mul_task())
                    .with("a", json!([1, 2, 3]))
                    .with("b", json!([10, 20]))
                    .split("a")
                    .split("b")
                    .combine("a"),
            )?;
            Ok(())
        })
        .unwrap();

        let shapes = resolve_shapes(&spec).unwrap();
        let states = &shapes[&Arc::<str>::from("mul")];
        assert_eq!(states.full.num_states(), 6);
        assert_eq!(states.visible.axes.len(), 1);
        assert_eq!(&*states.visible.axes[0].id, "mul.b");
    }

    #[test]
    fn consumer_inherits_producer_visible_shape() {
        let spec = WorkflowBuilder::scope("wf", |wf| {
            let mul = wf.add(
                Invoke::task(&mul_task())
                    .with("a", json!([1, 2, 3]))
                    .with("b", json!([10, 20]))
                    .split("a")
                    .split("b")
                    .combine("a"),
            )?;
            wf.add(Invoke::task(&sum_task()).with("x", mul.output("out")?))?;
            Ok(())
        })
        .unwrap();

        let shapes = resolve_shapes(&spec).unwrap();
        let sum = &shapes[&Arc::<str>::from("sum")];
        assert_eq!(sum.full.axes.len(), 1);
        assert_eq!(&*sum.full.axes[0].id, "mul.b");
        assert_eq!(sum.full.num_states(), 2);
    }

    #[test]
    fn split_field_indexed_by_coordinate() {
        let spec = WorkflowBuilder::scope("wf", |wf| {
            wf.add(
                Invoke::task(&mul_task())
                    .with("a", json!([1, 2, 3]))
                    .with("b", 10i64)
                    .split("a"),
            )?;
            Ok(())
        })
        .unwrap();

        let shapes = resolve_shapes(&spec).unwrap();
        let store = ValueStore::new();
        let node = spec.node("mul").unwrap();

        let resolved = resolve_unit_inputs(&shapes, node, &smallvec![1], &store);
        match resolved {
            InputResolution::Ready(bindings) => {
                assert_eq!(bindings["a"], json!(2));
                assert_eq!(bindings["b"], json!(10));
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn lazy_gather_over_combined_axis_is_ordered() {
        let spec = WorkflowBuilder::scope("wf", |wf| {
            let mul = wf.add(
                Invoke::task(&mul_task())
                    .with("a", json!([1, 2, 3]))
                    .with("b", json!([10, 20]))
                    .split("a")
                    .split("b")
                    .combine("a"),
            )?;
            wf.add(Invoke::task(&sum_task()).with("x", mul.output("out")?))?;
            Ok(())
        })
        .unwrap();

        let shapes = resolve_shapes(&spec).unwrap();
        let store = ValueStore::new();
        // mul state array: coord = [a, b]
        for (ai, a) in [1i64, 2, 3].iter().enumerate() {
            for (bi, b) in [10i64, 20].iter().enumerate() {
                let mut out = Bindings::new();
                out.insert("out".into(), json!(a * b));
                store.insert(
                    UnitId::new(Arc::from("mul"), smallvec![ai, bi]),
                    UnitRecord::done(out, Duration::ZERO),
                );
            }
        }

        let sum = spec.node("sum").unwrap();
        // sum state for b = 20 gathers a-axis in order
        match resolve_unit_inputs(&shapes, sum, &smallvec![1], &store) {
            InputResolution::Ready(bindings) => {
                assert_eq!(bindings["x"], json!([20, 40, 60]));
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn combined_output_gathers_even_when_consumer_shares_the_axis() {
        // Diamond: picker fans out over a; gatherer combines a; joiner
        // consumes both the per-state output and the gathered sequence.
        let joiner = TaskDef::function("join", |inputs| Ok(inputs.clone()))
            .with_input(FieldSpec::required("one", TypeSpec::Int))
            .with_input(FieldSpec::required("all", TypeSpec::seq(TypeSpec::Int)))
            .with_output(FieldSpec::out("one", TypeSpec::Int));

        let spec = WorkflowBuilder::scope("wf", |wf| {
            let picker = wf.add(
                Invoke::task(&mul_task())
                    .named("picker")
                    .with("a", json!([1, 2]))
                    .with("b", 1i64)
                    .split("a"),
            )?;
            let gatherer = wf.add(
                Invoke::task(&mul_task())
                    .named("gatherer")
                    .with("a", picker.output("out")?)
                    .with("b", 10i64)
                    .combine("picker.a"),
            )?;
            wf.add(
                Invoke::task(&joiner)
                    .with("one", picker.output("out")?)
                    .with("all", gatherer.output("out")?),
            )?;
            Ok(())
        })
        .unwrap();

        let shapes = resolve_shapes(&spec).unwrap();
        let store = ValueStore::new();
        for (i, v) in [1i64, 2].iter().enumerate() {
            let mut out = Bindings::new();
            out.insert("out".into(), json!(v));
            store.insert(
                UnitId::new(Arc::from("picker"), smallvec![i]),
                UnitRecord::done(out, Duration::ZERO),
            );
        }
        for (i, v) in [10i64, 20].iter().enumerate() {
            let mut out = Bindings::new();
            out.insert("out".into(), json!(v));
            store.insert(
                UnitId::new(Arc::from("gatherer"), smallvec![i]),
                UnitRecord::done(out, Duration::ZERO),
            );
        }

        let join = spec.node("join").unwrap();
        match resolve_unit_inputs(&shapes, join, &smallvec![1], &store) {
            InputResolution::Ready(bindings) => {
                assert_eq!(bindings["one"], json!(2));
                // gathered over the combined axis, not indexed by it
                assert_eq!(bindings["all"], json!([10, 20]));
            }
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[test]
    fn missing_upstream_cell_blocks_unit() {
        let spec = WorkflowBuilder::scope("wf", |wf| {
            let mul = wf.add(
                Invoke::task(&mul_task())
                    .with("a", json!([1, 2]))
                    .with("b", 1i64)
                    .split("a")
                    .combine("a"),
            )?;
            wf.add(Invoke::task(&sum_task()).with("x", mul.output("out")?))?;
            Ok(())
        })
        .unwrap();

        let shapes = resolve_shapes(&spec).unwrap();
        let store = ValueStore::new();
        let mut out = Bindings::new();
        out.insert("out".into(), json!(1));
        store.insert(
            UnitId::new(Arc::from("mul"), smallvec![0]),
            UnitRecord::done(out, Duration::ZERO),
        );
        store.insert(
            UnitId::new(Arc::from("mul"), smallvec![1]),
            UnitRecord::failed("boom", Duration::ZERO),
        );

        let sum = spec.node("sum").unwrap();
        match resolve_unit_inputs(&shapes, sum, &smallvec![], &store) {
            InputResolution::Blocked { source } => assert_eq!(source, "mul[1]"),
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[test]
    fn collect_scalar_output() {
        let spec = WorkflowBuilder::scope("wf", |wf| {
            let mul = wf.add(Invoke::task(&mul_task()).with("a", 2i64).with("b", 3i64))?;
            wf.export("product", mul.output("out")?)?;
            Ok(())
        })
        .unwrap();

        let shapes = resolve_shapes(&spec).unwrap();
        let store = ValueStore::new();
        let mut out = Bindings::new();
        out.insert("out".into(), json!(6));
        store.insert(
            UnitId::scalar(Arc::from("mul")),
            UnitRecord::done(out, Duration::ZERO),
        );

        let value = collect_output(&shapes, &spec.outputs["product"], &store).unwrap();
        assert_eq!(value, json!(6));
    }

    #[test]
    fn collect_output_over_visible_axis() {
        let spec = WorkflowBuilder::scope("wf", |wf| {
            let mul = wf.add(
                Invoke::task(&mul_task())
                    .with("a", json!([1, 2]))
                    .with("b", 10i64)
                    .split("a"),
            )?;
            wf.export("products", mul.output("out")?)?;
            Ok(())
        })
        .unwrap();

        let shapes = resolve_shapes(&spec).unwrap();
        let store = ValueStore::new();
        for (i, v) in [10, 20].iter().enumerate() {
            let mut out = Bindings::new();
            out.insert("out".into(), json!(v));
            store.insert(
                UnitId::new(Arc::from("mul"), smallvec![i]),
                UnitRecord::done(out, Duration::ZERO),
            );
        }

        let value = collect_output(&shapes, &spec.outputs["products"], &store).unwrap();
        assert_eq!(value, json!([10, 20]));
    }

    #[test]
    fn empty_split_combine_yields_empty_sequence() {
        let spec = WorkflowBuilder::scope("wf", |wf| {
            let mul = wf.add(
                Invoke::task(&mul_task())
                    .with("a", json!([]))
                    .with("b", 10i64)
                    .split("a")
                    .combine("a"),
            )?;
            wf.export("products", mul.output("out")?)?;
            Ok(())
        })
        .unwrap();

        let shapes = resolve_shapes(&spec).unwrap();
        assert_eq!(shapes[&Arc::<str>::from("mul")].full.num_states(), 0);

        let store = ValueStore::new();
        let value = collect_output(&shapes, &spec.outputs["products"], &store).unwrap();
        assert_eq!(value, json!([]));
    }

    #[test]
    fn empty_split_without_combine_errors_at_output() {
        let spec = WorkflowBuilder::scope("wf", |wf| {
            let mul = wf.add(
                Invoke::task(&mul_task())
                    .with("a", json!([]))
                    .with("b", 10i64)
                    .split("a"),
            )?;
            wf.export("products", mul.output("out")?)?;
            Ok(())
        })
        .unwrap();

        let shapes = resolve_shapes(&spec).unwrap();
        let store = ValueStore::new();
        match collect_output(&shapes, &spec.outputs["products"], &store) {
            Err(OutputError::Empty { axis }) => assert_eq!(axis, "mul.a"),
            other => panic!("expected Empty, got {other:?}"),
        }
    }
}
