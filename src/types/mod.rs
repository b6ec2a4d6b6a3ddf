//! Type lattice and assignability oracle
//!
//! Covariant subtype lattice over the engine's wire types: `Any` at the
//! top, primitives, file-format tags (resolved through the external
//! [`FormatRegistry`] delegate), containers, fixed-arity tuples and
//! unions. Two checks share the rules:
//!
//! - [`assignable`] — declared type vs declared type, used at wire-up
//! - [`check_value`] — concrete JSON value vs declared type, used when
//!   binding concrete inputs and again at dispatch for `Any`-typed wires

mod format;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use format::{FormatRegistry, StaticFormatRegistry};

/// Wire type of a task input or output field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSpec {
    /// Top of the lattice: assignable to and from everything
    Any,
    Bool,
    Int,
    Float,
    Str,
    /// File with a format tag; subtyping delegated to the format registry
    File(String),
    /// Ordered sequence, covariant in the element type
    Seq(Box<TypeSpec>),
    /// Fixed-arity tuple, element-wise covariant
    Tuple(Vec<TypeSpec>),
    /// Unordered collection, covariant in the element type
    Set(Box<TypeSpec>),
    /// Mapping, covariant in key and value
    Map(Box<TypeSpec>, Box<TypeSpec>),
    /// Union of alternatives
    Union(Vec<TypeSpec>),
}

impl TypeSpec {
    /// Convenience constructor for `Seq`
    pub fn seq(elem: TypeSpec) -> Self {
        TypeSpec::Seq(Box::new(elem))
    }

    /// Convenience constructor for `File`
    pub fn file(tag: impl Into<String>) -> Self {
        TypeSpec::File(tag.into())
    }

    pub fn is_any(&self) -> bool {
        matches!(self, TypeSpec::Any)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, TypeSpec::File(_))
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSpec::Any => write!(f, "Any"),
            TypeSpec::Bool => write!(f, "Bool"),
            TypeSpec::Int => write!(f, "Int"),
            TypeSpec::Float => write!(f, "Float"),
            TypeSpec::Str => write!(f, "Str"),
            TypeSpec::File(tag) => write!(f, "File({tag})"),
            TypeSpec::Seq(t) => write!(f, "Seq[{t}]"),
            TypeSpec::Set(t) => write!(f, "Set[{t}]"),
            TypeSpec::Map(k, v) => write!(f, "Map[{k}, {v}]"),
            TypeSpec::Tuple(ts) => {
                write!(f, "Tuple[")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "]")
            }
            TypeSpec::Union(ts) => {
                write!(f, "Union[")?;
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Verdict of an assignability or conformance check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Assignability {
    /// Direct assignment
    Ok,
    /// Assignable with a sanctioned coercion (numeric widening)
    Coerce,
    /// Not assignable
    Reject,
}

impl Assignability {
    pub fn is_ok(self) -> bool {
        self != Assignability::Reject
    }

    /// Combine verdicts: the strictest wins
    fn and(self, other: Assignability) -> Assignability {
        self.max(other)
    }
}

/// Can a value of type `src` flow into a slot of type `dst`?
pub fn assignable(src: &TypeSpec, dst: &TypeSpec, formats: &dyn FormatRegistry) -> Assignability {
    use Assignability::*;
    use TypeSpec::*;

    match (src, dst) {
        // Any is top in both directions; Any-typed sources defer to the runtime check
        (Any, _) | (_, Any) => Ok,

        // Union source: every variant must be assignable
        (Union(variants), _) => variants
            .iter()
            .map(|v| assignable(v, dst, formats))
            .fold(Ok, Assignability::and),

        // Union destination: some variant must accept; best verdict wins
        (_, Union(variants)) => variants
            .iter()
            .map(|v| assignable(src, v, formats))
            .min()
            .unwrap_or(Reject),

        (Bool, Bool) | (Int, Int) | (Float, Float) | (Str, Str) => Ok,

        // Numeric widening
        (Int, Float) => Coerce,

        (File(s), File(d)) => {
            let s = formats.canonical_name(s);
            let d = formats.canonical_name(d);
            if s == d || formats.ancestors(&s).contains(&d) {
                Ok
            } else {
                Reject
            }
        }

        (Seq(s), Seq(d)) | (Set(s), Set(d)) => assignable(s, d, formats),

        (Tuple(ss), Tuple(ds)) => {
            if ss.len() != ds.len() {
                return Reject;
            }
            ss.iter()
                .zip(ds)
                .map(|(s, d)| assignable(s, d, formats))
                .fold(Ok, Assignability::and)
        }

        (Map(sk, sv), Map(dk, dv)) => {
            assignable(sk, dk, formats).and(assignable(sv, dv, formats))
        }

        _ => Reject,
    }
}

/// Does a concrete JSON value conform to a declared type?
///
/// This is the runtime half of the lattice: used when binding concrete
/// inputs at construction and re-run at dispatch for `Any`-typed wires.
pub fn check_value(value: &Value, ty: &TypeSpec, formats: &dyn FormatRegistry) -> Assignability {
    use Assignability::*;

    match ty {
        TypeSpec::Any => Ok,
        TypeSpec::Bool => bool_verdict(value.is_boolean()),
        TypeSpec::Int => bool_verdict(value.is_i64() || value.is_u64()),
        TypeSpec::Float => {
            if value.is_i64() || value.is_u64() {
                Coerce
            } else {
                bool_verdict(value.is_f64())
            }
        }
        // Format conformance cannot be judged from a bare path string;
        // the registry resolves declared-type relations only
        TypeSpec::Str | TypeSpec::File(_) => bool_verdict(value.is_string()),
        TypeSpec::Seq(elem) | TypeSpec::Set(elem) => match value.as_array() {
            Some(items) => items
                .iter()
                .map(|v| check_value(v, elem, formats))
                .fold(Ok, Assignability::and),
            None => Reject,
        },
        TypeSpec::Tuple(elems) => match value.as_array() {
            Some(items) if items.len() == elems.len() => items
                .iter()
                .zip(elems)
                .map(|(v, t)| check_value(v, t, formats))
                .fold(Ok, Assignability::and),
            _ => Reject,
        },
        TypeSpec::Map(key, val) => match value.as_object() {
            Some(entries) => {
                if !matches!(**key, TypeSpec::Str | TypeSpec::Any) {
                    return Reject;
                }
                entries
                    .values()
                    .map(|v| check_value(v, val, formats))
                    .fold(Ok, Assignability::and)
            }
            None => Reject,
        },
        TypeSpec::Union(variants) => variants
            .iter()
            .map(|t| check_value(value, t, formats))
            .min()
            .unwrap_or(Reject),
    }
}

/// Apply the sanctioned coercions (integer literal → float destination)
pub fn coerce_value(value: Value, ty: &TypeSpec) -> Value {
    match ty {
        TypeSpec::Float => match value.as_i64() {
            Some(n) => Value::from(n as f64),
            None => value,
        },
        TypeSpec::Seq(elem) | TypeSpec::Set(elem) => match value {
            Value::Array(items) => Value::Array(
                items.into_iter().map(|v| coerce_value(v, elem)).collect(),
            ),
            other => other,
        },
        TypeSpec::Tuple(elems) => match value {
            Value::Array(items) if items.len() == elems.len() => Value::Array(
                items
                    .into_iter()
                    .zip(elems)
                    .map(|(v, t)| coerce_value(v, t))
                    .collect(),
            ),
            other => other,
        },
        _ => value,
    }
}

fn bool_verdict(ok: bool) -> Assignability {
    if ok {
        Assignability::Ok
    } else {
        Assignability::Reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use TypeSpec::*;

    fn media_registry() -> StaticFormatRegistry {
        StaticFormatRegistry::new()
            .with_edge("png", "image")
            .with_edge("jpeg", "image")
            .with_edge("image", "file")
            .with_edge("mp4", "video")
            .with_edge("quicktime", "video")
            .with_edge("video", "file")
    }

    #[test]
    fn any_is_top_both_ways() {
        let reg = StaticFormatRegistry::new();
        assert_eq!(assignable(&Any, &Int, &reg), Assignability::Ok);
        assert_eq!(assignable(&Str, &Any, &reg), Assignability::Ok);
        assert_eq!(
            assignable(&Any, &TypeSpec::file("png"), &reg),
            Assignability::Ok
        );
    }

    #[test]
    fn primitives_match_by_identity() {
        let reg = StaticFormatRegistry::new();
        assert_eq!(assignable(&Int, &Int, &reg), Assignability::Ok);
        assert_eq!(assignable(&Str, &Int, &reg), Assignability::Reject);
        assert_eq!(assignable(&Bool, &Str, &reg), Assignability::Reject);
    }

    #[test]
    fn numeric_widening_coerces() {
        let reg = StaticFormatRegistry::new();
        assert_eq!(assignable(&Int, &Float, &reg), Assignability::Coerce);
        assert_eq!(assignable(&Float, &Int, &reg), Assignability::Reject);
    }

    #[test]
    fn containers_are_covariant() {
        let reg = StaticFormatRegistry::new();
        assert_eq!(
            assignable(&TypeSpec::seq(Int), &TypeSpec::seq(Float), &reg),
            Assignability::Coerce
        );
        assert_eq!(
            assignable(&TypeSpec::seq(Str), &TypeSpec::seq(Int), &reg),
            Assignability::Reject
        );
    }

    #[test]
    fn tuples_require_arity_match() {
        let reg = StaticFormatRegistry::new();
        assert_eq!(
            assignable(&Tuple(vec![Int, Str]), &Tuple(vec![Int, Str]), &reg),
            Assignability::Ok
        );
        assert_eq!(
            assignable(&Tuple(vec![Int]), &Tuple(vec![Int, Str]), &reg),
            Assignability::Reject
        );
    }

    #[test]
    fn union_source_requires_all_variants() {
        let reg = StaticFormatRegistry::new();
        assert_eq!(
            assignable(&Union(vec![Int, Float]), &Float, &reg),
            Assignability::Coerce
        );
        assert_eq!(
            assignable(&Union(vec![Int, Str]), &Float, &reg),
            Assignability::Reject
        );
    }

    #[test]
    fn union_destination_requires_some_variant() {
        let reg = StaticFormatRegistry::new();
        assert_eq!(
            assignable(&Int, &Union(vec![Str, Int]), &reg),
            Assignability::Ok
        );
        assert_eq!(
            assignable(&Bool, &Union(vec![Str, Int]), &reg),
            Assignability::Reject
        );
    }

    #[test]
    fn file_subtype_via_registry() {
        let reg = media_registry();
        assert_eq!(
            assignable(&TypeSpec::file("png"), &TypeSpec::file("file"), &reg),
            Assignability::Ok
        );
        assert_eq!(
            assignable(&TypeSpec::file("jpeg"), &TypeSpec::file("png"), &reg),
            Assignability::Reject
        );
        assert_eq!(
            assignable(&TypeSpec::file("mp4"), &TypeSpec::file("quicktime"), &reg),
            Assignability::Reject
        );
    }

    #[test]
    fn check_value_primitives() {
        let reg = StaticFormatRegistry::new();
        assert_eq!(check_value(&json!(3), &Int, &reg), Assignability::Ok);
        assert_eq!(check_value(&json!(3), &Float, &reg), Assignability::Coerce);
        assert_eq!(check_value(&json!(3.5), &Int, &reg), Assignability::Reject);
        assert_eq!(check_value(&json!("x"), &Str, &reg), Assignability::Ok);
        assert_eq!(
            check_value(&json!("p.png"), &TypeSpec::file("png"), &reg),
            Assignability::Ok
        );
    }

    #[test]
    fn check_value_containers() {
        let reg = StaticFormatRegistry::new();
        assert_eq!(
            check_value(&json!([1, 2, 3]), &TypeSpec::seq(Int), &reg),
            Assignability::Ok
        );
        assert_eq!(
            check_value(&json!([1, "x"]), &TypeSpec::seq(Int), &reg),
            Assignability::Reject
        );
        assert_eq!(
            check_value(&json!([1, "x"]), &Tuple(vec![Int, Str]), &reg),
            Assignability::Ok
        );
        assert_eq!(
            check_value(&json!({"a": 1}), &Map(Box::new(Str), Box::new(Int)), &reg),
            Assignability::Ok
        );
    }

    #[test]
    fn coerce_int_to_float() {
        let v = coerce_value(json!(3), &Float);
        assert_eq!(v, json!(3.0));
        let v = coerce_value(json!([1, 2]), &TypeSpec::seq(Float));
        assert_eq!(v, json!([1.0, 2.0]));
    }
}
