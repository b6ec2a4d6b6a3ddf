//! Canonical input records and content digests
//!
//! Cache keys must be deterministic: equal resolved inputs produce equal
//! keys. Canonicalization sorts mappings (bindings are `BTreeMap`s, so
//! field order is already sorted), walks sequences element-wise, and
//! replaces file-typed inputs by the sha-256 of the file *content* — a
//! renamed copy of the same file hits the same cache entry.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{BraidError, Result};
use crate::graph::GraphSpec;
use crate::task::TaskDef;
use crate::types::TypeSpec;
use crate::value::{Bindings, InputSlot};

/// Hex-encoded sha-256 of a byte slice
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Hex-encoded sha-256 of a file's content
pub fn file_digest(path: &str) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| BraidError::FileDigest {
        path: path.to_string(),
        reason: e.to_string(),
    })?;
    Ok(sha256_hex(&bytes))
}

/// Canonical record of one execution: the value hashed into the cache
/// key and persisted as `inputs.json`.
pub fn canonical_record(
    task: &TaskDef,
    inputs: &Bindings,
    env_id: &str,
    structural: Option<&str>,
) -> Result<Value> {
    let mut canonical = Map::new();
    for (field, value) in inputs {
        let ty = task.input(field).map(|f| &f.ty);
        canonical.insert(field.clone(), canonicalize_value(value, ty)?);
    }

    let mut record = Map::new();
    record.insert("env".into(), json!(env_id));
    record.insert("inputs".into(), Value::Object(canonical));
    record.insert("task".into(), json!(&*task.id));
    if let Some(digest) = structural {
        record.insert("workflow".into(), json!(digest));
    }
    Ok(Value::Object(record))
}

/// Cache key: sha-256 over the serialized canonical record
pub fn cache_key(record: &Value) -> Result<String> {
    let bytes = serde_json::to_vec(record)?;
    Ok(sha256_hex(&bytes))
}

/// Structural digest of a graph: node names, task identities, wiring,
/// splits and combines. Sub-workflow cache keys include this, so two
/// constructors expanding to the same graph share entries.
pub fn structural_digest(spec: &GraphSpec) -> Result<String> {
    let nodes: Vec<Value> = spec
        .nodes
        .values()
        .map(|node| {
            let inputs: Map<String, Value> = node
                .inputs
                .iter()
                .map(|(field, slot)| {
                    let desc = match slot {
                        InputSlot::Concrete(v) => json!({ "value": v }),
                        InputSlot::Lazy(l) => json!({ "lazy": format!("{}.{}", l.node, l.field) }),
                        InputSlot::Param(p) => json!({ "param": p }),
                    };
                    (field.clone(), desc)
                })
                .collect();
            json!({
                "name": &*node.name,
                "task": &*node.task.id,
                "kind": node.task.kind.label(),
                "inputs": inputs,
                "splits": node.splits.iter().map(|g| json!({
                    "axis": &*g.axis,
                    "fields": g.fields,
                    "len": g.len,
                })).collect::<Vec<_>>(),
                "combines": node.combines.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            })
        })
        .collect();

    let outputs: Map<String, Value> = spec
        .outputs
        .iter()
        .map(|(name, lazy)| {
            (
                name.clone(),
                json!(format!("{}.{}", lazy.node, lazy.field)),
            )
        })
        .collect();

    let record = json!({
        "name": &*spec.name,
        "nodes": nodes,
        "outputs": outputs,
    });
    Ok(sha256_hex(&serde_json::to_vec(&record)?))
}

fn canonicalize_value(value: &Value, ty: Option<&TypeSpec>) -> Result<Value> {
    match (value, ty) {
        (Value::String(path), Some(TypeSpec::File(_))) => {
            Ok(json!({ "content_sha256": file_digest(path)? }))
        }
        (Value::Array(items), Some(TypeSpec::Seq(elem) | TypeSpec::Set(elem))) => {
            let canonical: Result<Vec<Value>> = items
                .iter()
                .map(|v| canonicalize_value(v, Some(elem)))
                .collect();
            Ok(Value::Array(canonical?))
        }
        (Value::Array(items), Some(TypeSpec::Tuple(elems))) if items.len() == elems.len() => {
            let canonical: Result<Vec<Value>> = items
                .iter()
                .zip(elems)
                .map(|(v, t)| canonicalize_value(v, Some(t)))
                .collect();
            Ok(Value::Array(canonical?))
        }
        (Value::Object(entries), _) => {
            // Objects re-serialize with sorted keys
            let mut sorted: Vec<(&String, &Value)> = entries.iter().collect();
            sorted.sort_by_key(|(k, _)| k.clone());
            let mut canonical = Map::new();
            for (k, v) in sorted {
                canonical.insert(k.clone(), canonicalize_value(v, None)?);
            }
            Ok(Value::Object(canonical))
        }
        _ => Ok(value.clone()),
    }
}
