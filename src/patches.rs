use json_patch::jsonptr::Pointer;
use json_patch::PatchOperation;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("failed to serialize object snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Minimal JSON Patch between two snapshots of the same object, sorted
/// ascending by path. The underlying diff does not guarantee an order;
/// callers and tests require determinism.
pub fn diff<T: Serialize>(before: &T, after: &T) -> Result<Vec<PatchOperation>, PatchError> {
    let before = serde_json::to_value(before)?;
    let after = serde_json::to_value(after)?;

    let mut ops = json_patch::diff(&before, &after).0;
    sort_ops(&mut ops);
    Ok(ops)
}

/// Ascending by path. Mutators call this after combining their explicit
/// operations with the defaulting diff.
pub fn sort_ops(ops: &mut [PatchOperation]) {
    ops.sort_by(|a, b| op_path(a).as_str().cmp(op_path(b).as_str()));
}

/// Drops operations under `prefix`, preserving the relative order of the
/// rest. Used to suppress defaulting noise for sub-trees a different
/// component owns.
pub fn skip_for_path(prefix: &str, ops: Vec<PatchOperation>) -> Vec<PatchOperation> {
    ops.into_iter()
        .filter(|op| {
            let path = op_path(op).as_str();
            !(path == prefix || path.starts_with(&format!("{prefix}/")))
        })
        .collect()
}

fn op_path(op: &PatchOperation) -> &Pointer {
    match op {
        PatchOperation::Add(o) => &o.path,
        PatchOperation::Remove(o) => &o.path,
        PatchOperation::Replace(o) => &o.path,
        PatchOperation::Move(o) => &o.path,
        PatchOperation::Copy(o) => &o.path,
        PatchOperation::Test(o) => &o.path,
    }
}
