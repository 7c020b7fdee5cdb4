//! Read-only dotted-path lookup used as the loop's exit predicate.

use serde_json::Value;

/// Evaluate `path` (e.g. `last_refinement.is_valid`) against `root`.
///
/// Missing segments, nulls and non-boolean leaves evaluate to `false`.
/// Numeric segments index into arrays.
pub fn evaluate_exit_path(root: &Value, path: &str) -> bool {
    resolve(root, path).and_then(Value::as_bool).unwrap_or(false)
}

/// Resolve `path` without interpreting the leaf.
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
