//! deep merge and deep delete over JSON values
use crate::jsonpath::JsonPath;
use serde_json::Value;

/// Merge `overlay` onto `target`
///
/// Objects are merged key by key, recursively. Anything else (arrays, scalars, mismatched types) is taken from
/// `overlay` wholesale.
pub fn deep_merge(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target), Value::Object(overlay)) => {
            for (key, overlay_value) in overlay {
                let both_objects =
                    overlay_value.is_object() && target.get(key).is_some_and(Value::is_object);

                match target.get_mut(key) {
                    Some(existing) if both_objects => deep_merge(existing, overlay_value),
                    _ => {
                        target.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (target, overlay) => *target = overlay.clone(),
    }
}

/// Delete whatever is at `path`
///
/// Deleting the root empties `target` to `{}`. Returns `None` when there was nothing to delete.
pub fn deep_delete(target: &mut Value, path: &JsonPath) -> Option<Value> {
    if path.is_root() {
        return Some(std::mem::replace(
            target,
            Value::Object(serde_json::Map::new()),
        ));
    }

    path.remove(target)
}
