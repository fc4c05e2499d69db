// ============================================================================
// NESTED TREE MUTATION
// ============================================================================
// Status documents are JSON trees. Writing walks the parsed path, creating
// missing intermediate maps, and refuses to walk through anything that is not
// a map. The terminal key is always overwritten.
// ============================================================================

use serde_json::{Map, Value};

use crate::error::{PathError, PathResult};
use crate::path::FieldPath;

/// A mapping node of a status document.
pub type Tree = Map<String, Value>;

/// Write `value` at `path` inside `root`.
///
/// Intermediate segments must be absent (a new map is created) or already hold
/// a map. An existing non-map intermediate fails with [`PathError::NotAMap`]
/// before anything is written, so the branch is left as it was.
pub fn set_value(root: &mut Tree, path: &FieldPath, value: Value) -> PathResult<()> {
    let (parents, last) = path.split_last();

    let mut current = root;
    for segment in parents {
        let next = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match next {
            Value::Object(map) => map,
            _ => {
                return Err(PathError::NotAMap {
                    segment: segment.clone(),
                })
            }
        };
    }

    current.insert(last.to_string(), value);
    Ok(())
}

/// Parse `key` and write `value` there in one step.
pub fn set_nested_key(root: &mut Tree, key: &str, value: Value) -> PathResult<()> {
    let path = FieldPath::parse(key)?;
    set_value(root, &path, value)
}

/// Sequential key lookup. `None` if any segment is missing or an
/// intermediate is not a map.
pub fn get_value<'a>(root: &'a Tree, path: &FieldPath) -> Option<&'a Value> {
    let (parents, last) = path.split_last();

    let mut current = root;
    for segment in parents {
        current = current.get(segment)?.as_object()?;
    }
    current.get(last)
}
