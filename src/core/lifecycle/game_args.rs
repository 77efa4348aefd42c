use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::core::manifest::GameArgSpec;

/// Brings a saved game's argument values in line with a module's `gameArgs` schema.
///
/// Unknown keys are dropped, missing keys get the schema default and values of the
/// wrong shape are reset to it. Returns `None` when nothing changed, so callers only
/// persist real edits.
pub fn reconcile_game_args(
    schema: &IndexMap<String, GameArgSpec>,
    values: &Map<String, Value>,
) -> Option<Map<String, Value>> {
    let mut reconciled = Map::new();
    for (key, spec) in schema {
        let value = match values.get(key) {
            Some(value) if spec.accepts(value) => value.clone(),
            _ => spec.default_value(),
        };
        reconciled.insert(key.clone(), value);
    }
    if reconciled == *values {
        None
    } else {
        Some(reconciled)
    }
}
