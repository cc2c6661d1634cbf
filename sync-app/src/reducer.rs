//! Demo application state: a shared counter.

use sync_client::State;
use serde_json::{json, Value};
use sync_types::Action;

/// State before any action is applied.
pub fn initial_state() -> State {
    json!({ "value": 0 })
}

/// Counter reducer: `counter/add` bumps by `amount` (default 1),
/// `counter/reset` starts over, anything else is ignored.
pub fn reducer(state: &State, action: &Action) -> State {
    let value = state["value"].as_i64().unwrap_or(0);
    match action.kind.as_str() {
        "counter/add" => {
            let amount = action.field("amount").and_then(Value::as_i64).unwrap_or(1);
            json!({ "value": value + amount })
        }
        "counter/reset" => initial_state(),
        _ => state.clone(),
    }
}
