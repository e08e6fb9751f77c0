//! A general-purpose world for running block programs over JSON states.
//!
//! Programs read and write named fields of a JSON object:
//! `getState('score')`, `setState('score', 3)`. `waitStep()` pauses the
//! program until the next step.

use serde_json::Value as Json;

use crate::interpreter::{BlockError, CustomBlock, ExecutionContext, StateHandle};
use crate::vm::Value;

fn key_arg(args: &[Value], block: &str) -> Result<String, BlockError> {
    match args.first() {
        Some(Value::Text(key)) => Ok(key.to_string()),
        Some(other) if !other.is_nullish() => Ok(other.to_string()),
        _ => Err(BlockError::failed(format!("{block}: expected a field name"))),
    }
}

fn get_state(_: &ExecutionContext, state: &mut Json, args: Vec<Value>) -> Result<Value, BlockError> {
    if args.is_empty() {
        return Ok(Value::from_json(state));
    }
    let key = key_arg(&args, "getState")?;
    Ok(state.get(&key).map(Value::from_json).unwrap_or_default())
}

fn set_state(_: &ExecutionContext, state: &mut Json, args: Vec<Value>) -> Result<Value, BlockError> {
    let key = key_arg(&args, "setState")?;
    let value = args.get(1).cloned().unwrap_or_default();
    let Json::Object(fields) = state else {
        return Err(BlockError::failed("setState: the world state is not a JSON object"));
    };
    fields.insert(key, value.to_json());
    Ok(value)
}

async fn wait_step(ctx: ExecutionContext, _: StateHandle<Json>, _: Vec<Value>) -> Result<Value, BlockError> {
    ctx.pause().await;
    Ok(Value::Undefined)
}

/// `getState`, `setState` and `waitStep`.
pub fn json_world_blocks() -> Vec<CustomBlock<Json>> {
    vec![
        CustomBlock::new("getState", get_state),
        CustomBlock::new("setState", set_state),
        CustomBlock::new_async("waitStep", wait_step),
    ]
}
