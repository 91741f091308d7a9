//! Per-command reinterpretation of decoded replies.
//!
//! The decoder only knows the generic reply shapes. Which of them is a boolean, a map or a list of
//! score pairs depends on the command that was sent, so the pipeline looks the command up here
//! once, right before the callback runs.

use std::collections::HashMap;

use itertools::Itertools;

use crate::command::Cmd;
use crate::reply::Reply;
use crate::value::Value;

type Transform = fn(Value, &Cmd) -> Value;

/// Converts a non-error reply into the value handed to the callback of `cmd`.
pub fn typecast(cmd: &Cmd, reply: Reply) -> Value {
    let value = Value::from_reply(reply, cmd.is_binary());

    match transform_for(cmd.name()) {
        Some(transform) => transform(value, cmd),
        None => value,
    }
}

fn transform_for(name: &str) -> Option<Transform> {
    match name {
        "exists" | "hexists" | "sismember" | "renamenx" | "setnx" | "msetnx" | "expire"
        | "expireat" | "persist" | "move" | "smove" | "hsetnx" => Some(to_bool),
        "info" => Some(to_info),
        "zrange" | "zrevrange" | "zrangebyscore" | "zrevrangebyscore" => Some(to_scored_members),
        "hgetall" => Some(to_map),
        _ => None,
    }
}

/// `:0`/`:1` to `false`/`true`.
fn to_bool(value: Value, _: &Cmd) -> Value {
    match value {
        Value::Int(n) => Value::Bool(n != 0),
        value => value,
    }
}

/// A block of `key:value` lines to a map. Section headers and blank lines are skipped.
///
/// Ref: <https://redis.io/docs/latest/commands/info/>
fn to_info(value: Value, _: &Cmd) -> Value {
    let text = match &value {
        Value::Text(text) => text.as_str(),
        _ => return value,
    };

    let info = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.to_string(), Value::Text(value.to_string())))
        .collect();

    Value::Map(info)
}

/// `[member, score, member, score, ...]` to `[{member: score}, ...]`, only when `WITHSCORES` was
/// given.
fn to_scored_members(value: Value, cmd: &Cmd) -> Value {
    if !cmd.with_scores() {
        return value;
    }

    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .tuples()
                .map(|(member, score)| Value::Map(HashMap::from([(member.into_key(), score)])))
                .collect(),
        ),
        value => value,
    }
}

/// `[field, value, field, value, ...]` to `{field: value, ...}`.
fn to_map(value: Value, _: &Cmd) -> Value {
    match value {
        Value::Array(items) => Value::Map(
            items
                .into_iter()
                .tuples()
                .map(|(field, value)| (field.into_key(), value))
                .collect(),
        ),
        value => value,
    }
}
