use crate::domain::{DataDrivenBody, DataReplayMode, IdInjection, IdPoolMode};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;

/// Resolves `{{name}}` placeholders from `variables` in one pass. Unknown
/// names stay as written and substituted values are never rescanned.
pub fn interpolate(input: &str, variables: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find("{{") {
        let Some(name_len) = rest[open + 2..].find("}}") else {
            break;
        };
        let close = open + 2 + name_len + 2;
        out.push_str(&rest[..open]);
        match variables.get(rest[open + 2..close - 2].trim()) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[open..close]),
        }
        rest = &rest[close..];
    }

    out.push_str(rest);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodySelection {
    Record(String),
    Exhausted,
}

/// Picks the data record for a logical request index.
pub fn select_record(data: &DataDrivenBody, index: u64) -> BodySelection {
    if data.records.is_empty() {
        return BodySelection::Exhausted;
    }
    let len = data.records.len() as u64;
    match data.mode {
        DataReplayMode::Loop => BodySelection::Record(data.records[(index % len) as usize].clone()),
        DataReplayMode::Strict if index < len => {
            BodySelection::Record(data.records[index as usize].clone())
        }
        DataReplayMode::Strict => BodySelection::Exhausted,
    }
}

/// Best-effort ID substitution. Bodies that are not JSON objects come back untouched.
///
/// A configured pool wins over auto-increment; pool values go to both `id` and
/// `ncosId` when those fields exist, a generated ID goes to `id` only.
pub fn inject_dynamic_id(body: &str, policy: &IdInjection, index: u64) -> String {
    if policy.pool.is_empty() && !policy.auto_increment {
        return body.to_string();
    }

    let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(body) else {
        return body.to_string();
    };

    let mut replaced = false;
    if !policy.pool.is_empty() {
        let slot = match policy.pool_mode {
            IdPoolMode::Sequential => (index % policy.pool.len() as u64) as usize,
            IdPoolMode::Random => rand::thread_rng().gen_range(0..policy.pool.len()),
        };
        let value = &policy.pool[slot];
        for field in ["id", "ncosId"] {
            if let Some(existing) = object.get_mut(field) {
                *existing = value.clone();
                replaced = true;
            }
        }
    } else if let Some(existing) = object.get_mut("id") {
        *existing = Value::String(uuid::Uuid::new_v4().to_string());
        replaced = true;
    }

    if !replaced {
        return body.to_string();
    }
    Value::Object(object).to_string()
}
