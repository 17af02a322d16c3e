// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Extraction of skill and capability calls from a model response.
//!
//! Sources are tried in order and the first one that yields calls wins:
//! 1. Structured `tool_calls`
//! 2. `skill_calls` / `capability_calls` fields on the raw assistant message
//! 3. JSON objects tagged `"type": "skill_call"` or `"capability_call"`
//!    embedded in the text

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::capabilities::taxonomy;
use crate::catalog::AgentConfig;
use crate::types::{ProviderResponse, ToolCall};

/// A call tag anywhere in text; used to flag content that names a call but
/// holds no parseable one.
static CALL_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""type"\s*:\s*"(?:skill_call|capability_call)""#)
        .expect("call tag pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Skill,
    Capability,
}

/// Where the calls were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    ToolCalls,
    CustomFields,
    ContentScan,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedCall {
    pub kind: CallKind,
    pub name: String,
    pub arguments: Value,
}

/// Calls requested by a response, and where they came from.
pub fn parse_intents(response: &ProviderResponse) -> (Vec<ParsedCall>, IntentSource) {
    let calls: Vec<ParsedCall> = response.tool_calls.iter().filter_map(from_tool_call).collect();
    if !calls.is_empty() {
        return (calls, IntentSource::ToolCalls);
    }

    if let Some(raw) = &response.raw_message {
        let calls = from_custom_fields(raw);
        if !calls.is_empty() {
            return (calls, IntentSource::CustomFields);
        }
    }

    let calls = scan_content(&response.content);
    if !calls.is_empty() {
        return (calls, IntentSource::ContentScan);
    }

    (Vec::new(), IntentSource::None)
}

/// `skill_call` / `capability_call` wrappers carry the target in their
/// input; any other tool name is a capability when the taxonomy knows it
/// and a skill otherwise.
fn from_tool_call(call: &ToolCall) -> Option<ParsedCall> {
    match call.name.as_str() {
        "skill_call" => from_tagged(CallKind::Skill, &call.input),
        "capability_call" => from_tagged(CallKind::Capability, &call.input),
        name => {
            let kind = if taxonomy::find(name).is_some() {
                CallKind::Capability
            } else {
                CallKind::Skill
            };
            Some(ParsedCall {
                kind,
                name: name.to_string(),
                arguments: normalize_arguments(Some(&call.input)),
            })
        }
    }
}

fn from_custom_fields(raw: &Value) -> Vec<ParsedCall> {
    let mut calls = Vec::new();
    for (field, kind) in [
        ("skill_calls", CallKind::Skill),
        ("capability_calls", CallKind::Capability),
    ] {
        if let Some(items) = raw.get(field).and_then(Value::as_array) {
            calls.extend(items.iter().filter_map(|item| from_tagged(kind, item)));
        }
    }
    calls
}

fn tagged_kind(obj: &Value) -> Option<CallKind> {
    match obj.get("type").and_then(Value::as_str) {
        Some("skill_call") => Some(CallKind::Skill),
        Some("capability_call") => Some(CallKind::Capability),
        _ => None,
    }
}

/// Parse a JSON value at every `{` and keep the tagged objects. A tagged
/// object is consumed whole; anything else is stepped into, so tags nested
/// inside other objects are still found.
fn scan_content(content: &str) -> Vec<ParsedCall> {
    let mut calls = Vec::new();
    let mut pos = 0;

    while let Some(offset) = content[pos..].find('{') {
        let start = pos + offset;
        let mut stream =
            serde_json::Deserializer::from_str(&content[start..]).into_iter::<Value>();
        pos = match stream.next() {
            Some(Ok(obj)) => match tagged_kind(&obj) {
                Some(kind) => {
                    calls.extend(from_tagged(kind, &obj));
                    start + stream.byte_offset()
                }
                None => start + 1,
            },
            _ => start + 1,
        };
    }

    if calls.is_empty() && CALL_TAG.is_match(content) {
        warn!("Response names a skill or capability call but none could be parsed");
    }
    calls
}

/// Read a call object such as `{"name": "...", "arguments": {...}}`.
fn from_tagged(kind: CallKind, obj: &Value) -> Option<ParsedCall> {
    let name_keys: &[&str] = match kind {
        CallKind::Skill => &["name", "skill", "skill_name"],
        CallKind::Capability => &["name", "capability", "capability_name"],
    };
    let name = name_keys
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .filter(|n| !n.trim().is_empty())?;

    let arguments = ["arguments", "args", "parameters", "params"]
        .iter()
        .find_map(|k| obj.get(*k));

    Some(ParsedCall {
        kind,
        name: name.trim().to_string(),
        arguments: normalize_arguments(arguments),
    })
}

/// Arguments as an object. JSON strings are decoded; anything else is
/// wrapped as `{"input": ...}`.
fn normalize_arguments(arguments: Option<&Value>) -> Value {
    match arguments {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => serde_json::json!({ "input": s }),
        },
        Some(other) => serde_json::json!({ "input": other }),
    }
}

/// Drop calls the agent has not declared.
///
/// An agent without a declared list for a kind accepts every call of that
/// kind when `trust_undeclared` is set, and none otherwise.
pub fn validate_calls(
    calls: Vec<ParsedCall>,
    agent: &AgentConfig,
    trust_undeclared: bool,
) -> Vec<ParsedCall> {
    calls
        .into_iter()
        .filter(|call| {
            let declared = match call.kind {
                CallKind::Skill => agent.skills.as_ref(),
                CallKind::Capability => agent.capabilities.as_ref(),
            };
            match declared {
                Some(list) => {
                    let allowed = list.iter().any(|d| d == &call.name);
                    if !allowed {
                        warn!(
                            agent_id = %agent.agent_id,
                            kind = ?call.kind,
                            name = %call.name,
                            "Dropping call to undeclared target"
                        );
                    }
                    allowed
                }
                None if trust_undeclared => {
                    warn!(
                        agent_id = %agent.agent_id,
                        kind = ?call.kind,
                        name = %call.name,
                        "Agent declares no list; trusting call"
                    );
                    true
                }
                None => {
                    warn!(
                        agent_id = %agent.agent_id,
                        kind = ?call.kind,
                        name = %call.name,
                        "Agent declares no list; dropping call"
                    );
                    false
                }
            }
        })
        .collect()
}
