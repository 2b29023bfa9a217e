//! Extraction of function calls written as text in an LLM reply.
//!
//! Four notations are recognised, each with a confidence score:
//!
//! | notation | example | confidence |
//! |---|---|---|
//! | JSON tool use | ```` ```json {"tool_use": {"name": .., "parameters": {..}}} ``` ```` | 0.95 |
//! | XML | `<function_call name="web_search">{"query": "x"}</function_call>` | 0.9 |
//! | call syntax | `web_search(query="x", num_results=3)` | 0.8 |
//! | fenced call | ```` ```python web_search(query="x") ``` ```` | 0.7 |
//!
//! Only names in the caller's allowed list are kept. The same call found
//! through several notations is reported once, with its best confidence.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{Dispatcher, ToolCall};

static XML_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<function_call\s+name=["']([^"']+)["']\s*>\s*(\{[^}]*\})\s*</function_call>"#)
        .unwrap()
});

static JSON_TOOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)```json\s*\{\s*"tool_use"\s*:\s*\{\s*"name"\s*:\s*"([^"]+)"\s*,\s*"parameters"\s*:\s*(\{[^}]*\})\s*\}\s*\}\s*```"#,
    )
    .unwrap()
});

static CALL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)(\w+)\s*\(\s*([^)]*)\s*\)").unwrap());

static FENCED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(\w+)?\s*(\w+)\s*\(\s*([^)]*)\s*\)\s*```").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFormat {
    JsonToolUse,
    Xml,
    Standard,
    Markdown,
}

impl CallFormat {
    pub fn confidence(&self) -> f32 {
        match self {
            CallFormat::JsonToolUse => 0.95,
            CallFormat::Xml => 0.9,
            CallFormat::Standard => 0.8,
            CallFormat::Markdown => 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub name: String,
    pub arguments: Map<String, Value>,
    pub raw_text: String,
    pub format: CallFormat,
    pub confidence: f32,
}

impl ParsedCall {
    fn new(name: &str, arguments: Map<String, Value>, raw_text: &str, format: CallFormat) -> Self {
        Self {
            name: name.to_string(),
            arguments,
            raw_text: raw_text.to_string(),
            format,
            confidence: format.confidence(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FunctionCallParser;

impl FunctionCallParser {
    pub fn new() -> Self {
        Self
    }

    /// Every call to an allowed tool found in `text`.
    pub fn parse(&self, text: &str, allowed: &[String]) -> Vec<ParsedCall> {
        let is_allowed = |name: &str| allowed.iter().any(|a| a == name);
        let mut calls = Vec::new();

        for caps in XML_RE.captures_iter(text) {
            let (raw, [name, body]) = caps.extract();
            if !is_allowed(name) {
                continue;
            }
            match json_object(body) {
                Some(args) => calls.push(ParsedCall::new(name, args, raw, CallFormat::Xml)),
                None => warn!("Invalid JSON in XML function call: {body}"),
            }
        }

        for caps in JSON_TOOL_RE.captures_iter(text) {
            let (raw, [name, body]) = caps.extract();
            if !is_allowed(name) {
                continue;
            }
            match json_object(body) {
                Some(args) => calls.push(ParsedCall::new(name, args, raw, CallFormat::JsonToolUse)),
                None => warn!("Invalid JSON in tool use block: {body}"),
            }
        }

        for caps in CALL_RE.captures_iter(text) {
            let (raw, [name, args]) = caps.extract();
            if is_allowed(name) {
                calls.push(ParsedCall::new(name, parse_arguments(args), raw, CallFormat::Standard));
            }
        }

        for caps in FENCED_RE.captures_iter(text) {
            let raw = caps.get(0).map_or("", |m| m.as_str());
            let name = caps.get(2).map_or("", |m| m.as_str());
            let args = caps.get(3).map_or("", |m| m.as_str());
            if is_allowed(name) {
                calls.push(ParsedCall::new(name, parse_arguments(args), raw, CallFormat::Markdown));
            }
        }

        let calls = deduplicate(calls);
        if !calls.is_empty() {
            info!("Parsed {} function calls from LLM response", calls.len());
        }
        calls
    }

    /// Check a parsed call against the dispatcher's schema for the tool.
    pub fn validate(&self, call: &ParsedCall, dispatcher: &Dispatcher) -> Result<(), String> {
        let spec = dispatcher
            .spec(&call.name)
            .ok_or_else(|| format!("Tool '{}' not found in available tools", call.name))?;
        match spec
            .required_params()
            .into_iter()
            .find(|p| !call.arguments.contains_key(*p))
        {
            Some(missing) => Err(format!("Missing required parameter: {missing}")),
            None => Ok(()),
        }
    }

    pub fn to_tool_calls(&self, calls: &[ParsedCall]) -> Vec<ToolCall> {
        calls
            .iter()
            .map(|c| ToolCall::new(&c.name, Value::Object(c.arguments.clone())))
            .collect()
    }
}

fn json_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Arguments of a call-syntax invocation: a JSON object body (with or
/// without braces) or `key=value` pairs.
pub fn parse_arguments(args: &str) -> Map<String, Value> {
    let args = args.trim();
    if args.is_empty() {
        return Map::new();
    }
    if let Some(map) = json_object(args).or_else(|| json_object(&format!("{{{args}}}"))) {
        return map;
    }

    let mut out = Map::new();
    for part in split_outside_quotes(args, ',') {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim().trim_matches(|c| c == '"' || c == '\'');
        if !key.is_empty() {
            out.insert(key.to_string(), parse_value(value));
        }
    }
    out
}

/// Split on `delimiter` except inside single or double quotes.
pub fn split_outside_quotes(text: &str, delimiter: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in text.chars() {
        match quote {
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            Some(q) if c == q => {
                quote = None;
                current.push(c);
            }
            None if c == delimiter => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Typed value of a `key=value` right-hand side.
pub fn parse_value(raw: &str) -> Value {
    let raw = raw.trim();
    let quoted = raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')));
    if quoted {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }

    match raw.to_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "none" | "null" => return Value::Null,
        _ => {}
    }

    if raw.contains('.') {
        if let Some(n) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return Value::Number(n);
        }
    } else if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }

    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Stable text form of a value with object keys sorted.
fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical(&map[k])))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

/// One entry per (name, arguments), keeping the most confident, in order
/// of first appearance.
fn deduplicate(calls: Vec<ParsedCall>) -> Vec<ParsedCall> {
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut out: Vec<ParsedCall> = Vec::new();
    for call in calls {
        let key = (
            call.name.clone(),
            canonical(&Value::Object(call.arguments.clone())),
        );
        match index.get(&key) {
            Some(&i) => {
                if call.confidence > out[i].confidence {
                    out[i] = call;
                }
            }
            None => {
                index.insert(key, out.len());
                out.push(call);
            }
        }
    }
    out
}
