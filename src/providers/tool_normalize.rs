//! Tool-definition normalisation (§4.1, §9): a single pure function
//! shared by every provider adapter that accepts `tools`, factored out
//! of the per-provider request builders so it only needs proving once.

use serde_json::{json, Map, Value};

/// Rewrite a list of OpenAI-shaped tool definitions to the canonical
/// `{type:"function", function:{name, description, parameters}}` form.
///
/// Accepts both the bare `{name, description, parameters}` shape and
/// the already-wrapped `{type:"function", function:{...}}` shape.
/// Non-function tools (any entry whose `type` is present and not
/// `"function"`) pass through unchanged. A `strict` field, wherever it
/// appears, is stripped — no provider this gateway talks to supports it.
pub fn normalize_tools(tools: &[Value]) -> Vec<Value> {
    tools.iter().filter_map(normalize_tool).collect()
}

fn normalize_tool(tool: &Value) -> Option<Value> {
    let obj = tool.as_object()?;

    if let Some(t) = obj.get("type").and_then(Value::as_str) {
        if t != "function" {
            return Some(tool.clone());
        }
    }

    let function_obj = obj.get("function").and_then(Value::as_object).unwrap_or(obj);

    let name = function_obj.get("name").and_then(Value::as_str)?;

    let description = function_obj
        .get("description")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("Execute {name} function"));

    let mut parameters: Map<String, Value> = function_obj
        .get("parameters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    parameters.remove("strict");
    if !parameters.contains_key("type") {
        parameters.insert("type".to_string(), json!("object"));
    }

    Some(json!({
        "type": "function",
        "function": {
            "name": name,
            "description": description,
            "parameters": parameters,
        }
    }))
}
