//! Tool-Call Parser
//!
//! Detects the two-line convention the model uses to request a tool:
//!
//! ```text
//! TOOL_CALL: get_daily_sleep
//! ARGUMENTS: {"start_date": "2024-05-01"}
//! ```
//!
//! Markers are matched case-insensitively anywhere in the completion. A
//! missing or malformed argument object degrades to an empty map; only the
//! absence of a tool name means "no call".

use serde_json::Value;

use crate::tool::{ToolArguments, ToolInvocation};

const TOOL_CALL_MARKER: &str = "TOOL_CALL:";
const ARGUMENTS_MARKER: &str = "ARGUMENTS:";

/// Extract the first tool invocation from model output
pub fn parse_tool_call(output: &str) -> Option<ToolInvocation> {
    let name = marker_positions(output, TOOL_CALL_MARKER)
        .find_map(|after| tool_name(&output[after..]))?;

    let arguments = marker_positions(output, ARGUMENTS_MARKER)
        .find_map(|after| json_object_span(&output[after..]))
        .map(decode_arguments)
        .unwrap_or_default();

    Some(ToolInvocation {
        name: name.to_string(),
        arguments,
    })
}

/// Byte offsets just past each case-insensitive occurrence of an ASCII marker
fn marker_positions<'a>(haystack: &'a str, marker: &'a str) -> impl Iterator<Item = usize> + 'a {
    let bytes = haystack.as_bytes();
    let needle = marker.as_bytes();
    (0..bytes.len().saturating_sub(needle.len() - 1))
        .filter(move |&start| bytes[start..start + needle.len()].eq_ignore_ascii_case(needle))
        .map(move |start| start + needle.len())
}

/// Word characters following optional whitespace
fn tool_name(rest: &str) -> Option<&str> {
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    (end > 0).then(|| &rest[..end])
}

/// Shortest balanced `{...}` span following optional whitespace
///
/// Braces inside JSON string literals do not count.
fn json_object_span(rest: &str) -> Option<&str> {
    let rest = rest.trim_start();
    if !rest.starts_with('{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in rest.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[..=idx]);
                }
            }
            _ => {}
        }
    }

    None
}

fn decode_arguments(span: &str) -> ToolArguments {
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            tracing::debug!(arguments = span, "Ignoring malformed tool arguments");
            ToolArguments::new()
        }
    }
}
