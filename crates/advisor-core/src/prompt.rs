//! Prompt Builder
//!
//! Renders the system preamble, the tool catalog and the user query into
//! the single prompt string the model continues.

use crate::tool::ToolDescriptor;

/// Sentinel rendered in place of an empty catalog
pub const NO_TOOLS: &str = "No tools available.";

/// Default persona for the health advisor
pub const DEFAULT_INTRO: &str = "You are a helpful Oura health advisor. You can access the user's Oura ring data through available tools.";

/// List each tool as `- name: description`, one per line
pub fn describe_tools(tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return NO_TOOLS.to_string();
    }

    let mut out = String::new();
    for tool in tools {
        out.push_str("- ");
        out.push_str(&tool.name);
        out.push_str(": ");
        out.push_str(&tool.description);
        out.push('\n');
    }
    out
}

/// System preamble: persona, catalog and the tool-call convention
pub fn system_prompt(intro: &str, tools: &[ToolDescriptor]) -> String {
    format!(
        r#"{intro}

Available Tools:
{catalog}

When the user asks a question that requires data, you should call the appropriate tool using this format:
TOOL_CALL: tool_name
ARGUMENTS: {{"key": "value"}}

After receiving tool results, analyze the data and provide a helpful, natural language response to the user's question.

If you don't need to call a tool, respond directly to the user's question."#,
        catalog = describe_tools(tools),
    )
}

/// Prompt that seeds a conversation
pub fn initial_prompt(intro: &str, tools: &[ToolDescriptor], user_query: &str) -> String {
    format!(
        "{}\n\nUser: {user_query}\n\nAssistant:",
        system_prompt(intro, tools)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("get_daily_sleep", "Gets daily sleep data."),
            ToolDescriptor::new("get_heart_rate", "Gets heart rate data."),
        ]
    }

    #[test]
    fn test_describe_tools_in_order() {
        assert_eq!(
            describe_tools(&catalog()),
            "- get_daily_sleep: Gets daily sleep data.\n- get_heart_rate: Gets heart rate data.\n"
        );
    }

    #[test]
    fn test_empty_catalog_sentinel() {
        assert_eq!(describe_tools(&[]), "No tools available.");
        assert!(system_prompt(DEFAULT_INTRO, &[]).contains("Available Tools:\nNo tools available.\n"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let tools = catalog();
        assert_eq!(system_prompt(DEFAULT_INTRO, &tools), system_prompt(DEFAULT_INTRO, &tools));
    }

    #[test]
    fn test_initial_prompt_shape() {
        let prompt = initial_prompt("Be brief.", &catalog(), "How did I sleep?");
        assert!(prompt.starts_with("Be brief.\n\nAvailable Tools:\n- get_daily_sleep"));
        assert!(prompt.contains("TOOL_CALL: tool_name\nARGUMENTS: {\"key\": \"value\"}"));
        assert!(prompt.ends_with("\n\nUser: How did I sleep?\n\nAssistant:"));
    }
}
