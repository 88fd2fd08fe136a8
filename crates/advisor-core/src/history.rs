//! Conversation History
//!
//! Append-only transcript owned by a single query. The model sees it as one
//! flat prompt, so it is kept as ordered text segments rather than chat
//! messages.

use serde::Serialize;

/// Kind of a transcript segment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// System preamble, tool catalog and the user query
    Prompt,
    /// Raw model continuation
    Completion,
    /// Tool result annotation
    ToolResult,
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prompt => write!(f, "prompt"),
            Self::Completion => write!(f, "completion"),
            Self::ToolResult => write!(f, "tool_result"),
        }
    }
}

/// A single piece of the transcript
#[derive(Clone, Debug, Serialize)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
}

/// Transcript of one advisor run
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConversationHistory {
    segments: Vec<Segment>,
}

impl ConversationHistory {
    /// Start a transcript from the initial prompt
    pub fn seeded(prompt: impl Into<String>) -> Self {
        let mut history = Self::default();
        history.push(SegmentKind::Prompt, prompt.into());
        history
    }

    /// Append a raw model continuation
    pub fn push_completion(&mut self, completion: &str) {
        self.push(SegmentKind::Completion, completion.to_string());
    }

    /// Append a tool result annotation
    pub fn push_tool_result(&mut self, result: &str) {
        self.push(SegmentKind::ToolResult, format!("\nTool Result: {result}\n"));
    }

    fn push(&mut self, kind: SegmentKind, text: String) {
        self.segments.push(Segment { kind, text });
    }

    /// Full transcript text, one line break after every segment
    pub fn render(&self) -> String {
        let capacity = self.segments.iter().map(|s| s.text.len() + 1).sum();
        let mut out = String::with_capacity(capacity);
        for segment in &self.segments {
            out.push_str(&segment.text);
            out.push('\n');
        }
        out
    }

    /// All segments in order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Get the last segment
    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_appends_newline_per_segment() {
        let mut history = ConversationHistory::seeded("User: hi\n\nAssistant:");
        history.push_completion("TOOL_CALL: get_sleep");
        history.push_tool_result("slept 7h");

        assert_eq!(
            history.render(),
            "User: hi\n\nAssistant:\nTOOL_CALL: get_sleep\n\nTool Result: slept 7h\n\n"
        );
        assert_eq!(history.len(), 3);
        assert_eq!(history.last().map(|s| s.kind), Some(SegmentKind::ToolResult));
    }

    #[test]
    fn test_kinds_in_order() {
        let mut history = ConversationHistory::seeded("p");
        history.push_completion("c");
        let kinds: Vec<_> = history.segments().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SegmentKind::Prompt, SegmentKind::Completion]);
    }
}
