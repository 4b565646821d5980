use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Turn parsing
// =============================================================================

/// The three logical channels derived from one model turn.
///
/// Recomputed from scratch on every buffer snapshot; never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ParsedTurn {
    pub preview_html: String,
    pub code: String,
    pub description: String,
    /// Path of a trailing block that is still being streamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_path: Option<String>,
}

/// Caller-known facts about the turn being parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnContext {
    pub is_first_request: bool,
    /// The upstream stream has ended; trailing blocks are final.
    pub complete: bool,
}

impl TurnContext {
    pub fn streaming(is_first_request: bool) -> Self {
        Self { is_first_request, complete: false }
    }

    pub fn finished(is_first_request: bool) -> Self {
        Self { is_first_request, complete: true }
    }
}

/// One project file extracted from a completed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FileRecord {
    pub path: String,
    pub content: String,
}

// =============================================================================
// Conversation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct GeneratedContent {
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// One entry of the caller-held conversation, replayed as model context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    /// Client-supplied timestamp, passed through untouched.
    #[serde(default)]
    #[ts(type = "string | number | null")]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_content: Option<GeneratedContent>,
}

// =============================================================================
// Fixer reports
// =============================================================================

/// Report of one fixer pass. `success` is true when `errors` is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FixResult {
    pub success: bool,
    pub fixes: Vec<String>,
    pub errors: Vec<String>,
    pub fixed_files: Vec<String>,
}

impl FixResult {
    pub fn record_fix(&mut self, description: impl Into<String>) {
        self.fixes.push(description.into());
    }

    pub fn record_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.fixed_files.contains(&path) {
            self.fixed_files.push(path);
        }
    }

    pub fn record_error(&mut self, step: &str, error: impl std::fmt::Display) {
        self.errors.push(format!("{}: {}", step, error));
    }

    pub fn is_noop(&self) -> bool {
        self.fixes.is_empty() && self.fixed_files.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub fixes: Vec<String>,
    pub fixed_files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_turn_wire_names() {
        let turn = ParsedTurn {
            preview_html: "<p>x</p>".into(),
            code: String::new(),
            description: "d".into(),
            pending_path: None,
        };
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["previewHtml"], "<p>x</p>");
        assert!(value.get("pendingPath").is_none());
    }

    #[test]
    fn test_conversation_message_accepts_numeric_timestamp() {
        let msg: ConversationMessage = serde_json::from_str(
            r#"{"role":"assistant","content":"hi","timestamp":1700000000000,
                "generatedContent":{"preview":"<p/>","code":"x"}}"#,
        )
        .unwrap();
        assert_eq!(msg.role, MessageRole::Assistant);
        assert_eq!(msg.generated_content.unwrap().code, "x");
    }

    #[test]
    fn test_fix_result_dedupes_files() {
        let mut result = FixResult::default();
        result.record_file("package.json");
        result.record_file("package.json");
        assert_eq!(result.fixed_files, vec!["package.json"]);
        assert!(!result.is_noop());
    }
}
