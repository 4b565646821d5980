use super::llm::ChatMessage;
use super::types::{ConversationMessage, MessageRole};

/// Per-message cap for replayed history, in characters.
const MAX_HISTORY_MESSAGE_CHARS: usize = 12_000;

const OUTPUT_PROTOCOL: &str = r#"**Output format (strict):**
- Emit every file as a virtual file block:
  /// file: path/to/file.ext
  <contents>
  /// endfile
- Do not wrap file blocks in markdown fences.
- Keep prose outside the blocks short: one or two sentences at most.
- Always finish with a standalone preview document:
  /// file: preview.html
  <!DOCTYPE html>
  <html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Preview</title>
    <script src="https://cdn.tailwindcss.com"></script>
  </head>
  <body>
    <!-- Minimal preview replicating the user's request -->
  </body>
  </html>
  /// endfile"#;

const TARGET_STACK: &str = r#"Target stack (the project is normalized to this after generation):
- Vite 5 + React 18 + TypeScript 5
- Tailwind CSS 3 for styling
- Entry point src/main.tsx rendering src/App.tsx into index.html
- Import project modules through the '@/' alias, which maps to ./src (e.g. '@/components/Button')
- Put components in src/components, pages in src/pages, helpers in src/utils or src/libs"#;

/// System instruction for the first turn of a conversation.
pub fn first_turn_instruction() -> String {
    format!(
        "You are an expert software engineer. Generate production-quality, runnable code for the \
user's requested website or web application.\n\n{}\n\n**Rules:**\n\
- Output the full runnable project: package.json, index.html, src/main.tsx, src/App.tsx and every component.\n\
- Prefer TypeScript, strong typing and modern, stable patterns.\n\
- Gate external API calls behind environment variables and show sample values as comments.\n\
- Robust error handling for all async operations. No TODOs.\n\n{}",
        TARGET_STACK, OUTPUT_PROTOCOL
    )
}

/// System instruction for follow-up turns: only changed files are emitted.
pub fn follow_up_instruction() -> String {
    format!(
        "You are continuing work on a project you generated earlier in this conversation.\n\n{}\n\n\
**Rules:**\n\
- Output ONLY the files that change, each in full. Do not repeat unchanged files.\n\
- Start with one sentence describing the change.\n\
- Keep existing file paths and the '@/' import alias.\n\n{}",
        TARGET_STACK, OUTPUT_PROTOCOL
    )
}

/// Assemble the chat request: system instruction, the most recent
/// `history_window` messages of history, then the new prompt.
pub fn build_messages(
    prompt: &str,
    history: &[ConversationMessage],
    is_first_request: bool,
    history_window: usize,
) -> Vec<ChatMessage> {
    let system = if is_first_request {
        first_turn_instruction()
    } else {
        follow_up_instruction()
    };

    let mut messages = vec![ChatMessage::system(system)];
    if !is_first_request {
        let start = history.len().saturating_sub(history_window);
        messages.extend(
            history[start..]
                .iter()
                .filter_map(replay_message),
        );
    }
    messages.push(ChatMessage::user(prompt.trim()));
    messages
}

fn replay_message(message: &ConversationMessage) -> Option<ChatMessage> {
    let mut content = message.content.trim().to_string();
    if message.role == MessageRole::Assistant {
        if let Some(generated) = &message.generated_content {
            let code = generated.code.trim();
            if !code.is_empty() && !content.contains(code) {
                if !content.is_empty() {
                    content.push_str("\n\n");
                }
                content.push_str(code);
            }
        }
    }
    if content.is_empty() {
        return None;
    }
    Some(ChatMessage {
        role: message.role.as_str().to_string(),
        content: truncate_chars(&content, MAX_HISTORY_MESSAGE_CHARS),
    })
}

/// Keep the last `max` characters: for replayed code the tail is the
/// most recent state.
fn truncate_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    let skip = count - max;
    let start = text.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(0);
    format!("…{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::GeneratedContent;

    fn msg(role: MessageRole, content: &str) -> ConversationMessage {
        ConversationMessage {
            role,
            content: content.into(),
            timestamp: None,
            generated_content: None,
        }
    }

    #[test]
    fn test_first_request_ignores_history() {
        let history = vec![msg(MessageRole::User, "old")];
        let messages = build_messages("build a todo app", &history, true, 10);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("/// file: preview.html"));
        assert_eq!(messages[1].content, "build a todo app");
    }

    #[test]
    fn test_follow_up_replays_window() {
        let history: Vec<_> = (0..6)
            .map(|i| msg(if i % 2 == 0 { MessageRole::User } else { MessageRole::Assistant }, &format!("m{}", i)))
            .collect();
        let messages = build_messages("make it blue", &history, false, 4);
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[1..5], ["m2", "m3", "m4", "m5"]);
        assert!(messages[0].content.contains("ONLY the files that change"));
        assert_eq!(messages.last().unwrap().content, "make it blue");
    }

    #[test]
    fn test_assistant_code_is_replayed() {
        let mut assistant = msg(MessageRole::Assistant, "Built it.");
        assistant.generated_content = Some(GeneratedContent {
            preview: String::new(),
            code: "/// file: src/App.tsx\nx\n/// endfile".into(),
            project_id: None,
        });
        let messages = build_messages("next", &[assistant], false, 10);
        assert!(messages[1].content.starts_with("Built it.\n\n/// file: src/App.tsx"));
        assert_eq!(messages[1].role, "assistant");
    }

    #[test]
    fn test_empty_history_entries_dropped() {
        let messages = build_messages("next", &[msg(MessageRole::User, "  ")], false, 10);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_truncate_chars_keeps_tail_on_char_boundary() {
        let out = truncate_chars("ééééé", 2);
        assert_eq!(out, "…éé");
        assert_eq!(truncate_chars("abc", 5), "abc");
    }
}
