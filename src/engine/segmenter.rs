//! Response segmentation.
//!
//! Splits the text of one model turn into three channels: the preview
//! document, the file-bearing code text, and the prose description.
//! The input may be a mid-stream snapshot; every call recomputes the
//! channels from scratch.
//!
//! Strategy precedence:
//! 1. explicit `/// file: <path>` ... `/// endfile` blocks
//! 2. fenced code blocks whose content looks like code
//! 3. a positional guess at the first line that starts code
//! 4. everything is description

use std::sync::LazyLock;

use regex::Regex;

use super::extractor::{is_preview_path, sanitize_path, strip_fences};
use super::types::{ParsedTurn, TurnContext};

/// Shown in place of a block that is still streaming.
pub const GENERATING_PLACEHOLDER: &str = "// generating…";

static FILE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*///\s*file:\s*(.*?)\s*$").unwrap());

static END_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*///\s*endfile\s*$").unwrap());

static FENCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```[\w+#.\-]*\s*$").unwrap());

static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());

static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\s*)[-*]\s+").unwrap());

/// A line that plausibly begins source code or markup.
static CODE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^\s*(?:",
        r"import\s+[\w{*'\x22]",
        r"|export\s+(?:default\s+)?(?:async\s+)?(?:function|const|let|class|interface|type|enum|\{)",
        r"|(?:async\s+)?function\s*\w*\s*\(",
        r"|(?:const|let|var)\s+[\w{\[]+.*=",
        r"|class\s+\w+",
        r"|interface\s+\w+",
        r"|(?i:<!doctype|<html|<head|<body|<div|<template|<script|<style)",
        r"|#include\s",
        r"|def\s+\w+\s*\(",
        r"|fn\s+\w+\s*[(<]",
        r"|package\s+[\w.]+;?\s*$",
        r")",
    ))
    .unwrap()
});

// =============================================================================
// Block scanner
// =============================================================================

/// One `/// file:` block as it appears in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawBlock {
    /// Marker argument, untrimmed of quoting.
    pub path: String,
    pub body: String,
    /// Closed by `/// endfile` or by the next `/// file:` marker.
    pub terminated: bool,
}

#[derive(Debug, Default)]
pub(crate) struct BlockScan {
    pub blocks: Vec<RawBlock>,
    /// Text outside every block, joined by newlines.
    pub prose: String,
}

enum ScanState {
    Outside,
    InBlock { path: String, lines: Vec<String> },
}

/// Walk the text line by line: `Outside` -> `InBlock(path)` on a file
/// marker, back to `Outside` on `endfile`. A new file marker implicitly
/// closes the open block. Stray `endfile` markers outside a block are dropped.
pub(crate) fn scan_blocks(text: &str) -> BlockScan {
    let mut scan = BlockScan::default();
    let mut prose: Vec<&str> = Vec::new();
    let mut state = ScanState::Outside;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let opens = FILE_MARKER.captures(line).map(|c| c[1].to_string());

        state = match state {
            ScanState::Outside => {
                if let Some(path) = opens {
                    ScanState::InBlock { path, lines: Vec::new() }
                } else {
                    if !END_MARKER.is_match(line) {
                        prose.push(line);
                    }
                    ScanState::Outside
                }
            }
            ScanState::InBlock { path, mut lines } => {
                if let Some(next) = opens {
                    scan.blocks.push(RawBlock { path, body: lines.join("\n"), terminated: true });
                    ScanState::InBlock { path: next, lines: Vec::new() }
                } else if END_MARKER.is_match(line) {
                    scan.blocks.push(RawBlock { path, body: lines.join("\n"), terminated: true });
                    ScanState::Outside
                } else {
                    lines.push(line.to_string());
                    ScanState::InBlock { path, lines }
                }
            }
        };
    }

    if let ScanState::InBlock { path, lines } = state {
        scan.blocks.push(RawBlock { path, body: lines.join("\n"), terminated: false });
    }

    scan.prose = prose.join("\n");
    scan
}

// =============================================================================
// Public entry point
// =============================================================================

/// Parse one turn snapshot into its three channels.
///
/// Never panics: an internal failure degrades to the raw text in the
/// `code` channel.
pub fn parse_turn(buffer: &str, ctx: TurnContext) -> ParsedTurn {
    match std::panic::catch_unwind(|| segment(buffer, ctx)) {
        Ok(turn) => turn,
        Err(_) => {
            tracing::error!(len = buffer.len(), "Segmenter panicked, returning raw fallback");
            ParsedTurn {
                code: buffer.trim().to_string(),
                ..Default::default()
            }
        }
    }
}

fn segment(buffer: &str, ctx: TurnContext) -> ParsedTurn {
    let (text, dangling_marker) = split_dangling_marker(buffer, ctx);

    let scan = scan_blocks(text);
    let mut turn = if scan.blocks.is_empty() {
        segment_unmarked(text, ctx)
    } else {
        segment_blocks(scan, ctx)
    };

    if dangling_marker && turn.pending_path.is_none() {
        push_section(&mut turn.code, GENERATING_PLACEHOLDER);
    }

    if turn.preview_html.is_empty()
        && turn.code.trim().is_empty()
        && turn.description.is_empty()
        && !buffer.trim().is_empty()
    {
        // Marker lines are dropped unless nothing else is left
        let cleaned = clean_description(buffer);
        turn.description = if cleaned.is_empty() {
            buffer.trim().to_string()
        } else {
            cleaned
        };
    }
    turn
}

/// While streaming, an unfinished last line that looks like the start of a
/// marker (`/`, `//`, `/// fi...`) is held back so it never shows up as prose
/// or as a truncated path.
fn split_dangling_marker(buffer: &str, ctx: TurnContext) -> (&str, bool) {
    if ctx.complete || buffer.ends_with('\n') {
        return (buffer, false);
    }
    let start = buffer.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let last = buffer[start..].trim();
    let marker_like = !last.is_empty() && ("///".starts_with(last) || last.starts_with("///"));
    if marker_like {
        (&buffer[..start], true)
    } else {
        (buffer, false)
    }
}

// =============================================================================
// Strategy 1: explicit markers
// =============================================================================

fn segment_blocks(scan: BlockScan, ctx: TurnContext) -> ParsedTurn {
    let mut turn = ParsedTurn::default();
    let mut file_names: Vec<String> = Vec::new();

    for block in scan.blocks {
        let final_block = block.terminated || ctx.complete;
        let path = match sanitize_path(&block.path) {
            Some(p) => p,
            None => {
                tracing::debug!(raw_path = %block.path, "Skipping block with unusable path");
                continue;
            }
        };

        if is_preview_path(&path) {
            if final_block {
                let content = strip_fences(&block.body);
                if !content.is_empty() {
                    turn.preview_html = content;
                }
            } else {
                turn.pending_path = Some(path);
            }
            continue;
        }

        if !final_block {
            push_section(&mut turn.code, &format!("/// file: {}\n{}", path, GENERATING_PLACEHOLDER));
            turn.pending_path = Some(path);
            continue;
        }

        let content = strip_fences(&block.body);
        if content.is_empty() {
            continue;
        }
        push_section(&mut turn.code, &format!("/// file: {}\n{}\n/// endfile", path, content));
        if !file_names.contains(&path) {
            file_names.push(path);
        }
    }

    let prose = clean_description(&scan.prose);
    turn.description = describe_turn(prose, &file_names, ctx);
    turn
}

/// Follow-up turns get a concise list of touched files, prefixed by the
/// first prose paragraph when the model wrote one.
fn describe_turn(prose: String, files: &[String], ctx: TurnContext) -> String {
    if files.is_empty() {
        return prose;
    }

    if !ctx.is_first_request {
        let summary = format!("Updated files: {}", files.join(", "));
        return match first_paragraph(&prose) {
            Some(lead) => format!("{}\n\n{}", lead, summary),
            None => summary,
        };
    }

    if prose.is_empty() && ctx.complete {
        let noun = if files.len() == 1 { "file" } else { "files" };
        return format!("Generated {} {}: {}", files.len(), noun, files.join(", "));
    }
    prose
}

fn first_paragraph(text: &str) -> Option<&str> {
    text.split("\n\n").map(str::trim).find(|p| !p.is_empty())
}

// =============================================================================
// Strategies 2-4: no markers
// =============================================================================

fn segment_unmarked(text: &str, ctx: TurnContext) -> ParsedTurn {
    if let Some(turn) = segment_fenced(text, ctx) {
        return turn;
    }
    if let Some(turn) = segment_positional(text) {
        return turn;
    }
    ParsedTurn {
        description: clean_description(text),
        ..Default::default()
    }
}

/// Fenced blocks with code-like content go to `code`; everything else,
/// including illustrative non-code fences, stays in the description.
fn segment_fenced(text: &str, ctx: TurnContext) -> Option<ParsedTurn> {
    let mut code_blocks: Vec<String> = Vec::new();
    let mut prose: Vec<&str> = Vec::new();
    let mut fenced: Option<Vec<&str>> = None;

    for line in text.lines() {
        let is_fence = FENCE_LINE.is_match(line);
        fenced = match fenced {
            None if is_fence => Some(Vec::new()),
            None => {
                prose.push(line);
                None
            }
            Some(body) if is_fence => {
                let joined = body.join("\n");
                if looks_like_code(&joined) {
                    code_blocks.push(joined.trim_matches('\n').to_string());
                } else {
                    prose.extend(body);
                }
                None
            }
            Some(mut body) => {
                body.push(line);
                Some(body)
            }
        };
    }

    let mut pending = false;
    if let Some(body) = fenced {
        if ctx.complete {
            let joined = body.join("\n");
            if looks_like_code(&joined) {
                code_blocks.push(joined.trim_matches('\n').to_string());
            } else {
                prose.extend(body);
            }
        } else {
            pending = true;
        }
    }

    if code_blocks.is_empty() && !pending {
        return None;
    }

    let mut code = code_blocks.join("\n\n");
    if pending {
        push_section(&mut code, GENERATING_PLACEHOLDER);
    }
    Some(ParsedTurn {
        code,
        description: clean_description(&prose.join("\n")),
        ..Default::default()
    })
}

/// Everything from the first code-looking line onwards is code.
fn segment_positional(text: &str) -> Option<ParsedTurn> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if CODE_START.is_match(line.trim_end()) {
            let code = text[offset..].trim().to_string();
            return Some(ParsedTurn {
                code,
                description: clean_description(&text[..offset]),
                ..Default::default()
            });
        }
        offset += line.len();
    }
    None
}

fn looks_like_code(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    text.lines().any(|line| {
        let t = line.trim_end();
        CODE_START.is_match(t) || t.ends_with(';') || t.ends_with('{') || t.trim_start().starts_with("</")
    })
}

// =============================================================================
// Text normalization
// =============================================================================

/// Prose cleanup: drop stray markers and fence lines, unwrap bold, turn
/// dash bullets into `•`, collapse blank-line runs.
pub fn clean_description(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut blank_run = false;

    for line in text.lines() {
        if FILE_MARKER.is_match(line) || END_MARKER.is_match(line) || FENCE_LINE.is_match(line) {
            continue;
        }
        let unbolded = BOLD.replace_all(line.trim_end(), "$1");
        let bulleted = BULLET.replace(&unbolded, "$1• ");
        if bulleted.trim().is_empty() {
            if !out.is_empty() {
                blank_run = true;
            }
            continue;
        }
        if blank_run {
            out.push(String::new());
            blank_run = false;
        }
        out.push(bulleted.into_owned());
    }

    out.join("\n").trim().to_string()
}

fn push_section(target: &mut String, section: &str) {
    if !target.is_empty() {
        target.push_str("\n\n");
    }
    target.push_str(section);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(text: &str) -> ParsedTurn {
        parse_turn(text, TurnContext::finished(true))
    }

    fn streaming(text: &str) -> ParsedTurn {
        parse_turn(text, TurnContext::streaming(true))
    }

    // ---- scanner -----------------------------------------------------------

    #[test]
    fn test_scan_two_blocks_and_prose() {
        let scan = scan_blocks("intro\n/// file: a.ts\nA\n/// endfile\nmiddle\n/// file: b.ts\nB\n/// endfile\n");
        assert_eq!(scan.blocks.len(), 2);
        assert_eq!(scan.blocks[0].path, "a.ts");
        assert_eq!(scan.blocks[0].body, "A");
        assert!(scan.blocks[1].terminated);
        assert_eq!(scan.prose.trim(), "intro\nmiddle");
    }

    #[test]
    fn test_scan_new_marker_closes_open_block() {
        let scan = scan_blocks("/// file: a.ts\nA\n/// file: b.ts\nB");
        assert_eq!(scan.blocks.len(), 2);
        assert!(scan.blocks[0].terminated);
        assert_eq!(scan.blocks[0].body, "A");
        assert!(!scan.blocks[1].terminated);
    }

    #[test]
    fn test_scan_handles_crlf() {
        let scan = scan_blocks("/// file: a.ts\r\nA\r\n/// endfile\r\n");
        assert_eq!(scan.blocks[0].path, "a.ts");
        assert_eq!(scan.blocks[0].body, "A");
    }

    // ---- marker strategy ---------------------------------------------------

    #[test]
    fn test_preview_and_source_blocks_are_separated() {
        let input = "/// file: preview.html\n<!DOCTYPE html><html><body>Hi</body></html>\n/// endfile\n/// file: src/App.tsx\nexport default function App() {}\n/// endfile";
        let turn = complete(input);
        assert_eq!(turn.preview_html, "<!DOCTYPE html><html><body>Hi</body></html>");
        assert_eq!(
            turn.code,
            "/// file: src/App.tsx\nexport default function App() {}\n/// endfile"
        );
        assert!(!turn.code.contains("DOCTYPE"));
        assert!(!turn.preview_html.contains("export default"));
        assert_eq!(turn.description, "Generated 1 file: src/App.tsx");
    }

    #[test]
    fn test_prose_around_blocks_becomes_description() {
        let input = "Here is your **todo** app:\n\n- fast\n- typed\n/// file: src/main.tsx\nimport x from 'y'\n/// endfile\n\n\n\nEnjoy!";
        let turn = complete(input);
        assert_eq!(turn.description, "Here is your todo app:\n\n• fast\n• typed\n\nEnjoy!");
        assert!(turn.code.starts_with("/// file: src/main.tsx"));
    }

    #[test]
    fn test_fences_inside_blocks_are_stripped() {
        let input = "/// file: src/a.ts\n```ts\nexport const a = 1;\n```\n/// endfile";
        let turn = complete(input);
        assert_eq!(turn.code, "/// file: src/a.ts\nexport const a = 1;\n/// endfile");
    }

    #[test]
    fn test_empty_blocks_are_dropped_from_code() {
        let turn = complete("/// file: src/empty.ts\n\n/// endfile\n/// file: src/a.ts\nx\n/// endfile");
        assert!(!turn.code.contains("empty.ts"));
        assert!(turn.code.contains("src/a.ts"));
    }

    #[test]
    fn test_streaming_open_block_shows_placeholder() {
        let turn = streaming("Building it.\n/// file: src/App.tsx\nexport default fun");
        assert_eq!(turn.code, format!("/// file: src/App.tsx\n{}", GENERATING_PLACEHOLDER));
        assert!(!turn.code.contains("export default fun"));
        assert_eq!(turn.pending_path.as_deref(), Some("src/App.tsx"));
        assert_eq!(turn.description, "Building it.");
    }

    #[test]
    fn test_streaming_second_chunk_completes_block() {
        let first = "/// file: src/App.tsx\nexport default function App() {\n";
        let second = format!("{}  return null\n}}\n/// endfile\n", first);

        let early = streaming(first);
        assert!(early.code.contains(GENERATING_PLACEHOLDER));

        let later = streaming(&second);
        assert!(!later.code.contains(GENERATING_PLACEHOLDER));
        assert!(later.code.contains("  return null\n}"));
        assert!(later.pending_path.is_none());
    }

    #[test]
    fn test_streaming_dangling_marker_is_held_back() {
        let turn = streaming("Intro text\n/// fi");
        assert_eq!(turn.description, "Intro text");
        assert_eq!(turn.code, GENERATING_PLACEHOLDER);
    }

    #[test]
    fn test_streaming_open_preview_is_pending_not_rendered() {
        let turn = streaming("/// file: src/a.ts\na\n/// endfile\n/// file: preview.html\n<!DOCTYPE html><ht");
        assert_eq!(turn.preview_html, "");
        assert_eq!(turn.pending_path.as_deref(), Some("preview.html"));
        assert!(!turn.code.contains("<ht"));
    }

    #[test]
    fn test_complete_unterminated_block_is_final() {
        let turn = complete("/// file: src/a.ts\nexport const a = 1;");
        assert_eq!(turn.code, "/// file: src/a.ts\nexport const a = 1;\n/// endfile");
        assert!(turn.pending_path.is_none());
    }

    #[test]
    fn test_follow_up_lists_updated_files() {
        let input = "I changed the header color.\n\nMore detail here.\n/// file: src/components/Header.tsx\nexport const H = 1;\n/// endfile\n/// file: src/App.tsx\nexport default 1;\n/// endfile";
        let turn = parse_turn(input, TurnContext::finished(false));
        assert_eq!(
            turn.description,
            "I changed the header color.\n\nUpdated files: src/components/Header.tsx, src/App.tsx"
        );
    }

    #[test]
    fn test_follow_up_without_prose() {
        let input = "/// file: src/App.tsx\nexport default 1;\n/// endfile";
        let turn = parse_turn(input, TurnContext::finished(false));
        assert_eq!(turn.description, "Updated files: src/App.tsx");
    }

    // ---- fallback strategies -----------------------------------------------

    #[test]
    fn test_fenced_code_without_markers() {
        let input = "A button component:\n\n```tsx\nexport const Button = () => <button />;\n```\n\nUse it anywhere.";
        let turn = complete(input);
        assert_eq!(turn.code, "export const Button = () => <button />;");
        assert_eq!(turn.description, "A button component:\n\nUse it anywhere.");
    }

    #[test]
    fn test_non_code_fence_stays_in_description() {
        let input = "Run this:\n```\nnpm install\n```";
        let turn = complete(input);
        assert_eq!(turn.code, "");
        assert_eq!(turn.description, "Run this:\nnpm install");
    }

    #[test]
    fn test_streaming_open_fence_is_provisional() {
        let turn = streaming("Here:\n```tsx\nexport const");
        assert_eq!(turn.code, GENERATING_PLACEHOLDER);
        assert_eq!(turn.description, "Here:");
    }

    #[test]
    fn test_positional_heuristic_splits_at_first_code_line() {
        let input = "Sure, here is the file.\nimport React from 'react'\nexport default function App() { return null }";
        let turn = complete(input);
        assert_eq!(turn.description, "Sure, here is the file.");
        assert!(turn.code.starts_with("import React"));
    }

    #[test]
    fn test_positional_heuristic_html() {
        let turn = complete("<!DOCTYPE html>\n<html></html>");
        assert_eq!(turn.code, "<!DOCTYPE html>\n<html></html>");
        assert_eq!(turn.description, "");
    }

    #[test]
    fn test_plain_prose_is_description() {
        let turn = complete("I cannot help with that request.");
        assert_eq!(turn.code, "");
        assert_eq!(turn.description, "I cannot help with that request.");
    }

    #[test]
    fn test_never_both_empty_for_non_blank_input() {
        for input in ["```", "/// endfile", "**", "   x   "] {
            let turn = complete(input);
            assert!(
                !(turn.code.is_empty() && turn.description.is_empty()),
                "both channels empty for {:?}",
                input
            );
        }
    }

    #[test]
    fn test_unusable_paths_do_not_leak_markers() {
        let turn = complete("/// file: ../x\nsecret body\n/// endfile\n/// file: C:/y\nmore\n/// endfile");
        assert_eq!(turn.code, "");
        assert_eq!(turn.description, "secret body\nmore");
        assert!(!turn.description.contains("///"));
    }

    #[test]
    fn test_empty_input_yields_empty_turn() {
        assert_eq!(complete(""), ParsedTurn::default());
        assert_eq!(streaming(""), ParsedTurn::default());
    }

    #[test]
    fn test_clean_description_collapses_blank_runs() {
        assert_eq!(clean_description("a\n\n\n\nb\n```\n\nc"), "a\n\nb\n\nc");
    }
}
