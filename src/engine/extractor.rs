use std::sync::LazyLock;

use regex::Regex;

use super::segmenter::scan_blocks;
use super::types::FileRecord;

/// Reserved block carrying the UI preview document.
pub const PREVIEW_PATH: &str = "preview.html";

static FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```[\w+#.\-]*\s*$").unwrap());

static FENCE_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*```\s*$").unwrap());

/// Split a completed turn into project files, in source order.
///
/// End-of-text terminates a trailing block. The preview block, blocks
/// with unusable paths and blocks with empty bodies are skipped one by
/// one; duplicates are kept (the last write wins on disk).
pub fn extract_files(text: &str) -> Vec<FileRecord> {
    scan_blocks(text)
        .blocks
        .into_iter()
        .filter_map(|block| {
            let Some(path) = sanitize_path(&block.path) else {
                tracing::warn!(raw_path = %block.path, "Skipping file block with unsafe or empty path");
                return None;
            };
            if is_preview_path(&path) {
                return None;
            }
            let content = strip_fences(&block.body);
            if content.is_empty() {
                tracing::debug!(path = %path, "Skipping empty file block");
                return None;
            }
            Some(FileRecord { path, content })
        })
        .collect()
}

/// Content of the last complete preview block, if any.
pub fn extract_preview(text: &str) -> Option<String> {
    scan_blocks(text)
        .blocks
        .into_iter()
        .filter(|b| sanitize_path(&b.path).is_some_and(|p| is_preview_path(&p)))
        .map(|b| strip_fences(&b.body))
        .filter(|c| !c.is_empty())
        .last()
}

pub fn is_preview_path(path: &str) -> bool {
    path.eq_ignore_ascii_case(PREVIEW_PATH)
}

/// Normalize a marker path into a safe project-relative path.
///
/// Quoting and emphasis around the path are trimmed, backslashes become
/// forward slashes, and leading `./` or `/` is dropped. Returns `None` for
/// empty paths, `..` segments and drive or scheme prefixes.
pub fn sanitize_path(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_matches(|c| matches!(c, '`' | '"' | '\'' | '*'))
        .trim();
    let normalized = trimmed.replace('\\', "/");
    if normalized.contains(':') {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in normalized.split('/') {
        match part.trim() {
            "" | "." => continue,
            ".." => return None,
            p => parts.push(p),
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Drop a leading ```` ```lang ```` line and a trailing ```` ``` ```` line,
/// plus surrounding blank lines. Indentation inside is preserved.
pub fn strip_fences(body: &str) -> String {
    let lines: Vec<&str> = body.lines().collect();
    let mut start = 0;
    let mut end = lines.len();

    let skip_blank = |start: &mut usize, end: &mut usize| {
        while *start < *end && lines[*start].trim().is_empty() {
            *start += 1;
        }
        while *end > *start && lines[*end - 1].trim().is_empty() {
            *end -= 1;
        }
    };

    skip_blank(&mut start, &mut end);
    if start < end && FENCE_OPEN.is_match(lines[start]) {
        start += 1;
    }
    if end > start && FENCE_CLOSE.is_match(lines[end - 1]) {
        end -= 1;
    }
    skip_blank(&mut start, &mut end);

    lines[start..end]
        .iter()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_blocks_in_order() {
        let text = "/// file: package.json\n{}\n/// endfile\n/// file: src/App.tsx\nexport default 1\n/// endfile\n/// file: src/main.tsx\nimport './index.css'\n/// endfile";
        let files = extract_files(text);
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["package.json", "src/App.tsx", "src/main.tsx"]);
        assert_eq!(files[1].content, "export default 1");
    }

    #[test]
    fn test_preview_block_yields_no_record() {
        let text = "/// file: preview.html\n<html></html>\n/// endfile\n/// file: a.ts\nx\n/// endfile";
        let files = extract_files(text);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.ts");
        assert_eq!(extract_preview(text).as_deref(), Some("<html></html>"));
    }

    #[test]
    fn test_trailing_block_terminated_by_end_of_text() {
        let files = extract_files("/// file: a.ts\nconst a = 1\n");
        assert_eq!(files, vec![FileRecord { path: "a.ts".into(), content: "const a = 1".into() }]);
    }

    #[test]
    fn test_duplicates_are_kept() {
        let files = extract_files("/// file: a.ts\n1\n/// endfile\n/// file: a.ts\n2\n/// endfile");
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].content, "2");
    }

    #[test]
    fn test_bad_blocks_do_not_abort_others() {
        let text = "/// file: ../escape.ts\nbad\n/// endfile\n/// file:\nnameless\n/// endfile\n/// file: ok.ts\ngood\n/// endfile\n/// file: empty.ts\n   \n/// endfile";
        let files = extract_files(text);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "ok.ts");
    }

    #[test]
    fn test_sanitize_path_variants() {
        assert_eq!(sanitize_path(" `src/App.tsx` ").as_deref(), Some("src/App.tsx"));
        assert_eq!(sanitize_path("**src/a.ts**").as_deref(), Some("src/a.ts"));
        assert_eq!(sanitize_path("./src\\lib\\x.ts").as_deref(), Some("src/lib/x.ts"));
        assert_eq!(sanitize_path("/abs/file.ts").as_deref(), Some("abs/file.ts"));
        assert_eq!(sanitize_path("src/../../etc/passwd"), None);
        assert_eq!(sanitize_path("C:\\temp\\x.ts"), None);
        assert_eq!(sanitize_path("   "), None);
    }

    #[test]
    fn test_strip_fences_keeps_indentation() {
        let body = "\n```tsx\n  const a = 1;\n    nested();\n```\n\n";
        assert_eq!(strip_fences(body), "  const a = 1;\n    nested();");
    }

    #[test]
    fn test_strip_fences_without_fences() {
        assert_eq!(strip_fences("plain\ntext"), "plain\ntext");
    }
}
