//! Markdown artifact cleanup for saved projects.
//!
//! Models sometimes leave code fences or trailing prose inside file
//! bodies. This pass strips them from config files at the project root
//! and from source files directly inside the conventional top-level
//! folders. Files are rewritten only when their content changes.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

const ROOT_FILES: &[&str] = &[
    "package.json",
    "tsconfig.json",
    "vite.config.ts",
    "next.config.js",
    "tailwind.config.js",
    "tailwind.config.cjs",
    "postcss.config.js",
    "postcss.config.cjs",
];

const SCAN_DIRS: &[&str] = &["app", "components", "pages", "src", "styles", "types"];

const SCAN_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "css"];

static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*```[\w+#.\-]*\s*$").unwrap());

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}\s+\S").unwrap());

static BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*[-*]\s+").unwrap());

/// Clean every candidate file under `project_dir`; returns the
/// project-relative paths that were rewritten. A file that cannot be
/// read or written is logged and skipped.
pub fn clean_markdown_artifacts(project_dir: &Path) -> Result<Vec<String>, AppError> {
    if !project_dir.is_dir() {
        return Err(AppError::NotFound(format!(
            "project directory {}",
            project_dir.display()
        )));
    }

    let mut fixed = Vec::new();
    for candidate in candidate_files(project_dir) {
        let rel = relative_name(project_dir, &candidate);
        let content = match std::fs::read_to_string(&candidate) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(file = %rel, error = %e, "Skipping unreadable file");
                continue;
            }
        };
        if let Some(cleaned) = clean_content(&rel, &content) {
            match std::fs::write(&candidate, cleaned) {
                Ok(()) => {
                    tracing::info!(file = %rel, "Removed markdown artifacts");
                    fixed.push(rel);
                }
                Err(e) => tracing::warn!(file = %rel, error = %e, "Failed to write cleaned file"),
            }
        }
    }
    Ok(fixed)
}

fn candidate_files(project_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = ROOT_FILES
        .iter()
        .map(|name| project_dir.join(name))
        .filter(|p| p.is_file())
        .collect();

    let escaped = glob::Pattern::escape(&project_dir.to_string_lossy());
    for dir in SCAN_DIRS {
        let pattern = format!("{}/{}/*", escaped, dir);
        let Ok(entries) = glob::glob(&pattern) else {
            continue;
        };
        let mut in_dir: Vec<PathBuf> = entries
            .flatten()
            .filter(|p| p.is_file())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| SCAN_EXTENSIONS.contains(&e))
            })
            .collect();
        in_dir.sort();
        files.extend(in_dir);
    }
    files
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Returns the cleaned text, or `None` when nothing needs to change.
///
/// Fence lines are removed from every file. Script and JSON files are
/// also cut at the first column-0 markdown heading, and JSON files lose
/// stray bullet lines.
pub fn clean_content(file_name: &str, content: &str) -> Option<String> {
    let cut_prose = [".js", ".ts", ".json"].iter().any(|ext| file_name.ends_with(ext));
    let is_json = file_name.ends_with(".json");

    let mut changed = false;
    let mut kept: Vec<&str> = Vec::new();
    for line in content.lines() {
        if FENCE.is_match(line) {
            changed = true;
            continue;
        }
        if cut_prose && HEADING.is_match(line) {
            changed = true;
            break;
        }
        if is_json && BULLET.is_match(line) {
            changed = true;
            continue;
        }
        kept.push(line);
    }

    if !changed {
        return None;
    }
    let mut cleaned = kept.join("\n").trim().to_string();
    cleaned.push('\n');
    Some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fences_removed_from_json() {
        let cleaned = clean_content("package.json", "```json\n{\n  \"name\": \"x\"\n}\n```\n").unwrap();
        assert_eq!(cleaned, "{\n  \"name\": \"x\"\n}\n");
    }

    #[test]
    fn test_trailing_prose_cut_from_config() {
        let content = "export default {}\n\n## Notes\nThis config does things.\n";
        let cleaned = clean_content("tailwind.config.js", content).unwrap();
        assert_eq!(cleaned, "export default {}\n");
    }

    #[test]
    fn test_jsdoc_lines_survive() {
        let content = "/**\n * Adds numbers.\n */\nexport const add = (a, b) => a + b\n```\n";
        let cleaned = clean_content("src/add.ts", content).unwrap();
        assert!(cleaned.contains(" * Adds numbers."));
        assert!(!cleaned.contains("```"));
    }

    #[test]
    fn test_tsx_headings_untouched() {
        // Only fences are removed from component files
        let content = "```tsx\nexport const A = () => <h1># Title</h1>\n```";
        let cleaned = clean_content("src/A.tsx", content).unwrap();
        assert_eq!(cleaned, "export const A = () => <h1># Title</h1>\n");
    }

    #[test]
    fn test_clean_file_is_noop() {
        assert_eq!(clean_content("package.json", "{}\n"), None);
        assert_eq!(clean_content("src/index.css", "body { margin: 0 }"), None);
    }

    #[test]
    fn test_directory_pass_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/components/deep")).unwrap();
        std::fs::write(dir.path().join("package.json"), "```json\n{}\n```").unwrap();
        std::fs::write(dir.path().join("src/main.tsx"), "```tsx\nimport './index.css'\n```").unwrap();
        std::fs::write(dir.path().join("src/components/deep/X.tsx"), "```\nnested\n```").unwrap();

        let first = clean_markdown_artifacts(dir.path()).unwrap();
        assert_eq!(first, vec!["package.json".to_string(), "src/main.tsx".to_string()]);
        // Only top-level entries of each folder are scanned
        let nested = std::fs::read_to_string(dir.path().join("src/components/deep/X.tsx")).unwrap();
        assert!(nested.contains("```"));

        let second = clean_markdown_artifacts(dir.path()).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_missing_project_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = clean_markdown_artifacts(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
