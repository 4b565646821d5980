//! Import specifier handling: alias rewriting and package discovery.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::templates::SOURCE_ALIAS;

/// Top-level source folders that are imported through the root alias.
pub const ALIASED_FOLDERS: &[&str] = &["components", "utils", "libs", "pages"];

const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx"];

/// `from '...'`, `import '...'` and `import('...')` with a relative specifier.
static RELATIVE_SPECIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(\bfrom\s*|\bimport\s*\(\s*|\bimport\s+)(['"])(\.{1,2}/[^'"]+)(['"])"#).unwrap()
});

/// Bare package specifiers, including `require('...')`.
static BARE_SPECIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:\bfrom\s*|\bimport\s*\(\s*|\bimport\s+|\brequire\s*\(\s*)['"]([^'"./][^'"]*)['"]"#)
        .unwrap()
});

/// Every script file below `<root>/src`, sorted, skipping `node_modules`.
pub fn source_files(root: &Path) -> Vec<PathBuf> {
    let pattern = format!(
        "{}/{}/**/*",
        glob::Pattern::escape(&root.to_string_lossy()),
        SOURCE_ALIAS.dir
    );
    let Ok(entries) = glob::glob(&pattern) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .filter(|p| p.is_file())
        .filter(|p| !p.components().any(|c| c.as_os_str() == "node_modules"))
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e))
        })
        .collect();
    files.sort();
    files
}

/// Rewrite relative imports whose first named segment is one of
/// [`ALIASED_FOLDERS`] to the root alias, whatever their depth:
/// `../components/X` and `../../components/X` both become `@/components/X`.
///
/// Returns `None` when nothing changed.
pub fn rewrite_imports(content: &str) -> Option<String> {
    let mut changed = false;
    let rewritten: Vec<String> = content
        .split('\n')
        .map(|line| {
            let out = RELATIVE_SPECIFIER.replace_all(line, |caps: &Captures| {
                match aliased_target(&caps[3]) {
                    Some(target) => format!("{}{}{}{}", &caps[1], &caps[2], target, &caps[4]),
                    None => caps[0].to_string(),
                }
            });
            if out != line {
                changed = true;
            }
            out.into_owned()
        })
        .collect();

    changed.then(|| rewritten.join("\n"))
}

fn aliased_target(specifier: &str) -> Option<String> {
    let mut segments = specifier.split('/').skip_while(|s| *s == "." || *s == "..");
    let folder = segments.next()?;
    if !ALIASED_FOLDERS.contains(&folder) {
        return None;
    }
    let rest: Vec<&str> = segments.collect();
    if rest.iter().all(|s| s.is_empty()) {
        return None;
    }
    Some(format!("{}/{}/{}", SOURCE_ALIAS.key, folder, rest.join("/")))
}

/// Package names referenced by bare import specifiers in `content`.
pub fn imported_packages(content: &str) -> BTreeSet<String> {
    BARE_SPECIFIER
        .captures_iter(content)
        .filter_map(|caps| package_name(&caps[1]))
        .collect()
}

fn package_name(specifier: &str) -> Option<String> {
    if specifier.starts_with(&format!("{}/", SOURCE_ALIAS.key)) || specifier.starts_with("node:") {
        return None;
    }
    let mut segments = specifier.split('/');
    let first = segments.next()?;
    if first.is_empty() {
        return None;
    }
    if first.starts_with('@') {
        let second = segments.next()?;
        Some(format!("{}/{}", first, second))
    } else {
        Some(first.to_string())
    }
}
