//! Project fixer: a state-correcting pass that forces a generated project
//! into the Vite + React + TypeScript layout.
//!
//! Every step is idempotent and writes only when content changes, so a
//! second pass over an untouched directory reports no fixes. A failing
//! step records its error and the remaining steps still run.

pub mod imports;
pub mod manifest;
pub mod templates;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::{FixResult, ValidationReport};
use crate::error::AppError;
use templates::SOURCE_ALIAS;

/// Styling approach enforced on every project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StylingPolicy {
    #[default]
    #[serde(rename = "tailwind")]
    Tailwind,
    #[serde(rename = "plain")]
    PlainCss,
}

impl FromStr for StylingPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tailwind" => Ok(Self::Tailwind),
            "plain" | "css" => Ok(Self::PlainCss),
            other => Err(AppError::Config(format!(
                "unknown styling policy '{}', expected 'tailwind' or 'plain'",
                other
            ))),
        }
    }
}

const MANIFEST: &str = "package.json";
const VITE_CONFIG: &str = "vite.config.ts";
const TSCONFIG: &str = "tsconfig.json";
const INDEX_CSS: &str = "src/index.css";
const CANONICAL_GLOBAL_CSS: &str = "src/styles/globals.css";

const TAILWIND_CONFIG_VARIANTS: &[&str] =
    &["tailwind.config.cjs", "tailwind.config.mjs", "tailwind.config.ts"];
const POSTCSS_CONFIG_VARIANTS: &[&str] =
    &["postcss.config.cjs", "postcss.config.mjs", "postcss.config.ts"];
/// Vite loads these before `vite.config.ts`, so they would shadow it.
const VITE_CONFIG_SHADOWS: &[&str] = &[
    "vite.config.js",
    "vite.config.mjs",
    "vite.config.cjs",
    "vite.config.mts",
    "vite.config.cts",
];

const NEXT_SCAFFOLD: &[&str] = &[
    "next.config.js",
    "next.config.mjs",
    "next.config.ts",
    "next-env.d.ts",
    "app/layout.tsx",
    "app/page.tsx",
    "app/globals.css",
    "src/app/layout.tsx",
    "src/app/page.tsx",
    "src/app/globals.css",
];
const NEXT_DIRS: &[&str] = &["src/app", "app"];

const ALTERNATE_STYLESHEETS: &[&str] = &[
    "global.css",
    "globals.css",
    "styles/globals.css",
    "styles/global.css",
];

const ESSENTIAL_FILES: &[&str] = &["package.json", "src/main.tsx", "index.html", "vite.config.ts"];

static VITE_ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]?@['"]?\s*:\s*path\.resolve\(\s*__dirname\s*,\s*['"]\./([^'"]+)['"]\s*\)"#)
        .unwrap()
});

type Step = fn(&mut FixContext) -> Result<(), AppError>;

const STEPS: &[(&str, Step)] = &[
    ("manifest", normalize_manifest),
    ("styling config", write_styling_config),
    ("import paths", rewrite_import_paths),
    ("global stylesheet", write_global_stylesheet),
    ("bundler config", write_vite_config),
    ("type-checker config", write_tsconfig),
    ("conflicting framework files", remove_conflicting_files),
    ("stylesheet relocation", relocate_stylesheets),
    ("entry points", synthesize_entry_points),
];

/// Run one full fixer pass over `root`.
pub fn fix_project(root: &Path, policy: StylingPolicy) -> FixResult {
    let mut ctx = FixContext {
        root: root.to_path_buf(),
        policy,
        result: FixResult::default(),
    };

    for (name, step) in STEPS {
        if let Err(e) = step(&mut ctx) {
            tracing::warn!(step = %name, error = %e, "Fixer step failed");
            ctx.result.record_error(name, e);
        }
    }

    ctx.result.success = ctx.result.errors.is_empty();
    tracing::info!(
        project = %root.display(),
        fixes = ctx.result.fixes.len(),
        errors = ctx.result.errors.len(),
        "Fixer pass complete"
    );
    ctx.result
}

/// Fixer pass followed by structural checks.
pub fn validate_project(root: &Path, policy: StylingPolicy) -> Result<ValidationReport, AppError> {
    if !root.is_dir() {
        return Err(AppError::NotFound(format!("project {}", root.display())));
    }

    let fix = fix_project(root, policy);
    let mut report = ValidationReport {
        is_valid: false,
        errors: fix.errors,
        warnings: Vec::new(),
        fixes: fix.fixes,
        fixed_files: fix.fixed_files,
    };

    for file in ESSENTIAL_FILES {
        if !root.join(file).is_file() {
            report.warnings.push(format!("Missing essential file: {}", file));
        }
    }

    match alias_dirs(root) {
        Some((vite, ts)) if vite != ts => report.errors.push(format!(
            "Import alias mismatch: vite.config.ts -> {}, tsconfig.json -> {}",
            vite, ts
        )),
        None => report
            .errors
            .push("Could not read the import alias from vite.config.ts or tsconfig.json".to_string()),
        _ => {}
    }

    for package in unresolved_packages(root) {
        report
            .warnings
            .push(format!("Imported package not listed in package.json: {}", package));
    }

    report.is_valid = report.errors.is_empty();
    Ok(report)
}

/// Source directories the bundler alias and the type-checker alias map to.
pub fn alias_dirs(root: &Path) -> Option<(String, String)> {
    let vite = std::fs::read_to_string(root.join(VITE_CONFIG)).ok()?;
    let vite_dir = VITE_ALIAS.captures(&vite)?[1].trim_end_matches('/').to_string();

    let ts: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(root.join(TSCONFIG)).ok()?).ok()?;
    let target = ts
        .pointer("/compilerOptions/paths")?
        .get(format!("{}/*", SOURCE_ALIAS.key))?
        .get(0)?
        .as_str()?;
    let ts_dir = target
        .trim_start_matches("./")
        .trim_end_matches('*')
        .trim_end_matches('/')
        .to_string();

    Some((vite_dir, ts_dir))
}

fn unresolved_packages(root: &Path) -> Vec<String> {
    let manifest: serde_json::Value = match std::fs::read_to_string(root.join(MANIFEST))
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
    {
        Some(v) => v,
        None => return Vec::new(),
    };
    let listed = |name: &str| {
        ["dependencies", "devDependencies", "peerDependencies"]
            .iter()
            .any(|section| manifest.get(section).and_then(|s| s.get(name)).is_some())
    };

    collect_imported_packages(root)
        .into_iter()
        .filter(|p| !listed(p))
        .collect()
}

fn collect_imported_packages(root: &Path) -> BTreeSet<String> {
    imports::source_files(root)
        .iter()
        .filter_map(|f| std::fs::read_to_string(f).ok())
        .flat_map(|content| imports::imported_packages(&content))
        .collect()
}

// =============================================================================
// Pass context
// =============================================================================

struct FixContext {
    root: PathBuf,
    policy: StylingPolicy,
    result: FixResult,
}

impl FixContext {
    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn exists(&self, rel: &str) -> bool {
        self.path(rel).is_file()
    }

    /// Write `content` unless the file already holds exactly that.
    fn write_if_changed(&mut self, rel: &str, content: &str) -> Result<bool, AppError> {
        let path = self.path(rel);
        let created = !path.exists();
        if !created && std::fs::read_to_string(&path).is_ok_and(|current| current == content) {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        let verb = if created { "Created" } else { "Rewrote" };
        self.result.record_fix(format!("{} {}", verb, rel));
        self.result.record_file(rel);
        Ok(true)
    }

    fn remove_if_present(&mut self, rel: &str, reason: &str) -> Result<bool, AppError> {
        if !self.exists(rel) {
            return Ok(false);
        }
        std::fs::remove_file(self.path(rel))?;
        self.result.record_fix(format!("Removed {} ({})", rel, reason));
        self.result.record_file(format!("{} (removed)", rel));
        Ok(true)
    }

    fn remove_dir_if_empty(&mut self, rel: &str) -> Result<(), AppError> {
        let path = self.path(rel);
        if !path.is_dir() {
            return Ok(());
        }
        if std::fs::read_dir(&path)?.next().is_none() {
            std::fs::remove_dir(&path)?;
            self.result.record_fix(format!("Removed empty {}/ directory", rel));
        }
        Ok(())
    }
}

// =============================================================================
// Steps
// =============================================================================

fn normalize_manifest(ctx: &mut FixContext) -> Result<(), AppError> {
    let imported = collect_imported_packages(&ctx.root);
    let path = ctx.path(MANIFEST);

    let (mut manifest, created) = if path.is_file() {
        let raw = std::fs::read_to_string(&path)?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| AppError::Validation(format!("package.json is not valid JSON: {}", e)))?;
        (value, false)
    } else {
        let name = ctx
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        (manifest::baseline_manifest(&name), true)
    };

    let before = manifest.clone();
    let notes = manifest::normalize(&mut manifest, ctx.policy, &imported);
    if !created && manifest == before {
        return Ok(());
    }

    let mut text = serde_json::to_string_pretty(&manifest)?;
    text.push('\n');
    std::fs::write(&path, text)?;

    if created {
        ctx.result.record_fix("Created package.json");
    } else {
        ctx.result.fixes.extend(notes);
    }
    ctx.result.record_file(MANIFEST);
    Ok(())
}

fn write_styling_config(ctx: &mut FixContext) -> Result<(), AppError> {
    match ctx.policy {
        StylingPolicy::Tailwind => {
            ctx.write_if_changed("tailwind.config.js", templates::TAILWIND_CONFIG)?;
            ctx.write_if_changed("postcss.config.js", templates::POSTCSS_CONFIG)?;
            for variant in TAILWIND_CONFIG_VARIANTS.iter().chain(POSTCSS_CONFIG_VARIANTS) {
                ctx.remove_if_present(variant, "superseded by the .js config")?;
            }
        }
        StylingPolicy::PlainCss => {
            for file in ["tailwind.config.js", "postcss.config.js"]
                .iter()
                .chain(TAILWIND_CONFIG_VARIANTS)
                .chain(POSTCSS_CONFIG_VARIANTS)
            {
                ctx.remove_if_present(file, "plain CSS policy")?;
            }
        }
    }
    Ok(())
}

/// Per-file failures are recorded and do not stop the scan.
fn rewrite_import_paths(ctx: &mut FixContext) -> Result<(), AppError> {
    for file in imports::source_files(&ctx.root) {
        let rel = file
            .strip_prefix(&ctx.root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        let outcome = std::fs::read_to_string(&file).and_then(|content| {
            match imports::rewrite_imports(&content) {
                Some(updated) => std::fs::write(&file, updated).map(|_| true),
                None => Ok(false),
            }
        });
        match outcome {
            Ok(true) => {
                ctx.result.record_fix(format!("Rewrote imports in {}", rel));
                ctx.result.record_file(rel);
            }
            Ok(false) => {}
            Err(e) => ctx.result.record_error("import paths", format!("{}: {}", rel, e)),
        }
    }
    Ok(())
}

fn write_global_stylesheet(ctx: &mut FixContext) -> Result<(), AppError> {
    let css = match ctx.policy {
        StylingPolicy::Tailwind => templates::INDEX_CSS_TAILWIND,
        StylingPolicy::PlainCss => templates::INDEX_CSS_PLAIN,
    };
    ctx.write_if_changed(INDEX_CSS, css)?;
    Ok(())
}

fn write_vite_config(ctx: &mut FixContext) -> Result<(), AppError> {
    ctx.write_if_changed(VITE_CONFIG, &templates::vite_config())?;
    for shadow in VITE_CONFIG_SHADOWS {
        ctx.remove_if_present(shadow, "shadows vite.config.ts")?;
    }
    Ok(())
}

fn write_tsconfig(ctx: &mut FixContext) -> Result<(), AppError> {
    ctx.write_if_changed(TSCONFIG, &templates::tsconfig_text())?;
    Ok(())
}

fn remove_conflicting_files(ctx: &mut FixContext) -> Result<(), AppError> {
    if !ctx.exists(VITE_CONFIG) {
        return Ok(());
    }
    for file in NEXT_SCAFFOLD {
        ctx.remove_if_present(file, "conflicts with Vite")?;
    }
    for dir in NEXT_DIRS {
        ctx.remove_dir_if_empty(dir)?;
    }
    Ok(())
}

fn relocate_stylesheets(ctx: &mut FixContext) -> Result<(), AppError> {
    let canonical = ctx.path(CANONICAL_GLOBAL_CSS);
    let canonical_empty = std::fs::metadata(&canonical).map(|m| m.len() == 0).unwrap_or(true);
    if !canonical_empty {
        return Ok(());
    }

    let Some(source) = ALTERNATE_STYLESHEETS.iter().find(|f| ctx.exists(f)) else {
        return Ok(());
    };
    if let Some(parent) = canonical.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(ctx.path(source), &canonical)?;
    ctx.result
        .record_fix(format!("Moved {} to {}", source, CANONICAL_GLOBAL_CSS));
    ctx.result.record_file(CANONICAL_GLOBAL_CSS);
    ctx.remove_dir_if_empty("styles")?;
    Ok(())
}

fn synthesize_entry_points(ctx: &mut FixContext) -> Result<(), AppError> {
    if !ctx.exists("index.html") {
        ctx.write_if_changed("index.html", templates::INDEX_HTML)?;
    }
    let has_app = ["src/App.tsx", "src/App.jsx", "src/App.ts", "src/App.js"]
        .iter()
        .any(|f| ctx.exists(f));
    if has_app && !ctx.exists("src/main.tsx") && !ctx.exists("src/main.jsx") {
        ctx.write_if_changed("src/main.tsx", templates::MAIN_TSX)?;
    }
    Ok(())
}
