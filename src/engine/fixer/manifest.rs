//! `package.json` normalization.
//!
//! Operates on a parsed JSON value so the caller can compare the value
//! before and after and write only on a semantic change.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use super::StylingPolicy;

const RUNTIME_BASELINE: &[(&str, &str)] = &[("react", "^18.3.1"), ("react-dom", "^18.3.1")];

const DEV_BASELINE: &[(&str, &str)] = &[
    ("@types/react", "^18.3.3"),
    ("@types/react-dom", "^18.3.0"),
    ("@typescript-eslint/eslint-plugin", "^7.2.0"),
    ("@typescript-eslint/parser", "^7.2.0"),
    ("@vitejs/plugin-react", "^4.2.1"),
    ("eslint", "^8.57.0"),
    ("eslint-plugin-react-hooks", "^4.6.0"),
    ("eslint-plugin-react-refresh", "^0.4.6"),
    ("typescript", "^5.2.2"),
    ("vite", "^5.2.0"),
];

const TAILWIND_DEV: &[(&str, &str)] = &[
    ("tailwindcss", "^3.4.1"),
    ("postcss", "^8.4.35"),
    ("autoprefixer", "^10.4.17"),
];

const SCRIPTS: &[(&str, &str)] = &[
    ("dev", "vite"),
    ("build", "vite build"),
    ("preview", "vite preview"),
    (
        "lint",
        "eslint . --ext ts,tsx --report-unused-disable-directives --max-warnings 0",
    ),
];

/// Packages from the other framework family that cannot coexist with Vite.
const CONFLICTING_PACKAGES: &[&str] = &["next", "eslint-config-next", "@next/font"];

/// Third-party packages added automatically when sources import them.
pub const KNOWN_PACKAGES: &[(&str, &str)] = &[
    ("@heroicons/react", "^2.0.0"),
    ("clsx", "^2.0.0"),
    ("framer-motion", "^11.0.0"),
    ("lucide-react", "^0.400.0"),
    ("react-hot-toast", "^2.4.0"),
    ("react-router-dom", "^6.22.0"),
    ("zustand", "^4.4.0"),
];

/// Build-time only packages; they belong in `devDependencies`.
pub fn is_dev_only(name: &str) -> bool {
    name.starts_with("@types/")
        || name.starts_with("@typescript-eslint/")
        || name.starts_with("eslint")
        || matches!(
            name,
            "tailwindcss" | "postcss" | "autoprefixer" | "typescript" | "vite" | "@vitejs/plugin-react"
        )
}

/// Manifest written when the project has none.
pub fn baseline_manifest(project_name: &str) -> Value {
    let name: String = project_name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    json!({
        "name": if name.is_empty() { "generated-app".to_string() } else { name },
        "private": true,
        "version": "0.0.0",
        "type": "module",
        "scripts": {},
        "dependencies": {},
        "devDependencies": {}
    })
}

/// Normalize `manifest` in place. Returns a description of each change.
pub fn normalize(
    manifest: &mut Value,
    policy: StylingPolicy,
    imported: &BTreeSet<String>,
) -> Vec<String> {
    let mut notes = Vec::new();

    if !manifest.is_object() {
        *manifest = Value::Object(Map::new());
        notes.push("Replaced non-object package.json root".to_string());
    }
    let Some(root) = manifest.as_object_mut() else {
        return notes;
    };

    for section in ["dependencies", "devDependencies", "scripts"] {
        if !root.get(section).is_some_and(Value::is_object) {
            if root.contains_key(section) {
                notes.push(format!("Reset malformed {}", section));
            }
            root.insert(section.to_string(), Value::Object(Map::new()));
        }
    }

    let mut deps = take_section(root, "dependencies");
    let mut dev = take_section(root, "devDependencies");
    let mut scripts = take_section(root, "scripts");

    // Conflicting framework packages
    let mut removed = Vec::new();
    for name in CONFLICTING_PACKAGES {
        if deps.remove(*name).is_some() | dev.remove(*name).is_some() {
            removed.push(*name);
        }
    }
    if !removed.is_empty() {
        notes.push(format!("Removed conflicting packages: {}", removed.join(", ")));
    }

    // Build tools listed as runtime dependencies
    let misplaced: Vec<String> = deps.keys().filter(|k| is_dev_only(k)).cloned().collect();
    for name in misplaced {
        if let Some(version) = deps.remove(&name) {
            if dev.contains_key(&name) {
                notes.push(format!("Removed duplicate {} from dependencies", name));
            } else {
                dev.insert(name.clone(), version);
                notes.push(format!("Moved {} to devDependencies", name));
            }
        }
    }

    // Remaining duplicates are runtime packages
    let duplicated: Vec<String> = dev.keys().filter(|k| deps.contains_key(*k)).cloned().collect();
    if !duplicated.is_empty() {
        for name in &duplicated {
            dev.remove(name);
        }
        notes.push(format!(
            "Removed {} duplicate dependencies: {}",
            duplicated.len(),
            duplicated.join(", ")
        ));
    }

    force_entries(&mut deps, RUNTIME_BASELINE, "dependency", &mut notes);
    force_entries(&mut dev, DEV_BASELINE, "devDependency", &mut notes);
    if policy == StylingPolicy::Tailwind {
        force_entries(&mut dev, TAILWIND_DEV, "devDependency", &mut notes);
    }
    force_entries(&mut scripts, SCRIPTS, "script", &mut notes);

    for (name, version) in KNOWN_PACKAGES {
        if imported.contains(*name) && !deps.contains_key(*name) && !dev.contains_key(*name) {
            deps.insert(name.to_string(), Value::String(version.to_string()));
            notes.push(format!("Added missing dependency {}@{}", name, version));
        }
    }

    root.insert("dependencies".into(), Value::Object(deps));
    root.insert("devDependencies".into(), Value::Object(dev));
    root.insert("scripts".into(), Value::Object(scripts));

    if root.get("type").and_then(Value::as_str) != Some("module") {
        root.insert("type".into(), Value::String("module".into()));
        notes.push("Set \"type\": \"module\"".to_string());
    }

    notes
}

fn take_section(root: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    // Leaves an empty map in place so the key keeps its position
    match root.get_mut(key) {
        Some(Value::Object(map)) => std::mem::take(map),
        _ => Map::new(),
    }
}

fn force_entries(
    section: &mut Map<String, Value>,
    entries: &[(&str, &str)],
    label: &str,
    notes: &mut Vec<String>,
) {
    for (name, value) in entries {
        if section.get(*name).and_then(Value::as_str) != Some(*value) {
            section.insert(name.to_string(), Value::String(value.to_string()));
            notes.push(format!("Pinned {} {} to {}", label, name, value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(mut manifest: Value) -> (Value, Vec<String>) {
        let notes = normalize(&mut manifest, StylingPolicy::Tailwind, &BTreeSet::new());
        (manifest, notes)
    }

    #[test]
    fn test_build_tool_moved_to_dev_only() {
        let (out, notes) = run(json!({
            "dependencies": { "postcss": "^8.0.0", "react": "^18.3.1" }
        }));
        assert!(out["dependencies"].get("postcss").is_none());
        // Forced baseline wins over the moved version
        assert_eq!(out["devDependencies"]["postcss"], "^8.4.35");
        assert!(notes.iter().any(|n| n == "Moved postcss to devDependencies"));
    }

    #[test]
    fn test_runtime_duplicate_kept_in_dependencies() {
        let (out, _) = run(json!({
            "dependencies": { "clsx": "^2.0.0" },
            "devDependencies": { "clsx": "^1.0.0" }
        }));
        assert_eq!(out["dependencies"]["clsx"], "^2.0.0");
        assert!(out["devDependencies"].get("clsx").is_none());
    }

    #[test]
    fn test_baseline_forced_and_user_fields_kept() {
        let (out, _) = run(json!({
            "name": "my-app",
            "dependencies": { "react": "^19.0.0", "axios": "^1.6.0" },
            "scripts": { "dev": "next dev", "test": "vitest" }
        }));
        assert_eq!(out["name"], "my-app");
        assert_eq!(out["dependencies"]["react"], "^18.3.1");
        assert_eq!(out["dependencies"]["axios"], "^1.6.0");
        assert_eq!(out["scripts"]["dev"], "vite");
        assert_eq!(out["scripts"]["test"], "vitest");
        assert_eq!(out["type"], "module");
    }

    #[test]
    fn test_conflicting_framework_packages_removed() {
        let (out, _) = run(json!({
            "dependencies": { "next": "15.0.0" },
            "devDependencies": { "eslint-config-next": "15.0.0" }
        }));
        assert!(out["dependencies"].get("next").is_none());
        assert!(out["devDependencies"].get("eslint-config-next").is_none());
    }

    #[test]
    fn test_missing_known_package_added_when_imported() {
        let mut manifest = json!({});
        let imported: BTreeSet<String> = ["clsx".to_string(), "left-pad".to_string()].into();
        normalize(&mut manifest, StylingPolicy::Tailwind, &imported);
        assert_eq!(manifest["dependencies"]["clsx"], "^2.0.0");
        assert!(manifest["dependencies"].get("left-pad").is_none());
    }

    #[test]
    fn test_plain_policy_skips_tailwind() {
        let mut manifest = json!({});
        normalize(&mut manifest, StylingPolicy::PlainCss, &BTreeSet::new());
        assert!(manifest["devDependencies"].get("tailwindcss").is_none());
    }

    #[test]
    fn test_second_pass_is_noop() {
        let (once, _) = run(json!({ "dependencies": { "tailwindcss": "3" }, "scripts": [] }));
        let (twice, notes) = run(once.clone());
        assert_eq!(once, twice);
        assert!(notes.is_empty(), "unexpected notes: {:?}", notes);
    }

    #[test]
    fn test_baseline_manifest_name_is_sanitized() {
        let manifest = baseline_manifest("1700000000000-AbC_x");
        assert_eq!(manifest["name"], "1700000000000-abc-x");
        assert_eq!(manifest["type"], "module");
    }
}
