//! On-disk project store: one directory per generated project.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::AppError;
use crate::validation::require_project_id;

use super::extractor::{is_preview_path, sanitize_path, PREVIEW_PATH};
use super::types::FileRecord;

const README: &str = "README.md";
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SaveOutcome {
    /// Files written, README included.
    pub saved_files: usize,
    pub project_path: String,
}

/// Fresh id of the form `<unix millis>-<9 base36 chars>`.
pub fn new_project_id() -> String {
    let mut bits = uuid::Uuid::new_v4().as_u128();
    let suffix: String = (0..9)
        .map(|_| {
            let c = BASE36[(bits % 36) as usize] as char;
            bits /= 36;
            c
        })
        .collect();
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), suffix)
}

#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `project_id`, which need not exist yet.
    pub fn project_dir(&self, project_id: &str) -> Result<PathBuf, AppError> {
        require_project_id(project_id)?;
        Ok(self.root.join(project_id))
    }

    /// Directory for an already saved project.
    pub fn existing_project_dir(&self, project_id: &str) -> Result<PathBuf, AppError> {
        let dir = self.project_dir(project_id)?;
        if !dir.is_dir() {
            return Err(AppError::NotFound(format!("Project {}", project_id)));
        }
        Ok(dir)
    }

    /// Write `files` under the project directory, plus the preview
    /// document and a generated README. Every path is checked before
    /// anything touches the disk.
    pub async fn save_files(
        &self,
        project_id: &str,
        files: &[FileRecord],
        preview_html: Option<&str>,
    ) -> Result<SaveOutcome, AppError> {
        let dir = self.project_dir(project_id)?;
        let mut paths = Vec::with_capacity(files.len());
        for file in files {
            match sanitize_path(&file.path) {
                Some(path) => paths.push(path),
                None => return Err(AppError::Validation(format!("Unsafe file path: {}", file.path))),
            }
        }
        tokio::fs::create_dir_all(&dir).await?;

        let mut written = Vec::with_capacity(files.len());
        let mut preview = preview_html.map(str::to_string);
        for (file, path) in files.iter().zip(paths) {
            if is_preview_path(&path) {
                preview = Some(file.content.clone());
                continue;
            }
            let target = dir.join(&path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, &file.content).await?;
            written.push(path);
        }

        if let Some(html) = preview.filter(|h| !h.trim().is_empty()) {
            tokio::fs::write(dir.join(PREVIEW_PATH), html).await?;
            written.push(PREVIEW_PATH.to_string());
        }

        let readme = render_readme(project_id, &written, chrono::Utc::now());
        tokio::fs::write(dir.join(README), readme).await?;

        tracing::info!(project_id = %project_id, files = written.len(), "Project saved");
        Ok(SaveOutcome {
            saved_files: written.len() + 1,
            project_path: dir.to_string_lossy().into_owned(),
        })
    }

    /// Saved preview document, if the project has one.
    pub async fn read_preview(&self, project_id: &str) -> Result<Option<String>, AppError> {
        let path = self.existing_project_dir(project_id)?.join(PREVIEW_PATH);
        match tokio::fs::read_to_string(&path).await {
            Ok(html) => Ok(Some(html)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn render_readme(project_id: &str, files: &[String], generated_at: chrono::DateTime<chrono::Utc>) -> String {
    let listing: Vec<String> = files.iter().map(|f| format!("- {}", f)).collect();
    format!(
        "# Generated Project: {id}\n\n\
## Quick Start\n\n\
### Run with Node.js\n\
```bash\nnpm install\nnpm run dev\n```\n\n\
The application will be available at http://localhost:3000\n\n\
## Project Structure\n\
{listing}\n\n\
## Generated Files\n\
- Total files: {count}\n\
- Generated: {ts}\n",
        id = project_id,
        listing = listing.join("\n"),
        count = files.len(),
        ts = generated_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, content: &str) -> FileRecord {
        FileRecord { path: path.into(), content: content.into() }
    }

    #[test]
    fn test_new_project_id_shape() {
        let id = new_project_id();
        let (millis, suffix) = id.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert!(require_project_id(&id).is_ok());
        assert_ne!(new_project_id(), id);
    }

    #[tokio::test]
    async fn test_save_writes_files_and_readme() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(tmp.path());
        let files = vec![
            record("src/App.tsx", "export default function App() {}"),
            record("package.json", "{}"),
        ];
        let outcome = store.save_files("p1", &files, None).await.unwrap();
        assert_eq!(outcome.saved_files, 3);

        let dir = tmp.path().join("p1");
        assert_eq!(
            std::fs::read_to_string(dir.join("src/App.tsx")).unwrap(),
            "export default function App() {}"
        );
        let readme = std::fs::read_to_string(dir.join("README.md")).unwrap();
        assert!(readme.starts_with("# Generated Project: p1"));
        assert!(readme.contains("- src/App.tsx"));
        assert!(readme.contains("- Total files: 2"));
    }

    #[tokio::test]
    async fn test_preview_routed_to_preview_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(tmp.path());
        let files = vec![record("Preview.html", "<p>from files</p>")];
        store.save_files("p2", &files, None).await.unwrap();
        assert_eq!(store.read_preview("p2").await.unwrap().as_deref(), Some("<p>from files</p>"));

        store.save_files("p3", &[], Some("<p>explicit</p>")).await.unwrap();
        assert_eq!(store.read_preview("p3").await.unwrap().as_deref(), Some("<p>explicit</p>"));
    }

    #[tokio::test]
    async fn test_rejects_escaping_ids_and_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(tmp.path());
        assert!(matches!(store.save_files("../x", &[], None).await, Err(AppError::Validation(_))));
        let files = vec![record("../../etc/passwd", "x")];
        assert!(matches!(store.save_files("ok", &files, None).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unsafe_path_leaves_nothing_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(tmp.path());
        let files = vec![record("src/App.tsx", "export default 1"), record("../evil.ts", "x")];

        let err = store.save_files("p", &files, Some("<p>x</p>")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(!tmp.path().join("p").exists());
        assert!(!tmp.path().join("evil.ts").exists());
    }

    #[tokio::test]
    async fn test_missing_project_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(tmp.path());
        assert!(matches!(store.existing_project_dir("nope"), Err(AppError::NotFound(_))));
        assert!(matches!(store.read_preview("nope").await, Err(AppError::NotFound(_))));
    }
}
