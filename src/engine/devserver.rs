//! Live preview supervisor.
//!
//! Each saved project can have one development server child process. The
//! process is tracked in a [`ProcessRegistry`] keyed by project id and its
//! port is persisted to a JSON sidecar so a preview that outlives a restart
//! can still be found.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use ts_rs::TS;

use crate::config::PreviewConfig;
use crate::error::AppError;

use super::locks::ProjectLocks;
use super::workspace::ProjectStore;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_PORT_PROBES: u16 = 1_000;

static LOCAL_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Local:\s+http://localhost:(\d+)").unwrap());

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum PreviewStatus {
    Starting,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ProcessEntry {
    pub port: u16,
    pub status: PreviewStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Distinguishes successive runs of the same project.
    pub run_id: uuid::Uuid,
    pub cancel: CancellationToken,
}

/// Tracked dev-server processes, keyed by project id.
pub trait ProcessRegistry: Send + Sync {
    fn get(&self, project_id: &str) -> Option<ProcessEntry>;
    fn set(&self, project_id: &str, entry: ProcessEntry);
    fn remove(&self, project_id: &str) -> Option<ProcessEntry>;
    /// Apply `f` to the entry if present. Returns whether it was.
    fn update(&self, project_id: &str, f: &mut dyn FnMut(&mut ProcessEntry)) -> bool;
    fn project_ids(&self) -> Vec<String>;
    fn ports_in_use(&self) -> Vec<u16>;
}

#[derive(Default)]
pub struct InMemoryRegistry {
    entries: Mutex<HashMap<String, ProcessEntry>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProcessEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProcessRegistry for InMemoryRegistry {
    fn get(&self, project_id: &str) -> Option<ProcessEntry> {
        self.lock().get(project_id).cloned()
    }

    fn set(&self, project_id: &str, entry: ProcessEntry) {
        self.lock().insert(project_id.to_string(), entry);
    }

    fn remove(&self, project_id: &str) -> Option<ProcessEntry> {
        self.lock().remove(project_id)
    }

    fn update(&self, project_id: &str, f: &mut dyn FnMut(&mut ProcessEntry)) -> bool {
        match self.lock().get_mut(project_id) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    fn project_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn ports_in_use(&self) -> Vec<u16> {
        self.lock().values().map(|e| e.port).collect()
    }
}

// =============================================================================
// Port mapping sidecar
// =============================================================================

/// Best-effort `{ projectId: port }` JSON file. Read failures yield an
/// empty mapping and write failures are logged.
pub struct PortMappingStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl PortMappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: tokio::sync::Mutex::new(()) }
    }

    pub async fn load(&self) -> BTreeMap<String, u16> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable port mapping file");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }

    pub async fn get(&self, project_id: &str) -> Option<u16> {
        self.load().await.get(project_id).copied()
    }

    pub async fn set(&self, project_id: &str, port: u16) {
        let _guard = self.write_lock.lock().await;
        let mut mappings = self.load().await;
        mappings.insert(project_id.to_string(), port);
        self.save(&mappings).await;
    }

    pub async fn remove(&self, project_id: &str) {
        let _guard = self.write_lock.lock().await;
        let mut mappings = self.load().await;
        if mappings.remove(project_id).is_some() {
            self.save(&mappings).await;
        }
    }

    async fn save(&self, mappings: &BTreeMap<String, u16>) {
        let result = async {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let json = serde_json::to_string_pretty(mappings)?;
            tokio::fs::write(&self.path, json).await?;
            Ok::<_, AppError>(())
        }
        .await;
        if let Err(e) = result {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to save port mappings");
        }
    }
}

// =============================================================================
// Manager
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum PreviewSource {
    TrackedProcess,
    PersistentMapping,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PreviewInfo {
    pub project_id: String,
    pub status: PreviewStatus,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    pub source: PreviewSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl PreviewInfo {
    fn stopped(project_id: &str, message: Option<String>) -> Self {
        Self {
            project_id: project_id.to_string(),
            status: PreviewStatus::Stopped,
            running: false,
            port: None,
            preview_url: None,
            source: PreviewSource::None,
            message,
            created_at: None,
        }
    }

    fn tracked(project_id: &str, entry: &ProcessEntry, message: Option<String>) -> Self {
        let running = entry.status == PreviewStatus::Running;
        Self {
            project_id: project_id.to_string(),
            status: entry.status,
            running,
            port: Some(entry.port),
            preview_url: Some(preview_url(entry.port)),
            source: PreviewSource::TrackedProcess,
            message,
            created_at: Some(entry.created_at.to_rfc3339()),
        }
    }
}

pub fn preview_url(port: u16) -> String {
    format!("http://localhost:{}", port)
}

/// Port announced by a dev server's startup banner.
pub fn detect_port(line: &str) -> Option<u16> {
    LOCAL_URL.captures(line)?.get(1)?.as_str().parse().ok()
}

pub struct DevServerManager {
    registry: Arc<dyn ProcessRegistry>,
    mappings: Arc<PortMappingStore>,
    store: ProjectStore,
    locks: Arc<ProjectLocks>,
    config: PreviewConfig,
    next_port: AtomicU16,
    http: reqwest::Client,
}

/// Everything a supervisor task needs, detached from the manager.
struct RunContext {
    project_id: String,
    dir: PathBuf,
    npm: PathBuf,
    port: u16,
    run_id: uuid::Uuid,
    cancel: CancellationToken,
    grace: Duration,
    registry: Arc<dyn ProcessRegistry>,
    mappings: Arc<PortMappingStore>,
    locks: Arc<ProjectLocks>,
}

impl DevServerManager {
    pub fn new(
        config: PreviewConfig,
        store: ProjectStore,
        registry: Arc<dyn ProcessRegistry>,
        mappings: Arc<PortMappingStore>,
        locks: Arc<ProjectLocks>,
    ) -> Self {
        Self {
            next_port: AtomicU16::new(config.port_start),
            registry,
            mappings,
            store,
            locks,
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Start a dev server for a saved project, or report the one already
    /// tracked. Returns once the process is registered as `starting`.
    pub async fn start(&self, project_id: &str) -> Result<PreviewInfo, AppError> {
        if let Some(entry) = self.registry.get(project_id) {
            return Ok(PreviewInfo::tracked(
                project_id,
                &entry,
                Some("Project already running".into()),
            ));
        }

        let dir = self.store.existing_project_dir(project_id)?;
        if !dir.join("package.json").is_file() {
            return Err(AppError::NotFound(format!(
                "Project {} is missing package.json",
                project_id
            )));
        }
        let npm = which::which(&self.config.npm_program).map_err(|e| {
            AppError::ProcessSpawn(format!("{} not found: {}", self.config.npm_program, e))
        })?;
        let port = self.allocate_port().await?;

        let entry = ProcessEntry {
            port,
            status: PreviewStatus::Starting,
            created_at: chrono::Utc::now(),
            run_id: uuid::Uuid::new_v4(),
            cancel: CancellationToken::new(),
        };
        self.registry.set(project_id, entry.clone());

        let ctx = RunContext {
            project_id: project_id.to_string(),
            dir,
            npm,
            port,
            run_id: entry.run_id,
            cancel: entry.cancel.clone(),
            grace: Duration::from_secs(self.config.stop_grace_secs),
            registry: self.registry.clone(),
            mappings: self.mappings.clone(),
            locks: self.locks.clone(),
        };
        tokio::spawn(supervise(ctx));

        tracing::info!(project_id = %project_id, port, "Starting live preview");
        Ok(PreviewInfo::tracked(
            project_id,
            &entry,
            Some(format!("Project starting on port {} (installing dependencies...)", port)),
        ))
    }

    pub async fn stop(&self, project_id: &str) -> Result<PreviewInfo, AppError> {
        let entry = self
            .registry
            .remove(project_id)
            .ok_or_else(|| AppError::NotFound(format!("Project {} is not running", project_id)))?;
        entry.cancel.cancel();
        self.mappings.remove(project_id).await;
        tracing::info!(project_id = %project_id, port = entry.port, "Live preview stopped");
        Ok(PreviewInfo::stopped(project_id, Some("Preview stopped".into())))
    }

    pub async fn status(&self, project_id: &str) -> PreviewInfo {
        if let Some(entry) = self.registry.get(project_id) {
            return PreviewInfo::tracked(project_id, &entry, None);
        }

        if let Some(port) = self.mappings.get(project_id).await {
            if self.probe(port).await {
                return PreviewInfo {
                    project_id: project_id.to_string(),
                    status: PreviewStatus::Running,
                    running: true,
                    port: Some(port),
                    preview_url: Some(preview_url(port)),
                    source: PreviewSource::PersistentMapping,
                    message: None,
                    created_at: None,
                };
            }
            tracing::debug!(project_id = %project_id, port, "Dropping stale port mapping");
            self.mappings.remove(project_id).await;
        }

        let message = match self.store.existing_project_dir(project_id) {
            Ok(_) => None,
            Err(_) => Some("Project directory not found".to_string()),
        };
        PreviewInfo::stopped(project_id, message)
    }

    /// Cancel every supervised process.
    pub fn shutdown(&self) {
        for project_id in self.registry.project_ids() {
            if let Some(entry) = self.registry.remove(&project_id) {
                entry.cancel.cancel();
            }
        }
    }

    async fn probe(&self, port: u16) -> bool {
        match self.http.head(preview_url(port)).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn allocate_port(&self) -> Result<u16, AppError> {
        let mut taken = self.registry.ports_in_use();
        taken.extend(self.mappings.load().await.into_values());

        for _ in 0..MAX_PORT_PROBES {
            let port = self.next_port.fetch_add(1, Ordering::Relaxed);
            if port < self.config.port_start {
                // Wrapped around u16
                self.next_port.store(self.config.port_start, Ordering::Relaxed);
                continue;
            }
            if !taken.contains(&port) && port_is_free(port) {
                return Ok(port);
            }
        }
        Err(AppError::ProcessSpawn("No free preview port available".into()))
    }
}

fn port_is_free(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

// =============================================================================
// Supervisor
// =============================================================================

async fn supervise(ctx: RunContext) {
    match run_dev_server(&ctx).await {
        Ok(()) => tracing::info!(project_id = %ctx.project_id, "Dev server exited"),
        Err(e) => tracing::warn!(project_id = %ctx.project_id, error = %e, "Dev server failed"),
    }
    // Only clear our own entry; a newer run may have replaced it
    if ctx.registry.get(&ctx.project_id).is_some_and(|e| e.run_id == ctx.run_id) {
        ctx.registry.remove(&ctx.project_id);
    }
}

fn npm_command(npm: &Path, dir: &Path) -> Command {
    let mut cmd = Command::new(npm);
    cmd.current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group so the whole tree can be signalled
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

async fn run_dev_server(ctx: &RunContext) -> Result<(), AppError> {
    // Wait for any save or fixer pass on this project to finish first
    let guard = tokio::select! {
        guard = ctx.locks.acquire(&ctx.project_id) => guard,
        _ = ctx.cancel.cancelled() => return Ok(()),
    };

    let mut install = npm_command(&ctx.npm, &ctx.dir)
        .arg("install")
        .spawn()
        .map_err(|e| AppError::ProcessSpawn(format!("npm install: {}", e)))?;
    forward_output(&ctx.project_id, &mut install);
    let status = tokio::select! {
        status = install.wait() => status?,
        _ = ctx.cancel.cancelled() => {
            terminate(&mut install, ctx.grace).await;
            return Ok(());
        }
    };
    drop(guard);
    if !status.success() {
        return Err(AppError::ProcessSpawn(format!("npm install exited with {}", status)));
    }

    tracing::info!(project_id = %ctx.project_id, port = ctx.port, "Dependencies installed, starting dev server");
    let port_arg = ctx.port.to_string();
    let mut dev = npm_command(&ctx.npm, &ctx.dir)
        .args(["run", "dev", "--", "--port", &port_arg])
        .env("PORT", &port_arg)
        .spawn()
        .map_err(|e| AppError::ProcessSpawn(format!("npm run dev: {}", e)))?;

    ctx.registry.update(&ctx.project_id, &mut |entry| {
        entry.status = PreviewStatus::Running;
    });
    ctx.mappings.set(&ctx.project_id, ctx.port).await;

    if let Some(stderr) = dev.stderr.take() {
        let project_id = ctx.project_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(project_id = %project_id, "[stderr] {}", line);
            }
        });
    }

    let mut stdout = dev.stdout.take().map(|s| BufReader::new(s).lines());
    loop {
        tokio::select! {
            line = async {
                match stdout.as_mut() {
                    Some(lines) => lines.next_line().await,
                    None => std::future::pending().await,
                }
            } => match line {
                Ok(Some(line)) => {
                    tracing::debug!(project_id = %ctx.project_id, "[stdout] {}", line);
                    if let Some(actual) = detect_port(&line) {
                        correct_port(ctx, actual).await;
                    }
                }
                _ => stdout = None,
            },
            status = dev.wait() => {
                let status = status?;
                tracing::info!(project_id = %ctx.project_id, %status, "Dev server process ended");
                return Ok(());
            }
            _ = ctx.cancel.cancelled() => {
                terminate(&mut dev, ctx.grace).await;
                return Ok(());
            }
        }
    }
}

async fn correct_port(ctx: &RunContext, actual: u16) {
    let mut changed = false;
    ctx.registry.update(&ctx.project_id, &mut |entry| {
        if entry.run_id == ctx.run_id && entry.port != actual {
            entry.port = actual;
            changed = true;
        }
    });
    if changed {
        tracing::warn!(project_id = %ctx.project_id, expected = ctx.port, actual, "Dev server bound a different port");
        ctx.mappings.set(&ctx.project_id, actual).await;
    }
}

/// Log a short-lived child's output at debug level.
fn forward_output(project_id: &str, child: &mut Child) {
    for reader in [
        child.stdout.take().map(|s| Box::new(s) as Box<dyn tokio::io::AsyncRead + Send + Unpin>),
        child.stderr.take().map(|s| Box::new(s) as Box<dyn tokio::io::AsyncRead + Send + Unpin>),
    ]
    .into_iter()
    .flatten()
    {
        let project_id = project_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(project_id = %project_id, "[npm install] {}", line);
            }
        });
    }
}

/// SIGTERM the child's process group, then kill it after `grace`.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let group = -(pid as libc::pid_t);
            // SAFETY: signalling a process group we created; no memory is touched.
            unsafe {
                libc::kill(group, libc::SIGTERM);
            }
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
            unsafe {
                libc::kill(group, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;
    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(tmp: &Path, npm: &str, port_start: u16) -> DevServerManager {
        let config = PreviewConfig {
            port_start,
            npm_program: npm.to_string(),
            auto_start: false,
            stop_grace_secs: 1,
        };
        DevServerManager::new(
            config,
            ProjectStore::new(tmp.join("projects")),
            Arc::new(InMemoryRegistry::new()),
            Arc::new(PortMappingStore::new(tmp.join(".port-mapping.json"))),
            Arc::new(ProjectLocks::new()),
        )
    }

    fn make_project(tmp: &Path, id: &str) {
        let dir = tmp.join("projects").join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("package.json"), "{}").unwrap();
    }

    async fn wait_for<F: Fn(&PreviewInfo) -> bool>(m: &DevServerManager, id: &str, pred: F) -> PreviewInfo {
        for _ in 0..100 {
            let info = m.status(id).await;
            if pred(&info) {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached for {}", id);
    }

    #[cfg(unix)]
    fn fake_npm(tmp: &Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = tmp.join("fake-npm");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_detect_port() {
        assert_eq!(detect_port("  ➜  Local:   http://localhost:5174/"), Some(5174));
        assert_eq!(detect_port("ready in 300ms"), None);
    }

    #[test]
    fn test_registry_update_and_remove() {
        let registry = InMemoryRegistry::new();
        registry.set(
            "p",
            ProcessEntry {
                port: 3002,
                status: PreviewStatus::Starting,
                created_at: chrono::Utc::now(),
                run_id: uuid::Uuid::new_v4(),
                cancel: CancellationToken::new(),
            },
        );
        assert!(registry.update("p", &mut |e| e.status = PreviewStatus::Running));
        assert_eq!(registry.get("p").unwrap().status, PreviewStatus::Running);
        assert_eq!(registry.ports_in_use(), vec![3002]);
        assert!(registry.remove("p").is_some());
        assert!(!registry.update("p", &mut |_| {}));
    }

    #[tokio::test]
    async fn test_port_mapping_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PortMappingStore::new(tmp.path().join("nested/.port-mapping.json"));
        assert!(store.load().await.is_empty());
        store.set("a", 3002).await;
        store.set("b", 3003).await;
        store.remove("a").await;
        assert_eq!(store.get("b").await, Some(3003));
        assert_eq!(store.get("a").await, None);
    }

    #[tokio::test]
    async fn test_corrupt_mapping_reads_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(".port-mapping.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(PortMappingStore::new(path).load().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_requires_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "npm", 41_000);
        assert!(matches!(m.start("missing").await, Err(AppError::NotFound(_))));

        std::fs::create_dir_all(tmp.path().join("projects/bare")).unwrap();
        assert!(matches!(m.start("bare").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stop_untracked_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "npm", 41_000);
        assert!(matches!(m.stop("p").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stale_mapping_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let m = manager(tmp.path(), "npm", 41_000);
        make_project(tmp.path(), "p");
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        m.mappings.set("p", port).await;

        let info = m.status("p").await;
        assert_eq!(info.status, PreviewStatus::Stopped);
        assert_eq!(m.mappings.get("p").await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_install_clears_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let npm = fake_npm(tmp.path(), "exit 1");
        let m = manager(tmp.path(), &npm, 41_100);
        make_project(tmp.path(), "p");

        let info = m.start("p").await.unwrap();
        assert_eq!(info.status, PreviewStatus::Starting);
        assert_eq!(info.source, PreviewSource::TrackedProcess);

        let info = wait_for(&m, "p", |i| i.status == PreviewStatus::Stopped).await;
        assert!(!info.running);
        assert!(m.registry.get("p").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_running_server_port_corrected_then_stopped() {
        let tmp = tempfile::tempdir().unwrap();
        let npm = fake_npm(
            tmp.path(),
            "if [ \"$1\" = install ]; then exit 0; fi\necho \"  Local:   http://localhost:45999/\"\nexec sleep 30",
        );
        let m = manager(tmp.path(), &npm, 41_200);
        make_project(tmp.path(), "p");

        m.start("p").await.unwrap();
        let again = m.start("p").await.unwrap();
        assert_eq!(again.message.as_deref(), Some("Project already running"));

        let info = wait_for(&m, "p", |i| i.port == Some(45_999)).await;
        assert!(info.running);
        assert_eq!(m.mappings.get("p").await, Some(45_999));

        let stopped = m.stop("p").await.unwrap();
        assert_eq!(stopped.status, PreviewStatus::Stopped);
        assert_eq!(m.mappings.get("p").await, None);
        assert!(m.registry.get("p").is_none());
    }
}
