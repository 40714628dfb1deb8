//! Local sandbox provider: runs processes on the host inside a scratch directory.
//!
//! Each boot creates `<workspace_dir>/sandbox-<uuid>` and confines filesystem
//! calls to it. Preview URLs are `http://localhost:{port}` and are only
//! accessible from the machine running the workspace. Server events come from
//! a prober that polls the watched ports.

use super::{
    tree, DirEntry, EventEmitter, EventKind, FileTree, Listener, PortStatus, Sandbox,
    SandboxEnvironment, SandboxEvent, SandboxProcess, Unsubscribe,
};
use crate::config::WorkspaceConfig;
use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Buffered output chunks per process before the reader waits on the consumer.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;
const READ_CHUNK_BYTES: usize = 4096;
const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

pub fn localhost_url(port: u16) -> String {
    format!("http://localhost:{port}")
}

/// Boots [`LocalSandbox`] instances under a workspace directory.
pub struct LocalEnvironment {
    workspace_dir: PathBuf,
    ports: Vec<u16>,
    probe_interval: Duration,
    cleanup_on_teardown: bool,
}

impl LocalEnvironment {
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            ports: vec![3000],
            probe_interval: Duration::from_millis(250),
            cleanup_on_teardown: true,
        }
    }

    pub fn from_config(config: &WorkspaceConfig) -> Self {
        Self::new(config.workspace_dir.clone())
            .with_ports(vec![config.preview_port])
            .with_probe_interval(config.probe_interval())
            .with_cleanup(config.cleanup_on_teardown)
    }

    /// Ports the prober watches for `port` / `server-ready` events.
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup_on_teardown = cleanup;
        self
    }
}

#[async_trait]
impl SandboxEnvironment for LocalEnvironment {
    async fn boot(&self) -> anyhow::Result<Arc<dyn Sandbox>> {
        let id = format!("sandbox-{}", uuid::Uuid::new_v4().simple());
        let root = self.workspace_dir.join(&id);

        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            anyhow::anyhow!("Failed to create sandbox directory {}: {e}", root.display())
        })?;

        let sandbox = Arc::new(LocalSandbox::new(id, root, self.cleanup_on_teardown));
        sandbox.start_port_probe(self.ports.clone(), self.probe_interval);

        tracing::info!(
            sandbox = %sandbox.id,
            root = %sandbox.root.display(),
            "Local sandbox booted"
        );
        Ok(sandbox)
    }
}

/// Host-process sandbox rooted in one directory.
///
/// Every spawned process leads its own process group; teardown and drop kill
/// those groups, so background children die with the sandbox.
pub struct LocalSandbox {
    id: String,
    root: PathBuf,
    emitter: EventEmitter,
    /// Ports the prober currently sees open.
    open_ports: Arc<Mutex<BTreeSet<u16>>>,
    process_groups: Mutex<BTreeSet<u32>>,
    shutdown: CancellationToken,
    cleanup_on_teardown: bool,
}

impl LocalSandbox {
    pub fn new(id: String, root: PathBuf, cleanup_on_teardown: bool) -> Self {
        Self {
            id,
            root,
            emitter: EventEmitter::new(),
            open_ports: Arc::new(Mutex::new(BTreeSet::new())),
            process_groups: Mutex::new(BTreeSet::new()),
            shutdown: CancellationToken::new(),
            cleanup_on_teardown,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a sandbox path onto the host. Absolute paths are re-rooted;
    /// `..` is rejected.
    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    anyhow::bail!("Path escapes the sandbox root: {path}")
                }
            }
        }
        Ok(resolved)
    }

    fn kill_process_groups(&self) {
        let groups = std::mem::take(&mut *self.process_groups.lock());
        for pgid in groups {
            kill_process_group(pgid);
        }
    }

    fn start_port_probe(&self, ports: Vec<u16>, interval: Duration) {
        if ports.is_empty() {
            return;
        }
        tokio::spawn(probe_ports(
            self.emitter.clone(),
            Arc::clone(&self.open_ports),
            ports,
            interval,
            self.shutdown.clone(),
        ));
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn mount(&self, tree: &FileTree) -> anyhow::Result<()> {
        for (path, contents) in tree::flatten(tree) {
            self.write_file(&path, contents).await?;
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> anyhow::Result<String> {
        let target = self.resolve(path)?;
        tokio::fs::read_to_string(&target)
            .await
            .map_err(|e| anyhow::anyhow!("File not found or unreadable: {path}: {e}"))
    }

    async fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|e| anyhow::anyhow!("write_file failed for {path}: {e}"))
    }

    async fn read_dir(&self, path: &str) -> anyhow::Result<Vec<DirEntry>> {
        let target = self.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&target)
            .await
            .map_err(|e| anyhow::anyhow!("Directory not found or unreadable: {path}: {e}"))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                entries.push(DirEntry::directory(name));
            } else if file_type.is_file() {
                entries.push(DirEntry::file(name));
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn spawn(&self, command: &str, args: &[String]) -> anyhow::Result<SandboxProcess> {
        anyhow::ensure!(
            !self.shutdown.is_cancelled(),
            "Sandbox {} has been torn down",
            self.id
        );

        let mut cmd = Command::new(command);
        cmd.args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn {command}: {e}"))?;
        if let Some(pid) = child.id() {
            self.process_groups.lock().insert(pid);
        }

        let (tx, rx) = mpsc::channel::<String>(OUTPUT_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, tx.clone()));
        }
        drop(tx);

        let (exit_tx, exit_rx) = oneshot::channel::<i32>();
        let shutdown = self.shutdown.clone();
        let label = command.to_string();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = shutdown.cancelled() => {
                    if let Some(pid) = child.id() {
                        kill_process_group(pid);
                    }
                    if let Err(e) = child.kill().await {
                        tracing::debug!("Failed to kill {label}: {e}");
                    }
                    child.wait().await
                }
            };
            let code = match status {
                // Killed by a signal: no exit code.
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    tracing::warn!("Failed to wait for {label}: {e}");
                    -1
                }
            };
            let _ = exit_tx.send(code);
        });

        let exit = async move {
            exit_rx
                .await
                .map_err(|_| anyhow::anyhow!("Process exited without reporting a status"))
        }
        .boxed();

        Ok(SandboxProcess::new(ReceiverStream::new(rx).boxed(), exit))
    }

    /// Port listeners are immediately told about ports that are already open,
    /// so a late subscriber still sees a running server.
    fn on(&self, kind: EventKind, listener: Listener) -> Unsubscribe {
        let unsubscribe = self.emitter.on(kind, Arc::clone(&listener));
        if kind == EventKind::Port {
            let open: Vec<u16> = self.open_ports.lock().iter().copied().collect();
            for port in open {
                listener(&SandboxEvent::Port {
                    port,
                    status: PortStatus::Open,
                    url: localhost_url(port),
                });
            }
        }
        unsubscribe
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        self.emitter.clear();
        self.kill_process_groups();

        if self.cleanup_on_teardown {
            match tokio::fs::remove_dir_all(&self.root).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => anyhow::bail!(
                    "Failed to remove sandbox directory {}: {e}",
                    self.root.display()
                ),
            }
        }

        tracing::info!(sandbox = %self.id, "Local sandbox torn down");
        Ok(())
    }
}

impl Drop for LocalSandbox {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.emitter.clear();
        self.kill_process_groups();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: kill(2) takes no pointers; a negative pid addresses the group.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::debug!(pgid, "Failed to kill process group: {err}");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Forward output chunks. Keeps draining after the consumer goes away so
/// the child never blocks on a full pipe.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<String>) {
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    let mut pending = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let text = take_complete_utf8(&mut pending);
                if !text.is_empty() {
                    let _ = tx.send(text).await;
                }
            }
            Err(e) => {
                tracing::debug!("Process output stream error: {e}");
                break;
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned()).await;
    }
}

/// Decode `pending` up to a trailing character that is still missing bytes,
/// leaving that partial character in place for the next read.
fn take_complete_utf8(pending: &mut Vec<u8>) -> String {
    let cut = pending.len() - incomplete_tail(pending);
    let text = String::from_utf8_lossy(&pending[..cut]).into_owned();
    pending.drain(..cut);
    text
}

fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

async fn probe_ports(
    emitter: EventEmitter,
    open_ports: Arc<Mutex<BTreeSet<u16>>>,
    ports: Vec<u16>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut announced = BTreeSet::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for &port in &ports {
            let is_open = port_is_open(port).await;
            let was_open = open_ports.lock().contains(&port);
            let url = localhost_url(port);

            if is_open && !was_open {
                open_ports.lock().insert(port);
                tracing::debug!(port, "Port opened");
                emitter.emit(&SandboxEvent::Port {
                    port,
                    status: PortStatus::Open,
                    url: url.clone(),
                });
                if announced.insert(port) {
                    emitter.emit(&SandboxEvent::ServerReady { port, url });
                }
            } else if !is_open && was_open {
                open_ports.lock().remove(&port);
                tracing::debug!(port, "Port closed");
                emitter.emit(&SandboxEvent::Port {
                    port,
                    status: PortStatus::Close,
                    url,
                });
            }
        }
    }
}

async fn port_is_open(port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}
