//! Sandbox abstraction layer for the preview workspace.
//!
//! Defines the [`SandboxEnvironment`] and [`Sandbox`] traits that every
//! sandbox provider must implement, plus the [`SandboxProcess`] handle returned
//! by `spawn`. One provider ships with the crate:
//!
//! - [`local::LocalEnvironment`]: host processes rooted in a scratch directory
//!
//! The orchestrator in [`crate::workspace`] only talks to these traits.

pub mod events;
pub mod local;
pub mod tree;

pub use events::{EventEmitter, EventKind, Listener, PortStatus, SandboxEvent, Unsubscribe};
pub use tree::{FileNode, FileTree};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use std::sync::Arc;

/// Kind of a directory entry returned by [`Sandbox::read_dir`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a sandbox directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// A process spawned inside a sandbox.
///
/// `output` yields chunks of combined stdout/stderr and ends once the process
/// has exited. `exit` resolves to the exit code.
pub struct SandboxProcess {
    output: BoxStream<'static, String>,
    exit: BoxFuture<'static, anyhow::Result<i32>>,
}

impl SandboxProcess {
    pub fn new(
        output: BoxStream<'static, String>,
        exit: BoxFuture<'static, anyhow::Result<i32>>,
    ) -> Self {
        Self { output, exit }
    }

    pub fn into_parts(
        self,
    ) -> (
        BoxStream<'static, String>,
        BoxFuture<'static, anyhow::Result<i32>>,
    ) {
        (self.output, self.exit)
    }
}

/// Boots fresh sandbox instances.
#[async_trait]
pub trait SandboxEnvironment: Send + Sync {
    /// Initialize a new sandbox instance.
    async fn boot(&self) -> anyhow::Result<Arc<dyn Sandbox>>;
}

/// A live sandbox: virtual filesystem, process spawning and server events.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Provider-specific identifier, used in logs.
    fn id(&self) -> &str;

    /// Write a whole file tree into the sandbox root.
    async fn mount(&self, tree: &FileTree) -> anyhow::Result<()>;

    /// Read a file as UTF-8.
    async fn read_file(&self, path: &str) -> anyhow::Result<String>;

    /// Write content to a file path, creating parent directories.
    async fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()>;

    /// List entries at a directory path.
    async fn read_dir(&self, path: &str) -> anyhow::Result<Vec<DirEntry>>;

    /// Start `command` with `args`. Returns as soon as the process is running.
    async fn spawn(&self, command: &str, args: &[String]) -> anyhow::Result<SandboxProcess>;

    /// Register a listener for one kind of sandbox event.
    fn on(&self, kind: EventKind, listener: Listener) -> Unsubscribe;

    /// Release everything the sandbox holds. Providers without explicit
    /// teardown keep the default.
    async fn teardown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
