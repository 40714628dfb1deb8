//! Best-effort file sync between the editor and the sandbox filesystem.

use super::{WorkspaceError, WorkspaceEvent, WorkspaceSession};
use crate::sandbox::Sandbox;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use std::sync::Arc;

/// Node of the editor's file explorer. `id` is the full sandbox path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileEntry {
    File {
        id: String,
        name: String,
        content: String,
    },
    Folder {
        id: String,
        name: String,
        children: Vec<FileEntry>,
    },
}

impl FileEntry {
    pub fn id(&self) -> &str {
        match self {
            FileEntry::File { id, .. } | FileEntry::Folder { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FileEntry::File { name, .. } | FileEntry::Folder { name, .. } => name,
        }
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

impl WorkspaceSession {
    /// Write a file into the adopted sandbox.
    ///
    /// Logs and returns when no sandbox is ready or the write fails; callers
    /// are never interrupted by a sync failure.
    pub async fn write_file(&self, path: &str, content: &str) {
        let Some(sandbox) = self.sandbox() else {
            tracing::warn!(path, "Sandbox not ready; dropping file write");
            return;
        };
        match sandbox.write_file(path, content).await {
            Ok(()) => {
                tracing::debug!(path, bytes = content.len(), "File synced");
                // No receivers is fine.
                let _ = self.events.send(WorkspaceEvent::FileModified {
                    path: path.to_string(),
                });
            }
            Err(e) => tracing::warn!(path, "File write failed: {e:#}"),
        }
    }

    pub async fn read_file(&self, path: &str) -> Result<String, WorkspaceError> {
        let sandbox = self.sandbox().ok_or(WorkspaceError::NotReady)?;
        sandbox
            .read_file(path)
            .await
            .map_err(|reason| WorkspaceError::Process {
                command: format!("read {path}"),
                reason,
            })
    }

    /// Recursive listing of `root` with file contents.
    pub async fn file_tree(&self, root: &str) -> Result<Vec<FileEntry>, WorkspaceError> {
        let sandbox = self.sandbox().ok_or(WorkspaceError::NotReady)?;
        Ok(list_dir(sandbox, root.to_string()).await)
    }
}

fn list_dir(sandbox: Arc<dyn Sandbox>, dir: String) -> BoxFuture<'static, Vec<FileEntry>> {
    async move {
        let entries = match sandbox.read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir, "Failed to read directory: {e:#}");
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = join(&dir, &entry.name);
            if entry.is_directory() {
                let children = list_dir(Arc::clone(&sandbox), id.clone()).await;
                out.push(FileEntry::Folder {
                    id,
                    name: entry.name,
                    children,
                });
            } else {
                let content = sandbox.read_file(&id).await.unwrap_or_else(|e| {
                    tracing::warn!(path = %id, "Failed to read file: {e:#}");
                    String::new()
                });
                out.push(FileEntry::File {
                    id,
                    name: entry.name,
                    content,
                });
            }
        }
        out
    }
    .boxed()
}
