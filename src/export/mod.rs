//! Static export pipeline.
//!
//! Copies the export template into a scratch directory, overlays the user's
//! files, runs the install and build commands there and loads the output
//! directory into the [`BuildStore`] under a fresh build id.

use crate::config::ExportConfig;
use crate::sandbox::tree::SKIP_DIRS;
use crate::store::{BuildStore, StaticFile};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use uuid::Uuid;
use walkdir::WalkDir;

/// Combined output kept in a failed command's error.
const MAX_FAILURE_OUTPUT: usize = 4000;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid file path: {0}")]
    InvalidPath(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed with exit code {code:?}: {output}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        output: String,
    },

    #[error("template directory not found: {}", .0.display())]
    Template(PathBuf),
}

fn io_err(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> ExportError {
    let context = context.into();
    move |source| ExportError::Io { context, source }
}

/// Runs one export per call. Builds run concurrently if called concurrently;
/// each gets its own directory.
#[derive(Debug, Clone)]
pub struct StaticExporter {
    config: ExportConfig,
    store: BuildStore,
}

impl StaticExporter {
    pub fn new(config: ExportConfig, store: BuildStore) -> Self {
        Self { config, store }
    }

    pub fn store(&self) -> &BuildStore {
        &self.store
    }

    /// Build `user_files` (relative path → content) and return the build id.
    pub async fn build(&self, user_files: HashMap<String, String>) -> Result<String, ExportError> {
        let build_id = Uuid::new_v4().simple().to_string();
        let workdir = tempfile::Builder::new()
            .prefix(&format!("build-{build_id}-"))
            .tempdir()
            .map_err(io_err("Failed to create build directory"))?;
        let root = workdir.path().to_path_buf();
        tracing::info!(build_id = %build_id, files = user_files.len(), "Starting static export");

        let template = self.config.template_dir.clone();
        let dest = root.clone();
        blocking(move || {
            copy_template(&template, &dest)?;
            overlay_files(&dest, &user_files)
        })
        .await?;

        run_shell(&self.config.install_command, &root).await?;
        run_shell(&self.config.build_command, &root).await?;

        let out_dir = root.join(&self.config.out_dir);
        let files = blocking(move || collect_output(&out_dir)).await?;
        let count = self.store.store(&build_id, files);
        tracing::info!(build_id = %build_id, files = count, "Static export stored");

        // `workdir` is removed on drop.
        Ok(build_id)
    }
}

async fn blocking<T, F>(work: F) -> Result<T, ExportError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExportError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ExportError::Io {
            context: "Export task failed".to_string(),
            source: std::io::Error::other(e),
        })?
}

/// Relative path with only normal components.
pub fn sanitize_relative(path: &str) -> Result<PathBuf, ExportError> {
    let mut clean = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExportError::InvalidPath(path.to_string()));
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(ExportError::InvalidPath(path.to_string()));
    }
    Ok(clean)
}

fn copy_template(template: &Path, dest: &Path) -> Result<(), ExportError> {
    if !template.is_dir() {
        return Err(ExportError::Template(template.to_path_buf()));
    }

    let walker = WalkDir::new(template).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir() && SKIP_DIRS.contains(&e.file_name().to_string_lossy().as_ref()))
    });
    for entry in walker {
        let entry = entry.map_err(|e| ExportError::Io {
            context: "Failed to walk template".to_string(),
            source: e.into(),
        })?;
        let Ok(rel) = entry.path().strip_prefix(template) else {
            continue;
        };
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(io_err(format!("Failed to create {}", target.display())))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)
                .map_err(io_err(format!("Failed to copy {}", entry.path().display())))?;
        }
    }
    Ok(())
}

fn overlay_files(root: &Path, files: &HashMap<String, String>) -> Result<(), ExportError> {
    for (path, content) in files {
        let target = root.join(sanitize_relative(path)?);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(io_err(format!("Failed to create {}", parent.display())))?;
        }
        std::fs::write(&target, content).map_err(io_err(format!("Failed to write {path}")))?;
    }
    Ok(())
}

async fn run_shell(line: &str, cwd: &Path) -> Result<(), ExportError> {
    tracing::info!(command = line, "Running export step");
    let output = Command::new("sh")
        .arg("-c")
        .arg(line)
        .current_dir(cwd)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(io_err(format!("Failed to run `{line}`")))?;

    if output.status.success() {
        return Ok(());
    }

    let mut combined = String::from_utf8_lossy(&output.stderr).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    let combined = combined.trim();
    let tail_start = combined
        .char_indices()
        .rev()
        .nth(MAX_FAILURE_OUTPUT.saturating_sub(1))
        .map_or(0, |(i, _)| i);

    Err(ExportError::CommandFailed {
        command: line.to_string(),
        code: output.status.code(),
        output: combined[tail_start..].to_string(),
    })
}

fn collect_output(out_dir: &Path) -> Result<HashMap<String, StaticFile>, ExportError> {
    if !out_dir.is_dir() {
        return Err(ExportError::Io {
            context: format!("Export output missing at {}", out_dir.display()),
            source: std::io::ErrorKind::NotFound.into(),
        });
    }

    let mut files = HashMap::new();
    for entry in WalkDir::new(out_dir) {
        let entry = entry.map_err(|e| ExportError::Io {
            context: "Failed to walk export output".to_string(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(out_dir) else {
            continue;
        };
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = std::fs::read(entry.path())
            .map_err(io_err(format!("Failed to read {}", entry.path().display())))?;
        let content_type = mime_guess::from_path(entry.path())
            .first_raw()
            .unwrap_or("text/plain");
        files.insert(key, StaticFile::new(content, content_type));
    }
    Ok(files)
}
