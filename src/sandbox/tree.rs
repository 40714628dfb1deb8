//! Mountable file tree.
//!
//! Serializes to the nested `{"file": {"contents": ..}}` /
//! `{"directory": {..}}` shape sandboxes accept for `mount`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

/// Directories skipped when loading a tree from disk.
pub const SKIP_DIRS: &[&str] = &["node_modules", ".next", ".git", "dist", "build", ".cache"];

/// Path segment → node.
pub type FileTree = BTreeMap<String, FileNode>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileNode {
    File { contents: String },
    Directory(FileTree),
}

impl FileNode {
    pub fn file(contents: impl Into<String>) -> Self {
        FileNode::File {
            contents: contents.into(),
        }
    }

    pub fn directory<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, FileNode)>,
        K: Into<String>,
    {
        FileNode::Directory(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Flatten a tree into `(relative path, contents)` pairs, parents first.
pub fn flatten(tree: &FileTree) -> Vec<(String, &str)> {
    let mut out = Vec::new();
    collect(tree, "", &mut out);
    out
}

fn collect<'a>(tree: &'a FileTree, prefix: &str, out: &mut Vec<(String, &'a str)>) {
    for (name, node) in tree {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        match node {
            FileNode::File { contents } => out.push((path, contents.as_str())),
            FileNode::Directory(children) => collect(children, &path, out),
        }
    }
}

/// Load every UTF-8 file under `root` into a tree, skipping build artifacts.
pub fn from_dir(root: &Path) -> anyhow::Result<FileTree> {
    anyhow::ensure!(root.is_dir(), "Template directory not found: {}", root.display());

    let mut tree = FileTree::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name().to_str().is_some_and(|n| SKIP_DIRS.contains(&n)))
        });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root)?;
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        match std::fs::read_to_string(entry.path()) {
            Ok(contents) => insert(&mut tree, &segments, contents),
            Err(e) => {
                tracing::debug!(
                    "Skipping unreadable template file {}: {e}",
                    entry.path().display()
                );
            }
        }
    }

    Ok(tree)
}

fn insert(tree: &mut FileTree, segments: &[String], contents: String) {
    match segments {
        [] => {}
        [name] => {
            tree.insert(name.clone(), FileNode::file(contents));
        }
        [dir, rest @ ..] => {
            let node = tree
                .entry(dir.clone())
                .or_insert_with(|| FileNode::Directory(FileTree::new()));
            if let FileNode::File { .. } = node {
                *node = FileNode::Directory(FileTree::new());
            }
            if let FileNode::Directory(children) = node {
                insert(children, rest, contents);
            }
        }
    }
}
