//! In-memory store for static export artifacts, keyed by build id.
//!
//! Builds live for the lifetime of the process; nothing is persisted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// One exported file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFile {
    pub content: Vec<u8>,
    pub content_type: String,
}

impl StaticFile {
    pub fn new(content: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
        }
    }
}

/// Every file of one export, keyed by path relative to the output root
/// (`index.html`, `_next/static/app.js`).
#[derive(Debug, Clone)]
pub struct StaticBuild {
    pub files: HashMap<String, StaticFile>,
    pub created_at: DateTime<Utc>,
}

impl StaticBuild {
    pub fn new(files: HashMap<String, StaticFile>) -> Self {
        Self {
            files,
            created_at: Utc::now(),
        }
    }

    /// Look up a request path: empty means `index.html`, and a directory
    /// path falls back to its `index.html`.
    pub fn resolve(&self, path: &str) -> Option<&StaticFile> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return self.files.get("index.html");
        }
        self.files
            .get(path)
            .or_else(|| self.files.get(&format!("{path}/index.html")))
    }
}

/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct BuildStore {
    builds: Arc<DashMap<String, Arc<StaticBuild>>>,
}

impl BuildStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `files` under `build_id`, replacing any previous build.
    pub fn store(&self, build_id: &str, files: HashMap<String, StaticFile>) -> usize {
        let count = files.len();
        self.builds
            .insert(build_id.to_string(), Arc::new(StaticBuild::new(files)));
        tracing::debug!(build_id, files = count, "Stored static build");
        count
    }

    pub fn get(&self, build_id: &str) -> Option<Arc<StaticBuild>> {
        self.builds.get(build_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns whether a build was removed.
    pub fn delete(&self, build_id: &str) -> bool {
        self.builds.remove(build_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.builds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.is_empty()
    }
}
