//! Process-wide sandbox state shared by every workspace session.

use super::template;
use crate::config::WorkspaceConfig;
use crate::sandbox::{tree, FileTree, Sandbox, SandboxEnvironment};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Long-lived application context owning the shared sandbox handle and the
/// install flag.
///
/// Sessions come and go (a UI remount creates a new one); the context
/// outlives them so a remount reuses the booted sandbox instead of booting
/// again. At most one handle is published at a time.
pub struct SandboxContext {
    environment: Arc<dyn SandboxEnvironment>,
    config: WorkspaceConfig,
    template: FileTree,
    handle: Mutex<Option<Arc<dyn Sandbox>>>,
    /// Set after the first successful install. Survives `reboot`.
    deps_installed: AtomicBool,
}

impl SandboxContext {
    /// Build a context, loading the starting tree from `config.template_dir`
    /// when set.
    pub fn new(
        environment: Arc<dyn SandboxEnvironment>,
        config: WorkspaceConfig,
    ) -> anyhow::Result<Self> {
        let template = match &config.template_dir {
            Some(dir) => tree::from_dir(dir)?,
            None => template::default_file_tree(),
        };
        Ok(Self::with_template(environment, config, template))
    }

    pub fn with_template(
        environment: Arc<dyn SandboxEnvironment>,
        config: WorkspaceConfig,
        template: FileTree,
    ) -> Self {
        Self {
            environment,
            config,
            template,
            handle: Mutex::new(None),
            deps_installed: AtomicBool::new(false),
        }
    }

    pub fn environment(&self) -> &Arc<dyn SandboxEnvironment> {
        &self.environment
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn template(&self) -> &FileTree {
        &self.template
    }

    /// The published sandbox, if one has finished booting.
    pub fn current(&self) -> Option<Arc<dyn Sandbox>> {
        self.handle.lock().clone()
    }

    pub(crate) fn publish(&self, sandbox: Arc<dyn Sandbox>) {
        *self.handle.lock() = Some(sandbox);
    }

    /// Drop the shared reference and hand back whatever was published.
    pub(crate) fn discard(&self) -> Option<Arc<dyn Sandbox>> {
        self.handle.lock().take()
    }

    /// Tear down the published sandbox, if any. Later sessions boot afresh.
    pub async fn shutdown(&self) {
        let Some(sandbox) = self.discard() else {
            return;
        };
        if let Err(e) = sandbox.teardown().await {
            tracing::warn!(sandbox = sandbox.id(), "Sandbox teardown failed: {e:#}");
        }
    }

    pub fn deps_installed(&self) -> bool {
        self.deps_installed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deps_installed(&self) {
        self.deps_installed.store(true, Ordering::Release);
    }
}
