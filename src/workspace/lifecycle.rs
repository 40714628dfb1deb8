//! Lifecycle manager: boot or reuse the shared sandbox, install once, reboot.

use super::{OutputLog, WorkspaceError, WorkspaceSession};
use crate::sandbox::Sandbox;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

async fn timed<T>(
    operation: &'static str,
    after: Duration,
    work: impl Future<Output = Result<T, WorkspaceError>>,
) -> Result<T, WorkspaceError> {
    tokio::time::timeout(after, work)
        .await
        .map_err(|_| WorkspaceError::TimedOut { operation, after })?
}

impl WorkspaceSession {
    /// Adopt the shared sandbox, booting and installing first if none exists.
    ///
    /// Never fails: boot and install errors are logged and recorded in
    /// `last_error`, leaving the session not ready and not booting. Once ready,
    /// the dev server is started automatically once per boot cycle.
    pub async fn ensure_ready(&self) {
        self.ensure_sandbox().await;
        self.maybe_auto_start().await;
    }

    /// [`ensure_ready`](Self::ensure_ready) without the dev server auto-start.
    pub async fn ensure_sandbox(&self) {
        if self.sandbox().is_none() {
            if let Some(existing) = self.context.current() {
                tracing::debug!(sandbox = existing.id(), "Reusing booted sandbox");
                self.adopt(existing);
            } else {
                self.state.send_modify(|s| {
                    s.booting = true;
                    s.last_error = None;
                });

                match self.boot_and_install().await {
                    Ok(sandbox) => {
                        tracing::info!(sandbox = sandbox.id(), "Sandbox ready");
                        self.context.publish(Arc::clone(&sandbox));
                        self.adopt(sandbox);
                    }
                    Err(e) => {
                        tracing::error!("Sandbox boot failed: {e}");
                        self.record_error(&e);
                    }
                }

                self.state.send_modify(|s| {
                    s.booting = false;
                    s.installing_deps = false;
                });
            }
        }
    }

    /// Tear down the shared sandbox and boot a fresh one.
    ///
    /// The install flag is kept, so the new sandbox does not reinstall.
    pub async fn reboot(&self) {
        tracing::info!("Rebooting sandbox");
        self.teardown();

        // Not ready before the handle goes, so `ready` never outlives it.
        self.state.send_modify(|s| s.ready = false);
        self.sandbox.write().take();
        let previous = self.context.discard();
        if let Some(old) = previous {
            if let Err(e) = old.teardown().await {
                tracing::warn!(sandbox = old.id(), "Sandbox teardown failed: {e:#}");
            }
        }

        self.preview.reset();
        self.auto_start.reset();
        self.dev_server_output.lock().take();

        self.ensure_ready().await;
    }

    async fn boot_and_install(&self) -> Result<Arc<dyn Sandbox>, WorkspaceError> {
        let config = self.context.config();
        let environment = Arc::clone(self.context.environment());

        let sandbox = timed("boot", config.boot_timeout(), async move {
            environment.boot().await.map_err(WorkspaceError::Boot)
        })
        .await?;
        tracing::info!(sandbox = sandbox.id(), "Sandbox booted");

        // A sandbox that booted but never became ready is released here.
        if let Err(e) = self.prepare(sandbox.as_ref()).await {
            if let Err(te) = sandbox.teardown().await {
                tracing::warn!(sandbox = sandbox.id(), "Sandbox teardown failed: {te:#}");
            }
            return Err(e);
        }
        Ok(sandbox)
    }

    async fn prepare(&self, sandbox: &dyn Sandbox) -> Result<(), WorkspaceError> {
        let config = self.context.config();

        timed("mount", config.boot_timeout(), async {
            sandbox
                .mount(self.context.template())
                .await
                .map_err(WorkspaceError::Boot)
        })
        .await?;

        if self.context.deps_installed() {
            tracing::debug!("Dependencies already installed; skipping");
            return Ok(());
        }

        self.state.send_modify(|s| s.installing_deps = true);
        let install = &config.install;
        tracing::info!(command = %install, "Installing dependencies");

        let running = self
            .runner
            .run_with_log(sandbox, &install.program, &install.args, OutputLog::unbounded())
            .await?;
        let exit_code = timed("install", config.install_timeout(), running.wait()).await?;
        self.state.send_modify(|s| s.installing_deps = false);

        if exit_code != 0 {
            return Err(WorkspaceError::Install { exit_code });
        }
        self.context.mark_deps_installed();
        tracing::info!("Dependencies installed");
        Ok(())
    }

    async fn maybe_auto_start(&self) {
        let state = self.state();
        if !state.ready || state.preview_url.is_some() || state.server_starting {
            return;
        }
        if !self.auto_start.try_claim() {
            return;
        }
        if let Err(e) = self.start_preview_server().await {
            tracing::warn!("Automatic dev server start failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkspaceConfig;
    use crate::sandbox::SandboxEvent;
    use crate::workspace::testing::FakeEnvironment;
    use crate::workspace::SandboxContext;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn context(env: &Arc<FakeEnvironment>, config: WorkspaceConfig) -> Arc<SandboxContext> {
        Arc::new(SandboxContext::new(env.clone(), config).unwrap())
    }

    fn count(env: &FakeEnvironment, command: &str) -> usize {
        env.sandboxes()
            .iter()
            .flat_map(|s| s.spawned())
            .filter(|c| c == command)
            .count()
    }

    #[tokio::test]
    async fn remount_reuses_booted_sandbox() {
        let env = FakeEnvironment::new();
        let ctx = context(&env, WorkspaceConfig::default());

        for _ in 0..3 {
            let session = WorkspaceSession::new(Arc::clone(&ctx));
            session.ensure_ready().await;
            assert!(session.state().ready);
            assert!(!session.is_booting());
        }

        assert_eq!(env.boot_count(), 1);
        assert_eq!(count(&env, "npm install"), 1);
    }

    #[tokio::test]
    async fn template_is_mounted_before_install() {
        let env = FakeEnvironment::new();
        let session = WorkspaceSession::new(context(&env, WorkspaceConfig::default()));
        session.ensure_ready().await;

        let sandbox = env.last().unwrap();
        assert!(sandbox.file("/package.json").is_some());
        assert_eq!(sandbox.spawned().first().map(String::as_str), Some("npm install"));
    }

    #[tokio::test]
    async fn install_is_not_repeated_after_reboot() {
        let env = FakeEnvironment::new();
        let ctx = context(&env, WorkspaceConfig::default());
        let session = WorkspaceSession::new(Arc::clone(&ctx));

        session.ensure_ready().await;
        session.reboot().await;
        session.reboot().await;

        assert_eq!(env.boot_count(), 3);
        assert_eq!(count(&env, "npm install"), 1);
        assert!(ctx.deps_installed());
        assert!(env.last().unwrap().file("/package.json").is_some());
    }

    #[tokio::test]
    async fn install_failure_leaves_nothing_published() {
        let env = FakeEnvironment::new();
        env.set_install_exit(1);
        let ctx = context(&env, WorkspaceConfig::default());
        let session = WorkspaceSession::new(Arc::clone(&ctx));

        session.ensure_ready().await;
        let state = session.state();
        assert!(!state.ready);
        assert!(!state.booting);
        assert!(!state.installing_deps);
        assert!(state
            .last_error
            .is_some_and(|e| e.contains("exited with code 1")));
        assert!(!ctx.deps_installed());
        assert!(ctx.current().is_none());
        assert!(env.last().unwrap().is_torn_down());

        env.set_install_exit(0);
        session.ensure_ready().await;
        assert!(session.state().ready);
        assert_eq!(env.boot_count(), 2);
        assert!(ctx.deps_installed());
    }

    #[tokio::test]
    async fn boot_failure_fails_fast_afterwards() {
        let env = FakeEnvironment::new();
        env.fail_boots(true);
        let session = WorkspaceSession::new(context(&env, WorkspaceConfig::default()));

        session.ensure_ready().await;
        assert!(!session.is_booting());
        assert!(session.preview_url().is_none());
        assert!(session
            .state()
            .last_error
            .is_some_and(|e| e.contains("simulated boot rejection")));

        let err = session.start_preview_server().await.unwrap_err();
        assert!(err.is_not_ready());
        assert!(session.run_command("ls", &[]).await.unwrap_err().is_not_ready());
    }

    #[tokio::test]
    async fn reboot_clears_preview_and_auto_starts_once() {
        let env = FakeEnvironment::new();
        let session = WorkspaceSession::new(context(&env, WorkspaceConfig::default()));
        session.ensure_ready().await;
        env.last().unwrap().fire(SandboxEvent::ServerReady {
            port: 3000,
            url: "http://localhost:3000".into(),
        });
        assert!(session.preview_url().is_some());

        session.reboot().await;
        assert!(session.preview_url().is_none());
        assert!(session.is_server_starting());

        session.ensure_ready().await;
        session.ensure_ready().await;
        let fresh = env.last().unwrap();
        assert_eq!(fresh.spawned(), vec!["npm run dev"]);
        assert_eq!(count(&env, "npm run dev"), 2);
    }

    #[tokio::test]
    async fn reboot_tears_down_previous_sandbox() {
        let env = FakeEnvironment::new();
        let session = WorkspaceSession::new(context(&env, WorkspaceConfig::default()));
        session.ensure_ready().await;
        let old = env.last().unwrap();
        assert_eq!(old.listener_count(), 2);

        session.reboot().await;
        assert!(old.is_torn_down());
        assert_eq!(old.listener_count(), 0);
        assert!(!env.last().unwrap().is_torn_down());
    }

    #[tokio::test]
    async fn ensure_sandbox_skips_dev_server() {
        let env = FakeEnvironment::new();
        let session = WorkspaceSession::new(context(&env, WorkspaceConfig::default()));
        session.ensure_sandbox().await;

        assert!(session.state().ready);
        assert!(!session.is_server_starting());
        assert_eq!(env.last().unwrap().spawned(), vec!["npm install"]);
        assert_eq!(env.last().unwrap().listener_count(), 0);
    }

    #[tokio::test]
    async fn reboot_drops_ready_before_old_sandbox_goes() {
        let env = FakeEnvironment::new();
        let session = WorkspaceSession::new(context(&env, WorkspaceConfig::default()));
        session.ensure_ready().await;

        let rx = session.watch();
        let ready_during_teardown = Arc::new(AtomicBool::new(true));
        let seen = Arc::clone(&ready_during_teardown);
        env.last()
            .unwrap()
            .on_teardown(move || seen.store(rx.borrow().ready, Ordering::SeqCst));

        session.reboot().await;
        assert!(!ready_during_teardown.load(Ordering::SeqCst));
        assert!(session.state().ready);
    }

    #[tokio::test]
    async fn dropping_session_releases_listeners() {
        let env = FakeEnvironment::new();
        let ctx = context(&env, WorkspaceConfig::default());
        let session = WorkspaceSession::new(Arc::clone(&ctx));
        session.ensure_ready().await;
        let sandbox = env.last().unwrap();
        assert_eq!(sandbox.listener_count(), 2);

        drop(session);
        assert_eq!(sandbox.listener_count(), 0);
        assert!(ctx.current().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_boot_times_out() {
        let env = FakeEnvironment::new();
        env.delay_boots(Duration::from_secs(120));
        let config = WorkspaceConfig {
            boot_timeout_secs: 1,
            ..WorkspaceConfig::default()
        };
        let session = WorkspaceSession::new(context(&env, config));

        session.ensure_ready().await;
        let state = session.state();
        assert!(!state.booting);
        assert!(!state.ready);
        assert!(state
            .last_error
            .is_some_and(|e| e.contains("boot timed out after 1s")));
    }
}
