//! In-memory sandbox used by the workspace tests.
//!
//! `FakeEnvironment` counts boots and keeps every sandbox it hands out so a
//! test can fire events on it or inspect what was spawned.

use crate::sandbox::{
    tree, DirEntry, EventEmitter, EventKind, FileTree, Listener, Sandbox, SandboxEnvironment,
    SandboxEvent, SandboxProcess, Unsubscribe,
};
use async_trait::async_trait;
use futures_util::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct FakeEnvironment {
    boots: AtomicUsize,
    fail_boot: AtomicBool,
    install_exit: AtomicI32,
    boot_delay: Mutex<Option<Duration>>,
    sandboxes: Mutex<Vec<Arc<FakeSandbox>>>,
}

impl FakeEnvironment {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            boots: AtomicUsize::new(0),
            fail_boot: AtomicBool::new(false),
            install_exit: AtomicI32::new(0),
            boot_delay: Mutex::new(None),
            sandboxes: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn fail_boots(&self, fail: bool) {
        self.fail_boot.store(fail, Ordering::SeqCst);
    }

    /// Exit code the next booted sandboxes report for the install command.
    pub(crate) fn set_install_exit(&self, code: i32) {
        self.install_exit.store(code, Ordering::SeqCst);
    }

    pub(crate) fn delay_boots(&self, delay: Duration) {
        *self.boot_delay.lock() = Some(delay);
    }

    pub(crate) fn boot_count(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }

    pub(crate) fn sandboxes(&self) -> Vec<Arc<FakeSandbox>> {
        self.sandboxes.lock().clone()
    }

    pub(crate) fn last(&self) -> Option<Arc<FakeSandbox>> {
        self.sandboxes.lock().last().cloned()
    }
}

#[async_trait]
impl SandboxEnvironment for FakeEnvironment {
    async fn boot(&self) -> anyhow::Result<Arc<dyn Sandbox>> {
        let n = self.boots.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.boot_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_boot.load(Ordering::SeqCst) {
            anyhow::bail!("simulated boot rejection");
        }

        let sandbox = Arc::new(FakeSandbox::new(
            &format!("fake-{n}"),
            self.install_exit.load(Ordering::SeqCst),
        ));
        self.sandboxes.lock().push(Arc::clone(&sandbox));
        Ok(sandbox)
    }
}

pub(crate) struct FakeSandbox {
    id: String,
    install_exit: i32,
    emitter: EventEmitter,
    files: Mutex<BTreeMap<String, String>>,
    spawned: Mutex<Vec<String>>,
    fail_spawn: AtomicBool,
    torn_down: AtomicBool,
    teardown_hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

fn normalize(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

impl FakeSandbox {
    pub(crate) fn new(id: &str, install_exit: i32) -> Self {
        Self {
            id: id.to_string(),
            install_exit,
            emitter: EventEmitter::new(),
            files: Mutex::new(BTreeMap::new()),
            spawned: Mutex::new(Vec::new()),
            fail_spawn: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            teardown_hook: Mutex::new(None),
        }
    }

    /// Run `hook` when this sandbox is torn down.
    pub(crate) fn on_teardown(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.teardown_hook.lock() = Some(Box::new(hook));
    }

    /// Deliver an event to the registered listeners.
    pub(crate) fn fire(&self, event: SandboxEvent) -> usize {
        self.emitter.emit(&event)
    }

    pub(crate) fn spawned(&self) -> Vec<String> {
        self.spawned.lock().clone()
    }

    pub(crate) fn fail_spawns(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.emitter.listener_count()
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub(crate) fn file(&self, path: &str) -> Option<String> {
        self.files.lock().get(&normalize(path)).cloned()
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn mount(&self, tree: &FileTree) -> anyhow::Result<()> {
        let mut files = self.files.lock();
        for (path, contents) in tree::flatten(tree) {
            files.insert(normalize(&path), contents.to_string());
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> anyhow::Result<String> {
        self.file(path)
            .ok_or_else(|| anyhow::anyhow!("No such file: {path}"))
    }

    async fn write_file(&self, path: &str, content: &str) -> anyhow::Result<()> {
        self.files
            .lock()
            .insert(normalize(path), content.to_string());
        Ok(())
    }

    async fn read_dir(&self, path: &str) -> anyhow::Result<Vec<DirEntry>> {
        let dir = normalize(path);
        let prefix = if dir == "/" { dir } else { format!("{dir}/") };
        let mut files = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        for key in self.files.lock().keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) => dirs.insert(child.to_string()),
                None => files.insert(rest.to_string()),
            };
        }
        anyhow::ensure!(
            !files.is_empty() || !dirs.is_empty(),
            "No such directory: {path}"
        );

        Ok(dirs
            .into_iter()
            .map(DirEntry::directory)
            .chain(files.into_iter().map(DirEntry::file))
            .collect())
    }

    async fn spawn(&self, command: &str, args: &[String]) -> anyhow::Result<SandboxProcess> {
        anyhow::ensure!(
            !self.fail_spawn.load(Ordering::SeqCst),
            "simulated spawn failure"
        );
        let line = super::runner::display_command(command, args);
        self.spawned.lock().push(line.clone());

        let output = futures_util::stream::iter(vec![format!("$ {line}\n"), "done\n".to_string()])
            .boxed();
        let exit = match line.as_str() {
            "npm install" => futures_util::future::ready(Ok(self.install_exit)).boxed(),
            "npm run dev" => futures_util::future::pending::<anyhow::Result<i32>>().boxed(),
            _ => futures_util::future::ready(Ok(0)).boxed(),
        };
        Ok(SandboxProcess::new(output, exit))
    }

    fn on(&self, kind: EventKind, listener: Listener) -> Unsubscribe {
        self.emitter.on(kind, listener)
    }

    async fn teardown(&self) -> anyhow::Result<()> {
        if let Some(hook) = self.teardown_hook.lock().as_ref() {
            hook();
        }
        self.torn_down.store(true, Ordering::SeqCst);
        self.emitter.clear();
        Ok(())
    }
}
