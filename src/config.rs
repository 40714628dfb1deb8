//! Workspace configuration, loaded from TOML.
//!
//! Lookup order: an explicit path, then `config.toml` in the platform config
//! directory, then built-in defaults. Every section is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const ENV_WORKSPACE_DIR: &str = "ZEROBUILD_PREVIEW_WORKSPACE_DIR";
pub const ENV_PREVIEW_PORT: &str = "ZEROBUILD_PREVIEW_PORT";

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent directory for local sandbox roots.
    pub workspace_dir: PathBuf,
    /// Starting file tree to mount. `None` mounts the built-in Next.js starter.
    pub template_dir: Option<PathBuf>,
    pub install: CommandSpec,
    pub dev_server: CommandSpec,
    /// Port whose `port` event resolves the preview URL.
    pub preview_port: u16,
    pub probe_interval_ms: u64,
    pub boot_timeout_secs: u64,
    pub install_timeout_secs: u64,
    /// 0 waits forever.
    pub preview_timeout_secs: u64,
    /// Output chunks retained per command (install output is not capped).
    pub output_buffer_chunks: usize,
    pub cleanup_on_teardown: bool,
    pub export: ExportConfig,
    pub gateway: GatewayConfig,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("~/.zerobuild-preview/sandboxes"),
            template_dir: None,
            install: CommandSpec::new("npm", &["install"]),
            dev_server: CommandSpec::new("npm", &["run", "dev"]),
            preview_port: 3000,
            probe_interval_ms: 250,
            boot_timeout_secs: 60,
            install_timeout_secs: 600,
            preview_timeout_secs: 180,
            output_buffer_chunks: 2_000,
            cleanup_on_teardown: true,
            export: ExportConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Static export build pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub template_dir: PathBuf,
    /// Shell line run in the build directory before building.
    pub install_command: String,
    pub build_command: String,
    /// Export output, relative to the build directory.
    pub out_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("templates/next-tailwind-shadcn"),
            install_command: "bun install".to_string(),
            build_command: "npx cross-env NODE_ENV=production bun run build".to_string(),
            out_dir: PathBuf::from("out"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            request_timeout_secs: 600,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl WorkspaceConfig {
    /// Load configuration and apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(p) => Self::from_file(&p)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        config.expand_paths();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {e}", path.display()))?;
        Self::from_toml_str(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid config {}: {e}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// `config.toml` in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "zerobuild", "zerobuild-preview")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(dir) = std::env::var(ENV_WORKSPACE_DIR) {
            if !dir.trim().is_empty() {
                self.workspace_dir = PathBuf::from(dir);
            }
        }
        if let Ok(port) = std::env::var(ENV_PREVIEW_PORT) {
            self.preview_port = port
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{ENV_PREVIEW_PORT} must be a port number: {e}"))?;
        }
        Ok(())
    }

    fn expand_paths(&mut self) {
        self.workspace_dir = expand(&self.workspace_dir);
        self.template_dir = self.template_dir.as_deref().map(expand);
        self.export.template_dir = expand(&self.export.template_dir);
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(10))
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn preview_timeout(&self) -> Option<Duration> {
        (self.preview_timeout_secs > 0).then(|| Duration::from_secs(self.preview_timeout_secs))
    }
}

/// Expand `~` and `$VARS`; unresolvable variables leave the path as written.
fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}
