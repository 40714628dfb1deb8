//! zerobuild-preview: live preview workspace orchestration.
//!
//! The [`workspace`] module boots or reuses one sandbox per process, installs
//! dependencies once, starts the dev server and resolves its preview URL.
//! [`export`], [`store`] and [`gateway`] produce and replay static builds.

pub mod config;
pub mod export;
pub mod gateway;
pub mod sandbox;
pub mod store;
pub mod workspace;

pub use config::WorkspaceConfig;
pub use workspace::{SandboxContext, WorkspaceError, WorkspaceSession, WorkspaceState};
