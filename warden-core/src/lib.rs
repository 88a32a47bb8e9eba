//! # warden-core - Sandboxed execution runtime
//!
//! `warden-core` is the execution substrate beneath an AI coding-agent
//! platform. The agent loop emits [`events::Action`] values (run a command,
//! read/write/edit a file, list a directory); a [`runtime::Runtime`] executes
//! them inside an isolated environment and answers with a structured
//! [`events::Observation`]. The agent never touches the environment directly.
//!
//! ## Architecture Overview
//!
//! - `events/`: the Action/Observation tagged unions that cross the boundary.
//! - `config`: immutable [`config::RuntimeConfig`] supplied at construction.
//! - `shell/`: a persistent pty-backed shell with sentinel output framing.
//! - `workspace`: path-confined filesystem primitives shared by the local
//!   runtime and the execution server.
//! - `runtime/`: the [`runtime::Runtime`] trait, the per-session
//!   [`runtime::RuntimeManager`], and the local and container backends.
//! - `server/`: the in-sandbox action execution server (axum) and its
//!   reqwest client.
//!
//! ## Quickstart
//!
//! ```rust,ignore
//! use warden_core::config::RuntimeConfig;
//! use warden_core::events::Action;
//! use warden_core::runtime::RuntimeManager;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), anyhow::Error> {
//!     let manager = RuntimeManager::new();
//!     manager.create_runtime("session-1", RuntimeConfig::default()).await?;
//!
//!     let observation = manager
//!         .execute_action("session-1", Action::run("echo hello"))
//!         .await;
//!     println!("{}", observation.content());
//!
//!     manager.cleanup_all().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod runtime;
pub mod server;
pub mod shell;
pub mod utils;
pub mod workspace;

pub use config::{RuntimeConfig, RuntimeKind};
pub use error::RuntimeError;
pub use events::{Action, Observation};
pub use runtime::{Runtime, RuntimeManager};
