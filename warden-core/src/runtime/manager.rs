//! Per-session runtime lifecycle.
//!
//! One [`Runtime`] per session id, created through a single dispatch point
//! keyed by [`RuntimeKind`]. Stopping or cleaning up an unknown session is
//! a no-op, so teardown paths can be retried safely.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{RuntimeConfig, RuntimeKind};
use crate::error::RuntimeError;
use crate::events::{Action, Observation};
use crate::runtime::{ContainerRuntime, LocalRuntime, Runtime, RuntimeStatus};

type SharedRuntime = Arc<Mutex<Box<dyn Runtime>>>;

/// Registry of live runtimes, one per session.
#[derive(Default)]
pub struct RuntimeManager {
    runtimes: Mutex<HashMap<String, SharedRuntime>>,
}

impl RuntimeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and start a runtime for `session_id`.
    ///
    /// The sole construction point: `config.runtime_kind` selects the
    /// backend. A second create for a live session is an error — a session
    /// owns exactly one execution context.
    pub async fn create_runtime(
        &self,
        session_id: &str,
        config: RuntimeConfig,
    ) -> Result<(), RuntimeError> {
        let mut runtimes = self.runtimes.lock().await;
        if runtimes.contains_key(session_id) {
            return Err(RuntimeError::Session(format!(
                "session already has a runtime: {session_id}"
            )));
        }

        let mut runtime: Box<dyn Runtime> = match config.runtime_kind {
            RuntimeKind::Local => Box::new(LocalRuntime::new(config)),
            RuntimeKind::Container => Box::new(ContainerRuntime::new(config)),
        };
        runtime.start(session_id).await?;

        runtimes.insert(session_id.to_string(), Arc::new(Mutex::new(runtime)));
        info!(session_id, "runtime created");
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Option<SharedRuntime> {
        self.runtimes.lock().await.get(session_id).cloned()
    }

    /// Execute an action in the session's runtime. Never fails: a missing
    /// runtime is an error observation, like any other action failure.
    pub async fn execute_action(&self, session_id: &str, action: Action) -> Observation {
        match self.get(session_id).await {
            Some(runtime) => runtime.lock().await.execute_action(action).await,
            None => Observation::error(format!("no runtime available for session {session_id}")),
        }
    }

    pub async fn status(&self, session_id: &str) -> Option<RuntimeStatus> {
        let runtime = self.get(session_id).await?;
        let status = runtime.lock().await.status();
        Some(status)
    }

    pub async fn active_sessions(&self) -> Vec<String> {
        self.runtimes.lock().await.keys().cloned().collect()
    }

    /// Stop and remove the session's runtime. Unknown sessions are a no-op.
    pub async fn stop_runtime(&self, session_id: &str) -> Result<(), RuntimeError> {
        let removed = self.runtimes.lock().await.remove(session_id);
        match removed {
            Some(runtime) => {
                let result = runtime.lock().await.stop().await;
                info!(session_id, "runtime stopped");
                result
            }
            None => Ok(()),
        }
    }

    /// Stop every runtime, logging rather than propagating failures so one
    /// bad teardown cannot strand the rest.
    pub async fn cleanup_all(&self) {
        let drained: Vec<(String, SharedRuntime)> =
            self.runtimes.lock().await.drain().collect();
        for (session_id, runtime) in drained {
            if let Err(err) = runtime.lock().await.stop().await {
                warn!(session_id, error = %err, "runtime stop failed during cleanup");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn local_config(dir: &TempDir) -> RuntimeConfig {
        RuntimeConfig::local(dir.path())
    }

    #[tokio::test]
    async fn duplicate_session_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = RuntimeManager::new();
        manager
            .create_runtime("s1", local_config(&dir))
            .await
            .unwrap();
        let err = manager
            .create_runtime("s1", local_config(&dir))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Session(_)));
        manager.cleanup_all().await;
    }

    #[tokio::test]
    async fn unknown_session_yields_error_observation_not_panic() {
        let manager = RuntimeManager::new();
        let observation = manager
            .execute_action("ghost", Action::run("echo hi"))
            .await;
        assert!(!observation.success());
        assert!(observation.content().contains("no runtime available"));
    }

    #[tokio::test]
    async fn stop_unknown_session_is_noop() {
        let manager = RuntimeManager::new();
        assert!(manager.stop_runtime("ghost").await.is_ok());
    }

    #[tokio::test]
    async fn stop_twice_never_errors() {
        let dir = TempDir::new().unwrap();
        let manager = RuntimeManager::new();
        manager
            .create_runtime("s1", local_config(&dir))
            .await
            .unwrap();
        assert!(manager.stop_runtime("s1").await.is_ok());
        assert!(manager.stop_runtime("s1").await.is_ok());
    }
}
