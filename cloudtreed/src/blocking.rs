//! Synchronous entry point for callers without an async runtime.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::runtime::Runtime;

use crate::app::App;
use crate::config::AppConfig;
use crate::service::CommandService;
use crate::session::{SessionEngine, SessionRequest, SessionResponse};

/// Owns a tokio runtime and blocks on each call.
pub struct BlockingCommandService {
    service: Arc<CommandService>,
    sessions: SessionEngine,
    // Dropped last so the stores close while the runtime is still alive.
    runtime: Runtime,
}

impl BlockingCommandService {
    pub fn open(config: AppConfig) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;
        let app = runtime.block_on(App::bootstrap(config))?;
        Ok(Self {
            service: app.service,
            sessions: app.sessions,
            runtime,
        })
    }

    /// Runs one service call to completion.
    pub fn run<F, Fut, T>(&self, call: F) -> T
    where
        F: FnOnce(Arc<CommandService>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.runtime.block_on(call(Arc::clone(&self.service)))
    }

    pub fn handle(&self, request: SessionRequest) -> SessionResponse {
        self.runtime.block_on(self.sessions.handle(request))
    }
}

impl Drop for BlockingCommandService {
    fn drop(&mut self) {
        self.service.shutdown_token().cancel();
    }
}
