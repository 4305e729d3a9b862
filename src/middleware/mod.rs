//! Edge middleware emulation
//!
//! Converts gateway events into edge requests, runs the deployment's
//! middleware in an embedded sandbox (falling back to a native runtime when
//! the sandbox lacks a capability) and interprets the result. Every failure
//! fails open: the request proceeds as if no middleware existed.

mod event;
mod executor;
mod loader;
mod matcher;
mod native;
mod outcome;
mod request;
mod sandbox;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use event::{GatewayEvent, GatewayResponse, Identity, RequestContext};
pub use executor::{
    classify, parse_script_output, ExecutionError, MiddlewareExecutor, ScriptResponse,
    UNSUPPORTED_CODE,
};
pub use loader::{CompiledMiddleware, LoadError};
pub use matcher::{normalize_data_path, MatcherError, RouteMatcher};
pub use native::NativeExecutor;
pub use outcome::{interpret, MiddlewareOutcome, Passthrough};
pub use request::{parse_cookies, EdgeRequest, Geo, RequestError};
pub use sandbox::{SandboxExecutor, DEFAULT_LOOP_ITERATION_LIMIT};

use crate::config::Config;
use crate::manifest::{CompatibilityMatrix, DeploymentManifest, MiddlewareMode, NEXT_DIR};

pub struct MiddlewareEmulator {
    mode: MiddlewareMode,
    middleware: Option<Arc<CompiledMiddleware>>,
    sandbox: Arc<dyn MiddlewareExecutor>,
    native: Arc<dyn MiddlewareExecutor>,
}

impl MiddlewareEmulator {
    pub fn new(
        mode: MiddlewareMode,
        middleware: CompiledMiddleware,
        sandbox: Arc<dyn MiddlewareExecutor>,
        native: Arc<dyn MiddlewareExecutor>,
    ) -> Self {
        Self {
            mode,
            middleware: Some(Arc::new(middleware)),
            sandbox,
            native,
        }
    }

    /// Emulator for deployments without middleware. Every request yields
    /// [`MiddlewareOutcome::None`].
    pub fn disabled() -> Self {
        Self {
            mode: MiddlewareMode::Disabled,
            middleware: None,
            sandbox: Arc::new(SandboxExecutor::default()),
            native: Arc::new(NativeExecutor::new("node", sandbox::DEFAULT_SANDBOX_TIMEOUT)),
        }
    }

    /// Builds the emulator for a deployment. A middleware bundle that cannot
    /// be loaded disables emulation instead of failing startup.
    pub fn from_manifest(manifest: &DeploymentManifest, config: &Config) -> Self {
        let mode = CompatibilityMatrix::global().effective_middleware_mode(manifest);
        let Some(middleware_manifest) = manifest.middleware.as_ref() else {
            return Self::disabled();
        };
        if mode == MiddlewareMode::Disabled {
            info!("Middleware emulation disabled for this deployment");
            return Self::disabled();
        }

        let next_dir = config.project_root.join(NEXT_DIR);
        let middleware = match CompiledMiddleware::load(middleware_manifest, &next_dir) {
            Ok(middleware) => middleware,
            Err(err) => {
                warn!(error = %err, "Failed to load middleware, continuing without it");
                return Self::disabled();
            }
        };

        info!(
            mode = ?mode,
            files = middleware.files().len(),
            "Middleware loaded"
        );
        Self::new(
            mode,
            middleware,
            Arc::new(SandboxExecutor::new(config.middleware_timeout())),
            Arc::new(NativeExecutor::new(
                config.node_binary.clone(),
                config.middleware_timeout(),
            )),
        )
    }

    pub fn mode(&self) -> MiddlewareMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.middleware.is_some() && self.mode != MiddlewareMode::Disabled
    }

    /// Runs middleware for one gateway event.
    pub async fn handle(&self, event: &GatewayEvent) -> MiddlewareOutcome {
        let Some(middleware) = self.middleware.as_deref() else {
            return MiddlewareOutcome::None;
        };
        if self.mode == MiddlewareMode::Disabled {
            return MiddlewareOutcome::None;
        }

        let request = match EdgeRequest::from_event(event) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, path = %event.path, "Could not build edge request");
                return MiddlewareOutcome::None;
            }
        };
        if !middleware.matches(&request) {
            debug!(path = %request.pathname(), "Middleware matcher did not match");
            return MiddlewareOutcome::None;
        }

        match self.run(middleware, &request).await {
            Ok(response) => {
                let outcome = interpret(response);
                debug!(path = %request.pathname(), outcome = outcome.kind(), "Middleware finished");
                outcome
            }
            Err(err) => {
                warn!(
                    error = %err,
                    path = %request.pathname(),
                    "Middleware failed, continuing without it"
                );
                MiddlewareOutcome::None
            }
        }
    }

    async fn run(
        &self,
        middleware: &CompiledMiddleware,
        request: &EdgeRequest,
    ) -> Result<ScriptResponse, ExecutionError> {
        match self.mode {
            MiddlewareMode::Native => middleware.execute(self.native.as_ref(), request).await,
            MiddlewareMode::Emulated => {
                match middleware.execute(self.sandbox.as_ref(), request).await {
                    Err(err) if err.is_capability_gap() => {
                        info!(
                            error = %err,
                            executor = self.native.name(),
                            "Sandbox lacks a capability, falling back"
                        );
                        middleware.execute(self.native.as_ref(), request).await
                    }
                    result => result,
                }
            }
            MiddlewareMode::Disabled => Err(ExecutionError::Runtime(
                "middleware emulation is disabled".to_string(),
            )),
        }
    }
}
