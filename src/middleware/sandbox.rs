//! Embedded JavaScript sandbox
//!
//! Runs middleware inside a fresh `boa_engine` context per request. The
//! context only exposes the edge runtime surface defined in `js/prelude.js`;
//! anything else a bundle touches fails with a classified error so the
//! emulator can fall back to the native runtime.

use std::time::Duration;

use async_trait::async_trait;
use boa_engine::{Context, JsValue, Source};
use tokio::time::timeout;
use tracing::debug;

use super::executor::{
    parse_script_output, ExecutionError, MiddlewareExecutor, ScriptPayload, ScriptResponse,
};
use super::loader::CompiledMiddleware;
use super::request::EdgeRequest;

const PRELUDE: &str = include_str!("js/prelude.js");

pub const DEFAULT_LOOP_ITERATION_LIMIT: u64 = 10_000_000;
pub const DEFAULT_SANDBOX_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Upper bound on job queue / timer turns before a pending middleware is
/// reported as never settling.
const MAX_TURNS: usize = 1_000;

pub struct SandboxExecutor {
    timeout: Duration,
    loop_iteration_limit: u64,
}

impl SandboxExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            loop_iteration_limit: DEFAULT_LOOP_ITERATION_LIMIT,
        }
    }

    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = limit;
        self
    }
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_SANDBOX_TIMEOUT)
    }
}

#[async_trait]
impl MiddlewareExecutor for SandboxExecutor {
    async fn execute(
        &self,
        middleware: &CompiledMiddleware,
        request: &EdgeRequest,
    ) -> Result<ScriptResponse, ExecutionError> {
        let payload = ScriptPayload::new(middleware, request).to_json()?;
        let source = middleware.shared_source();
        let limit = self.loop_iteration_limit;

        // The engine context is not Send, so it lives entirely on a blocking
        // thread. A timed-out run keeps its thread until the loop limit trips.
        let task = tokio::task::spawn_blocking(move || run_sandboxed(&source, &payload, limit));
        let raw = match timeout(self.timeout, task).await {
            Err(_) => return Err(ExecutionError::Timeout(self.timeout)),
            Ok(Err(err)) => return Err(ExecutionError::Runtime(err.to_string())),
            Ok(Ok(result)) => result?,
        };

        parse_script_output(&raw)
    }

    fn name(&self) -> &'static str {
        "sandbox"
    }
}

fn eval(context: &mut Context, code: &str) -> Result<JsValue, ExecutionError> {
    context
        .eval(Source::from_bytes(code))
        .map_err(|err| ExecutionError::Runtime(err.to_string()))
}

fn string_literal(value: &str) -> Result<String, ExecutionError> {
    serde_json::to_string(value).map_err(|err| ExecutionError::Runtime(err.to_string()))
}

/// Evaluates the bundle and drives the handler to completion, returning the
/// JSON outcome reported by the prelude.
fn run_sandboxed(
    source: &str,
    payload: &str,
    loop_iteration_limit: u64,
) -> Result<String, ExecutionError> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(loop_iteration_limit);

    eval(&mut context, PRELUDE)?;

    let loaded = eval(&mut context, &format!("__edgeLoad({})", string_literal(source)?))?;
    if loaded.to_boolean() {
        eval(&mut context, &format!("__edgeDispatch({})", string_literal(payload)?))?;

        let mut turns = 0;
        while turns < MAX_TURNS {
            let _ = context.run_jobs();
            if eval(&mut context, "__edgeSettled()")?.to_boolean() {
                break;
            }
            if !eval(&mut context, "__edgeRunTimers()")?.to_boolean() {
                break;
            }
            turns += 1;
        }
        debug!(turns, "sandbox run finished");
    }

    let outcome = eval(&mut context, "__edgeOutcome()")?;
    let outcome = outcome
        .to_string(&mut context)
        .map_err(|err| ExecutionError::Runtime(err.to_string()))?;
    Ok(outcome.to_std_string_escaped())
}
