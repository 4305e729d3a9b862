//! Middleware execution seam
//!
//! Executors run a compiled middleware against an edge request and report the
//! produced response or a classified failure. Both the embedded sandbox and
//! the native runtime speak the same JSON result format.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::loader::CompiledMiddleware;
use super::request::{EdgeRequest, Geo};

/// Error code attached to errors raised by emulated APIs that are missing.
pub const UNSUPPORTED_CODE: &str = "EDGE_UNSUPPORTED";

// == Execution Error ==
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// Middleware referenced a global the context does not provide
    #[error("ReferenceError: {0}")]
    Reference(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// Middleware used an API the emulator explicitly does not support
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Execution timed out after {0:?}")]
    Timeout(Duration),

    /// Middleware threw
    #[error("{name}: {message}")]
    Thrown { name: String, message: String },

    /// Engine-level failure
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Native runtime could not be started
    #[error("Failed to start runtime: {0}")]
    Spawn(String),

    #[error("Malformed execution output: {0}")]
    MalformedOutput(String),
}

impl ExecutionError {
    /// True when the failure is caused by a missing runtime capability rather
    /// than by the middleware itself.
    pub fn is_capability_gap(&self) -> bool {
        matches!(
            self,
            ExecutionError::Reference(_)
                | ExecutionError::ModuleNotFound(_)
                | ExecutionError::Unsupported(_)
        )
    }
}

static MODULE_NOT_FOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)cannot find module|module not found|cannot resolve module").unwrap()
});

/// Classifies an error thrown inside a JavaScript runtime.
pub fn classify(name: &str, message: &str, code: Option<&str>) -> ExecutionError {
    if name == "ReferenceError" {
        return ExecutionError::Reference(message.to_string());
    }
    if code == Some("MODULE_NOT_FOUND") || MODULE_NOT_FOUND.is_match(message) {
        return ExecutionError::ModuleNotFound(message.to_string());
    }
    if code == Some(UNSUPPORTED_CODE) || name == "UnsupportedError" {
        return ExecutionError::Unsupported(message.to_string());
    }
    ExecutionError::Thrown {
        name: name.to_string(),
        message: message.to_string(),
    }
}

// == Executor ==
/// Response produced by a middleware run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptResponse {
    pub status: u16,
    /// Header pairs in emission order; names are lowercase
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ScriptResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[async_trait]
pub trait MiddlewareExecutor: Send + Sync {
    async fn execute(
        &self,
        middleware: &CompiledMiddleware,
        request: &EdgeRequest,
    ) -> Result<ScriptResponse, ExecutionError>;

    fn name(&self) -> &'static str;
}

// == Script Payload ==
#[derive(Serialize)]
struct PayloadRequest<'a> {
    method: &'a str,
    url: &'a str,
    headers: Vec<(&'a str, &'a str)>,
    cookies: &'a BTreeMap<String, String>,
    geo: &'a Geo,
    ip: Option<&'a str>,
    /// Base64
    body: Option<String>,
}

/// Input handed to a JavaScript runtime.
#[derive(Serialize)]
pub(crate) struct ScriptPayload<'a> {
    entry: Option<&'a str>,
    env: &'a BTreeMap<String, String>,
    request: PayloadRequest<'a>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
}

impl<'a> ScriptPayload<'a> {
    pub(crate) fn new(middleware: &'a CompiledMiddleware, request: &'a EdgeRequest) -> Self {
        Self {
            entry: middleware.name(),
            env: middleware.env(),
            request: PayloadRequest {
                method: &request.method,
                url: request.url.as_str(),
                headers: request
                    .headers
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str()))
                    .collect(),
                cookies: &request.cookies,
                geo: &request.geo,
                ip: request.ip.as_deref(),
                body: request.body.as_ref().map(|body| STANDARD.encode(body)),
            },
            files: Vec::new(),
            source: None,
        }
    }

    /// Points the runtime at the bundle files, or inline source when the
    /// middleware was not loaded from disk.
    pub(crate) fn with_bundle_location(mut self, middleware: &'a CompiledMiddleware) -> Self {
        if middleware.files().is_empty() {
            self.source = Some(middleware.source());
        } else {
            self.files = middleware
                .files()
                .iter()
                .map(|path| path.to_string_lossy().into_owned())
                .collect();
        }
        self
    }

    pub(crate) fn to_json(&self) -> Result<String, ExecutionError> {
        serde_json::to_string(self).map_err(|err| ExecutionError::MalformedOutput(err.to_string()))
    }
}

// == Script Output ==
#[derive(Deserialize)]
struct RawResponse {
    status: u16,
    #[serde(default)]
    headers: Vec<(String, String)>,
    /// Base64
    #[serde(default)]
    body: Option<String>,
}

#[derive(Deserialize)]
struct RawError {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Deserialize)]
struct LogLine {
    level: String,
    message: String,
}

#[derive(Deserialize)]
struct ScriptOutput {
    #[serde(default)]
    ok: Option<RawResponse>,
    #[serde(default)]
    error: Option<RawError>,
    #[serde(default)]
    logs: Vec<LogLine>,
}

/// Parses the JSON result printed by a runtime, forwarding captured console
/// output to tracing.
pub fn parse_script_output(raw: &str) -> Result<ScriptResponse, ExecutionError> {
    let output: ScriptOutput = serde_json::from_str(raw.trim())
        .map_err(|err| ExecutionError::MalformedOutput(err.to_string()))?;

    for line in &output.logs {
        match line.level.as_str() {
            "error" | "warn" => warn!(target: "middleware::console", "{}", line.message),
            "info" => info!(target: "middleware::console", "{}", line.message),
            _ => debug!(target: "middleware::console", "{}", line.message),
        }
    }

    if let Some(error) = output.error {
        let name = error.name.unwrap_or_else(|| "Error".to_string());
        let message = error.message.unwrap_or_default();
        return Err(classify(&name, &message, error.code.as_deref()));
    }

    let Some(response) = output.ok else {
        return Err(ExecutionError::MalformedOutput(
            "neither a response nor an error was reported".to_string(),
        ));
    };

    let body = response
        .body
        .map(|encoded| STANDARD.decode(encoded))
        .transpose()
        .map_err(|err| ExecutionError::MalformedOutput(format!("body is not base64: {err}")))?;

    Ok(ScriptResponse {
        status: response.status,
        headers: response
            .headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect(),
        body,
    })
}
