//! Middleware loading
//!
//! Reading the bundle and compiling its matchers is a pure step done once at
//! startup; execution is delegated to an executor per request.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use super::executor::{ExecutionError, MiddlewareExecutor, ScriptResponse};
use super::matcher::{MatcherError, RouteMatcher};
use super::request::EdgeRequest;
use crate::manifest::{MatcherSpec, MiddlewareManifest};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read middleware file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Matcher(#[from] MatcherError),

    #[error("Middleware manifest lists no files")]
    Empty,
}

/// Middleware bundle ready to run: concatenated source plus route matchers.
pub struct CompiledMiddleware {
    name: Option<String>,
    files: Vec<PathBuf>,
    source: Arc<str>,
    matcher: RouteMatcher,
    env: BTreeMap<String, String>,
}

impl CompiledMiddleware {
    /// Loads the bundle listed in `manifest`, resolving files against the
    /// build output directory.
    pub fn load(manifest: &MiddlewareManifest, next_dir: &Path) -> Result<Self, LoadError> {
        if manifest.files.is_empty() {
            return Err(LoadError::Empty);
        }

        let mut files = Vec::with_capacity(manifest.files.len());
        let mut bundle = String::new();
        for file in &manifest.files {
            let path = next_dir.join(file);
            let contents = fs::read_to_string(&path).map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;
            bundle.push_str(&contents);
            bundle.push_str(";\n");
            files.push(path);
        }

        Ok(Self {
            name: manifest.name.clone(),
            files,
            source: bundle.into(),
            matcher: RouteMatcher::compile(&manifest.matchers)?,
            env: manifest.env.clone(),
        })
    }

    /// Middleware from inline source.
    pub fn from_source(
        source: impl Into<String>,
        matchers: &[MatcherSpec],
    ) -> Result<Self, LoadError> {
        let source: String = source.into();
        Ok(Self {
            name: None,
            files: Vec::new(),
            source: source.into(),
            matcher: RouteMatcher::compile(matchers)?,
            env: BTreeMap::new(),
        })
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn shared_source(&self) -> Arc<str> {
        Arc::clone(&self.source)
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn matches(&self, request: &EdgeRequest) -> bool {
        self.matcher.matches(request)
    }

    pub async fn execute(
        &self,
        executor: &dyn MiddlewareExecutor,
        request: &EdgeRequest,
    ) -> Result<ScriptResponse, ExecutionError> {
        executor.execute(self, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_concatenates_files_in_order() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("server")).unwrap();
        fs::write(dir.path().join("server/runtime.js"), "var a = 1").unwrap();
        fs::write(dir.path().join("server/middleware.js"), "var b = a + 1").unwrap();

        let manifest = MiddlewareManifest {
            files: vec![
                "server/runtime.js".to_string(),
                "server/middleware.js".to_string(),
            ],
            matchers: vec![MatcherSpec::new("^/.*$")],
            name: Some("middleware".to_string()),
            env: BTreeMap::from([("KEY".to_string(), "value".to_string())]),
        };

        let middleware = CompiledMiddleware::load(&manifest, dir.path()).unwrap();
        assert_eq!(middleware.source(), "var a = 1;\nvar b = a + 1;\n");
        assert_eq!(middleware.files().len(), 2);
        assert_eq!(middleware.name(), Some("middleware"));
        assert_eq!(middleware.env()["KEY"], "value");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let manifest = MiddlewareManifest {
            files: vec!["server/middleware.js".to_string()],
            ..Default::default()
        };

        assert!(matches!(
            CompiledMiddleware::load(&manifest, dir.path()),
            Err(LoadError::Io { .. })
        ));
        assert!(matches!(
            CompiledMiddleware::load(&MiddlewareManifest::default(), dir.path()),
            Err(LoadError::Empty)
        ));
    }
}
