//! Deployment Manifest Module
//!
//! Describes what a built Next.js application needs from the runtime: build
//! id, framework version, detected capabilities and the compiled middleware.
//! The manifest is produced at build time and either loaded from JSON or
//! detected from a `.next` directory.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

mod compat;

pub use compat::{CompatibilityMatrix, CompatibilityReport, VersionSupport};

/// Build output directory inside a project root
pub const NEXT_DIR: &str = ".next";

// == Manifest Error ==
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Project root does not contain a completed build
    #[error("No Next.js build found under {}", .0.display())]
    MissingBuild(PathBuf),
}

// == Middleware Mode ==
/// How middleware is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MiddlewareMode {
    /// Isolated JS context, native runtime on capability gaps
    Emulated,
    /// Native runtime only
    Native,
    /// Middleware is never run
    #[default]
    Disabled,
}

// == Capabilities ==
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default)]
    pub isr: bool,
    #[serde(default)]
    pub middleware: MiddlewareMode,
    #[serde(default)]
    pub app_router: bool,
    #[serde(default)]
    pub pages_router: bool,
}

// == Middleware Manifest ==
/// Kind of request attribute a matcher condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    Header,
    Cookie,
    Query,
    Host,
}

/// A `has` / `missing` condition attached to a matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    /// Attribute name; absent for `host`
    #[serde(default)]
    pub key: Option<String>,
    /// Regular expression the attribute value must match
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherSpec {
    /// Compiled pathname pattern
    pub regexp: String,
    #[serde(default)]
    pub has: Vec<RouteCondition>,
    #[serde(default)]
    pub missing: Vec<RouteCondition>,
    /// Pattern as written by the application author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_source: Option<String>,
}

impl MatcherSpec {
    pub fn new(regexp: impl Into<String>) -> Self {
        Self {
            regexp: regexp.into(),
            has: Vec::new(),
            missing: Vec::new(),
            original_source: None,
        }
    }
}

/// Compiled middleware artifact: bundle files and route matchers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareManifest {
    /// Bundle files relative to the `.next` directory, in load order
    pub files: Vec<String>,
    pub matchers: Vec<MatcherSpec>,
    /// Entry name registered by the bundle on `_ENTRIES`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Environment variables inlined for the middleware
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

// == Deployment Manifest ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentManifest {
    pub build_id: String,
    #[serde(default)]
    pub next_version: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub middleware: Option<MiddlewareManifest>,
    /// Token that makes the origin render instead of answering from cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_mode_id: Option<String>,
}

impl DeploymentManifest {
    /// Manifest of an application with no detected capabilities.
    pub fn development(build_id: impl Into<String>) -> Self {
        Self {
            build_id: build_id.into(),
            next_version: None,
            capabilities: Capabilities::default(),
            middleware: None,
            preview_mode_id: None,
        }
    }

    /// Reads a manifest written at deploy time.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        read_json(path.as_ref())
    }

    /// Derives the manifest from a built project.
    pub fn detect(project_root: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let project_root = project_root.as_ref();
        let next_dir = project_root.join(NEXT_DIR);

        let build_id_path = next_dir.join("BUILD_ID");
        let build_id = match fs::read_to_string(&build_id_path) {
            Ok(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
            Ok(_) => return Err(ManifestError::MissingBuild(project_root.to_path_buf())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ManifestError::MissingBuild(project_root.to_path_buf()))
            }
            Err(source) => {
                return Err(ManifestError::Io {
                    path: build_id_path,
                    source,
                })
            }
        };

        let next_version = read_optional_json::<Value>(
            &project_root.join("node_modules/next/package.json"),
        )?
        .and_then(|package| package.get("version")?.as_str().map(str::to_string));

        let prerender = read_optional_json::<Value>(&next_dir.join("prerender-manifest.json"))?;
        let isr = prerender.as_ref().map(uses_revalidation).unwrap_or(false);
        let preview_mode_id = prerender
            .as_ref()
            .and_then(|prerender| prerender.pointer("/preview/previewModeId")?.as_str())
            .map(str::to_string);

        let middleware =
            read_optional_json::<Value>(&next_dir.join("server/middleware-manifest.json"))?
                .and_then(|raw| parse_middleware_manifest(&raw));

        let capabilities = Capabilities {
            isr,
            middleware: if middleware.is_some() {
                MiddlewareMode::Emulated
            } else {
                MiddlewareMode::Disabled
            },
            app_router: next_dir.join("server/app").is_dir(),
            pages_router: next_dir.join("server/pages").is_dir(),
        };
        debug!(build_id = %build_id, ?capabilities, "detected deployment manifest");

        Ok(Self {
            build_id,
            next_version,
            capabilities,
            middleware,
            preview_mode_id,
        })
    }

    /// Loads `manifest_path` when it exists, else detects from `project_root`.
    pub fn discover(manifest_path: &Path, project_root: &Path) -> Result<Self, ManifestError> {
        if manifest_path.is_file() {
            Self::load(manifest_path)
        } else {
            Self::detect(project_root)
        }
    }

    pub fn has_middleware(&self) -> bool {
        self.middleware
            .as_ref()
            .map(|middleware| !middleware.files.is_empty())
            .unwrap_or(false)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ManifestError> {
    let raw = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, ManifestError> {
    if path.is_file() {
        read_json(path).map(Some)
    } else {
        Ok(None)
    }
}

/// True when any prerendered route revalidates.
fn uses_revalidation(prerender: &Value) -> bool {
    let revalidates = |route: &Value| {
        route
            .get("initialRevalidateSeconds")
            .map(Value::is_number)
            .unwrap_or(false)
    };
    let static_routes = prerender
        .get("routes")
        .and_then(Value::as_object)
        .map(|routes| routes.values().any(revalidates))
        .unwrap_or(false);
    let dynamic_routes = prerender
        .get("dynamicRoutes")
        .and_then(Value::as_object)
        .map(|routes| !routes.is_empty())
        .unwrap_or(false);
    static_routes || dynamic_routes
}

/// Reads the root middleware out of `server/middleware-manifest.json`.
fn parse_middleware_manifest(raw: &Value) -> Option<MiddlewareManifest> {
    let entries = raw.get("middleware")?.as_object()?;
    let entry = raw
        .get("sortedMiddleware")
        .and_then(Value::as_array)
        .and_then(|sorted| sorted.first())
        .and_then(Value::as_str)
        .and_then(|page| entries.get(page))
        .or_else(|| entries.values().next())?;

    let files: Vec<String> = entry
        .get("files")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    if files.is_empty() {
        return None;
    }

    let matchers = entry
        .get("matchers")
        .cloned()
        .and_then(|matchers| serde_json::from_value(matchers).ok())
        .unwrap_or_default();
    let env = entry
        .get("env")
        .cloned()
        .and_then(|env| serde_json::from_value(env).ok())
        .unwrap_or_default();

    Some(MiddlewareManifest {
        files,
        matchers,
        name: entry.get("name").and_then(Value::as_str).map(str::to_string),
        env,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn built_project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, ".next/BUILD_ID", "abc123\n");
        write(
            root,
            "node_modules/next/package.json",
            &json!({"name": "next", "version": "14.2.3"}).to_string(),
        );
        write(
            root,
            ".next/prerender-manifest.json",
            &json!({
                "version": 4,
                "routes": {"/blog": {"initialRevalidateSeconds": 60}},
                "dynamicRoutes": {},
                "preview": {
                    "previewModeId": "3f9a1c",
                    "previewModeSigningKey": "k1",
                    "previewModeEncryptionKey": "k2"
                }
            })
            .to_string(),
        );
        write(
            root,
            ".next/server/middleware-manifest.json",
            &json!({
                "version": 3,
                "sortedMiddleware": ["/"],
                "middleware": {
                    "/": {
                        "files": ["server/edge-runtime-webpack.js", "server/middleware.js"],
                        "name": "middleware",
                        "page": "/",
                        "matchers": [{
                            "regexp": "^/about(?:/.*)?$",
                            "originalSource": "/about/:path*",
                            "has": [{"type": "header", "key": "x-beta"}]
                        }],
                        "env": {"FEATURE": "on"}
                    }
                },
                "functions": {}
            })
            .to_string(),
        );
        fs::create_dir_all(root.join(".next/server/app")).unwrap();
        dir
    }

    #[test]
    fn test_detect_built_project() {
        let dir = built_project();
        let manifest = DeploymentManifest::detect(dir.path()).unwrap();

        assert_eq!(manifest.build_id, "abc123");
        assert_eq!(manifest.next_version.as_deref(), Some("14.2.3"));
        assert!(manifest.capabilities.isr);
        assert_eq!(manifest.preview_mode_id.as_deref(), Some("3f9a1c"));
        assert!(manifest.capabilities.app_router);
        assert!(!manifest.capabilities.pages_router);
        assert_eq!(manifest.capabilities.middleware, MiddlewareMode::Emulated);

        let middleware = manifest.middleware.unwrap();
        assert_eq!(middleware.files.len(), 2);
        assert_eq!(middleware.name.as_deref(), Some("middleware"));
        assert_eq!(middleware.env["FEATURE"], "on");
        assert_eq!(middleware.matchers[0].has[0].kind, ConditionKind::Header);
        assert_eq!(
            middleware.matchers[0].original_source.as_deref(),
            Some("/about/:path*")
        );
    }

    #[test]
    fn test_detect_without_build_fails() {
        let dir = TempDir::new().unwrap();
        let result = DeploymentManifest::detect(dir.path());
        assert!(matches!(result, Err(ManifestError::MissingBuild(_))));
    }

    #[test]
    fn test_detect_without_middleware() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".next/BUILD_ID", "b2");

        let manifest = DeploymentManifest::detect(dir.path()).unwrap();
        assert!(!manifest.has_middleware());
        assert!(!manifest.capabilities.isr);
        assert!(manifest.preview_mode_id.is_none());
        assert_eq!(manifest.capabilities.middleware, MiddlewareMode::Disabled);
    }

    #[test]
    fn test_load_camel_case_manifest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy-manifest.json");
        fs::write(
            &path,
            json!({
                "buildId": "b9",
                "nextVersion": "15.0.1",
                "capabilities": {"isr": true, "middleware": "native", "appRouter": true},
                "middleware": {"files": ["server/middleware.js"], "matchers": [{"regexp": "^/.*$"}]}
            })
            .to_string(),
        )
        .unwrap();

        let manifest = DeploymentManifest::discover(&path, dir.path()).unwrap();
        assert_eq!(manifest.build_id, "b9");
        assert_eq!(manifest.capabilities.middleware, MiddlewareMode::Native);
        assert!(!manifest.capabilities.pages_router);
        assert!(manifest.has_middleware());
    }

    #[test]
    fn test_load_malformed_manifest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy-manifest.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            DeploymentManifest::load(&path),
            Err(ManifestError::Parse { .. })
        ));
    }
}
