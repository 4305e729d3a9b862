//! Route matching
//!
//! Matcher patterns come from the framework's compiled manifest and use
//! JavaScript regex syntax, lookarounds included, so they are compiled with
//! `fancy_regex`.

use fancy_regex::Regex;
use thiserror::Error;
use tracing::warn;

use super::request::EdgeRequest;
use crate::manifest::{ConditionKind, MatcherSpec, RouteCondition};

const DATA_PREFIX: &str = "/_next/data/";

#[derive(Error, Debug)]
#[error("Invalid matcher pattern {pattern}: {message}")]
pub struct MatcherError {
    pub pattern: String,
    pub message: String,
}

fn compile(pattern: &str) -> Result<Regex, MatcherError> {
    Regex::new(pattern).map_err(|err| MatcherError {
        pattern: pattern.to_string(),
        message: err.to_string(),
    })
}

/// Evaluation errors (backtrack limits) count as no match.
fn is_match(regex: &Regex, haystack: &str) -> bool {
    regex.is_match(haystack).unwrap_or_else(|err| {
        warn!(pattern = regex.as_str(), error = %err, "matcher evaluation failed");
        false
    })
}

struct CompiledCondition {
    kind: ConditionKind,
    key: Option<String>,
    /// Anchored value pattern
    value: Option<Regex>,
}

impl CompiledCondition {
    fn compile(condition: &RouteCondition) -> Result<Self, MatcherError> {
        let value = condition
            .value
            .as_deref()
            .map(|value| compile(&format!("^(?:{value})$")))
            .transpose()?;
        Ok(Self {
            kind: condition.kind,
            key: condition.key.clone(),
            value,
        })
    }

    fn holds(&self, request: &EdgeRequest) -> bool {
        let key = self.key.as_deref().unwrap_or_default();
        let actual = match self.kind {
            ConditionKind::Header => request.header(key).map(str::to_string),
            ConditionKind::Cookie => request.cookie(key).map(str::to_string),
            ConditionKind::Query => request.query(key),
            ConditionKind::Host => request.hostname().map(str::to_string),
        };
        match (actual, &self.value) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actual), Some(pattern)) => is_match(pattern, &actual),
        }
    }
}

struct CompiledRoute {
    pattern: Regex,
    has: Vec<CompiledCondition>,
    missing: Vec<CompiledCondition>,
}

/// Compiled set of route matchers. Matches when any route matches.
pub struct RouteMatcher {
    routes: Vec<CompiledRoute>,
}

impl RouteMatcher {
    pub fn compile(specs: &[MatcherSpec]) -> Result<Self, MatcherError> {
        let mut routes = Vec::with_capacity(specs.len());
        for spec in specs {
            routes.push(CompiledRoute {
                pattern: compile(&spec.regexp)?,
                has: spec
                    .has
                    .iter()
                    .map(CompiledCondition::compile)
                    .collect::<Result<_, _>>()?,
                missing: spec
                    .missing
                    .iter()
                    .map(CompiledCondition::compile)
                    .collect::<Result<_, _>>()?,
            });
        }
        Ok(Self { routes })
    }

    /// Matcher that accepts every request, used when the manifest lists none.
    pub fn match_all() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn matches(&self, request: &EdgeRequest) -> bool {
        if self.routes.is_empty() {
            return true;
        }
        let pathname = normalize_data_path(request.pathname());
        self.routes.iter().any(|route| {
            is_match(&route.pattern, &pathname)
                && route.has.iter().all(|condition| condition.holds(request))
                && !route.missing.iter().any(|condition| condition.holds(request))
        })
    }
}

/// Maps `/_next/data/{buildId}/{path}.json` to the page path it stands for.
pub fn normalize_data_path(pathname: &str) -> String {
    let Some(rest) = pathname.strip_prefix(DATA_PREFIX) else {
        return pathname.to_string();
    };
    let Some((_build_id, page)) = rest.split_once('/') else {
        return pathname.to_string();
    };
    let Some(page) = page.strip_suffix(".json") else {
        return pathname.to_string();
    };
    if page == "index" {
        "/".to_string()
    } else {
        format!("/{page}")
    }
}
