//! Compatibility Matrix
//!
//! Static table of what the runtime supports per Next.js major version. Built
//! once per process and never mutated.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::Serialize;

use super::{DeploymentManifest, MiddlewareMode};

/// Runtime support for one Next.js major version.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSupport {
    pub major: u64,
    pub isr: bool,
    pub middleware: bool,
    pub app_router: bool,
    /// Mode used when the manifest asks for emulation
    pub preferred_middleware_mode: MiddlewareMode,
    pub notes: &'static str,
}

/// Outcome of checking a manifest against the matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReport {
    /// False when the version is unknown or a required capability is missing
    pub supported: bool,
    pub major: Option<u64>,
    pub warnings: Vec<String>,
}

pub struct CompatibilityMatrix {
    versions: BTreeMap<u64, VersionSupport>,
}

static MATRIX: Lazy<CompatibilityMatrix> = Lazy::new(|| {
    let rows = [
        VersionSupport {
            major: 12,
            isr: true,
            middleware: true,
            app_router: false,
            preferred_middleware_mode: MiddlewareMode::Native,
            notes: "pre-stable middleware; run natively",
        },
        VersionSupport {
            major: 13,
            isr: true,
            middleware: true,
            app_router: true,
            preferred_middleware_mode: MiddlewareMode::Emulated,
            notes: "app router stable from 13.4",
        },
        VersionSupport {
            major: 14,
            isr: true,
            middleware: true,
            app_router: true,
            preferred_middleware_mode: MiddlewareMode::Emulated,
            notes: "",
        },
        VersionSupport {
            major: 15,
            isr: true,
            middleware: true,
            app_router: true,
            preferred_middleware_mode: MiddlewareMode::Emulated,
            notes: "",
        },
    ];
    CompatibilityMatrix {
        versions: rows.into_iter().map(|row| (row.major, row)).collect(),
    }
});

impl CompatibilityMatrix {
    /// Process-wide matrix.
    pub fn global() -> &'static CompatibilityMatrix {
        &MATRIX
    }

    pub fn lookup(&self, version: &str) -> Option<&VersionSupport> {
        self.versions.get(&parse_major(version)?)
    }

    pub fn supported_majors(&self) -> impl Iterator<Item = u64> + '_ {
        self.versions.keys().copied()
    }

    pub fn check(&self, manifest: &DeploymentManifest) -> CompatibilityReport {
        let Some(version) = manifest.next_version.as_deref() else {
            return CompatibilityReport {
                supported: true,
                major: None,
                warnings: vec!["Next.js version unknown; compatibility not checked".to_string()],
            };
        };

        let major = parse_major(version);
        let Some(support) = major.and_then(|major| self.versions.get(&major)) else {
            return CompatibilityReport {
                supported: false,
                major,
                warnings: vec![format!("Next.js {} is not supported", version)],
            };
        };

        let capabilities = &manifest.capabilities;
        let mut report = CompatibilityReport {
            supported: true,
            major,
            warnings: Vec::new(),
        };
        if capabilities.isr && !support.isr {
            report.supported = false;
            report
                .warnings
                .push(format!("ISR is not supported for Next.js {}", support.major));
        }
        if capabilities.app_router && !support.app_router {
            report.supported = false;
            report.warnings.push(format!(
                "App Router is not supported for Next.js {}",
                support.major
            ));
        }
        if manifest.has_middleware() && !support.middleware {
            report.warnings.push(format!(
                "Middleware is not supported for Next.js {} and will be skipped",
                support.major
            ));
        }
        report
    }

    /// Mode the emulator runs in for this deployment.
    pub fn effective_middleware_mode(&self, manifest: &DeploymentManifest) -> MiddlewareMode {
        let requested = manifest.capabilities.middleware;
        if !manifest.has_middleware() || requested == MiddlewareMode::Disabled {
            return MiddlewareMode::Disabled;
        }

        let support = manifest
            .next_version
            .as_deref()
            .and_then(|version| self.lookup(version));
        match support {
            Some(support) if !support.middleware => MiddlewareMode::Disabled,
            Some(support) if requested == MiddlewareMode::Emulated => {
                support.preferred_middleware_mode
            }
            _ => requested,
        }
    }
}

/// Major version of a semver-ish string such as `14.2.3` or `^15.0.0-canary.1`.
fn parse_major(version: &str) -> Option<u64> {
    let digits: String = version
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
