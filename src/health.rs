//! Pre-flight and post-flight readiness checks.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::collab::{Deliverer, PriceStore};
use crate::config::Config;
use crate::model::ReportArtifact;
use crate::validate;

/// One named check and how it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Every check from one pass, in the order they ran.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

impl fmt::Display for HealthReport {
    /// Failed checks as `name: detail; ...`, or `ok`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            return f.write_str("ok");
        }
        let failures: Vec<String> = self
            .failures()
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect();
        f.write_str(&failures.join("; "))
    }
}

/// Checks collaborator readiness around a run.
pub struct HealthChecker<'a> {
    config: &'a Config,
    store: &'a dyn PriceStore,
    deliverer: &'a dyn Deliverer,
}

impl<'a> HealthChecker<'a> {
    pub fn new(config: &'a Config, store: &'a dyn PriceStore, deliverer: &'a dyn Deliverer) -> Self {
        Self {
            config,
            store,
            deliverer,
        }
    }

    /// Everything that must hold before COLLECT. All checks run, so the
    /// report names every problem at once.
    pub fn pre_flight(&self) -> HealthReport {
        let mut checks = Vec::new();

        let problems = self.config.problems();
        checks.push(if problems.is_empty() {
            CheckResult::pass("config", "ok")
        } else {
            CheckResult::fail("config", problems.join(", "))
        });

        let valid = self
            .config
            .vendors
            .iter()
            .filter(|v| validate::phone(v).is_ok())
            .count();
        checks.push(if valid > 0 {
            CheckResult::pass("vendors", format!("{valid} valid"))
        } else {
            CheckResult::fail("vendors", "no valid vendor number configured")
        });

        let paths = &self.config.paths;
        let unwritable: Vec<String> = [
            &paths.data_dir,
            &paths.output_dir,
            &paths.audit_dir,
            &paths.state_dir,
        ]
        .into_iter()
        .filter_map(|dir| probe_dir(dir).err())
        .collect();
        checks.push(if unwritable.is_empty() {
            CheckResult::pass("directories", "ok")
        } else {
            CheckResult::fail("directories", unwritable.join(", "))
        });

        checks.push(match self.store.check_writable() {
            Ok(()) => CheckResult::pass("storage", "writable"),
            Err(e) => CheckResult::fail("storage", e.to_string()),
        });

        checks.push(if self.deliverer.session_valid() {
            CheckResult::pass("session", "established")
        } else {
            CheckResult::fail("session", "delivery session not established")
        });

        HealthReport { checks }
    }

    /// Every file the renderer claims to have written exists and is non-empty.
    pub fn post_flight(artifact: &ReportArtifact) -> HealthReport {
        let checks = artifact
            .written
            .iter()
            .map(|path| match fs::metadata(path) {
                Ok(m) if m.is_file() && m.len() > 0 => {
                    CheckResult::pass("output", path.display().to_string())
                }
                Ok(_) => CheckResult::fail("output", format!("{} is empty", path.display())),
                Err(e) => CheckResult::fail("output", format!("{}: {e}", path.display())),
            })
            .collect();
        HealthReport { checks }
    }
}

/// Create `dir` if needed and prove a file can be written in it.
fn probe_dir(dir: &Path) -> Result<(), String> {
    let fail = |e: std::io::Error| format!("{}: {e}", dir.display());
    fs::create_dir_all(dir).map_err(fail)?;
    let probe = dir.join(".pricewatch-probe");
    fs::write(&probe, b"ok").map_err(fail)?;
    fs::remove_file(&probe).map_err(fail)
}
