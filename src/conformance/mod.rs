//! Conformance Module
//!
//! Backend-agnostic test suite that any `TestableVolume` must pass.
//!
//! ## Responsibilities
//! - Build a fresh volume per scenario from a caller-supplied factory
//! - Skip scenarios that don't apply to the volume's writability
//! - Tear every volume down, whether its scenario passed, failed or panicked
//! - Collect per-scenario outcomes into a report
//!
//! ## Flow
//! ```text
//!   ConformanceSuite::run()
//!        │
//!        ├── for each Scenario ──► factory.create() ──► VolumeGuard
//!        │                                                 │
//!        │            applies_to(writable)? ── no ──► Skipped
//!        │                   │ yes
//!        │                   ▼
//!        │        catch_unwind(scenario(&volume))
//!        │                   │
//!        │                   ▼
//!        │          Passed / Failed(reason)
//!        │                   │
//!        └────────── VolumeGuard dropped ──► teardown()
//! ```
//!
//! ## Usage
//! ```ignore
//! let report = ConformanceSuite::new(|| Ok(MemoryVolume::new(pool(), policy, true))).run();
//! report.assert_conformant();
//! ```

pub mod fixtures;
mod scenarios;

use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde::Serialize;

use crate::error::Result;
use crate::volume::TestableVolume;

// =============================================================================
// Factory
// =============================================================================

/// Produces a fresh, empty volume for each scenario
///
/// Volumes from one factory should not share a buffer pool with anything
/// else running at the same time; the buffer-release scenario counts leases.
pub trait VolumeFactory: Sync {
    fn create(&self) -> Result<Box<dyn TestableVolume>>;
}

impl<F, V> VolumeFactory for F
where
    F: Fn() -> Result<V> + Sync,
    V: TestableVolume + 'static,
{
    fn create(&self) -> Result<Box<dyn TestableVolume>> {
        Ok(Box::new(self()?))
    }
}

/// Owns a volume for the length of one scenario and tears it down on drop
struct VolumeGuard(Box<dyn TestableVolume>);

impl Deref for VolumeGuard {
    type Target = dyn TestableVolume;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl Drop for VolumeGuard {
    fn drop(&mut self) {
        self.0.teardown();
    }
}

// =============================================================================
// Scenarios
// =============================================================================

/// Which volumes a scenario runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Any,
    Writable,
    ReadOnly,
    Concurrent { writable_only: bool },
}

impl Category {
    pub fn applies_to(&self, writable: bool) -> bool {
        match self {
            Category::Any => true,
            Category::Writable => writable,
            Category::ReadOnly => !writable,
            Category::Concurrent { writable_only } => writable || !writable_only,
        }
    }
}

/// Why a scenario failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure(pub String);

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type Check = std::result::Result<(), Failure>;

/// One named check against a fresh volume
#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub category: Category,
    run: fn(&dyn TestableVolume) -> Check,
}

impl Scenario {
    const fn new(name: &'static str, category: Category, run: fn(&dyn TestableVolume) -> Check) -> Self {
        Self { name, category, run }
    }

    /// Run against an existing volume, without applicability checks
    pub fn check(&self, volume: &dyn TestableVolume) -> Check {
        (self.run)(volume)
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish()
    }
}

/// Every scenario in the suite, in run order
pub fn scenarios() -> &'static [Scenario] {
    scenarios::ALL
}

/// Look up a scenario by name
pub fn scenario(name: &str) -> Option<&'static Scenario> {
    scenarios::ALL.iter().find(|s| s.name == name)
}

// =============================================================================
// Suite
// =============================================================================

/// Runs every scenario against volumes from one factory
pub struct ConformanceSuite<F> {
    factory: F,
}

impl<F: VolumeFactory> ConformanceSuite<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Run all scenarios in order
    pub fn run(&self) -> ConformanceReport {
        let outcomes = scenarios::ALL
            .iter()
            .map(|s| self.run_scenario(s))
            .collect();
        let report = ConformanceReport { outcomes };

        tracing::info!(
            "Conformance: {} passed, {} failed, {} skipped",
            report.passed(),
            report.failed(),
            report.skipped()
        );
        report
    }

    /// Run only the named scenarios
    pub fn run_only(&self, names: &[&str]) -> ConformanceReport {
        let outcomes = scenarios::ALL
            .iter()
            .filter(|s| names.contains(&s.name))
            .map(|s| self.run_scenario(s))
            .collect();
        ConformanceReport { outcomes }
    }

    /// Create a volume, run one scenario against it, and tear it down
    pub fn run_scenario(&self, scenario: &Scenario) -> ScenarioOutcome {
        let start = Instant::now();

        let volume = match self.factory.create() {
            Ok(v) => VolumeGuard(v),
            Err(e) => {
                tracing::error!("{}: failed to create volume: {}", scenario.name, e);
                return ScenarioOutcome::new(scenario, Outcome::Failed(format!("create volume: {}", e)), start);
            }
        };

        if !scenario.category.applies_to(volume.writable()) {
            tracing::debug!("{}: skipped on {}", scenario.name, &*volume);
            return ScenarioOutcome::new(scenario, Outcome::Skipped, start);
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| scenario.check(&*volume)));
        let outcome = match result {
            Ok(Ok(())) => Outcome::Passed,
            Ok(Err(Failure(reason))) => Outcome::Failed(reason),
            Err(payload) => Outcome::Failed(format!("panicked: {}", panic_message(&*payload))),
        };

        match &outcome {
            Outcome::Failed(reason) => {
                tracing::warn!("{}: FAILED on {}: {}", scenario.name, &*volume, reason)
            }
            _ => tracing::debug!("{}: passed on {}", scenario.name, &*volume),
        }

        drop(volume);
        ScenarioOutcome::new(scenario, outcome, start)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub name: &'static str,
    pub category: Category,
    pub outcome: Outcome,
    pub elapsed_ms: u64,
}

impl ScenarioOutcome {
    fn new(scenario: &Scenario, outcome: Outcome, start: Instant) -> Self {
        Self {
            name: scenario.name,
            category: scenario.category,
            outcome,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConformanceReport {
    pub outcomes: Vec<ScenarioOutcome>,
}

impl ConformanceReport {
    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped))
    }

    pub fn is_conformant(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, name: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.name == name).map(|o| &o.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Failed(reason) => Some((o.name, reason.as_str())),
            _ => None,
        })
    }

    /// Panic listing every failed scenario
    pub fn assert_conformant(&self) {
        if !self.is_conformant() {
            panic!("volume is not conformant:\n{}", self);
        }
    }
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for o in &self.outcomes {
            match &o.outcome {
                Outcome::Passed => writeln!(f, "  ok    {}", o.name)?,
                Outcome::Skipped => writeln!(f, "  skip  {}", o.name)?,
                Outcome::Failed(reason) => writeln!(f, "  FAIL  {}: {}", o.name, reason)?,
            }
        }
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed(),
            self.failed(),
            self.skipped()
        )
    }
}
