//! BioData Manager regression-verification harness
//!
//! Drives a browser against a fixed set of routes, records runtime error
//! telemetry per route, runs a declarative check pipeline, and re-derives the
//! fixed/pending status of previously reported defects.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Harness (runner)                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Session                                                     │
//! │    ├── PageDriver (Playwright bridge | stub)                 │
//! │    └── TelemetryCollector  attach() / drain() per route      │
//! │                                                              │
//! │  for route in registry.routes:                               │
//! │    prober::probe()          -> navigation result             │
//! │    checks::run_checks()     -> Vec<CheckResult>              │
//! │    RouteResult::seal(telemetry.drain())                      │
//! │  probes phase               -> "defect-probes" pseudo-route  │
//! │                                                              │
//! │  DefectCorrelator::correlate(route results)                  │
//! │  ReportBuilder::finalize(defect records) -> Report           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod checks;
pub mod defects;
pub mod driver;
pub mod error;
pub mod playwright;
pub mod prober;
pub mod registry;
pub mod report;
pub mod runner;
pub mod telemetry;

pub use checks::{CheckDetail, CheckKind, CheckResult, Outcome, Severity};
pub use defects::{Basis, DefectRecord, DefectStatus};
pub use driver::PageDriver;
pub use error::{RegressError, RegressResult};
pub use registry::{HarnessConfig, RouteSpec};
pub use report::{Report, RouteResult};
pub use runner::Harness;
