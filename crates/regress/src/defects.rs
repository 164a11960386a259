//! Defect correlation
//!
//! Maps check results onto the registry of previously reported defects.
//! Status is a pure function of the results collected so far.
//!
//! Limitation: a defect with no applicable results in a run (for example
//! because the database had no records to exercise it) is classified
//! `fixed`. Absence of evidence is treated as absence of the defect for that
//! run; the record's [`Basis`] says so and the rendered report lists it.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checks::{CheckKind, Outcome};
use crate::registry::DefectSpec;
use crate::report::RouteResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectStatus {
    Fixed,
    Pending,
}

/// Why a defect received its status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Basis {
    /// At least one applicable result failed
    Failing,
    /// At least one high-confidence check passed and none failed
    Verified,
    /// Only static-content heuristics passed
    HeuristicOnly,
    /// Applicable results exist but all of them were warnings
    Inconclusive,
    /// No applicable results at all; fixed by convention
    NoEvidence,
}

impl Basis {
    /// Fixed status that was not backed by a high-confidence pass
    pub fn is_limited(&self) -> bool {
        matches!(self, Basis::HeuristicOnly | Basis::Inconclusive | Basis::NoEvidence)
    }
}

/// Points at a [`CheckResult`](crate::checks::CheckResult) inside the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub route: String,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectRecord {
    pub id: String,
    pub name: String,
    pub status: DefectStatus,
    pub basis: Basis,
    /// Failing results, empty unless pending
    pub evidence: Vec<EvidenceRef>,
}

pub struct DefectCorrelator {
    registry: Vec<DefectSpec>,
}

impl DefectCorrelator {
    pub fn new(registry: &[DefectSpec]) -> Self {
        Self {
            registry: registry.to_vec(),
        }
    }

    pub fn correlate(&self, routes: &[RouteResult]) -> Vec<DefectRecord> {
        self.registry.iter().map(|spec| classify(spec, routes)).collect()
    }
}

fn classify(spec: &DefectSpec, routes: &[RouteResult]) -> DefectRecord {
    let kinds: HashSet<CheckKind> = spec.checks.iter().copied().collect();

    let mut evidence = Vec::new();
    let mut applicable = 0usize;
    let mut strong_pass = false;
    let mut heuristic_pass = false;

    for route in routes {
        for (index, result) in route.checks.iter().enumerate() {
            let counted = kinds.contains(&result.kind) || result.kind == CheckKind::ExecutionError;
            if result.defect.as_deref() != Some(spec.id.as_str()) || !counted {
                continue;
            }
            applicable += 1;
            match result.outcome {
                Outcome::Fail => evidence.push(EvidenceRef {
                    route: route.route.clone(),
                    index,
                }),
                Outcome::Pass if result.kind.is_heuristic() => heuristic_pass = true,
                Outcome::Pass => strong_pass = true,
                Outcome::Warn => {}
            }
        }
    }

    let (status, basis) = if !evidence.is_empty() {
        (DefectStatus::Pending, Basis::Failing)
    } else if strong_pass {
        (DefectStatus::Fixed, Basis::Verified)
    } else if heuristic_pass {
        (DefectStatus::Fixed, Basis::HeuristicOnly)
    } else if applicable > 0 {
        (DefectStatus::Fixed, Basis::Inconclusive)
    } else {
        (DefectStatus::Fixed, Basis::NoEvidence)
    };

    debug!(defect = %spec.id, ?status, ?basis, applicable, "Classified defect");

    DefectRecord {
        id: spec.id.clone(),
        name: spec.name.clone(),
        status,
        basis,
        evidence,
    }
}
