//! Report aggregation and rendering

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checks::{CheckKind, CheckResult, Outcome, Severity};
use crate::defects::{Basis, DefectRecord, DefectStatus, EvidenceRef};
use crate::driver::SignalKind;
use crate::error::RegressResult;
use crate::prober::Navigation;
use crate::telemetry::TelemetryEvent;

/// Name of the pseudo-route holding the defect-specific probe phase
pub const PROBE_ROUTE: &str = "defect-probes";

/// Everything observed for one route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResult {
    pub route: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<Navigation>,
    pub checks: Vec<CheckResult>,
    /// Events drained at the end of this route's navigation window
    pub telemetry: Vec<TelemetryEvent>,
    /// A check aborted or the page did not load cleanly
    pub degraded: bool,
}

impl RouteResult {
    pub fn open(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            navigation: None,
            checks: Vec::new(),
            telemetry: Vec::new(),
            degraded: false,
        }
    }

    pub fn push(&mut self, result: CheckResult) {
        self.checks.push(result);
    }

    pub fn extend(&mut self, results: Vec<CheckResult>) {
        self.checks.extend(results);
    }

    /// Close the route's window with the telemetry captured during it.
    pub fn seal(mut self, telemetry: Vec<TelemetryEvent>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn is_synthetic(&self) -> bool {
        self.route == PROBE_ROUTE
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.checks.iter().filter(|c| c.outcome == outcome).count()
    }

    /// `None` when the route ran no check of these kinds
    fn family_ok(&self, kinds: &[CheckKind]) -> Option<bool> {
        let mut family = self.checks.iter().filter(|c| kinds.contains(&c.kind)).peekable();
        family.peek()?;
        Some(family.all(|c| c.outcome == Outcome::Pass))
    }

    fn summary(&self) -> RouteSummary {
        RouteSummary {
            route: self.route.clone(),
            loaded: self.family_ok(&[CheckKind::Navigation]),
            rendered: self.family_ok(&[CheckKind::DomPresence]),
            api_ok: self.family_ok(&[CheckKind::ApiContract]),
            filters_ok: self.family_ok(&[CheckKind::FilterPopulation]),
            data_ok: self.family_ok(&[CheckKind::TableData]),
            detail_ok: self.family_ok(&[CheckKind::DetailFields, CheckKind::DetailModal]),
            degraded: self.degraded,
            errors_found: self.telemetry.len(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    /// Routes probed, excluding the probe pseudo-route
    pub tested: usize,
    pub checks: usize,
    pub passed: usize,
    pub failed: usize,
    pub warned: usize,
    /// Telemetry events across all routes
    pub errors_found: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub route: String,
    pub loaded: Option<bool>,
    pub rendered: Option<bool>,
    pub api_ok: Option<bool>,
    pub filters_ok: Option<bool>,
    pub data_ok: Option<bool>,
    pub detail_ok: Option<bool>,
    pub degraded: bool,
    pub errors_found: usize,
}

/// Collects route results in execution order until finalized
#[derive(Debug, Default)]
pub struct ReportBuilder {
    route_results: Vec<RouteResult>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(mut self, result: RouteResult) -> Self {
        self.route_results.push(result);
        self
    }

    pub fn route_results(&self) -> &[RouteResult] {
        &self.route_results
    }

    pub fn finalize(self, defect_records: Vec<DefectRecord>) -> Report {
        let all = || self.route_results.iter().flat_map(|r| r.checks.iter());

        let totals = Totals {
            tested: self.route_results.iter().filter(|r| !r.is_synthetic()).count(),
            checks: all().count(),
            passed: self.route_results.iter().map(|r| r.count(Outcome::Pass)).sum(),
            failed: self.route_results.iter().map(|r| r.count(Outcome::Fail)).sum(),
            warned: self.route_results.iter().map(|r| r.count(Outcome::Warn)).sum(),
            errors_found: self.route_results.iter().map(|r| r.telemetry.len()).sum(),
        };

        let mut failures_by_severity = BTreeMap::new();
        for severity in [Severity::High, Severity::Medium, Severity::Low] {
            failures_by_severity.insert(severity, 0);
        }
        for check in all().filter(|c| c.is_fail()) {
            *failures_by_severity.entry(check.severity).or_insert(0) += 1;
        }

        let route_summaries = self.route_results.iter().map(RouteResult::summary).collect();

        let pass_rate = percentage(totals.passed, totals.checks);
        let fixed = defect_records
            .iter()
            .filter(|d| d.status == DefectStatus::Fixed)
            .count();
        let fix_rate = if defect_records.is_empty() {
            100.0
        } else {
            percentage(fixed, defect_records.len())
        };

        Report {
            generated_at: Utc::now(),
            route_results: self.route_results,
            defect_records,
            totals,
            failures_by_severity,
            route_summaries,
            pass_rate,
            fix_rate,
        }
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// The single artifact of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub route_results: Vec<RouteResult>,
    pub defect_records: Vec<DefectRecord>,
    pub totals: Totals,
    pub failures_by_severity: BTreeMap<Severity, usize>,
    pub route_summaries: Vec<RouteSummary>,
    /// Passed checks over all checks, in percent
    pub pass_rate: f64,
    /// Fixed defects over all defects, in percent
    pub fix_rate: f64,
}

impl Report {
    pub fn route(&self, path: &str) -> Option<&RouteResult> {
        self.route_results.iter().find(|r| r.route == path)
    }

    pub fn defect(&self, id: &str) -> Option<&DefectRecord> {
        self.defect_records.iter().find(|d| d.id == id)
    }

    pub fn evidence(&self, evidence: &EvidenceRef) -> Option<&CheckResult> {
        self.route(&evidence.route)?.checks.get(evidence.index)
    }

    pub fn fixed_count(&self) -> usize {
        self.defect_records
            .iter()
            .filter(|d| d.status == DefectStatus::Fixed)
            .count()
    }

    /// A high-severity failure or an uncaught page error was recorded
    pub fn has_blocking_failure(&self) -> bool {
        let high_fail = self.failures_by_severity.get(&Severity::High).copied().unwrap_or(0) > 0;
        let uncaught = self
            .route_results
            .iter()
            .flat_map(|r| r.telemetry.iter())
            .any(|e| e.kind == SignalKind::PageError);
        high_fail || uncaught
    }

    pub fn exit_code(&self) -> i32 {
        if self.has_blocking_failure() {
            1
        } else {
            0
        }
    }

    /// Write the report as pretty JSON into `output_dir`.
    pub fn write_json(&self, output_dir: &Path) -> RegressResult<PathBuf> {
        std::fs::create_dir_all(output_dir)?;

        let path = output_dir.join("regression-report.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Report written to: {}", path.display());
        Ok(path)
    }

    /// Human-readable rendering: summary, defect table, per-route breakdown.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(70);

        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Summary");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Routes tested:  {}", self.totals.tested);
        let _ = writeln!(out, "Checks:         {}", self.totals.checks);
        let _ = writeln!(out, "Passed:         {}", self.totals.passed);
        let _ = writeln!(out, "Failed:         {}", self.totals.failed);
        let _ = writeln!(out, "Warnings:       {}", self.totals.warned);
        let _ = writeln!(out, "Runtime errors: {}", self.totals.errors_found);
        let by_severity: Vec<String> = self
            .failures_by_severity
            .iter()
            .rev()
            .map(|(s, n)| format!("{} {}", s, n))
            .collect();
        let _ = writeln!(out, "Failures:       {}", by_severity.join(" / "));
        let _ = writeln!(out, "Pass rate:      {:.1}%", self.pass_rate);

        let _ = writeln!(out);
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Known defects");
        let _ = writeln!(out, "{}", rule);
        let mut defects = table();
        defects.set_header(vec!["ID", "Defect", "Status", "Basis", "Evidence"]);
        for record in &self.defect_records {
            let status = match record.status {
                DefectStatus::Fixed => "✓ fixed",
                DefectStatus::Pending => "✗ pending",
            };
            let evidence: Vec<String> = record
                .evidence
                .iter()
                .filter_map(|e| self.evidence(e).map(|c| describe(&e.route, c)))
                .collect();
            defects.add_row(vec![
                record.id.clone(),
                record.name.clone(),
                status.to_string(),
                basis_label(record.basis).to_string(),
                evidence.join("\n"),
            ]);
        }
        let _ = writeln!(out, "{}", defects);
        let _ = writeln!(
            out,
            "Fix rate: {}/{} ({:.1}%)",
            self.fixed_count(),
            self.defect_records.len(),
            self.fix_rate
        );

        let limited: Vec<&DefectRecord> = self
            .defect_records
            .iter()
            .filter(|d| d.status == DefectStatus::Fixed && d.basis.is_limited())
            .collect();
        if !limited.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Fixed without a verifying check:");
            for record in limited {
                let label = basis_label(record.basis);
                let _ = writeln!(out, "  - {} ({}): {}", record.id, record.name, label);
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Routes");
        let _ = writeln!(out, "{}", rule);
        let mut routes = table();
        routes.set_header(vec![
            "Route", "Loaded", "Rendered", "API", "Filters", "Data", "Detail", "Errors",
        ]);
        for summary in &self.route_summaries {
            let route = if summary.degraded {
                format!("{} (degraded)", summary.route)
            } else {
                summary.route.clone()
            };
            routes.add_row(vec![
                route,
                mark(summary.loaded).to_string(),
                mark(summary.rendered).to_string(),
                mark(summary.api_ok).to_string(),
                mark(summary.filters_ok).to_string(),
                mark(summary.data_ok).to_string(),
                mark(summary.detail_ok).to_string(),
                summary.errors_found.to_string(),
            ]);
        }
        let _ = writeln!(out, "{}", routes);

        let problems: Vec<String> = self
            .route_results
            .iter()
            .flat_map(|r| {
                r.checks
                    .iter()
                    .filter(|c| c.outcome != Outcome::Pass)
                    .map(move |c| describe(&r.route, c))
            })
            .collect();
        if !problems.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Failures and warnings:");
            for line in problems {
                let _ = writeln!(out, "  {}", line);
            }
        }

        out
    }
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn mark(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "✓",
        Some(false) => "✗",
        None => "-",
    }
}

fn basis_label(basis: Basis) -> &'static str {
    match basis {
        Basis::Failing => "failing check",
        Basis::Verified => "verified",
        Basis::HeuristicOnly => "heuristic only (low confidence)",
        Basis::Inconclusive => "inconclusive (warnings only)",
        Basis::NoEvidence => "no evidence this run",
    }
}

fn describe(route: &str, check: &CheckResult) -> String {
    let symbol = match check.outcome {
        Outcome::Pass => "✓",
        Outcome::Fail => "✗",
        Outcome::Warn => "⚠",
    };
    let mut line = format!(
        "{} [{}] {} {}: {}",
        symbol, check.severity, route, check.kind, check.description
    );
    if let Some(detail) = &check.detail {
        let _ = write!(line, " ({})", detail);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::CheckDetail;
    use crate::defects::DefectCorrelator;
    use crate::registry::DefectSpec;

    fn event(kind: SignalKind) -> TelemetryEvent {
        TelemetryEvent {
            kind,
            message: "boom".into(),
            url: None,
            timestamp: Utc::now(),
        }
    }

    fn sample_routes() -> Vec<RouteResult> {
        let mut raw = RouteResult::open("/raw-data");
        raw.push(CheckResult::pass(CheckKind::Navigation, "loaded"));
        raw.push(CheckResult::pass(CheckKind::ApiContract, "API OK"));
        raw.push(
            CheckResult::fail(CheckKind::FilterPopulation, Severity::High, "empty filters")
                .tagged(Some("D")),
        );
        raw.push(CheckResult::warn(CheckKind::TableData, Severity::Low, "no rows"));
        let raw = raw.seal(vec![event(SignalKind::ConsoleError)]);

        let mut files = RouteResult::open("/files");
        files.push(CheckResult::pass(CheckKind::Navigation, "loaded"));
        files.push(CheckResult::fail(CheckKind::DomPresence, Severity::Medium, "missing table"));

        let mut probes = RouteResult::open(PROBE_ROUTE);
        probes.push(
            CheckResult::fail(CheckKind::DetailFields, Severity::High, "missing")
                .with_detail(CheckDetail::MissingFields(vec!["raw_db_link".into()]))
                .tagged(Some("C1")),
        );

        vec![raw, files, probes]
    }

    fn build(routes: Vec<RouteResult>, defects: &[DefectSpec]) -> Report {
        let builder = routes.into_iter().fold(ReportBuilder::new(), ReportBuilder::add_route);
        let records = DefectCorrelator::new(defects).correlate(builder.route_results());
        builder.finalize(records)
    }

    fn registry() -> Vec<DefectSpec> {
        vec![
            DefectSpec {
                id: "C1".into(),
                name: "raw detail".into(),
                checks: vec![CheckKind::DetailFields],
            },
            DefectSpec {
                id: "D".into(),
                name: "filters".into(),
                checks: vec![CheckKind::FilterPopulation],
            },
            DefectSpec {
                id: "H".into(),
                name: "duplicates".into(),
                checks: vec![CheckKind::DuplicateDetection],
            },
        ]
    }

    #[test]
    fn test_totals() {
        let report = build(sample_routes(), &registry());
        assert_eq!(report.totals.tested, 2);
        assert_eq!(report.totals.checks, 7);
        assert_eq!(report.totals.passed, 3);
        assert_eq!(report.totals.failed, 3);
        assert_eq!(report.totals.warned, 1);
        assert_eq!(report.totals.errors_found, 1);
        assert_eq!(report.failures_by_severity[&Severity::High], 2);
        assert_eq!(report.failures_by_severity[&Severity::Medium], 1);
        assert_eq!(report.failures_by_severity[&Severity::Low], 0);
    }

    #[test]
    fn test_failed_total_matches_defect_independent_count() {
        let report = build(sample_routes(), &registry());
        let independent = report
            .route_results
            .iter()
            .flat_map(|r| r.checks.iter())
            .filter(|c| c.outcome == Outcome::Fail)
            .count();
        assert_eq!(report.totals.failed, independent);

        // Only tagged failures become defect evidence
        let evidence: usize = report.defect_records.iter().map(|d| d.evidence.len()).sum();
        assert!(evidence <= report.totals.failed);
        assert_eq!(evidence, 2);
    }

    #[test]
    fn test_route_order_and_summaries() {
        let report = build(sample_routes(), &registry());
        let order: Vec<&str> = report.route_results.iter().map(|r| r.route.as_str()).collect();
        assert_eq!(order, vec!["/raw-data", "/files", PROBE_ROUTE]);

        let raw = &report.route_summaries[0];
        assert_eq!(raw.loaded, Some(true));
        assert_eq!(raw.api_ok, Some(true));
        assert_eq!(raw.filters_ok, Some(false));
        assert_eq!(raw.data_ok, Some(false));
        assert_eq!(raw.rendered, None);
        assert_eq!(raw.detail_ok, None);
        assert_eq!(raw.errors_found, 1);
    }

    #[test]
    fn test_fix_rate_and_evidence_lookup() {
        let report = build(sample_routes(), &registry());
        assert_eq!(report.fixed_count(), 1);
        assert!((report.fix_rate - 100.0 / 3.0).abs() < 1e-9);

        let c1 = report.defect("C1").unwrap();
        assert_eq!(c1.status, DefectStatus::Pending);
        let evidence = report.evidence(&c1.evidence[0]).unwrap();
        assert_eq!(
            evidence.detail,
            Some(CheckDetail::MissingFields(vec!["raw_db_link".into()]))
        );

        let h = report.defect("H").unwrap();
        assert_eq!(h.status, DefectStatus::Fixed);
        assert_eq!(h.basis, Basis::NoEvidence);
    }

    #[test]
    fn test_exit_code() {
        let report = build(sample_routes(), &registry());
        assert_eq!(report.exit_code(), 1);

        let mut clean = RouteResult::open("/metadata");
        clean.push(CheckResult::pass(CheckKind::Navigation, "loaded"));
        clean.push(CheckResult::fail(CheckKind::DomPresence, Severity::Medium, "missing tab"));
        let report = build(vec![clean.clone()], &[]);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.fix_rate, 100.0);

        let report = build(vec![clean.seal(vec![event(SignalKind::PageError)])], &[]);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_render_text_sections() {
        let report = build(sample_routes(), &registry());
        let text = report.render_text();
        assert!(text.contains("Summary"));
        assert!(text.contains("Known defects"));
        assert!(text.contains("Routes"));
        assert!(text.contains("✗ pending"));
        assert!(text.contains("no evidence this run"));
        assert!(text.contains("missing: raw_db_link"));
        assert!(text.contains("Fix rate: 1/3 (33.3%)"));
    }
}
