//! Run loop: session ownership, route sequencing and the probe phase

use std::time::Instant;

use tracing::{error, info, warn};

use crate::checks::{self, CheckContext, CheckKind, CheckResult};
use crate::defects::DefectCorrelator;
use crate::driver::PageDriver;
use crate::error::RegressResult;
use crate::prober;
use crate::registry::{HarnessConfig, RouteSpec};
use crate::report::{Report, ReportBuilder, RouteResult, PROBE_ROUTE};
use crate::telemetry::TelemetryCollector;

/// One browser page plus the telemetry collector attached to it
pub struct Session {
    driver: Box<dyn PageDriver>,
    telemetry: TelemetryCollector,
}

impl Session {
    pub fn open(driver: Box<dyn PageDriver>, ignore_console: Vec<String>) -> Self {
        let telemetry = TelemetryCollector::with_ignored_console(ignore_console);
        telemetry.attach(driver.as_ref());
        Self { driver, telemetry }
    }

    pub fn driver(&self) -> &dyn PageDriver {
        self.driver.as_ref()
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    pub async fn close(self) -> RegressResult<()> {
        let leftover = self.telemetry.pending();
        if leftover > 0 {
            warn!("{} telemetry event(s) arrived after the last route was sealed", leftover);
        }
        self.driver.close().await
    }
}

/// Drives every route of a [`HarnessConfig`] through the check pipeline
pub struct Harness {
    config: HarnessConfig,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every route and the probe phase, then close the session.
    pub async fn run(&self, driver: Box<dyn PageDriver>) -> Report {
        let start = Instant::now();
        let session = Session::open(driver, self.config.ignore_console.clone());

        let report = self.run_session(&session).await;

        if let Err(e) = session.close().await {
            warn!("Failed to close browser session: {}", e);
        }

        info!(
            "Run finished: {} passed, {} failed, {} warnings, {}/{} defects fixed ({} ms)",
            report.totals.passed,
            report.totals.failed,
            report.totals.warned,
            report.fixed_count(),
            report.defect_records.len(),
            start.elapsed().as_millis()
        );
        report
    }

    async fn run_session(&self, session: &Session) -> Report {
        let mut builder = ReportBuilder::new();

        info!("Probing {} route(s) at {}", self.config.routes.len(), self.config.base_url);
        for route in &self.config.routes {
            builder = builder.add_route(self.run_route(session, route).await);
        }

        if !self.config.probes.is_empty() {
            builder = builder.add_route(self.run_probes(session).await);
        }

        let correlator = DefectCorrelator::new(&self.config.defects);
        let records = correlator.correlate(builder.route_results());
        builder.finalize(records)
    }

    fn context<'a>(&'a self, session: &'a Session) -> CheckContext<'a> {
        CheckContext {
            driver: session.driver(),
            base_url: &self.config.base_url,
            settle: &self.config.settle,
            element_timeout: self.config.element_timeout(),
            request_timeout: self.config.request_timeout(),
        }
    }

    /// Probe one route and run its checks; always yields a sealed result.
    pub async fn run_route(&self, session: &Session, route: &RouteSpec) -> RouteResult {
        info!(route = %route.path, "Probing route");
        let ctx = self.context(session);
        let mut result = RouteResult::open(&route.path);

        match prober::probe(session.driver(), &ctx.url(&route.path), &self.config.settle).await {
            Ok(nav) => {
                result.push(prober::navigation_result(&nav));
                result.navigation = Some(nav);

                let (checks, aborted) = checks::run_checks(&ctx, &route.checks).await;
                result.extend(checks);
                result.degraded = aborted || !nav.ok;
            }
            Err(e) if e.is_transport() => {
                error!(route = %route.path, "Route unreachable: {}", e);
                result.push(prober::transport_result(&e));
                result.degraded = true;
            }
            Err(e) => {
                error!(route = %route.path, "Navigation aborted: {}", e);
                result.push(CheckResult::execution_error(CheckKind::Navigation, &e));
                result.degraded = true;
            }
        }

        let result = result.seal(session.telemetry().drain());
        log_route(&result);
        result
    }

    /// Defect-specific checks not tied to a single route
    pub async fn run_probes(&self, session: &Session) -> RouteResult {
        info!("Running {} defect probe(s)", self.config.probes.len());
        let ctx = self.context(session);
        let mut result = RouteResult::open(PROBE_ROUTE);

        let (checks, aborted) = checks::run_checks(&ctx, &self.config.probes).await;
        result.extend(checks);
        result.degraded = aborted;

        let result = result.seal(session.telemetry().drain());
        log_route(&result);
        result
    }
}

fn log_route(result: &RouteResult) {
    let failed = result.checks.iter().filter(|c| c.is_fail()).count();
    if failed == 0 {
        info!(
            "✓ {} ({} checks, {} runtime errors)",
            result.route,
            result.checks.len(),
            result.telemetry.len()
        );
    } else {
        error!(
            "✗ {} ({} of {} checks failed, {} runtime errors)",
            result.route,
            failed,
            result.checks.len(),
            result.telemetry.len()
        );
    }
}
