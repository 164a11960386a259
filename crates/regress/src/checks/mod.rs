//! Check pipeline
//!
//! Every check is an independent routine run against the page the prober
//! just loaded (plus the application API) and yields one or more
//! [`CheckResult`]s. Routines never fail silently: when a check cannot decide
//! it reports [`Outcome::Warn`] with a reason.
//!
//! ```text
//! CheckSpec (registry)  ──►  run_check(ctx, spec)  ──►  Vec<CheckResult>
//!    dom_presence               dom::*
//!    filter_population          dom::*
//!    table_data                 dom::*
//!    detail_modal               dom::*
//!    api_contract               api::*
//!    detail_fields              api::*
//!    record_fields              api::*
//!    server_error_guard         api::*
//!    duplicate_detection        write::*
//!    static_content             content::*
//! ```

mod api;
mod content;
mod dom;
mod write;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::driver::{ApiRequest, ApiResponse, PageDriver};
use crate::error::{RegressError, RegressResult};
use crate::registry::{CheckSpec, SettleConfig};

/// Kind of assertion a [`CheckResult`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Navigation,
    DomPresence,
    ApiContract,
    FilterPopulation,
    TableData,
    DetailFields,
    DetailModal,
    RecordFields,
    DuplicateDetection,
    StaticContent,
    ServerErrorGuard,
    ExecutionError,
}

impl CheckKind {
    /// Markup scanning only; never enough on its own to call a defect fixed.
    pub fn is_heuristic(&self) -> bool {
        matches!(self, CheckKind::StaticContent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Navigation => "navigation",
            CheckKind::DomPresence => "dom_presence",
            CheckKind::ApiContract => "api_contract",
            CheckKind::FilterPopulation => "filter_population",
            CheckKind::TableData => "table_data",
            CheckKind::DetailFields => "detail_fields",
            CheckKind::DetailModal => "detail_modal",
            CheckKind::RecordFields => "record_fields",
            CheckKind::DuplicateDetection => "duplicate_detection",
            CheckKind::StaticContent => "static_content",
            CheckKind::ServerErrorGuard => "server_error_guard",
            CheckKind::ExecutionError => "execution_error",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    Warn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
        }
    }
}

/// Structured detail attached to a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CheckDetail {
    Message(String),
    /// Field names that were absent or empty, in the order they were required
    MissingFields(Vec<String>),
    Status {
        status: Option<u16>,
        reason: String,
    },
    /// Per-selector or per-endpoint counts
    Counts(Vec<(String, usize)>),
}

impl fmt::Display for CheckDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckDetail::Message(m) => f.write_str(m),
            CheckDetail::MissingFields(fields) => write!(f, "missing: {}", fields.join(", ")),
            CheckDetail::Status { status: Some(s), reason } => write!(f, "HTTP {}: {}", s, reason),
            CheckDetail::Status { status: None, reason } => f.write_str(reason),
            CheckDetail::Counts(counts) => {
                let parts: Vec<String> =
                    counts.iter().map(|(k, n)| format!("{}={}", k, n)).collect();
                f.write_str(&parts.join(", "))
            }
        }
    }
}

/// Outcome of one assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub outcome: Outcome,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<CheckDetail>,
    /// Defect id this result is evidence for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defect: Option<String>,
}

impl CheckResult {
    pub fn pass(kind: CheckKind, description: impl Into<String>) -> Self {
        Self::new(kind, Outcome::Pass, Severity::Low, description)
    }

    pub fn fail(kind: CheckKind, severity: Severity, description: impl Into<String>) -> Self {
        Self::new(kind, Outcome::Fail, severity, description)
    }

    pub fn warn(kind: CheckKind, severity: Severity, description: impl Into<String>) -> Self {
        Self::new(kind, Outcome::Warn, severity, description)
    }

    fn new(
        kind: CheckKind,
        outcome: Outcome,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            outcome,
            severity,
            description: description.into(),
            detail: None,
            defect: None,
        }
    }

    pub fn with_detail(mut self, detail: CheckDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn tagged(mut self, defect: Option<&str>) -> Self {
        self.defect = defect.map(String::from);
        self
    }

    /// A harness fault caught at the route boundary.
    ///
    /// Callers tag it with the interrupted check's defect so the defect
    /// cannot be reported fixed on missing evidence.
    pub fn execution_error(during: CheckKind, err: &RegressError) -> Self {
        Self::fail(
            CheckKind::ExecutionError,
            Severity::High,
            format!("Test execution error during {}", during),
        )
        .with_detail(CheckDetail::Message(err.to_string()))
    }

    pub fn is_fail(&self) -> bool {
        self.outcome == Outcome::Fail
    }
}

/// Everything a check routine may touch
pub struct CheckContext<'a> {
    pub driver: &'a dyn PageDriver,
    pub base_url: &'a str,
    pub settle: &'a SettleConfig,
    pub element_timeout: Duration,
    pub request_timeout: Duration,
}

impl<'a> CheckContext<'a> {
    pub fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!("{}{}", self.base_url.trim_end_matches('/'), endpoint)
    }

    /// Issue an API request bounded by the request timeout.
    pub async fn send(&self, request: ApiRequest) -> RegressResult<ApiResponse> {
        let url = request.url.clone();
        tokio::time::timeout(self.request_timeout, self.driver.request(request))
            .await
            .map_err(|_| RegressError::Timeout(url))?
    }

    pub async fn get(&self, endpoint: &str) -> RegressResult<ApiResponse> {
        self.send(ApiRequest::get(self.url(endpoint))).await
    }
}

/// Run a single check.
///
/// `Err` is reserved for harness faults; assertion failures come back as
/// failing results.
pub async fn run_check(
    ctx: &CheckContext<'_>,
    spec: &CheckSpec,
) -> RegressResult<Vec<CheckResult>> {
    debug!(kind = %spec.kind(), "Running check");

    let results = match spec {
        CheckSpec::DomPresence { selectors } => dom::presence(ctx, selectors).await?,
        CheckSpec::FilterPopulation { controls, defect } => {
            vec![dom::filter_population(ctx, controls, defect.as_deref()).await?]
        }
        CheckSpec::TableData { row_selector } => vec![dom::table_data(ctx, row_selector).await?],
        CheckSpec::DetailModal { trigger, modal, close, defect } => {
            vec![dom::detail_modal(ctx, trigger, modal, close.as_deref(), defect.as_deref()).await?]
        }
        CheckSpec::ApiContract { endpoint, collection } => {
            vec![api::contract(ctx, endpoint, collection.as_deref()).await]
        }
        CheckSpec::DetailFields(spec) => vec![api::detail_fields(ctx, spec).await],
        CheckSpec::RecordFields { endpoint, collection, fields, defect } => {
            vec![api::record_fields(ctx, endpoint, collection, fields, defect.as_deref()).await?]
        }
        CheckSpec::ServerErrorGuard { urls } => vec![api::server_error_guard(ctx, urls).await],
        CheckSpec::DuplicateDetection(spec) => vec![write::duplicate_detection(ctx, spec).await],
        CheckSpec::StaticContent { path, required, forbidden, defect } => {
            let (path, defect) = (path.as_deref(), defect.as_deref());
            content::static_content(ctx, path, required, forbidden, defect).await?
        }
    };

    Ok(results)
}

/// Run checks in order against the current page.
///
/// The first harness fault ends the sequence: it is recorded as an
/// `execution_error` result and the returned flag marks the route degraded.
pub async fn run_checks(ctx: &CheckContext<'_>, specs: &[CheckSpec]) -> (Vec<CheckResult>, bool) {
    let mut results = Vec::new();

    for spec in specs {
        match run_check(ctx, spec).await {
            Ok(mut produced) => results.append(&mut produced),
            Err(e) => {
                error!(kind = %spec.kind(), "Check aborted: {}", e);
                results.push(CheckResult::execution_error(spec.kind(), &e).tagged(spec.defect()));
                return (results, true);
            }
        }
    }

    (results, false)
}
