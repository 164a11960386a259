//! Declarative route, check and defect registry (YAML)
//!
//! One generic pipeline consumes this registry; nothing in the runner is
//! specific to a route. The BioData Manager registry ships embedded in the
//! crate and can be replaced with `--config`.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::checks::CheckKind;
use crate::driver::WaitPolicy;
use crate::error::{RegressError, RegressResult};

const BUILTIN_REGISTRY: &str = include_str!("../registry/biodata.yaml");

/// Complete harness configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Application root, e.g. `http://localhost:20425`
    pub base_url: String,

    #[serde(default)]
    pub settle: SettleConfig,

    /// Bound for element waits
    #[serde(default = "default_element_timeout")]
    pub element_timeout_ms: u64,

    /// Bound for direct API requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Console error substrings that are not recorded as telemetry
    #[serde(default)]
    pub ignore_console: Vec<String>,

    /// Previously reported defects
    pub defects: Vec<DefectSpec>,

    /// Routes probed in order
    pub routes: Vec<RouteSpec>,

    /// Defect-specific checks not tied to a route
    #[serde(default)]
    pub probes: Vec<CheckSpec>,
}

fn default_element_timeout() -> u64 {
    5000
}

fn default_request_timeout() -> u64 {
    10_000
}

/// Wait applied after each navigation before checks begin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
    #[serde(default)]
    pub wait: WaitPolicy,

    #[serde(default = "default_navigation_timeout")]
    pub timeout_ms: u64,

    /// Extra delay for client-side rendering after the load state is reached
    #[serde(default = "default_quiescence")]
    pub quiescence_ms: u64,
}

fn default_navigation_timeout() -> u64 {
    30_000
}

fn default_quiescence() -> u64 {
    2000
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            wait: WaitPolicy::default(),
            timeout_ms: default_navigation_timeout(),
            quiescence_ms: default_quiescence(),
        }
    }
}

impl SettleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }
}

/// A defect whose status is re-derived every run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefectSpec {
    pub id: String,
    pub name: String,
    /// Check kinds whose tagged results count as evidence
    pub checks: Vec<CheckKind>,
}

/// One target page and the checks run against it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    pub path: String,
    pub checks: Vec<CheckSpec>,
}

impl RouteSpec {
    pub fn required_checks(&self) -> BTreeSet<CheckKind> {
        self.checks.iter().map(CheckSpec::kind).collect()
    }
}

/// A single check, tagged by `kind`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckSpec {
    /// Every selector must exist and be visible
    DomPresence { selectors: Vec<String> },

    /// Backing endpoint must answer 2xx with JSON
    ApiContract {
        endpoint: String,
        /// Key that must hold an array, e.g. `data` or `projects`
        #[serde(default)]
        collection: Option<String>,
    },

    /// Filter `<select>` controls must carry options beyond the default one
    FilterPopulation {
        controls: Vec<String>,
        #[serde(default)]
        defect: Option<String>,
    },

    /// Rendered table must have rows
    TableData { row_selector: String },

    DetailFields(DetailFieldsSpec),

    /// Clicking a list row's detail button must open the detail modal
    DetailModal {
        trigger: String,
        modal: String,
        #[serde(default)]
        close: Option<String>,
        #[serde(default)]
        defect: Option<String>,
    },

    /// First record of a list endpoint must carry fields in the expected form
    RecordFields {
        endpoint: String,
        #[serde(default = "default_collection")]
        collection: String,
        fields: Vec<FieldRule>,
        #[serde(default)]
        defect: Option<String>,
    },

    DuplicateDetection(DuplicateSpec),

    /// Low-confidence scan of rendered markup
    StaticContent {
        /// Navigate here first; the current page is scanned otherwise
        #[serde(default)]
        path: Option<String>,
        required: Vec<String>,
        /// Regexes that indicate hard-coded literals
        #[serde(default)]
        forbidden: Vec<String>,
        #[serde(default)]
        defect: Option<String>,
    },

    /// None of these URLs may produce a 5xx
    ServerErrorGuard { urls: Vec<String> },
}

fn default_collection() -> String {
    "data".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailFieldsSpec {
    pub list_endpoint: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Field of a list record holding its id
    pub id_field: String,
    /// Per-id endpoint, `{id}` is substituted
    pub detail_endpoint: String,
    pub required: Vec<String>,
    #[serde(default)]
    pub defect: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateSpec {
    pub endpoint: String,
    pub payload: serde_json::Value,
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Fields that make two submissions the same logical record
    #[serde(default)]
    pub identity: Vec<String>,
    /// Overrides for non-identity fields; when set a third submission with
    /// these overrides must also be flagged as a duplicate
    #[serde(default)]
    pub variant: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub defect: Option<String>,
}

fn default_marker() -> String {
    "is_duplicate".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    #[serde(default)]
    pub presence: Presence,
    /// Values matching this regex are rejected
    #[serde(default)]
    pub reject_pattern: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Key must exist; any value, even empty, is accepted
    Present,
    /// Key must exist and hold something other than null or ""
    #[default]
    NonEmpty,
}

impl CheckSpec {
    pub fn kind(&self) -> CheckKind {
        match self {
            CheckSpec::DomPresence { .. } => CheckKind::DomPresence,
            CheckSpec::ApiContract { .. } => CheckKind::ApiContract,
            CheckSpec::FilterPopulation { .. } => CheckKind::FilterPopulation,
            CheckSpec::TableData { .. } => CheckKind::TableData,
            CheckSpec::DetailFields(_) => CheckKind::DetailFields,
            CheckSpec::DetailModal { .. } => CheckKind::DetailModal,
            CheckSpec::RecordFields { .. } => CheckKind::RecordFields,
            CheckSpec::DuplicateDetection(_) => CheckKind::DuplicateDetection,
            CheckSpec::StaticContent { .. } => CheckKind::StaticContent,
            CheckSpec::ServerErrorGuard { .. } => CheckKind::ServerErrorGuard,
        }
    }

    pub fn defect(&self) -> Option<&str> {
        match self {
            CheckSpec::FilterPopulation { defect, .. }
            | CheckSpec::DetailModal { defect, .. }
            | CheckSpec::RecordFields { defect, .. }
            | CheckSpec::StaticContent { defect, .. } => defect.as_deref(),
            CheckSpec::DetailFields(spec) => spec.defect.as_deref(),
            CheckSpec::DuplicateDetection(spec) => spec.defect.as_deref(),
            CheckSpec::DomPresence { .. }
            | CheckSpec::ApiContract { .. }
            | CheckSpec::TableData { .. }
            | CheckSpec::ServerErrorGuard { .. } => None,
        }
    }

    fn patterns(&self) -> Vec<&str> {
        match self {
            CheckSpec::StaticContent { forbidden, .. } => {
                forbidden.iter().map(String::as_str).collect()
            }
            CheckSpec::RecordFields { fields, .. } => {
                fields.iter().filter_map(|f| f.reject_pattern.as_deref()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Parse and validate a registry from a YAML string
    pub fn from_yaml(yaml: &str) -> RegressResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> RegressResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// The embedded BioData Manager registry
    pub fn builtin() -> RegressResult<Self> {
        Self::from_yaml(BUILTIN_REGISTRY)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn defect(&self, id: &str) -> Option<&DefectSpec> {
        self.defects.iter().find(|d| d.id == id)
    }

    fn all_checks(&self) -> impl Iterator<Item = &CheckSpec> {
        self.routes
            .iter()
            .flat_map(|r| r.checks.iter())
            .chain(self.probes.iter())
    }

    /// Reject registries whose cross-references do not line up.
    pub fn validate(&self) -> RegressResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(RegressError::Config("base_url is empty".into()));
        }

        let mut defect_ids = HashSet::new();
        for defect in &self.defects {
            if !defect_ids.insert(defect.id.as_str()) {
                return Err(RegressError::Config(format!("duplicate defect id '{}'", defect.id)));
            }
        }

        let mut paths = HashSet::new();
        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(RegressError::Config(format!(
                    "route path '{}' must start with '/'",
                    route.path
                )));
            }
            if !paths.insert(route.path.as_str()) {
                return Err(RegressError::Config(format!("duplicate route '{}'", route.path)));
            }
        }

        for check in self.all_checks() {
            if let Some(id) = check.defect() {
                let defect = self.defect(id).ok_or_else(|| {
                    RegressError::Config(format!(
                        "{} check tagged to unknown defect '{}'",
                        check.kind(),
                        id
                    ))
                })?;
                if !defect.checks.contains(&check.kind()) {
                    return Err(RegressError::Config(format!(
                        "defect '{}' does not accept {} evidence",
                        id,
                        check.kind()
                    )));
                }
            }

            for pattern in check.patterns() {
                Regex::new(pattern).map_err(|e| {
                    RegressError::Config(format!("bad pattern '{}': {}", pattern, e))
                })?;
            }

            match check {
                CheckSpec::DetailFields(spec) if !spec.detail_endpoint.contains("{id}") => {
                    return Err(RegressError::Config(format!(
                        "detail endpoint '{}' has no {{id}} placeholder",
                        spec.detail_endpoint
                    )));
                }
                CheckSpec::DuplicateDetection(spec) => {
                    if !spec.payload.is_object() {
                        return Err(RegressError::Config(
                            "duplicate payload must be an object".into(),
                        ));
                    }
                    if let Some(field) = spec.variant.keys().find(|k| spec.identity.contains(k)) {
                        return Err(RegressError::Config(format!(
                            "duplicate variant overrides identity field '{}'",
                            field
                        )));
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }
}
