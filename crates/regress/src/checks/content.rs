//! Static-content heuristic
//!
//! Scans rendered markup for identifiers that hint at how the page is
//! implemented. Low confidence by nature: a passing scan never verifies a fix
//! on its own (see [`crate::defects::Basis::HeuristicOnly`]).

use regex::Regex;

use super::{CheckContext, CheckDetail, CheckKind, CheckResult, Severity};
use crate::error::{RegressError, RegressResult};
use crate::prober;

pub(super) async fn static_content(
    ctx: &CheckContext<'_>,
    path: Option<&str>,
    required: &[String],
    forbidden: &[String],
    defect: Option<&str>,
) -> RegressResult<Vec<CheckResult>> {
    let kind = CheckKind::StaticContent;

    if let Some(path) = path {
        let nav = match prober::probe(ctx.driver, &ctx.url(path), ctx.settle).await {
            Ok(nav) => nav,
            Err(e) if e.is_transport() => {
                return Ok(vec![CheckResult::warn(
                    kind,
                    Severity::Medium,
                    format!("Could not reach {} for markup scan", path),
                )
                .with_detail(CheckDetail::Message(e.to_string()))
                .tagged(defect)]);
            }
            Err(e) => return Err(e),
        };
        if !nav.ok {
            return Ok(vec![CheckResult::warn(
                kind,
                Severity::Medium,
                format!("Could not load {} for markup scan", path),
            )
            .with_detail(CheckDetail::Status {
                status: nav.status,
                reason: "page did not load".into(),
            })
            .tagged(defect)]);
        }
    }

    let markup = ctx.driver.content().await?;
    let mut results = Vec::new();

    let missing: Vec<&str> = required
        .iter()
        .filter(|needle| !markup.contains(needle.as_str()))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        results.push(
            CheckResult::pass(kind, "Markup contains expected identifiers (low confidence)")
                .tagged(defect),
        );
    } else {
        results.push(
            CheckResult::fail(
                kind,
                Severity::Low,
                "Markup lacks expected identifiers (low confidence)",
            )
            .with_detail(CheckDetail::Message(format!("not found: {}", missing.join(", "))))
            .tagged(defect),
        );
    }

    for pattern in forbidden {
        let re = Regex::new(pattern).map_err(|e| RegressError::Config(e.to_string()))?;
        if let Some(hit) = re.find(&markup) {
            results.push(
                CheckResult::warn(kind, Severity::Low, "Possible hard-coded literal in markup")
                    .with_detail(CheckDetail::Message(hit.as_str().to_string()))
                    .tagged(defect),
            );
        }
    }

    Ok(results)
}
