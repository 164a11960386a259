//! Checks against the rendered page

use tracing::{debug, warn};

use super::{CheckContext, CheckDetail, CheckKind, CheckResult, Severity};
use crate::error::{RegressError, RegressResult};

pub(super) async fn presence(
    ctx: &CheckContext<'_>,
    selectors: &[String],
) -> RegressResult<Vec<CheckResult>> {
    let mut results = Vec::with_capacity(selectors.len());

    for selector in selectors {
        let attached = ctx.driver.wait_for(selector, ctx.element_timeout).await?;
        if !attached {
            results.push(
                CheckResult::fail(
                    CheckKind::DomPresence,
                    Severity::Medium,
                    format!("Required element missing: {}", selector),
                )
                .with_detail(CheckDetail::Message(format!(
                    "not attached within {} ms",
                    ctx.element_timeout.as_millis()
                ))),
            );
            continue;
        }

        if ctx.driver.is_visible(selector).await? {
            results.push(CheckResult::pass(
                CheckKind::DomPresence,
                format!("Element visible: {}", selector),
            ));
        } else {
            results.push(CheckResult::warn(
                CheckKind::DomPresence,
                Severity::Medium,
                format!("Element exists but is not visible: {}", selector),
            ));
        }
    }

    Ok(results)
}

/// A control is populated when it has more than the default option.
pub(super) async fn filter_population(
    ctx: &CheckContext<'_>,
    controls: &[String],
    defect: Option<&str>,
) -> RegressResult<CheckResult> {
    if controls.is_empty() {
        return Ok(CheckResult::warn(
            CheckKind::FilterPopulation,
            Severity::Low,
            "No filter controls configured",
        )
        .tagged(defect));
    }

    let mut counts = Vec::with_capacity(controls.len());
    for control in controls {
        let options = ctx.driver.count(&format!("{} option", control)).await?;
        debug!(control = %control, options, "Counted filter options");
        counts.push((control.clone(), options));
    }

    let empty: Vec<&str> = counts
        .iter()
        .filter(|(_, n)| *n <= 1)
        .map(|(c, _)| c.as_str())
        .collect();

    let result = if empty.len() == counts.len() {
        CheckResult::fail(
            CheckKind::FilterPopulation,
            Severity::High,
            "Filter dropdowns have no options",
        )
    } else if !empty.is_empty() {
        CheckResult::warn(
            CheckKind::FilterPopulation,
            Severity::Medium,
            format!("Some filter dropdowns have no options: {}", empty.join(", ")),
        )
    } else {
        CheckResult::pass(CheckKind::FilterPopulation, "Filter dropdowns populated")
    };

    Ok(result.with_detail(CheckDetail::Counts(counts)).tagged(defect))
}

/// An empty table is only a warning: it cannot be told apart from an empty
/// database without a known-nonempty fixture.
pub(super) async fn table_data(
    ctx: &CheckContext<'_>,
    row_selector: &str,
) -> RegressResult<CheckResult> {
    ctx.driver.wait_for(row_selector, ctx.element_timeout).await?;
    let rows = ctx.driver.count(row_selector).await?;

    if rows == 0 {
        return Ok(CheckResult::warn(
            CheckKind::TableData,
            Severity::Low,
            "Table has no rows (empty data or broken rendering)",
        )
        .with_detail(CheckDetail::Counts(vec![(row_selector.to_string(), 0)])));
    }

    Ok(CheckResult::pass(CheckKind::TableData, format!("Table shows {} row(s)", rows))
        .with_detail(CheckDetail::Counts(vec![(row_selector.to_string(), rows)])))
}

/// Assumes a list row is already rendered by the time this runs.
pub(super) async fn detail_modal(
    ctx: &CheckContext<'_>,
    trigger: &str,
    modal: &str,
    close: Option<&str>,
    defect: Option<&str>,
) -> RegressResult<CheckResult> {
    if ctx.driver.count(trigger).await? == 0 {
        return Ok(CheckResult::warn(
            CheckKind::DetailModal,
            Severity::Low,
            "No detail button on the page; modal not exercised",
        )
        .with_detail(CheckDetail::Message(format!("no element matches {}", trigger)))
        .tagged(defect));
    }

    match ctx.driver.click(trigger, ctx.element_timeout).await {
        Ok(()) => {}
        Err(RegressError::Timeout(_)) => {
            return Ok(CheckResult::fail(
                CheckKind::DetailModal,
                Severity::Medium,
                "Detail button could not be clicked",
            )
            .with_detail(CheckDetail::Message(format!("click on {} timed out", trigger)))
            .tagged(defect));
        }
        Err(e) => return Err(e),
    }

    let result = if !ctx.driver.wait_for(modal, ctx.element_timeout).await? {
        CheckResult::fail(CheckKind::DetailModal, Severity::Medium, "Detail modal did not open")
            .with_detail(CheckDetail::Message(format!("{} not shown", modal)))
    } else if ctx.driver.inner_text(modal).await?.trim().is_empty() {
        CheckResult::warn(CheckKind::DetailModal, Severity::Medium, "Detail modal opened empty")
    } else {
        CheckResult::pass(CheckKind::DetailModal, "Detail modal opened")
    };

    if let Some(close) = close {
        if let Err(e) = ctx.driver.click(close, ctx.element_timeout).await {
            warn!(selector = close, "Could not close detail modal: {}", e);
        }
    }

    Ok(result.tagged(defect))
}
