//! Route navigation and settle handling

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checks::{CheckDetail, CheckKind, CheckResult, Severity};
use crate::driver::PageDriver;
use crate::error::{RegressError, RegressResult};
use crate::registry::SettleConfig;

/// Extra time granted to the driver beyond its own navigation timeout
const NAVIGATION_GRACE: Duration = Duration::from_secs(5);

/// Observed outcome of navigating to a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Navigation {
    pub status: Option<u16>,
    pub ok: bool,
    #[serde(default)]
    pub timed_out: bool,
}

/// Navigate to `url` and wait for the settle condition.
///
/// Non-2xx responses and timeouts come back as `Ok` with `ok == false`.
/// Transport failures and driver faults are returned as errors.
pub async fn probe(
    driver: &dyn PageDriver,
    url: &str,
    settle: &SettleConfig,
) -> RegressResult<Navigation> {
    debug!(url, wait = settle.wait.as_str(), "Navigating");

    let bound = settle.timeout() + NAVIGATION_GRACE;
    let navigation = driver.goto(url, settle.wait, settle.timeout());
    let outcome = match tokio::time::timeout(bound, navigation).await {
        Ok(outcome) => outcome,
        Err(_) => Err(RegressError::Timeout(url.to_string())),
    };

    match outcome {
        Ok(response) => {
            let ok = response.status.map(|s| (200..300).contains(&s)).unwrap_or(false);
            if !ok {
                warn!(url, status = ?response.status, "Page did not load cleanly");
            }
            // Client-side rendering continues after the load state is reached
            tokio::time::sleep(settle.quiescence()).await;
            Ok(Navigation {
                status: response.status,
                ok,
                timed_out: false,
            })
        }
        Err(RegressError::Timeout(_)) => {
            warn!(url, "Navigation timed out after {} ms", settle.timeout_ms);
            Ok(Navigation {
                status: None,
                ok: false,
                timed_out: true,
            })
        }
        Err(e) => Err(e),
    }
}

/// The `navigation` result every probed route carries
pub fn navigation_result(nav: &Navigation) -> CheckResult {
    if nav.ok {
        return CheckResult::pass(
            CheckKind::Navigation,
            format!("Page loaded (HTTP {})", nav.status.unwrap_or_default()),
        );
    }

    let reason = if nav.timed_out {
        "navigation timed out".to_string()
    } else {
        match nav.status {
            Some(s) => format!("non-success status {}", s),
            None => "no response".to_string(),
        }
    };

    CheckResult::fail(CheckKind::Navigation, Severity::High, "Page failed to load").with_detail(
        CheckDetail::Status {
            status: nav.status,
            reason,
        },
    )
}

/// Result recorded when the route could not be reached at all
pub fn transport_result(err: &RegressError) -> CheckResult {
    CheckResult::fail(CheckKind::Navigation, Severity::High, "Route unreachable").with_detail(
        CheckDetail::Status {
            status: None,
            reason: err.to_string(),
        },
    )
}
