//! Write-path duplicate detection
//!
//! The only check that mutates application state. The payload is fixed, so
//! re-running it only ever adds the same logical record once.

use serde_json::Value;
use tracing::debug;

use super::{CheckContext, CheckDetail, CheckKind, CheckResult, Severity};
use crate::driver::ApiRequest;
use crate::registry::DuplicateSpec;

/// JavaScript-style truthiness of a marker value
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Submit once; `Ok` carries whether the response was marked as a duplicate.
async fn submit(
    ctx: &CheckContext<'_>,
    url: &str,
    payload: Value,
    marker: &str,
) -> Result<bool, CheckResult> {
    let kind = CheckKind::DuplicateDetection;

    let resp = ctx.send(ApiRequest::post(url, payload)).await.map_err(|e| {
        CheckResult::fail(kind, Severity::High, "Write endpoint unreachable").with_detail(
            CheckDetail::Status {
                status: None,
                reason: e.to_string(),
            },
        )
    })?;

    let body = resp.json().map_err(|e| {
        CheckResult::fail(kind, Severity::High, "Write endpoint returned an unparseable body")
            .with_detail(CheckDetail::Status {
                status: Some(resp.status),
                reason: e.to_string(),
            })
    })?;

    let flagged = is_truthy(body.get(marker));
    // A conflict status that carries the marker still counts as detection
    if !resp.ok() && !flagged {
        return Err(
            CheckResult::fail(kind, Severity::High, "Write endpoint rejected the submission")
                .with_detail(CheckDetail::Status {
                    status: Some(resp.status),
                    reason: body.to_string(),
                }),
        );
    }

    Ok(flagged)
}

pub(super) async fn duplicate_detection(
    ctx: &CheckContext<'_>,
    spec: &DuplicateSpec,
) -> CheckResult {
    let defect = spec.defect.as_deref();
    let kind = CheckKind::DuplicateDetection;
    let url = ctx.url(&spec.endpoint);

    let first = match submit(ctx, &url, spec.payload.clone(), &spec.marker).await {
        Ok(flagged) => flagged,
        Err(result) => return result.tagged(defect),
    };
    if first {
        debug!(endpoint = %spec.endpoint, "First submission already flagged");
        return CheckResult::warn(
            kind,
            Severity::Medium,
            "Payload already flagged on first submission; cannot verify detection",
        )
        .with_detail(CheckDetail::Message(format!(
            "first response carries a truthy '{}'",
            spec.marker
        )))
        .tagged(defect);
    }

    match submit(ctx, &url, spec.payload.clone(), &spec.marker).await {
        Ok(true) => {}
        Ok(false) => {
            return CheckResult::fail(
                kind,
                Severity::High,
                "Repeated submission accepted without a duplicate marker",
            )
            .with_detail(CheckDetail::Message(format!(
                "second response lacks a truthy '{}'",
                spec.marker
            )))
            .tagged(defect);
        }
        Err(result) => return result.tagged(defect),
    }

    if !spec.variant.is_empty() {
        let mut variant = spec.payload.clone();
        if let Value::Object(fields) = &mut variant {
            for (key, value) in &spec.variant {
                fields.insert(key.clone(), value.clone());
            }
        }
        let changed: Vec<&str> = spec.variant.keys().map(String::as_str).collect();

        match submit(ctx, &url, variant, &spec.marker).await {
            Ok(true) => {}
            Ok(false) => {
                return CheckResult::fail(
                    kind,
                    Severity::High,
                    "Submission differing only in non-identity fields was not flagged",
                )
                .with_detail(CheckDetail::Message(format!("changed: {}", changed.join(", "))))
                .tagged(defect);
            }
            Err(result) => return result.tagged(defect),
        }
    }

    CheckResult::pass(kind, "Repeated submission flagged as duplicate").tagged(defect)
}
