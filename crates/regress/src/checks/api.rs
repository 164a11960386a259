//! Checks against the application API

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{CheckContext, CheckDetail, CheckKind, CheckResult, Severity};
use crate::error::{RegressError, RegressResult};
use crate::registry::{DetailFieldsSpec, FieldRule, Presence};

/// GET `endpoint` and parse the body, or describe why that was not possible.
async fn fetch_json(ctx: &CheckContext<'_>, endpoint: &str) -> Result<Value, CheckDetail> {
    let resp = ctx.get(endpoint).await.map_err(|e| CheckDetail::Status {
        status: None,
        reason: e.to_string(),
    })?;

    if !resp.ok() {
        return Err(CheckDetail::Status {
            status: Some(resp.status),
            reason: snippet(&resp.body),
        });
    }

    resp.json().map_err(|e| CheckDetail::Status {
        status: Some(resp.status),
        reason: format!("unparseable JSON: {}", e),
    })
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(120) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn items<'v>(body: &'v Value, key: &str) -> Option<&'v Vec<Value>> {
    body.get(key).and_then(Value::as_array)
}

/// Absent, `null` and `""` all count as missing.
pub(crate) fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(super) async fn contract(
    ctx: &CheckContext<'_>,
    endpoint: &str,
    collection: Option<&str>,
) -> CheckResult {
    let body = match fetch_json(ctx, endpoint).await {
        Ok(body) => body,
        Err(detail) => {
            return CheckResult::fail(
                CheckKind::ApiContract,
                Severity::High,
                format!("API {} failed", endpoint),
            )
            .with_detail(detail);
        }
    };

    let Some(key) = collection else {
        return CheckResult::pass(CheckKind::ApiContract, format!("API {} OK", endpoint));
    };

    match items(&body, key) {
        Some(records) => {
            debug!(endpoint, records = records.len(), "API contract satisfied");
            CheckResult::pass(CheckKind::ApiContract, format!("API {} OK", endpoint))
                .with_detail(CheckDetail::Counts(vec![(key.to_string(), records.len())]))
        }
        None => CheckResult::fail(
            CheckKind::ApiContract,
            Severity::High,
            format!("API {} response has no '{}' array", endpoint, key),
        )
        .with_detail(CheckDetail::Message(snippet(&body.to_string()))),
    }
}

pub(super) async fn detail_fields(ctx: &CheckContext<'_>, spec: &DetailFieldsSpec) -> CheckResult {
    let defect = spec.defect.as_deref();
    let kind = CheckKind::DetailFields;

    let list = match fetch_json(ctx, &spec.list_endpoint).await {
        Ok(list) => list,
        Err(detail) => {
            return CheckResult::warn(
                kind,
                Severity::Medium,
                "Cannot exercise detail view: list API failed",
            )
            .with_detail(detail)
            .tagged(defect);
        }
    };

    let Some(first) = items(&list, &spec.collection).and_then(|records| records.first()) else {
        return CheckResult::warn(kind, Severity::Low, "No records to exercise the detail view")
            .tagged(defect);
    };

    let Some(id) = first.get(&spec.id_field).and_then(id_string) else {
        return CheckResult::warn(
            kind,
            Severity::Medium,
            format!("First record has no '{}'", spec.id_field),
        )
        .tagged(defect);
    };

    let endpoint = spec.detail_endpoint.replace("{id}", &id);
    let record = match fetch_json(ctx, &endpoint).await {
        Ok(record) => record,
        Err(detail) => {
            let description = format!("Detail API {} failed", endpoint);
            return CheckResult::fail(kind, Severity::High, description)
                .with_detail(detail)
                .tagged(defect);
        }
    };

    let missing: Vec<String> = spec
        .required
        .iter()
        .filter(|field| is_blank(record.get(field.as_str())))
        .cloned()
        .collect();

    if missing.is_empty() {
        CheckResult::pass(kind, format!("Detail for {} has all required fields", id)).tagged(defect)
    } else {
        CheckResult::fail(kind, Severity::High, format!("Detail for {} is missing fields", id))
            .with_detail(CheckDetail::MissingFields(missing))
            .tagged(defect)
    }
}

pub(super) async fn record_fields(
    ctx: &CheckContext<'_>,
    endpoint: &str,
    collection: &str,
    fields: &[FieldRule],
    defect: Option<&str>,
) -> RegressResult<CheckResult> {
    let kind = CheckKind::RecordFields;

    let list = match fetch_json(ctx, endpoint).await {
        Ok(list) => list,
        Err(detail) => {
            let description = format!("Cannot read records from {}", endpoint);
            return Ok(CheckResult::warn(kind, Severity::Medium, description)
                .with_detail(detail)
                .tagged(defect));
        }
    };

    let Some(record) = items(&list, collection).and_then(|records| records.first()) else {
        let description = format!("No records at {}; field checks skipped", endpoint);
        return Ok(CheckResult::warn(kind, Severity::Low, description).tagged(defect));
    };

    let mut missing = Vec::new();
    let mut malformed = Vec::new();

    for rule in fields {
        let value = record.get(&rule.name);
        let absent = match rule.presence {
            Presence::Present => value.is_none(),
            Presence::NonEmpty => is_blank(value),
        };
        if absent {
            missing.push(rule.name.clone());
            continue;
        }

        if let (Some(pattern), Some(Value::String(text))) = (&rule.reject_pattern, value) {
            let re = Regex::new(pattern).map_err(|e| RegressError::Config(e.to_string()))?;
            if re.is_match(text) {
                malformed.push(format!("{}=\"{}\"", rule.name, text));
            }
        }
    }

    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    let result = if !missing.is_empty() {
        CheckResult::fail(kind, Severity::High, format!("Records at {} lack fields", endpoint))
            .with_detail(CheckDetail::MissingFields(missing))
    } else if !malformed.is_empty() {
        let description = format!("Unexpected field format at {}", endpoint);
        CheckResult::fail(kind, Severity::Medium, description)
            .with_detail(CheckDetail::Message(malformed.join(", ")))
    } else {
        CheckResult::pass(kind, format!("Records carry {}", names.join(", ")))
    };

    Ok(result.tagged(defect))
}

pub(super) async fn server_error_guard(ctx: &CheckContext<'_>, urls: &[String]) -> CheckResult {
    let mut offenders = Vec::new();

    for url in urls {
        match ctx.get(url).await {
            Ok(resp) if resp.status >= 500 => {
                offenders.push(format!("{} -> HTTP {}", url, resp.status))
            }
            Ok(_) => {}
            Err(e) => offenders.push(format!("{} -> {}", url, e)),
        }
    }

    if offenders.is_empty() {
        CheckResult::pass(
            CheckKind::ServerErrorGuard,
            format!("{} edge-case request(s) answered without server errors", urls.len()),
        )
    } else {
        CheckResult::fail(
            CheckKind::ServerErrorGuard,
            Severity::High,
            format!("{} of {} edge-case request(s) failed", offenders.len(), urls.len()),
        )
        .with_detail(CheckDetail::Message(offenders.join("; ")))
    }
}
