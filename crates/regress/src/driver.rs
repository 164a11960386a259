//! The page driver capability consumed by the harness
//!
//! The harness never talks to a browser directly. Everything it needs from a
//! browser session (navigation, DOM queries, direct API requests, runtime
//! signal subscriptions) goes through [`PageDriver`]. The Playwright bridge in
//! [`crate::playwright`] is one implementation; tests use a scripted stub.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RegressError, RegressResult};

/// Load state to wait for after a navigation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitPolicy {
    Load,
    DomContentLoaded,
    #[default]
    NetworkIdle,
}

impl WaitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitPolicy::Load => "load",
            WaitPolicy::DomContentLoaded => "domcontentloaded",
            WaitPolicy::NetworkIdle => "networkidle",
        }
    }
}

/// What the driver observed for the main document of a navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationResponse {
    /// HTTP status of the document, `None` if no response was produced
    pub status: Option<u16>,
}

/// Runtime signal families a driver can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    ConsoleError,
    PageError,
    RequestFailed,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::ConsoleError => write!(f, "console_error"),
            SignalKind::PageError => write!(f, "page_error"),
            SignalKind::RequestFailed => write!(f, "request_failed"),
        }
    }
}

/// A signal as emitted by the driver, before the collector stamps it
#[derive(Debug, Clone)]
pub struct RawSignal {
    pub kind: SignalKind,
    pub message: String,
    pub url: Option<String>,
}

/// Callback invoked by the driver for every signal of a subscribed kind
pub type SignalObserver = Arc<dyn Fn(RawSignal) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

/// A direct request against the application API
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            body: Some(body),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    /// 2xx status
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> RegressResult<serde_json::Value> {
        serde_json::from_str(&self.body).map_err(RegressError::from)
    }
}

/// Browser session capability
///
/// Waiting operations take an explicit timeout; implementations must return
/// (with `Ok(false)` or [`RegressError::Timeout`]) once it elapses.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate the page and wait for `wait`.
    ///
    /// Hard transport failures are reported as [`RegressError::Transport`],
    /// an elapsed timeout as [`RegressError::Timeout`].
    async fn goto(
        &self,
        url: &str,
        wait: WaitPolicy,
        timeout: Duration,
    ) -> RegressResult<NavigationResponse>;

    /// Wait until at least one element matches `selector`. `Ok(false)` on timeout.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> RegressResult<bool>;

    async fn count(&self, selector: &str) -> RegressResult<usize>;

    /// Visibility of the first element matching `selector`
    async fn is_visible(&self, selector: &str) -> RegressResult<bool>;

    /// Click the first element matching `selector`
    async fn click(&self, selector: &str, timeout: Duration) -> RegressResult<()>;

    async fn inner_text(&self, selector: &str) -> RegressResult<String>;

    /// Rendered markup of the whole page
    async fn content(&self) -> RegressResult<String>;

    async fn request(&self, request: ApiRequest) -> RegressResult<ApiResponse>;

    /// Register an observer for one signal kind, for the rest of the session.
    fn subscribe(&self, kind: SignalKind, observer: SignalObserver);

    async fn close(&self) -> RegressResult<()>;
}
