//! Scripted in-memory page driver for harness tests

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use biodata_regress::driver::{
    ApiRequest, ApiResponse, HttpMethod, NavigationResponse, PageDriver, RawSignal, SignalKind,
    SignalObserver, WaitPolicy,
};
use biodata_regress::{RegressError, RegressResult};

pub const BASE_URL: &str = "http://stub.local";

type Handler = Arc<dyn Fn(&Value) -> (u16, Value) + Send + Sync>;

/// A page as the stub renders it
#[derive(Debug, Clone, Default)]
pub struct StubPage {
    pub status: u16,
    pub counts: HashMap<String, usize>,
    pub hidden: HashSet<String>,
    pub text: HashMap<String, String>,
    pub html: String,
    /// Clicking the key makes the value selector appear
    pub reveals: HashMap<String, String>,
    /// Emitted while the page loads
    pub on_load: Vec<(SignalKind, String)>,
    /// Selectors whose count query fails
    pub faulty: HashSet<String>,
}

impl StubPage {
    pub fn ok() -> Self {
        Self {
            status: 200,
            ..Default::default()
        }
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn element(mut self, selector: &str, count: usize) -> Self {
        self.counts.insert(selector.to_string(), count);
        self
    }

    pub fn hidden(mut self, selector: &str) -> Self {
        self.counts.entry(selector.to_string()).or_insert(1);
        self.hidden.insert(selector.to_string());
        self
    }

    pub fn text(mut self, selector: &str, text: &str) -> Self {
        self.text.insert(selector.to_string(), text.to_string());
        self
    }

    pub fn html(mut self, html: &str) -> Self {
        self.html = html.to_string();
        self
    }

    pub fn reveals(mut self, trigger: &str, target: &str) -> Self {
        self.reveals.insert(trigger.to_string(), target.to_string());
        self
    }

    pub fn emits(mut self, kind: SignalKind, message: &str) -> Self {
        self.on_load.push((kind, message.to_string()));
        self
    }

    pub fn faulty(mut self, selector: &str) -> Self {
        self.faulty.insert(selector.to_string());
        self
    }
}

#[derive(Default)]
struct StubState {
    pages: HashMap<String, StubPage>,
    unreachable: HashSet<String>,
    current: Option<StubPage>,
    get: HashMap<String, Handler>,
    post: HashMap<String, Handler>,
    observers: HashMap<SignalKind, Vec<SignalObserver>>,
    requests: Vec<(HttpMethod, String, Option<Value>)>,
    post_responses: Vec<Value>,
    navigations: Vec<String>,
    closed: bool,
}

/// Cheap to clone; clones share state so tests can inspect after a run.
#[derive(Clone, Default)]
pub struct StubDriver {
    state: Arc<Mutex<StubState>>,
}

impl StubDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, path: &str, page: StubPage) -> Self {
        self.state.lock().pages.insert(path.to_string(), page);
        self
    }

    pub fn unreachable(self, path: &str) -> Self {
        self.state.lock().unreachable.insert(path.to_string());
        self
    }

    /// Constant GET response
    pub fn get(self, endpoint: &str, status: u16, body: Value) -> Self {
        let handler: Handler = Arc::new(move |_| (status, body.clone()));
        self.state.lock().get.insert(format!("{}{}", BASE_URL, endpoint), handler);
        self
    }

    pub fn post<F>(self, endpoint: &str, handler: F) -> Self
    where
        F: Fn(&Value) -> (u16, Value) + Send + Sync + 'static,
    {
        self.state
            .lock()
            .post
            .insert(format!("{}{}", BASE_URL, endpoint), Arc::new(handler));
        self
    }

    /// Emit a signal right now, outside any navigation
    pub fn emit(&self, kind: SignalKind, message: &str) {
        let observers = self.state.lock().observers.get(&kind).cloned().unwrap_or_default();
        for observer in observers {
            observer(RawSignal {
                kind,
                message: message.to_string(),
                url: None,
            });
        }
    }

    pub fn posts(&self) -> Vec<Value> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|(m, _, _)| *m == HttpMethod::Post)
            .filter_map(|(_, _, body)| body.clone())
            .collect()
    }

    /// Bodies returned for POST requests, in order
    pub fn post_responses(&self) -> Vec<Value> {
        self.state.lock().post_responses.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn current_count(&self, selector: &str) -> RegressResult<usize> {
        let state = self.state.lock();
        let Some(page) = &state.current else {
            return Ok(0);
        };
        if page.faulty.contains(selector) {
            return Err(RegressError::Protocol(format!("count on {} failed", selector)));
        }
        Ok(page.counts.get(selector).copied().unwrap_or(0))
    }
}

/// Duplicate-aware write endpoint keyed on `identity` fields
pub fn duplicate_aware(
    identity: &'static [&'static str],
) -> impl Fn(&Value) -> (u16, Value) + Send + Sync {
    let seen: Mutex<HashSet<String>> = Mutex::default();
    move |body: &Value| {
        let key: Vec<String> = identity.iter().map(|f| body[*f].to_string()).collect();
        if seen.lock().insert(key.join("|")) {
            (200, json!({ "success": true }))
        } else {
            (200, json!({ "success": true, "is_duplicate": true }))
        }
    }
}

/// Write endpoint that flags every submission, new or not
pub fn flags_everything() -> impl Fn(&Value) -> (u16, Value) + Send + Sync {
    |_: &Value| (200, json!({ "success": false, "is_duplicate": true }))
}

/// Write endpoint that accepts everything and never flags duplicates
pub fn accepts_everything() -> impl Fn(&Value) -> (u16, Value) + Send + Sync {
    |_: &Value| (200, json!({ "success": true }))
}

#[async_trait]
impl PageDriver for StubDriver {
    async fn goto(
        &self,
        url: &str,
        _wait: WaitPolicy,
        _timeout: Duration,
    ) -> RegressResult<NavigationResponse> {
        let path = url.strip_prefix(BASE_URL).unwrap_or(url).to_string();

        let signals = {
            let mut state = self.state.lock();
            state.navigations.push(path.clone());
            if state.unreachable.contains(&path) {
                let message = format!("net::ERR_CONNECTION_REFUSED at {}", url);
                return Err(RegressError::Transport(message));
            }
            let page = state
                .pages
                .get(&path)
                .cloned()
                .unwrap_or_else(|| StubPage::with_status(404));
            let signals = page.on_load.clone();
            state.current = Some(page);
            signals
        };

        for (kind, message) in &signals {
            self.emit(*kind, message);
        }

        let status = self.state.lock().current.as_ref().map(|p| p.status);
        Ok(NavigationResponse { status })
    }

    async fn wait_for(&self, selector: &str, _timeout: Duration) -> RegressResult<bool> {
        Ok(self.current_count(selector)? > 0)
    }

    async fn count(&self, selector: &str) -> RegressResult<usize> {
        self.current_count(selector)
    }

    async fn is_visible(&self, selector: &str) -> RegressResult<bool> {
        let visible = self.current_count(selector)? > 0;
        let state = self.state.lock();
        let hidden = state
            .current
            .as_ref()
            .map(|p| p.hidden.contains(selector))
            .unwrap_or(false);
        Ok(visible && !hidden)
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> RegressResult<()> {
        if self.current_count(selector)? == 0 {
            return Err(RegressError::Timeout(format!("click {}", selector)));
        }
        let mut state = self.state.lock();
        if let Some(page) = state.current.as_mut() {
            if let Some(target) = page.reveals.get(selector).cloned() {
                page.counts.insert(target, 1);
            }
        }
        Ok(())
    }

    async fn inner_text(&self, selector: &str) -> RegressResult<String> {
        let state = self.state.lock();
        Ok(state
            .current
            .as_ref()
            .and_then(|p| p.text.get(selector).cloned())
            .unwrap_or_default())
    }

    async fn content(&self) -> RegressResult<String> {
        let state = self.state.lock();
        Ok(state.current.as_ref().map(|p| p.html.clone()).unwrap_or_default())
    }

    async fn request(&self, request: ApiRequest) -> RegressResult<ApiResponse> {
        let handler = {
            let mut state = self.state.lock();
            state
                .requests
                .push((request.method, request.url.clone(), request.body.clone()));
            match request.method {
                HttpMethod::Get => state.get.get(&request.url).cloned(),
                HttpMethod::Post => state.post.get(&request.url).cloned(),
            }
        };

        let Some(handler) = handler else {
            return Ok(ApiResponse {
                status: 404,
                body: json!({ "error": "not found" }).to_string(),
            });
        };

        let (status, body) = handler(request.body.as_ref().unwrap_or(&Value::Null));
        if request.method == HttpMethod::Post {
            self.state.lock().post_responses.push(body.clone());
        }
        Ok(ApiResponse {
            status,
            body: body.to_string(),
        })
    }

    fn subscribe(&self, kind: SignalKind, observer: SignalObserver) {
        self.state.lock().observers.entry(kind).or_default().push(observer);
    }

    async fn close(&self) -> RegressResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}
