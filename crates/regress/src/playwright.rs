//! Playwright-backed page driver
//!
//! A Node.js bridge script drives one Chromium/Firefox/WebKit page. The Rust
//! side talks to it over stdin/stdout with newline-delimited JSON:
//!
//! ```text
//! Rust ──► {"id":3,"op":"count","selector":"#filter-raw_type option"}
//! Rust ◄── {"id":3,"ok":true,"value":4}
//! Rust ◄── {"event":"console_error","message":"...","url":"..."}   (unsolicited)
//! ```
//!
//! Direct API requests bypass the bridge and go through `reqwest`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as TokioCommand};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::driver::{
    ApiRequest, ApiResponse, HttpMethod, NavigationResponse, PageDriver, RawSignal, SignalKind,
    SignalObserver, WaitPolicy,
};
use crate::error::{RegressError, RegressResult};

/// Time allowed on top of an operation's own timeout for the bridge to answer
const REPLY_GRACE: Duration = Duration::from_secs(5);

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const { chromium, firefox, webkit } = require('playwright');

const emit = (obj) => process.stdout.write(JSON.stringify(obj) + '\n');

const classify = (e) => {
  if (e && e.name === 'TimeoutError') return 'timeout';
  if (e && /net::ERR_/.test(e.message || '')) return 'transport';
  return 'other';
};

(async () => {
  const browser = await __BROWSER__.launch({
    headless: __HEADLESS__,
    args: ['--no-sandbox', '--disable-setuid-sandbox']
  });
  const context = await browser.newContext({
    viewport: { width: __WIDTH__, height: __HEIGHT__ },
    ignoreHTTPSErrors: true
  });
  const page = await context.newPage();

  page.on('console', msg => {
    if (msg.type() === 'error') {
      emit({ event: 'console_error', message: msg.text(), url: msg.location().url || null });
    }
  });
  page.on('pageerror', err => emit({ event: 'page_error', message: err.message }));
  page.on('requestfailed', req => emit({
    event: 'request_failed',
    message: (req.failure() || {}).errorText || 'request failed',
    url: req.url()
  }));

  const handle = async (cmd) => {
    switch (cmd.op) {
      case 'goto': {
        const resp = await page.goto(cmd.url, { waitUntil: cmd.wait, timeout: cmd.timeout });
        return { status: resp ? resp.status() : null };
      }
      case 'wait_for':
        try {
          await page.locator(cmd.selector).first()
            .waitFor({ state: 'attached', timeout: cmd.timeout });
          return true;
        } catch (e) {
          if (classify(e) === 'timeout') return false;
          throw e;
        }
      case 'count':
        return await page.locator(cmd.selector).count();
      case 'is_visible':
        return await page.locator(cmd.selector).first().isVisible();
      case 'click':
        await page.locator(cmd.selector).first().click({ timeout: cmd.timeout });
        return null;
      case 'inner_text':
        return await page.locator(cmd.selector).first().innerText({ timeout: cmd.timeout });
      case 'content':
        return await page.content();
      case 'close':
        return null;
      default:
        throw new Error('unknown op: ' + cmd.op);
    }
  };

  emit({ ready: true });

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    let cmd;
    try {
      cmd = JSON.parse(line);
    } catch (e) {
      continue;
    }
    try {
      emit({ id: cmd.id, ok: true, value: await handle(cmd) });
    } catch (e) {
      emit({ id: cmd.id, ok: false, error: e.message, error_kind: classify(e) });
    }
    if (cmd.op === 'close') break;
  }
  await browser.close();
})().catch(e => {
  emit({ fatal: e.message });
  process.exit(1);
});
"#;

#[derive(Debug, Clone, Copy, Default)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = RegressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(RegressError::Config(format!("unknown browser '{}'", other))),
        }
    }
}

/// Configuration for the Playwright bridge
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Node.js executable
    pub node: PathBuf,
    /// `node_modules` directory containing `playwright`; passed as `NODE_PATH`
    pub node_path: Option<PathBuf>,
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Bound for browser launch
    pub launch_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node: PathBuf::from("node"),
            node_path: None,
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            launch_timeout: Duration::from_secs(30),
        }
    }
}

impl PlaywrightConfig {
    /// Bridge source with this configuration filled in
    pub fn render_script(&self) -> String {
        BRIDGE_SCRIPT
            .replace("__BROWSER__", self.browser.as_str())
            .replace("__HEADLESS__", if self.headless { "true" } else { "false" })
            .replace("__WIDTH__", &self.viewport_width.to_string())
            .replace("__HEIGHT__", &self.viewport_height.to_string())
    }
}

/// One line written by the bridge
#[derive(Debug, Default, Deserialize)]
struct BridgeLine {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_kind: Option<String>,
    #[serde(default)]
    event: Option<SignalKind>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    fatal: Option<String>,
}

impl BridgeLine {
    fn into_result(self) -> RegressResult<Value> {
        if self.ok {
            return Ok(self.value);
        }
        let message = self.error.unwrap_or_else(|| "unknown bridge error".to_string());
        Err(match self.error_kind.as_deref() {
            Some("timeout") => RegressError::Timeout(message),
            Some("transport") => RegressError::Transport(message),
            _ => RegressError::Bridge(message),
        })
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeLine>>>>;
type Observers = Arc<Mutex<HashMap<SignalKind, Vec<SignalObserver>>>>;

/// Page driver backed by a Playwright bridge process
pub struct PlaywrightDriver {
    stdin: AsyncMutex<ChildStdin>,
    child: AsyncMutex<Child>,
    pending: Pending,
    observers: Observers,
    next_id: AtomicU64,
    http: reqwest::Client,
    // Keeps the staged bridge script alive for the life of the process
    _script_dir: tempfile::TempDir,
}

impl PlaywrightDriver {
    /// Spawn the bridge and wait until the browser page is ready.
    pub async fn launch(config: PlaywrightConfig) -> RegressResult<Self> {
        Self::check_node_installed(&config)?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, config.render_script())?;

        debug!("Launching Playwright bridge: {}", script_path.display());

        let mut cmd = TokioCommand::new(&config.node);
        cmd.arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = &config.node_path {
            cmd.env("NODE_PATH", node_path);
        }

        let mut child = cmd.spawn().map_err(|e| {
            RegressError::Bridge(format!("failed to spawn {}: {}", config.node.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RegressError::Bridge("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RegressError::Bridge("bridge stdout unavailable".into()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "playwright", "{}", line);
                }
            });
        }

        let pending: Pending = Arc::default();
        let observers: Observers = Arc::default();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(read_bridge(stdout, pending.clone(), observers.clone(), ready_tx));

        match tokio::time::timeout(config.launch_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(fatal))) => return Err(RegressError::Bridge(fatal)),
            Ok(Err(_)) => {
                return Err(RegressError::Bridge("bridge exited before it was ready".into()))
            }
            Err(_) => return Err(RegressError::Timeout("browser launch".into())),
        }

        info!("Playwright {} session ready", config.browser.as_str());

        let http = reqwest::Client::builder().danger_accept_invalid_certs(true).build()?;

        Ok(Self {
            stdin: AsyncMutex::new(stdin),
            child: AsyncMutex::new(child),
            pending,
            observers,
            next_id: AtomicU64::new(1),
            http,
            _script_dir: script_dir,
        })
    }

    fn check_node_installed(config: &PlaywrightConfig) -> RegressResult<()> {
        let status = Command::new(&config.node)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(RegressError::BridgeNotFound),
        }
    }

    /// Send one command and wait for its reply.
    async fn call(&self, mut command: Value, timeout: Duration) -> RegressResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        command["id"] = json!(id);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let mut line = serde_json::to_string(&command)?;
        line.push('\n');
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().remove(&id);
                return Err(RegressError::Bridge(format!("bridge write failed: {}", e)));
            }
            stdin.flush().await?;
        }

        match tokio::time::timeout(timeout + REPLY_GRACE, rx).await {
            Ok(Ok(reply)) => reply.into_result(),
            Ok(Err(_)) => Err(RegressError::Bridge("bridge exited".into())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(RegressError::Timeout(format!(
                    "bridge reply to {}",
                    command["op"].as_str().unwrap_or("command")
                )))
            }
        }
    }
}

/// Route bridge output: replies to waiting callers, events to observers.
async fn read_bridge(
    stdout: tokio::process::ChildStdout,
    pending: Pending,
    observers: Observers,
    ready_tx: oneshot::Sender<Result<(), String>>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut lines = BufReader::new(stdout).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let parsed: BridgeLine = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(_) => {
                debug!(target: "playwright", "{}", line);
                continue;
            }
        };

        if let Some(fatal) = parsed.fatal {
            warn!("Playwright bridge failed: {}", fatal);
            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(Err(fatal));
            }
            break;
        }

        if parsed.ready {
            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(Ok(()));
            }
            continue;
        }

        if let Some(kind) = parsed.event {
            let signal = RawSignal {
                kind,
                message: parsed.message.unwrap_or_default(),
                url: parsed.url,
            };
            let targets = observers.lock().get(&kind).cloned().unwrap_or_default();
            for observer in targets {
                observer(signal.clone());
            }
            continue;
        }

        if let Some(id) = parsed.id {
            if let Some(tx) = pending.lock().remove(&id) {
                let _ = tx.send(parsed);
            }
        }
    }

    // Dropping the senders wakes every waiting caller with an error
    pending.lock().clear();
}

#[async_trait]
impl PageDriver for PlaywrightDriver {
    async fn goto(
        &self,
        url: &str,
        wait: WaitPolicy,
        timeout: Duration,
    ) -> RegressResult<NavigationResponse> {
        let command = json!({
            "op": "goto",
            "url": url,
            "wait": wait.as_str(),
            "timeout": timeout.as_millis() as u64,
        });
        let value = self.call(command, timeout).await?;

        let status = value
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok());
        Ok(NavigationResponse { status })
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> RegressResult<bool> {
        let command = json!({
            "op": "wait_for",
            "selector": selector,
            "timeout": timeout.as_millis() as u64,
        });
        let value = self.call(command, timeout).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn count(&self, selector: &str) -> RegressResult<usize> {
        let value = self
            .call(json!({ "op": "count", "selector": selector }), Duration::ZERO)
            .await?;
        value
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| RegressError::Protocol(format!("count returned {}", value)))
    }

    async fn is_visible(&self, selector: &str) -> RegressResult<bool> {
        let value = self
            .call(json!({ "op": "is_visible", "selector": selector }), Duration::ZERO)
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click(&self, selector: &str, timeout: Duration) -> RegressResult<()> {
        self.call(
            json!({ "op": "click", "selector": selector, "timeout": timeout.as_millis() as u64 }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn inner_text(&self, selector: &str) -> RegressResult<String> {
        let timeout = Duration::from_secs(5);
        let command = json!({
            "op": "inner_text",
            "selector": selector,
            "timeout": timeout.as_millis() as u64,
        });
        let value = self.call(command, timeout).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn content(&self) -> RegressResult<String> {
        let value = self.call(json!({ "op": "content" }), Duration::ZERO).await?;
        value
            .as_str()
            .map(String::from)
            .ok_or_else(|| RegressError::Protocol("content returned a non-string".into()))
    }

    async fn request(&self, request: ApiRequest) -> RegressResult<ApiResponse> {
        let builder = match request.method {
            HttpMethod::Get => self.http.get(&request.url),
            HttpMethod::Post => self.http.post(&request.url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let resp = builder.send().await.map_err(|e| {
            if e.is_connect() {
                RegressError::Transport(e.to_string())
            } else if e.is_timeout() {
                RegressError::Timeout(request.url.clone())
            } else {
                RegressError::Http(e)
            }
        })?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(ApiResponse { status, body })
    }

    fn subscribe(&self, kind: SignalKind, observer: SignalObserver) {
        self.observers.lock().entry(kind).or_default().push(observer);
    }

    async fn close(&self) -> RegressResult<()> {
        if let Err(e) = self.call(json!({ "op": "close" }), Duration::from_secs(5)).await {
            debug!("Bridge close command failed: {}", e);
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(status) => {
                debug!("Playwright bridge exited: {:?}", status?);
            }
            Err(_) => {
                warn!("Playwright bridge did not exit, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_script_substitutes_config() {
        let config = PlaywrightConfig {
            browser: Browser::Firefox,
            headless: false,
            viewport_width: 1280,
            viewport_height: 720,
            ..Default::default()
        };
        let script = config.render_script();
        assert!(script.contains("await firefox.launch"));
        assert!(script.contains("headless: false"));
        assert!(script.contains("width: 1280, height: 720"));
        assert!(!script.contains("__"));
    }

    #[test]
    fn test_reply_error_kinds() {
        let line: BridgeLine = serde_json::from_value(json!({
            "id": 1,
            "ok": false,
            "error": "page.goto: net::ERR_CONNECTION_REFUSED",
            "error_kind": "transport",
        }))
        .unwrap();
        assert!(matches!(line.into_result(), Err(RegressError::Transport(_))));

        let line: BridgeLine = serde_json::from_value(json!({
            "id": 2,
            "ok": false,
            "error": "Timeout 30000ms exceeded",
            "error_kind": "timeout",
        }))
        .unwrap();
        assert!(matches!(line.into_result(), Err(RegressError::Timeout(_))));

        let line: BridgeLine =
            serde_json::from_str(r#"{"id":3,"ok":true,"value":{"status":200}}"#).unwrap();
        assert_eq!(line.into_result().unwrap()["status"], 200);
    }

    #[test]
    fn test_event_line_parses() {
        let line: BridgeLine = serde_json::from_value(json!({
            "event": "request_failed",
            "message": "net::ERR_ABORTED",
            "url": "http://localhost/api/x",
        }))
        .unwrap();
        assert_eq!(line.event, Some(SignalKind::RequestFailed));
        assert_eq!(line.url.as_deref(), Some("http://localhost/api/x"));
        assert!(line.id.is_none());
    }

    #[test]
    fn test_browser_from_str() {
        assert!(matches!("webkit".parse::<Browser>(), Ok(Browser::Webkit)));
        assert!("opera".parse::<Browser>().is_err());
    }
}
