//! Runtime error telemetry captured from the browser session

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::{PageDriver, RawSignal, SignalKind, SignalObserver};

/// One runtime signal, stamped when the collector received it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub kind: SignalKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Accumulates console errors, uncaught page errors and failed requests
///
/// The buffer is shared with the observers registered on the driver, so
/// events land in it as they are emitted. [`drain`](Self::drain) hands each
/// event out exactly once.
#[derive(Clone, Default)]
pub struct TelemetryCollector {
    buffer: Arc<Mutex<Vec<TelemetryEvent>>>,
    ignore_console: Arc<Vec<String>>,
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Console messages containing any of `patterns` are not recorded.
    pub fn with_ignored_console(patterns: Vec<String>) -> Self {
        Self {
            buffer: Arc::default(),
            ignore_console: Arc::new(patterns),
        }
    }

    /// Register one observer per signal kind on the driver.
    pub fn attach(&self, driver: &dyn PageDriver) {
        for kind in [
            SignalKind::ConsoleError,
            SignalKind::PageError,
            SignalKind::RequestFailed,
        ] {
            driver.subscribe(kind, self.observer());
        }
        debug!("Telemetry collector attached");
    }

    fn observer(&self) -> SignalObserver {
        let collector = self.clone();
        Arc::new(move |signal: RawSignal| collector.record(signal))
    }

    /// Append a signal to the buffer.
    pub fn record(&self, signal: RawSignal) {
        if signal.kind == SignalKind::ConsoleError
            && self
                .ignore_console
                .iter()
                .any(|p| signal.message.contains(p.as_str()))
        {
            return;
        }

        self.buffer.lock().push(TelemetryEvent {
            kind: signal.kind,
            message: signal.message,
            url: signal.url,
            timestamp: Utc::now(),
        });
    }

    /// Take every buffered event, leaving the buffer empty.
    pub fn drain(&self) -> Vec<TelemetryEvent> {
        std::mem::take(&mut *self.buffer.lock())
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }
}
