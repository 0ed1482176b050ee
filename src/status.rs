//! Receiver readiness tracking.
//!
//! The receiver owns its own transmit/convert lifecycle and reports it as a
//! plain-text token. A [`StatusCoordinator`] polls that endpoint on a fixed
//! interval from a background thread and publishes the latest known state as
//! a single replaced snapshot value. Poll failures never propagate: an
//! unrecognized body or a network error downgrades the state to
//! `unreachable` and is logged at warn.
//!
//! The coordinator never touches the conversion path; the controller only
//! reads [`StatusCoordinator::reader`] at the moment it decides whether a
//! transfer may go out.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

/// Default poll cadence. A tunable, not a contract; the reference behavior
/// used roughly one second.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The receiver's reported readiness, plus our own `Unreachable` degradation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverStatus {
    Idle,
    Converting,
    Transmitting,
    /// No poll has succeeded yet, or the last poll failed / was garbage.
    Unreachable,
}

impl ReceiverStatus {
    /// Parse a receiver status token. Anything but the three known tokens is
    /// `None`; the coordinator treats that the same as a failed poll.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "idle" => Some(ReceiverStatus::Idle),
            "converting" => Some(ReceiverStatus::Converting),
            "transmitting" => Some(ReceiverStatus::Transmitting),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReceiverStatus::Idle => "idle",
            ReceiverStatus::Converting => "converting",
            ReceiverStatus::Transmitting => "transmitting",
            ReceiverStatus::Unreachable => "unreachable",
        }
    }
}

/// Latest known receiver state plus when a poll last succeeded.
#[derive(Debug, Clone, Copy)]
pub struct StatusSnapshot {
    pub status: ReceiverStatus,
    pub last_success: Option<SystemTime>,
}

impl StatusSnapshot {
    fn initial() -> Self {
        Self {
            status: ReceiverStatus::Unreachable,
            last_success: None,
        }
    }
}

/// One status query against the receiver. A trait so tests (and alternative
/// transports) can script responses.
pub trait StatusProbe: Send + 'static {
    fn fetch(&mut self) -> Result<String>;
}

/// HTTP probe: GET the receiver's status endpoint, expect a plain token body.
pub struct HttpStatusProbe {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpStatusProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build status poll client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl StatusProbe for HttpStatusProbe {
    fn fetch(&mut self) -> Result<String> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .context("status request failed")?
            .error_for_status()
            .context("status endpoint returned an error")?;
        resp.text().context("status body was not readable")
    }
}

/// Read-only view over the coordinator's snapshot.
///
/// Cheap to clone; hand one to every component that gates on readiness.
#[derive(Clone)]
pub struct StatusReader {
    shared: Arc<Mutex<StatusSnapshot>>,
}

/// Anything that can answer "what is the receiver doing right now".
///
/// The seam exists so the controller can be exercised without a live poll
/// thread.
pub trait ReceiverStatusSource {
    fn latest(&self) -> StatusSnapshot;
}

impl ReceiverStatusSource for StatusReader {
    fn latest(&self) -> StatusSnapshot {
        self.shared
            .lock()
            .map(|s| *s)
            .unwrap_or_else(|_| StatusSnapshot::initial())
    }
}

/// Owns the poll thread. Stops it on [`StatusCoordinator::stop`] or drop.
pub struct StatusCoordinator {
    shared: Arc<Mutex<StatusSnapshot>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StatusCoordinator {
    /// Spawn the poll loop. The first poll happens immediately, then every
    /// `interval`.
    pub fn start(mut probe: impl StatusProbe, interval: Duration) -> Self {
        let shared = Arc::new(Mutex::new(StatusSnapshot::initial()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let loop_shared = Arc::clone(&shared);
        let thread = thread::spawn(move || {
            loop {
                apply_poll(&loop_shared, probe.fetch());

                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    // Explicit stop or coordinator dropped.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("status poll loop stopped");
        });

        Self {
            shared,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    /// Latest known snapshot.
    pub fn latest(&self) -> StatusSnapshot {
        self.reader().latest()
    }

    pub fn reader(&self) -> StatusReader {
        StatusReader {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop the poll thread and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StatusCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fold one poll result into the shared snapshot.
///
/// Success with a known token adopts the receiver's state; everything else
/// (garbage body, transport failure) downgrades to `Unreachable`.
fn apply_poll(shared: &Mutex<StatusSnapshot>, result: Result<String>) {
    let next = match result {
        Ok(body) => match ReceiverStatus::from_token(&body) {
            Some(status) => Some(status),
            None => {
                warn!(body = body.trim(), "receiver returned an unrecognized status token");
                None
            }
        },
        Err(err) => {
            warn!(error = format!("{err:#}"), "receiver status poll failed");
            None
        }
    };

    let Ok(mut snapshot) = shared.lock() else {
        return;
    };
    match next {
        Some(status) => {
            *snapshot = StatusSnapshot {
                status,
                last_success: Some(SystemTime::now()),
            };
        }
        None => {
            // Keep the last success timestamp; only the state degrades.
            snapshot.status = ReceiverStatus::Unreachable;
        }
    }
}
