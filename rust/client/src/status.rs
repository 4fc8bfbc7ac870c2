use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

use crate::session::{SdkPhase, SdkState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub kind: StatusKind,
    pub message: String,
}

impl StatusLine {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Error,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == StatusKind::Error
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub fn session_banner<S>(connected: bool, state: &SdkState<S>) -> StatusLine {
    if !connected {
        return StatusLine::info("Please connect your wallet.");
    }
    match state.phase() {
        SdkPhase::Initializing => StatusLine::info("Initializing Ambient SDK..."),
        SdkPhase::Error => StatusLine::error(format!(
            "SDK Initialization Error: {}",
            state.error().unwrap_or("unknown error")
        )),
        SdkPhase::Ready => StatusLine::success("Ambient SDK ready. Approve tokens below if needed."),
        SdkPhase::Disconnected => StatusLine::info("Waiting for SDK components..."),
    }
}

#[derive(Debug)]
pub struct ActionState {
    busy: AtomicBool,
    status: watch::Sender<StatusLine>,
}

impl Default for ActionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionState {
    pub fn new() -> Self {
        let (status, _) = watch::channel(StatusLine::info("Connect wallet and select the configured network."));
        Self {
            busy: AtomicBool::new(false),
            status,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn status(&self) -> StatusLine {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusLine> {
        self.status.subscribe()
    }

    pub fn set_status(&self, line: StatusLine) {
        self.status.send_replace(line);
    }

    /// `None` while another action holds the state. The loading flag is
    /// cleared when the guard drops, whatever the exit path.
    pub fn begin(&self) -> Option<ActionGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ActionGuard { state: self })
    }
}

pub struct ActionGuard<'a> {
    state: &'a ActionState,
}

impl ActionGuard<'_> {
    pub fn report(&self, line: StatusLine) {
        self.state.set_status(line);
    }
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        self.state.busy.store(false, Ordering::Release);
    }
}
