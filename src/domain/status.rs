use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

const INITIAL_MESSAGE: &str = "Ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusCode {
    Ready,
    ValidationError,
    Error,
    LoadingData,
    ProcessingData,
    Processed,
}

impl StatusCode {
    pub const ALL: [StatusCode; 6] = [
        StatusCode::Ready,
        StatusCode::ValidationError,
        StatusCode::Error,
        StatusCode::LoadingData,
        StatusCode::ProcessingData,
        StatusCode::Processed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::ValidationError => "validationError",
            Self::Error => "error",
            Self::LoadingData => "loadingData",
            Self::ProcessingData => "processingData",
            Self::Processed => "processed",
        }
    }

    pub fn is_busy(self) -> bool {
        matches!(self, Self::LoadingData | Self::ProcessingData)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionViolation {
    pub from: StatusCode,
    pub to: StatusCode,
}

impl fmt::Display for TransitionViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal status transition {} -> {}", self.from, self.to)
    }
}

/// Returns the violation when `to` may not follow `from`. `error` is reachable from anywhere.
pub fn check_transition(from: StatusCode, to: StatusCode) -> Option<TransitionViolation> {
    use StatusCode::*;

    let illegal = match to {
        Ready | ValidationError => matches!(from, LoadingData | ProcessingData),
        LoadingData => matches!(from, ValidationError | ProcessingData),
        ProcessingData => from != LoadingData,
        Processed => from != ProcessingData,
        Error => false,
    };
    illegal.then_some(TransitionViolation { from, to })
}

#[async_trait]
pub trait StatusListener: Send + Sync {
    async fn on_status(&self, code: StatusCode, message: String);
}

pub type CheckFailureListener = Arc<dyn Fn(TransitionViolation) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub code: StatusCode,
    pub message: String,
}

/// Forwards every status change into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelStatusListener {
    sender: UnboundedSender<StatusUpdate>,
}

impl ChannelStatusListener {
    pub fn new(sender: UnboundedSender<StatusUpdate>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl StatusListener for ChannelStatusListener {
    async fn on_status(&self, code: StatusCode, message: String) {
        // The receiver may already be gone when its owner detached.
        let _ = self.sender.send(StatusUpdate { code, message });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

struct StatusInner {
    code: StatusCode,
    message: String,
    listeners: Vec<(ListenerHandle, Arc<dyn StatusListener>)>,
    check_failure_listeners: Vec<(ListenerHandle, CheckFailureListener)>,
}

/// Process-wide status of the aggregation engine.
///
/// `update` always applies the new state. Transition violations are reported to the
/// check-failure listeners first, then every status listener is dispatched as its own
/// task on the current tokio runtime without being awaited, so listener side effects
/// are not ordered relative to later updates.
pub struct StatusMachine {
    inner: Mutex<StatusInner>,
    next_handle: AtomicU64,
}

impl Default for StatusMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatusInner {
                code: StatusCode::Ready,
                message: INITIAL_MESSAGE.to_string(),
                listeners: Vec::new(),
                check_failure_listeners: Vec::new(),
            }),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn code(&self) -> StatusCode {
        self.lock().code
    }

    pub fn message(&self) -> String {
        self.lock().message.clone()
    }

    pub fn snapshot(&self) -> StatusUpdate {
        let inner = self.lock();
        StatusUpdate {
            code: inner.code,
            message: inner.message.clone(),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn StatusListener>) -> ListenerHandle {
        let handle = self.next_handle();
        self.lock().listeners.push((handle, listener));
        handle
    }

    pub fn subscribe_check_failures(&self, listener: CheckFailureListener) -> ListenerHandle {
        let handle = self.next_handle();
        self.lock().check_failure_listeners.push((handle, listener));
        handle
    }

    /// Removes the registration behind `handle`; unknown handles are ignored.
    pub fn unsubscribe(&self, handle: ListenerHandle) {
        let mut inner = self.lock();
        inner.listeners.retain(|(candidate, _)| *candidate != handle);
        inner
            .check_failure_listeners
            .retain(|(candidate, _)| *candidate != handle);
    }

    pub fn update(&self, code: StatusCode, message: impl Into<String>) -> Option<TransitionViolation> {
        let message = message.into();

        let (previous, check_failure_listeners, listeners) = {
            let mut inner = self.lock();
            let previous = inner.code;
            inner.code = code;
            inner.message.clone_from(&message);
            let check_failure_listeners = inner
                .check_failure_listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect::<Vec<_>>();
            let listeners = inner
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect::<Vec<_>>();
            (previous, check_failure_listeners, listeners)
        };

        let violation = check_transition(previous, code);
        if let Some(violation) = violation {
            for listener in &check_failure_listeners {
                listener(violation);
            }
        }

        tracing::debug!(status = %code, %message, listeners = listeners.len(), "status updated");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                for listener in listeners {
                    let message = message.clone();
                    runtime.spawn(async move {
                        listener.on_status(code, message).await;
                    });
                }
            }
            Err(_) if listeners.is_empty() => {}
            Err(error) => {
                tracing::warn!(%error, "status listeners skipped outside of a tokio runtime");
            }
        }

        violation
    }

    fn next_handle(&self) -> ListenerHandle {
        ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn lock(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
