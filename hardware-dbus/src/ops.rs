//! Asynchronous operation control for setup/teardown/eject
//!
//! Each long-running call follows the same state machine:
//! `Idle -> Requested -> Completed(success | failure)`. The caller registers a
//! one-shot completion subscriber keyed by the target UDI, issues the backend
//! request, then awaits the completion under a configurable timeout. There is
//! no cancellation; a caller that gives up early leaves the backend-side
//! operation to finish on its own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use hardware_types::{ErrorType, Udi};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::warn;

use crate::error::HardwareError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Setup,
    Teardown,
    Eject,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Setup => "setup",
            OperationKind::Teardown => "teardown",
            OperationKind::Eject => "eject",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Requested,
    Succeeded,
    Failed,
}

/// Completion payload reported by a backend: a wire error code (absent on
/// success) plus a human-readable message preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub code: Option<String>,
    pub message: String,
}

impl Completion {
    pub fn success() -> Self {
        Completion {
            code: None,
            message: String::new(),
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Completion {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    fn into_result(self) -> Result<(), HardwareError> {
        match self.code {
            None => Ok(()),
            Some(code) => Err(HardwareError::Operation {
                kind: ErrorType::from_wire_code(&code),
                message: self.message,
            }),
        }
    }
}

/// Caller-facing knobs for the blocking completion wait.
#[derive(Debug, Clone, Copy)]
pub struct OpSettings {
    pub timeout: Duration,
}

impl Default for OpSettings {
    fn default() -> Self {
        // Matches the disk daemon's own method timeout.
        OpSettings {
            timeout: Duration::from_secs(25),
        }
    }
}

/// One in-flight operation. Dropped (and with it the registry slot) once the
/// completion has been observed and reported.
pub struct PendingOperation {
    kind: OperationKind,
    udi: Udi,
    rx: oneshot::Receiver<Completion>,
}

impl PendingOperation {
    pub fn state(&self) -> OperationState {
        OperationState::Requested
    }

    /// Await the backend completion, bounded by the caller's timeout.
    pub async fn wait(self, settings: &OpSettings) -> Result<(), HardwareError> {
        match timeout(settings.timeout, self.rx).await {
            Err(_) => Err(HardwareError::Timeout {
                udi: self.udi,
                operation: self.kind,
            }),
            Ok(Err(_)) => Err(HardwareError::Operation {
                kind: ErrorType::OperationFailed,
                message: format!("{} completion channel closed for {}", self.kind, self.udi),
            }),
            Ok(Ok(completion)) => completion.into_result(),
        }
    }
}

/// UDI-keyed one-shot completion registry.
///
/// Only one outstanding operation per device is meaningful; registering a
/// second one replaces the first and logs the caller error.
#[derive(Default)]
pub struct CompletionHub {
    pending: Mutex<HashMap<Udi, oneshot::Sender<Completion>>>,
}

impl CompletionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition `Idle -> Requested`: register the completion subscriber
    /// before the backend request goes out, so a fast completion cannot race
    /// past it.
    pub fn begin(&self, udi: &Udi, kind: OperationKind) -> PendingOperation {
        let (tx, rx) = oneshot::channel();
        let replaced = self
            .pending
            .lock()
            .expect("completion registry poisoned")
            .insert(udi.clone(), tx);
        if replaced.is_some() {
            warn!(udi = %udi, operation = %kind, "second operation issued before first completed");
        }
        PendingOperation {
            kind,
            udi: udi.clone(),
            rx,
        }
    }

    /// Deliver a backend completion. Returns false when nobody is waiting
    /// (stale or duplicate signal).
    pub fn complete(&self, udi: &Udi, completion: Completion) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("completion registry poisoned")
            .remove(udi);
        match sender {
            Some(tx) => tx.send(completion).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardware_types::ErrorType;

    fn settings() -> OpSettings {
        OpSettings {
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn successful_completion_resolves_ok() {
        let hub = CompletionHub::new();
        let udi = Udi::new("/org/freedesktop/UDisks2/block_devices/sda1");

        let pending = hub.begin(&udi, OperationKind::Setup);
        assert_eq!(pending.state(), OperationState::Requested);
        assert!(hub.complete(&udi, Completion::success()));

        pending.wait(&settings()).await.unwrap();
    }

    #[tokio::test]
    async fn busy_code_maps_to_device_busy_with_verbatim_message() {
        let hub = CompletionHub::new();
        let udi = Udi::new("/org/freedesktop/UDisks2/drives/sr0");

        let pending = hub.begin(&udi, OperationKind::Eject);
        hub.complete(&udi, Completion::failure("Busy", "drive in use by cdparanoia"));

        let err = pending.wait(&settings()).await.unwrap_err();
        match err {
            HardwareError::Operation { kind, message } => {
                assert_eq!(kind, ErrorType::DeviceBusy);
                assert_eq!(message, "drive in use by cdparanoia");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unknown_code_falls_back_to_unauthorized() {
        let hub = CompletionHub::new();
        let udi = Udi::new("/dev/x");

        let pending = hub.begin(&udi, OperationKind::Teardown);
        hub.complete(&udi, Completion::failure("PolicyViolation", "not allowed"));

        let err = pending.wait(&settings()).await.unwrap_err();
        assert_eq!(err.error_type(), ErrorType::UnauthorizedOperation);
    }

    #[tokio::test]
    async fn wait_times_out_when_nothing_completes() {
        let hub = CompletionHub::new();
        let udi = Udi::new("/dev/slow");

        let pending = hub.begin(&udi, OperationKind::Setup);
        let err = pending
            .wait(&OpSettings {
                timeout: Duration::from_millis(10),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, HardwareError::Timeout { .. }));
    }

    #[tokio::test]
    async fn completion_without_waiter_is_reported_stale() {
        let hub = CompletionHub::new();
        assert!(!hub.complete(&Udi::new("/dev/ghost"), Completion::success()));
    }
}
