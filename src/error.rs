// Error types for the request/event pipeline
//
// Two layers of failure exist: the low-level debugger connection refusing
// an operation (NativeError), and this crate's request lifecycle surfacing
// that refusal or a dead debuggee to the caller (RequestError).

use crate::jdi::EventKind;
use thiserror::Error;

/// Failure reported by a [`DebuggerConnection`](crate::jdi::DebuggerConnection)
/// implementation.
#[derive(Debug, Clone, Error)]
pub enum NativeError {
    /// The connection rejected the argument combination for a request.
    #[error("invalid request arguments: {0}")]
    InvalidArguments(String),

    /// The debuggee VM is gone or unreachable.
    #[error("debuggee VM unavailable: {0}")]
    VmUnavailable(String),

    /// Any other low-level failure.
    #[error("{0}")]
    Other(String),
}

/// Failure surfaced by request managers and profile subscriptions.
///
/// Creation failures are atomic: when one of these is returned, no index
/// was written and no native request is left installed.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The underlying debugger refused to create a request.
    #[error("debugger refused to create {kind} request")]
    NativeCreationFailed {
        kind: EventKind,
        #[source]
        source: NativeError,
    },

    /// The debuggee VM has died or disconnected; new requests fail fast.
    #[error("debuggee VM has died or disconnected")]
    TerminalVm,
}

impl RequestError {
    /// True when the error is the terminal-VM fast-fail.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestError::TerminalVm)
    }
}
