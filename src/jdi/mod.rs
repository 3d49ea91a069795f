// Low-level debugger boundary
//
// This module pins down the contract we consume from a JDI-style debugging
// facility: the fixed set of event kinds, the raw events popped from the
// native event queue, the native request handles we install into the
// debuggee, and the connection trait that performs the actual wire calls.
// Everything above this module is connection-agnostic; tests substitute the
// scripted connection from `mock`.

use crate::arguments::RequestArgument;
use crate::error::NativeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub mod mock;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers and locations
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque identifier of a thread in the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/// Opaque identifier of an object mirror in the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object-{}", self.0)
    }
}

/// A code location in the debuggee: declaring type, method, source file and
/// line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub declaring_type: String,
    pub method_name: String,
    pub source_name: String,
    pub line_number: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} ({}:{})",
            self.declaring_type, self.method_name, self.source_name, self.line_number
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event kinds and request knobs
// ─────────────────────────────────────────────────────────────────────────────

/// The fixed categories of debuggee events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Breakpoint,
    MethodEntry,
    MethodExit,
    MonitorWait,
    MonitorWaited,
    MonitorContendedEnter,
    MonitorContendedEntered,
    ClassPrepare,
    ClassUnload,
    ThreadStart,
    ThreadDeath,
    Exception,
    AccessWatchpoint,
    ModificationWatchpoint,
    Step,
    VmStart,
    VmDeath,
    VmDisconnect,
}

impl EventKind {
    /// Display string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Breakpoint => "breakpoint",
            EventKind::MethodEntry => "method-entry",
            EventKind::MethodExit => "method-exit",
            EventKind::MonitorWait => "monitor-wait",
            EventKind::MonitorWaited => "monitor-waited",
            EventKind::MonitorContendedEnter => "monitor-contended-enter",
            EventKind::MonitorContendedEntered => "monitor-contended-entered",
            EventKind::ClassPrepare => "class-prepare",
            EventKind::ClassUnload => "class-unload",
            EventKind::ThreadStart => "thread-start",
            EventKind::ThreadDeath => "thread-death",
            EventKind::Exception => "exception",
            EventKind::AccessWatchpoint => "access-watchpoint",
            EventKind::ModificationWatchpoint => "modification-watchpoint",
            EventKind::Step => "step",
            EventKind::VmStart => "vm-start",
            EventKind::VmDeath => "vm-death",
            EventKind::VmDisconnect => "vm-disconnect",
        }
    }

    /// True for the events that end the debuggee session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::VmDeath | EventKind::VmDisconnect)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which threads the debuggee suspends when an event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuspendPolicy {
    /// Suspend nothing.
    None,
    /// Suspend only the reporting thread.
    EventThread,
    /// Suspend the whole VM.
    All,
}

/// Granularity of a step request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepSize {
    /// Step by the smallest possible amount (often a bytecode instruction).
    Min,
    /// Step to a different source line.
    Line,
}

/// Call-depth behavior of a step request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepDepth {
    /// Step into any invoked methods.
    Into,
    /// Step over invoked methods.
    Over,
    /// Step out of the current frame.
    Out,
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Strongly-typed debuggee event, one variant per [`EventKind`].
///
/// Payload values whose mirror representation this layer does not interpret
/// (method return values, watchpoint field values) are carried as opaque
/// JSON values.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    VmStart {
        thread: ThreadId,
    },
    VmDeath,
    VmDisconnect,
    Breakpoint {
        thread: ThreadId,
        location: Location,
    },
    MethodEntry {
        thread: ThreadId,
        location: Location,
    },
    MethodExit {
        thread: ThreadId,
        location: Location,
        return_value: serde_json::Value,
    },
    MonitorWait {
        thread: ThreadId,
        monitor: ObjectId,
        location: Location,
        timeout_ms: i64,
    },
    MonitorWaited {
        thread: ThreadId,
        monitor: ObjectId,
        location: Location,
        timed_out: bool,
    },
    MonitorContendedEnter {
        thread: ThreadId,
        monitor: ObjectId,
        location: Location,
    },
    MonitorContendedEntered {
        thread: ThreadId,
        monitor: ObjectId,
        location: Location,
    },
    ClassPrepare {
        thread: ThreadId,
        type_name: String,
        signature: String,
    },
    ClassUnload {
        type_name: String,
        signature: String,
    },
    ThreadStart {
        thread: ThreadId,
    },
    ThreadDeath {
        thread: ThreadId,
    },
    Exception {
        thread: ThreadId,
        location: Location,
        exception: ObjectId,
        catch_location: Option<Location>,
    },
    AccessWatchpoint {
        thread: ThreadId,
        location: Location,
        field_name: String,
        value: serde_json::Value,
    },
    ModificationWatchpoint {
        thread: ThreadId,
        location: Location,
        field_name: String,
        current_value: serde_json::Value,
        new_value: serde_json::Value,
    },
    Step {
        thread: ThreadId,
        location: Location,
    },
}

impl Event {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::VmStart { .. } => EventKind::VmStart,
            Event::VmDeath => EventKind::VmDeath,
            Event::VmDisconnect => EventKind::VmDisconnect,
            Event::Breakpoint { .. } => EventKind::Breakpoint,
            Event::MethodEntry { .. } => EventKind::MethodEntry,
            Event::MethodExit { .. } => EventKind::MethodExit,
            Event::MonitorWait { .. } => EventKind::MonitorWait,
            Event::MonitorWaited { .. } => EventKind::MonitorWaited,
            Event::MonitorContendedEnter { .. } => EventKind::MonitorContendedEnter,
            Event::MonitorContendedEntered { .. } => EventKind::MonitorContendedEntered,
            Event::ClassPrepare { .. } => EventKind::ClassPrepare,
            Event::ClassUnload { .. } => EventKind::ClassUnload,
            Event::ThreadStart { .. } => EventKind::ThreadStart,
            Event::ThreadDeath { .. } => EventKind::ThreadDeath,
            Event::Exception { .. } => EventKind::Exception,
            Event::AccessWatchpoint { .. } => EventKind::AccessWatchpoint,
            Event::ModificationWatchpoint { .. } => EventKind::ModificationWatchpoint,
            Event::Step { .. } => EventKind::Step,
        }
    }

    /// The reporting thread, where the event has one.
    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            Event::VmStart { thread }
            | Event::Breakpoint { thread, .. }
            | Event::MethodEntry { thread, .. }
            | Event::MethodExit { thread, .. }
            | Event::MonitorWait { thread, .. }
            | Event::MonitorWaited { thread, .. }
            | Event::MonitorContendedEnter { thread, .. }
            | Event::MonitorContendedEntered { thread, .. }
            | Event::ClassPrepare { thread, .. }
            | Event::ThreadStart { thread }
            | Event::ThreadDeath { thread }
            | Event::Exception { thread, .. }
            | Event::AccessWatchpoint { thread, .. }
            | Event::ModificationWatchpoint { thread, .. }
            | Event::Step { thread, .. } => Some(*thread),
            Event::VmDeath | Event::VmDisconnect | Event::ClassUnload { .. } => None,
        }
    }

    /// The code location, where the event has one.
    pub fn location(&self) -> Option<&Location> {
        match self {
            Event::Breakpoint { location, .. }
            | Event::MethodEntry { location, .. }
            | Event::MethodExit { location, .. }
            | Event::MonitorWait { location, .. }
            | Event::MonitorWaited { location, .. }
            | Event::MonitorContendedEnter { location, .. }
            | Event::MonitorContendedEntered { location, .. }
            | Event::Exception { location, .. }
            | Event::AccessWatchpoint { location, .. }
            | Event::ModificationWatchpoint { location, .. }
            | Event::Step { location, .. } => Some(location),
            _ => None,
        }
    }

    /// The declaring/prepared type name the event is about, used by class
    /// inclusion and exclusion patterns.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Event::ClassPrepare { type_name, .. } | Event::ClassUnload { type_name, .. } => {
                Some(type_name)
            }
            other => other.location().map(|l| l.declaring_type.as_str()),
        }
    }
}

/// Request properties carried on native requests and echoed in events.
///
/// Values round-trip byte-for-byte through the native layer.
pub type PropertyMap = HashMap<String, String>;

/// Raw event as popped from the native event queue: the typed event plus
/// the properties of the request that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeEvent {
    pub properties: PropertyMap,
    pub event: Event,
}

impl NativeEvent {
    pub fn new(event: Event) -> Self {
        Self {
            properties: PropertyMap::new(),
            event,
        }
    }

    pub fn with_properties(event: Event, properties: PropertyMap) -> Self {
        Self { properties, event }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to a request installed into the debuggee.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeRequest {
    pub handle: u64,
    pub kind: EventKind,
    pub properties: PropertyMap,
}

/// Description of a native request to install: the event kind plus its
/// natural-key fields. Kinds without per-request fields use `Plain`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestSpec {
    Breakpoint {
        source_name: String,
        line_number: u32,
    },
    MethodEntry {
        class_name: String,
        method_name: String,
    },
    MethodExit {
        class_name: String,
        method_name: String,
    },
    Exception {
        class_name: Option<String>,
        notify_caught: bool,
        notify_uncaught: bool,
    },
    AccessWatchpoint {
        class_name: String,
        field_name: String,
    },
    ModificationWatchpoint {
        class_name: String,
        field_name: String,
    },
    Step {
        thread: ThreadId,
        size: StepSize,
        depth: StepDepth,
    },
    Plain(EventKind),
}

impl RequestSpec {
    pub fn kind(&self) -> EventKind {
        match self {
            RequestSpec::Breakpoint { .. } => EventKind::Breakpoint,
            RequestSpec::MethodEntry { .. } => EventKind::MethodEntry,
            RequestSpec::MethodExit { .. } => EventKind::MethodExit,
            RequestSpec::Exception { .. } => EventKind::Exception,
            RequestSpec::AccessWatchpoint { .. } => EventKind::AccessWatchpoint,
            RequestSpec::ModificationWatchpoint { .. } => EventKind::ModificationWatchpoint,
            RequestSpec::Step { .. } => EventKind::Step,
            RequestSpec::Plain(kind) => *kind,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection
// ─────────────────────────────────────────────────────────────────────────────

/// The low-level debugger connection.
///
/// Implementations perform the actual wire calls against the debuggee.
/// `create_request` installs but does not enable; managers call `enable`
/// separately so a failed enable can roll the request back.
pub trait DebuggerConnection: Send + Sync {
    /// Install a request into the debuggee. Rejects invalid argument
    /// combinations. `extensions` are user-supplied values this layer does
    /// not interpret, passed through unchanged.
    fn create_request(
        &self,
        spec: &RequestSpec,
        args: &[RequestArgument],
        extensions: &[serde_json::Value],
    ) -> Result<NativeRequest, NativeError>;

    /// Enable a previously created request.
    fn enable(&self, request: &NativeRequest) -> Result<(), NativeError>;

    /// Delete a request. Idempotent; deleting an already-gone request is
    /// not an error.
    fn delete_request(&self, request: &NativeRequest);

    /// Blocking drain of the native event queue. Returns the events that
    /// arrived, or an empty vec after `timeout`.
    fn poll_events(&self, timeout: Duration) -> Vec<NativeEvent>;
}

/// Shared liveness flag for the debuggee VM.
///
/// Flipped exactly once when a vm-death or vm-disconnect event is observed;
/// request creation consults it to fail fast.
#[derive(Debug, Default)]
pub struct VmStatus {
    terminal: AtomicBool,
}

impl VmStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    /// Mark the VM terminal. Returns true on the first transition.
    pub fn mark_terminal(&self) -> bool {
        !self.terminal.swap(true, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_roundtrip() {
        let event = Event::Breakpoint {
            thread: ThreadId(1),
            location: Location {
                declaring_type: "com.example.Main".into(),
                method_name: "run".into(),
                source_name: "Main.java".into(),
                line_number: 42,
            },
        };
        assert_eq!(event.kind(), EventKind::Breakpoint);
        assert_eq!(event.thread(), Some(ThreadId(1)));
        assert_eq!(event.location().unwrap().line_number, 42);
    }

    #[test]
    fn test_type_name_prefers_prepared_type() {
        let event = Event::ClassPrepare {
            thread: ThreadId(7),
            type_name: "com.example.Loaded".into(),
            signature: "Lcom/example/Loaded;".into(),
        };
        assert_eq!(event.type_name(), Some("com.example.Loaded"));

        let unload = Event::ClassUnload {
            type_name: "com.example.Gone".into(),
            signature: "Lcom/example/Gone;".into(),
        };
        assert_eq!(unload.type_name(), Some("com.example.Gone"));
        assert_eq!(unload.thread(), None);
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(EventKind::VmDeath.is_terminal());
        assert!(EventKind::VmDisconnect.is_terminal());
        assert!(!EventKind::VmStart.is_terminal());
        assert!(!EventKind::Breakpoint.is_terminal());
    }

    #[test]
    fn test_vm_status_marks_once() {
        let status = VmStatus::new();
        assert!(!status.is_terminal());
        assert!(status.mark_terminal());
        assert!(!status.mark_terminal());
        assert!(status.is_terminal());
    }
}
