// Natural-key schemas, one per event kind
//
// A natural key carries the user-meaningful fields identifying a request,
// knows how to describe itself to the native layer, and supplies the
// request-arguments every request of its kind gets by default. Everything
// else about request management is generic over this trait.

use crate::arguments::RequestArgument;
use crate::jdi::{EventKind, RequestSpec, StepDepth, StepSize, SuspendPolicy, ThreadId};
use std::fmt::Debug;
use std::hash::Hash;

/// The natural key under which a kind's requests are indexed.
pub trait NaturalKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// The event kind this key belongs to.
    const KIND: EventKind;

    /// Native description of a request for this key.
    fn spec(&self) -> RequestSpec;

    /// Request-arguments applied when the user omits them: every request
    /// starts enabled and suspends only the reporting thread; class-scoped
    /// kinds add an inclusion filter for their class.
    fn default_args(&self) -> Vec<RequestArgument> {
        base_defaults()
    }
}

fn base_defaults() -> Vec<RequestArgument> {
    vec![
        RequestArgument::Enabled(true),
        RequestArgument::SuspendPolicy(SuspendPolicy::EventThread),
    ]
}

fn class_scoped_defaults(class_name: &str) -> Vec<RequestArgument> {
    let mut defaults = base_defaults();
    defaults.push(RequestArgument::ClassInclusion(class_name.to_string()));
    defaults
}

/// Breakpoint requests are keyed by source file and line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakpointKey {
    pub source_name: String,
    pub line_number: u32,
}

impl NaturalKey for BreakpointKey {
    const KIND: EventKind = EventKind::Breakpoint;

    fn spec(&self) -> RequestSpec {
        RequestSpec::Breakpoint {
            source_name: self.source_name.clone(),
            line_number: self.line_number,
        }
    }
}

/// Method entry requests are keyed by class and method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodEntryKey {
    pub class_name: String,
    pub method_name: String,
}

impl NaturalKey for MethodEntryKey {
    const KIND: EventKind = EventKind::MethodEntry;

    fn spec(&self) -> RequestSpec {
        RequestSpec::MethodEntry {
            class_name: self.class_name.clone(),
            method_name: self.method_name.clone(),
        }
    }

    fn default_args(&self) -> Vec<RequestArgument> {
        class_scoped_defaults(&self.class_name)
    }
}

/// Method exit requests are keyed by class and method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodExitKey {
    pub class_name: String,
    pub method_name: String,
}

impl NaturalKey for MethodExitKey {
    const KIND: EventKind = EventKind::MethodExit;

    fn spec(&self) -> RequestSpec {
        RequestSpec::MethodExit {
            class_name: self.class_name.clone(),
            method_name: self.method_name.clone(),
        }
    }

    fn default_args(&self) -> Vec<RequestArgument> {
        class_scoped_defaults(&self.class_name)
    }
}

/// Exception requests are keyed by exception class (None = all exceptions)
/// and the caught/uncaught notification flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExceptionKey {
    pub class_name: Option<String>,
    pub notify_caught: bool,
    pub notify_uncaught: bool,
}

impl NaturalKey for ExceptionKey {
    const KIND: EventKind = EventKind::Exception;

    fn spec(&self) -> RequestSpec {
        RequestSpec::Exception {
            class_name: self.class_name.clone(),
            notify_caught: self.notify_caught,
            notify_uncaught: self.notify_uncaught,
        }
    }

    fn default_args(&self) -> Vec<RequestArgument> {
        match &self.class_name {
            Some(class_name) => class_scoped_defaults(class_name),
            None => base_defaults(),
        }
    }
}

/// Access watchpoint requests are keyed by class and field name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessWatchpointKey {
    pub class_name: String,
    pub field_name: String,
}

impl NaturalKey for AccessWatchpointKey {
    const KIND: EventKind = EventKind::AccessWatchpoint;

    fn spec(&self) -> RequestSpec {
        RequestSpec::AccessWatchpoint {
            class_name: self.class_name.clone(),
            field_name: self.field_name.clone(),
        }
    }

    fn default_args(&self) -> Vec<RequestArgument> {
        class_scoped_defaults(&self.class_name)
    }
}

/// Modification watchpoint requests are keyed by class and field name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModificationWatchpointKey {
    pub class_name: String,
    pub field_name: String,
}

impl NaturalKey for ModificationWatchpointKey {
    const KIND: EventKind = EventKind::ModificationWatchpoint;

    fn spec(&self) -> RequestSpec {
        RequestSpec::ModificationWatchpoint {
            class_name: self.class_name.clone(),
            field_name: self.field_name.clone(),
        }
    }

    fn default_args(&self) -> Vec<RequestArgument> {
        class_scoped_defaults(&self.class_name)
    }
}

/// Step requests are keyed by thread, step size and depth. They are
/// single-shot at the profile layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepKey {
    pub thread: ThreadId,
    pub size: StepSize,
    pub depth: StepDepth,
}

impl NaturalKey for StepKey {
    const KIND: EventKind = EventKind::Step;

    fn spec(&self) -> RequestSpec {
        RequestSpec::Step {
            thread: self.thread,
            size: self.size,
            depth: self.depth,
        }
    }
}

// Kinds without per-request natural-key fields: at most one canonical
// request per distinct argument-set, de-duplicated via the memoization key.
macro_rules! unit_key {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name;

        impl NaturalKey for $name {
            const KIND: EventKind = EventKind::$kind;

            fn spec(&self) -> RequestSpec {
                RequestSpec::Plain(EventKind::$kind)
            }
        }
    };
}

unit_key!(MonitorWaitKey => MonitorWait);
unit_key!(MonitorWaitedKey => MonitorWaited);
unit_key!(MonitorContendedEnterKey => MonitorContendedEnter);
unit_key!(MonitorContendedEnteredKey => MonitorContendedEntered);
unit_key!(ClassPrepareKey => ClassPrepare);
unit_key!(ClassUnloadKey => ClassUnload);
unit_key!(ThreadStartKey => ThreadStart);
unit_key!(ThreadDeathKey => ThreadDeath);
unit_key!(VmStartKey => VmStart);
unit_key!(VmDeathKey => VmDeath);
unit_key!(VmDisconnectKey => VmDisconnect);
