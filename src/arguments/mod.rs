// Argument model for request creation and event dispatch
//
// Arguments come in two families with different lifetimes: request-arguments
// are filters installed on the native request at creation time, while
// event-arguments are applied to in-flight events at dispatch time. The
// unique-id correlation value exists in both families - a property written
// onto the request and a twin filter matching the events it produces.

use crate::jdi::{NativeEvent, ObjectId, SuspendPolicy, ThreadId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;
use std::sync::Arc;

/// Property key under which the correlation id is stored on native requests
/// and echoed back in emitted events.
pub const UNIQUE_ID_PROPERTY: &str = "jspy.unique-id";

// ─────────────────────────────────────────────────────────────────────────────
// Request identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Synthetic identifier of a managed request: a random 128-bit value
/// rendered as text.
///
/// The id is stamped onto the native request as a property and used both as
/// the removal handle and as the event-correlation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The request-argument twin: a property carrying this id.
    pub fn as_property(&self) -> RequestArgument {
        RequestArgument::UniqueIdProperty(self.clone())
    }

    /// The event-argument twin: a filter matching events produced by the
    /// request carrying this id.
    pub fn as_filter(&self) -> EventArgument {
        EventArgument::UniqueIdFilter(self.clone())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request arguments
// ─────────────────────────────────────────────────────────────────────────────

/// Filter or knob applied when creating a native request.
///
/// Ordering within an argument list is preserved end-to-end: some filter
/// combinations are order-sensitive at the native layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestArgument {
    /// Restrict the request to types matching the pattern.
    ClassInclusion(String),
    /// Exclude types matching the pattern.
    ClassExclusion(String),
    /// Restrict the request to events on the given object instance.
    InstanceFilter(ObjectId),
    /// Limit how many times the request fires.
    CountFilter(u32),
    /// Restrict the request to the given thread.
    ThreadFilter(ThreadId),
    /// Which threads to suspend when the request fires.
    SuspendPolicy(SuspendPolicy),
    /// Whether the request starts enabled.
    Enabled(bool),
    /// Correlation id stamped into the request's properties.
    UniqueIdProperty(RequestId),
    /// User-defined property, passed through to the native request.
    Property { key: String, value: String },
}

impl RequestArgument {
    /// True when `other` is the same variant, regardless of payload.
    pub fn same_variant(&self, other: &RequestArgument) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }
}

/// Strip every unique-id property from an argument list, preserving order.
///
/// Request-arg-set equality is defined modulo the unique-id property; this
/// is the normalization both the memoization key and the manager's
/// invalidation lookup rely on.
pub fn without_unique_id(args: &[RequestArgument]) -> Vec<RequestArgument> {
    args.iter()
        .filter(|arg| !matches!(arg, RequestArgument::UniqueIdProperty(_)))
        .cloned()
        .collect()
}

/// The first unique-id property in an argument list, if any.
pub fn unique_id_of(args: &[RequestArgument]) -> Option<RequestId> {
    args.iter().find_map(|arg| match arg {
        RequestArgument::UniqueIdProperty(id) => Some(id.clone()),
        _ => None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Event arguments
// ─────────────────────────────────────────────────────────────────────────────

/// Filter applied to in-flight events at dispatch time.
#[derive(Clone)]
pub enum EventArgument {
    /// Accept only events whose location's method name matches.
    MethodNameFilter(String),
    /// Accept only events produced by the request carrying this id.
    UniqueIdFilter(RequestId),
    /// User-defined filter, optionally extracting per-event aux data.
    Custom(Arc<dyn CustomFilter>),
}

impl fmt::Debug for EventArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventArgument::MethodNameFilter(name) => {
                f.debug_tuple("MethodNameFilter").field(name).finish()
            }
            EventArgument::UniqueIdFilter(id) => {
                f.debug_tuple("UniqueIdFilter").field(id).finish()
            }
            EventArgument::Custom(filter) => {
                f.debug_tuple("Custom").field(&filter.name()).finish()
            }
        }
    }
}

/// User-defined event filter.
///
/// `accepts` gates dispatch; implementations that also want per-event data
/// delivered alongside the event opt in by returning `Some` from `extract`.
/// The extracted value is surfaced to the subscriber as an aux-data entry
/// keyed by `name`.
pub trait CustomFilter: Send + Sync {
    /// Identity of this argument in aux-data entries.
    fn name(&self) -> &str;

    /// Whether the event passes this filter.
    fn accepts(&self, event: &NativeEvent) -> bool;

    /// Opt-in per-event data extraction. Default: no data.
    fn extract(&self, _event: &NativeEvent) -> Option<serde_json::Value> {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// The argument sum type and its partitioner
// ─────────────────────────────────────────────────────────────────────────────

/// Heterogeneous argument accepted by profile operations.
#[derive(Debug, Clone)]
pub enum Argument {
    /// Creation-time semantics: installed on the native request.
    Request(RequestArgument),
    /// Dispatch-time semantics: applied to in-flight events.
    Event(EventArgument),
    /// Unrecognized extension, passed through to the low-level layer
    /// unchanged.
    Other(serde_json::Value),
}

impl From<RequestArgument> for Argument {
    fn from(arg: RequestArgument) -> Self {
        Argument::Request(arg)
    }
}

impl From<EventArgument> for Argument {
    fn from(arg: EventArgument) -> Self {
        Argument::Event(arg)
    }
}

/// Result of splitting a heterogeneous argument sequence by family.
#[derive(Debug, Clone, Default)]
pub struct PartitionedArguments {
    pub request: Vec<RequestArgument>,
    pub event: Vec<EventArgument>,
    pub other: Vec<serde_json::Value>,
}

/// Split an argument sequence into request-args, event-args and
/// pass-through extensions, preserving per-bucket order.
pub fn partition(args: impl IntoIterator<Item = Argument>) -> PartitionedArguments {
    let mut parts = PartitionedArguments::default();
    for arg in args {
        match arg {
            Argument::Request(request) => parts.request.push(request),
            Argument::Event(event) => parts.event.push(event),
            Argument::Other(value) => parts.other.push(value),
        }
    }
    parts
}

// ─────────────────────────────────────────────────────────────────────────────
// Class name patterns
// ─────────────────────────────────────────────────────────────────────────────

/// Match a type name against a class pattern.
///
/// Patterns are exact names, or contain a single leading or trailing `*`:
/// `*.Inner` suffix-matches, `com.example.*` prefix-matches.
pub fn class_pattern_matches(pattern: &str, type_name: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        type_name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        type_name.starts_with(prefix)
    } else {
        pattern == type_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jdi::Event;

    #[test]
    fn test_partition_preserves_per_bucket_order() {
        let args = vec![
            Argument::Request(RequestArgument::CountFilter(5)),
            Argument::Event(EventArgument::MethodNameFilter("run".into())),
            Argument::Request(RequestArgument::ClassInclusion("com.x.*".into())),
            Argument::Other(serde_json::json!({"vendor": "ext"})),
            Argument::Request(RequestArgument::Enabled(false)),
        ];

        let parts = partition(args);
        assert_eq!(
            parts.request,
            vec![
                RequestArgument::CountFilter(5),
                RequestArgument::ClassInclusion("com.x.*".into()),
                RequestArgument::Enabled(false),
            ]
        );
        assert_eq!(parts.event.len(), 1);
        assert_eq!(parts.other.len(), 1);
    }

    #[test]
    fn test_unique_id_round_trip_and_strip() {
        let id = RequestId::generate();
        let args = vec![
            RequestArgument::CountFilter(1),
            id.as_property(),
            RequestArgument::SuspendPolicy(SuspendPolicy::EventThread),
        ];

        assert_eq!(unique_id_of(&args), Some(id.clone()));

        let stripped = without_unique_id(&args);
        assert_eq!(
            stripped,
            vec![
                RequestArgument::CountFilter(1),
                RequestArgument::SuspendPolicy(SuspendPolicy::EventThread),
            ]
        );
        assert_eq!(unique_id_of(&stripped), None);
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
        assert!(!a.as_str().is_empty());
    }

    #[test]
    fn test_same_variant_ignores_payload() {
        let a = RequestArgument::CountFilter(1);
        let b = RequestArgument::CountFilter(99);
        let c = RequestArgument::Enabled(true);
        assert!(a.same_variant(&b));
        assert!(!a.same_variant(&c));
    }

    #[test]
    fn test_class_pattern_matching() {
        assert!(class_pattern_matches("com.example.Main", "com.example.Main"));
        assert!(!class_pattern_matches("com.example.Main", "com.example.Other"));

        assert!(class_pattern_matches("com.example.*", "com.example.deep.Type"));
        assert!(!class_pattern_matches("com.example.*", "org.example.Type"));

        assert!(class_pattern_matches("*.Inner", "com.example.Outer.Inner"));
        assert!(!class_pattern_matches("*.Inner", "com.example.Outer"));
    }

    struct ThreadExtractor;

    impl CustomFilter for ThreadExtractor {
        fn name(&self) -> &str {
            "thread-extractor"
        }

        fn accepts(&self, event: &NativeEvent) -> bool {
            event.event.thread().is_some()
        }

        fn extract(&self, event: &NativeEvent) -> Option<serde_json::Value> {
            event.event.thread().map(|t| serde_json::json!(t.0))
        }
    }

    #[test]
    fn test_custom_filter_extraction() {
        let filter = ThreadExtractor;
        let event = NativeEvent::new(Event::ThreadStart {
            thread: ThreadId(3),
        });
        assert!(filter.accepts(&event));
        assert_eq!(filter.extract(&event), Some(serde_json::json!(3)));

        let no_thread = NativeEvent::new(Event::VmDeath);
        assert!(!filter.accepts(&no_thread));
    }
}
