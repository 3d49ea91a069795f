// Event manager
//
// Dispatches raw native events to registered handlers after applying
// event-argument filters, and hands out pipeline-backed event streams.
// Dispatch is single-writer: one dispatcher thread drains the native event
// queue and runs every handler callback serially, so callbacks must not
// block. A panicking handler is caught and logged; it never stops dispatch
// to the others.

use crate::arguments::{
    class_pattern_matches, Argument, EventArgument, RequestArgument, UNIQUE_ID_PROPERTY,
};
use crate::jdi::{DebuggerConnection, EventKind, NativeEvent, VmStatus};
use crate::pipeline::Pipeline;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How long one native poll blocks before the dispatcher rechecks its stop
/// flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stream item: the raw event plus the aux data its filters extracted.
pub type EventDataStream = Pipeline<(NativeEvent, AuxData)>;

// ─────────────────────────────────────────────────────────────────────────────
// Aux data
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered `(argument identity, extracted value)` pairs produced by the
/// event arguments that opted in to data extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxData {
    entries: Vec<(String, serde_json::Value)>,
}

impl AuxData {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: &str, value: serde_json::Value) {
        self.entries.push((name.to_string(), value));
    }

    /// The first value extracted under `name`.
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| value)
    }

    pub fn entries(&self) -> &[(String, serde_json::Value)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Filter evaluation
// ─────────────────────────────────────────────────────────────────────────────

/// Whether an event passes every filter in the list.
pub fn event_accepts(event: &NativeEvent, filters: &[Argument]) -> bool {
    filters.iter().all(|arg| argument_accepts(event, arg))
}

// Built-in filter semantics. Request-side class patterns are also honored
// at dispatch time; other request-arguments and pass-through extensions
// have no dispatch-time meaning and accept everything.
fn argument_accepts(event: &NativeEvent, arg: &Argument) -> bool {
    match arg {
        Argument::Event(EventArgument::UniqueIdFilter(id)) => {
            event.properties.get(UNIQUE_ID_PROPERTY).map(String::as_str) == Some(id.as_str())
        }
        Argument::Event(EventArgument::MethodNameFilter(name)) => event
            .event
            .location()
            .is_some_and(|location| location.method_name == *name),
        Argument::Event(EventArgument::Custom(filter)) => filter.accepts(event),
        Argument::Request(RequestArgument::ClassInclusion(pattern)) => event
            .event
            .type_name()
            .is_some_and(|type_name| class_pattern_matches(pattern, type_name)),
        Argument::Request(RequestArgument::ClassExclusion(pattern)) => !event
            .event
            .type_name()
            .is_some_and(|type_name| class_pattern_matches(pattern, type_name)),
        Argument::Request(_) | Argument::Other(_) => true,
    }
}

fn extract_aux(event: &NativeEvent, filters: &[Argument]) -> AuxData {
    let mut aux = AuxData::new();
    for arg in filters {
        if let Argument::Event(EventArgument::Custom(filter)) = arg {
            if let Some(value) = filter.extract(event) {
                aux.push(filter.name(), value);
            }
        }
    }
    aux
}

// ─────────────────────────────────────────────────────────────────────────────
// Event manager
// ─────────────────────────────────────────────────────────────────────────────

struct Handler {
    id: u64,
    filters: Vec<Argument>,
    sink: Box<dyn Fn(&NativeEvent, &AuxData) + Send + Sync>,
}

struct Inner {
    vm_status: Arc<VmStatus>,
    handlers: RwLock<HashMap<EventKind, Vec<Arc<Handler>>>>,
    streams: Mutex<Vec<(u64, EventDataStream)>>,
    next_handler: AtomicU64,
}

impl Inner {
    fn remove_handler(&self, kind: EventKind, id: u64) {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(&kind) {
            list.retain(|handler| handler.id != id);
            if list.is_empty() {
                handlers.remove(&kind);
            }
        }
        drop(handlers);
        self.streams.lock().retain(|(stream_id, _)| *stream_id != id);
    }
}

/// Multiplexes inbound native events into registered handler callbacks and
/// pipeline streams. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EventManager {
    inner: Arc<Inner>,
}

impl EventManager {
    pub fn new(vm_status: Arc<VmStatus>) -> Self {
        Self {
            inner: Arc::new(Inner {
                vm_status,
                handlers: RwLock::new(HashMap::new()),
                streams: Mutex::new(Vec::new()),
                next_handler: AtomicU64::new(0),
            }),
        }
    }

    pub fn vm_status(&self) -> &Arc<VmStatus> {
        &self.inner.vm_status
    }

    /// Open a stream of `(event, aux data)` pairs for a kind. The stream
    /// receives every dispatched event of that kind passing all `filters`;
    /// closing it deregisters the backing handler.
    pub fn add_event_data_stream(
        &self,
        kind: EventKind,
        filters: Vec<Argument>,
    ) -> EventDataStream {
        let pipeline: EventDataStream = Pipeline::new();
        if self.inner.vm_status.is_terminal() {
            // The debuggee is gone; hand back a stream that is already
            // torn down rather than one that can never fire.
            pipeline.close();
            return pipeline;
        }

        let id = self.inner.next_handler.fetch_add(1, Ordering::Relaxed);
        let sink_pipeline = pipeline.clone();
        let handler = Arc::new(Handler {
            id,
            filters,
            sink: Box::new(move |event, aux| sink_pipeline.push((event.clone(), aux.clone()))),
        });

        self.inner
            .handlers
            .write()
            .entry(kind)
            .or_default()
            .push(handler);
        self.inner.streams.lock().push((id, pipeline.clone()));

        let inner = self.inner.clone();
        pipeline.on_close(move || inner.remove_handler(kind, id));

        tracing::debug!(kind = %kind, handler = id, "Registered event stream");
        pipeline
    }

    /// Dispatch one native event to every matching handler, in
    /// registration order. Terminal events additionally mark the VM status
    /// and close every open stream after delivery.
    pub fn dispatch(&self, event: &NativeEvent) {
        let kind = event.kind();
        tracing::trace!(kind = %kind, "Dispatching native event");

        if kind.is_terminal() && self.inner.vm_status.mark_terminal() {
            tracing::info!(kind = %kind, "Debuggee VM terminated");
        }

        // Snapshot so a sink may deregister handlers reentrantly.
        let handlers: Vec<Arc<Handler>> = self
            .inner
            .handlers
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            if !event_accepts(event, &handler.filters) {
                continue;
            }
            let aux = extract_aux(event, &handler.filters);
            let outcome = catch_unwind(AssertUnwindSafe(|| (handler.sink)(event, &aux)));
            if outcome.is_err() {
                tracing::error!(kind = %kind, handler = handler.id,
                    "Event handler panicked; continuing dispatch");
            }
        }

        if kind.is_terminal() {
            self.close_all_streams();
        }
    }

    /// Close every open stream, in no particular order.
    pub fn close_all_streams(&self) {
        let streams: Vec<_> = std::mem::take(&mut *self.inner.streams.lock());
        for (id, stream) in streams {
            tracing::debug!(handler = id, "Closing event stream");
            stream.close();
        }
    }

    /// Number of registered handlers for a kind.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .handlers
            .read()
            .get(&kind)
            .map_or(0, |list| list.len())
    }

    /// Number of open streams across all kinds.
    pub fn open_stream_count(&self) -> usize {
        self.inner.streams.lock().len()
    }

    /// Start the dedicated dispatcher thread: drains the connection's
    /// event queue and dispatches until stopped or the VM terminates.
    pub fn spawn_dispatcher(
        &self,
        connection: Arc<dyn DebuggerConnection>,
    ) -> std::io::Result<DispatcherHandle> {
        let manager = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread = thread::Builder::new()
            .name("jspy-dispatcher".into())
            .spawn(move || {
                tracing::debug!("Event dispatcher started");
                while !stop_flag.load(Ordering::Acquire) {
                    for event in connection.poll_events(POLL_INTERVAL) {
                        manager.dispatch(&event);
                    }
                    if manager.inner.vm_status.is_terminal() {
                        break;
                    }
                }
                tracing::debug!("Event dispatcher stopped");
            })?;
        Ok(DispatcherHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Handle to the running dispatcher thread. Dropping it stops the thread.
pub struct DispatcherHandle {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Signal the dispatcher to stop and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments::{CustomFilter, RequestId};
    use crate::jdi::mock::MockConnection;
    use crate::jdi::{Event, Location, ThreadId};
    use std::time::Instant;

    fn manager() -> EventManager {
        EventManager::new(Arc::new(VmStatus::new()))
    }

    fn entry_event(method: &str) -> NativeEvent {
        NativeEvent::new(Event::MethodEntry {
            thread: ThreadId(1),
            location: Location {
                declaring_type: "com.example.Foo".into(),
                method_name: method.into(),
                source_name: "Foo.java".into(),
                line_number: 10,
            },
        })
    }

    fn collect(stream: &EventDataStream) -> Arc<Mutex<Vec<(NativeEvent, AuxData)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        stream.for_each(move |item: &(NativeEvent, AuxData)| sink.lock().push(item.clone()));
        seen
    }

    #[test]
    fn test_unique_id_filter_routes_by_request() {
        let events = manager();
        let id = RequestId::generate();
        let other = RequestId::generate();

        let stream = events.add_event_data_stream(
            EventKind::MethodEntry,
            vec![Argument::Event(id.as_filter())],
        );
        let seen = collect(&stream);

        let mut matching = entry_event("bar");
        matching
            .properties
            .insert(UNIQUE_ID_PROPERTY.to_string(), id.as_str().to_string());
        let mut foreign = entry_event("bar");
        foreign
            .properties
            .insert(UNIQUE_ID_PROPERTY.to_string(), other.as_str().to_string());

        events.dispatch(&matching);
        events.dispatch(&foreign);
        events.dispatch(&entry_event("bar")); // no properties at all

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].0, matching);
    }

    #[test]
    fn test_method_name_filter() {
        let events = manager();
        let stream = events.add_event_data_stream(
            EventKind::MethodEntry,
            vec![Argument::Event(EventArgument::MethodNameFilter(
                "bar".into(),
            ))],
        );
        let seen = collect(&stream);

        events.dispatch(&entry_event("bar"));
        events.dispatch(&entry_event("baz"));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_class_patterns_at_dispatch_time() {
        let events = manager();
        let stream = events.add_event_data_stream(
            EventKind::MethodEntry,
            vec![
                Argument::Request(RequestArgument::ClassInclusion("com.example.*".into())),
                Argument::Request(RequestArgument::ClassExclusion("*.Excluded".into())),
            ],
        );
        let seen = collect(&stream);

        events.dispatch(&entry_event("bar")); // com.example.Foo: accepted

        let mut excluded = entry_event("bar");
        if let Event::MethodEntry { location, .. } = &mut excluded.event {
            location.declaring_type = "com.example.Excluded".into();
        }
        events.dispatch(&excluded);

        let mut foreign = entry_event("bar");
        if let Event::MethodEntry { location, .. } = &mut foreign.event {
            location.declaring_type = "org.other.Foo".into();
        }
        events.dispatch(&foreign);

        assert_eq!(seen.lock().len(), 1);
    }

    struct LineExtractor;

    impl CustomFilter for LineExtractor {
        fn name(&self) -> &str {
            "line"
        }

        fn accepts(&self, event: &NativeEvent) -> bool {
            event.event.location().is_some()
        }

        fn extract(&self, event: &NativeEvent) -> Option<serde_json::Value> {
            event
                .event
                .location()
                .map(|location| serde_json::json!(location.line_number))
        }
    }

    #[test]
    fn test_custom_filter_contributes_aux_data() {
        let events = manager();
        let stream = events.add_event_data_stream(
            EventKind::MethodEntry,
            vec![Argument::Event(EventArgument::Custom(Arc::new(
                LineExtractor,
            )))],
        );
        let seen = collect(&stream);

        events.dispatch(&entry_event("bar"));
        let captured = seen.lock();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].1.get("line"), Some(&serde_json::json!(10)));
    }

    #[test]
    fn test_panicking_handler_does_not_stop_dispatch() {
        let events = manager();
        let bad = events.add_event_data_stream(EventKind::MethodEntry, vec![]);
        bad.for_each(|_: &(NativeEvent, AuxData)| panic!("misbehaving subscriber"));
        let good = events.add_event_data_stream(EventKind::MethodEntry, vec![]);
        let seen = collect(&good);

        events.dispatch(&entry_event("bar"));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_closing_stream_deregisters_handler() {
        let events = manager();
        let stream = events.add_event_data_stream(EventKind::MethodEntry, vec![]);
        assert_eq!(events.handler_count(EventKind::MethodEntry), 1);
        assert_eq!(events.open_stream_count(), 1);

        stream.close();
        assert_eq!(events.handler_count(EventKind::MethodEntry), 0);
        assert_eq!(events.open_stream_count(), 0);
    }

    #[test]
    fn test_terminal_event_delivers_then_closes_everything() {
        let events = manager();
        let death = events.add_event_data_stream(EventKind::VmDeath, vec![]);
        let seen = collect(&death);
        let unrelated = events.add_event_data_stream(EventKind::MethodEntry, vec![]);

        events.dispatch(&NativeEvent::new(Event::VmDeath));

        // Subscribers to the terminal event saw it before teardown.
        assert_eq!(seen.lock().len(), 1);
        assert!(events.vm_status().is_terminal());
        assert!(death.is_closed());
        assert!(unrelated.is_closed());
        assert_eq!(events.open_stream_count(), 0);

        // New streams are born closed once the VM is gone.
        let late = events.add_event_data_stream(EventKind::MethodEntry, vec![]);
        assert!(late.is_closed());
    }

    #[test]
    fn test_dispatcher_thread_drains_queue() {
        let mock = MockConnection::new();
        let events = manager();
        let stream = events.add_event_data_stream(EventKind::MethodEntry, vec![]);
        let seen = collect(&stream);

        let handle = events.spawn_dispatcher(mock.clone()).unwrap();
        mock.emit(entry_event("bar"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.lock().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.stop();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_dispatcher_stops_after_terminal_event() {
        let mock = MockConnection::new();
        let events = manager();
        let handle = events.spawn_dispatcher(mock.clone()).unwrap();

        mock.emit(NativeEvent::new(Event::VmDisconnect));
        let deadline = Instant::now() + Duration::from_secs(2);
        while !events.vm_status().is_terminal() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(events.vm_status().is_terminal());
        handle.stop();
    }
}
