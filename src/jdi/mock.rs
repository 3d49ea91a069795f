// Scripted debugger connection for tests and demos
//
// Records every create/enable/delete call, supports scripted failures, and
// can stamp a live request's properties onto synthetic events so tests can
// exercise correlation end to end without a debuggee.

use super::{
    DebuggerConnection, Event, EventKind, NativeEvent, NativeRequest, PropertyMap, RequestSpec,
};
use crate::arguments::{RequestArgument, RequestId, UNIQUE_ID_PROPERTY};
use crate::error::NativeError;
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// One recorded `create_request` invocation.
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub spec: RequestSpec,
    pub args: Vec<RequestArgument>,
    pub extensions: Vec<serde_json::Value>,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    live: HashMap<u64, NativeRequest>,
    created: Vec<CreateCall>,
    deleted: Vec<u64>,
    fail_create: VecDeque<NativeError>,
    fail_enable: VecDeque<NativeError>,
}

/// In-memory [`DebuggerConnection`] double.
#[derive(Default)]
pub struct MockConnection {
    state: Mutex<MockState>,
    queue: Mutex<VecDeque<NativeEvent>>,
    queue_signal: Condvar,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the next `create_request` call to fail.
    pub fn fail_next_create(&self, error: NativeError) {
        self.state.lock().fail_create.push_back(error);
    }

    /// Script the next `enable` call to fail.
    pub fn fail_next_enable(&self, error: NativeError) {
        self.state.lock().fail_enable.push_back(error);
    }

    /// Every recorded create call, in order.
    pub fn create_calls(&self) -> Vec<CreateCall> {
        self.state.lock().created.clone()
    }

    /// How many create calls were made for a kind.
    pub fn created_count(&self, kind: EventKind) -> usize {
        self.state
            .lock()
            .created
            .iter()
            .filter(|call| call.spec.kind() == kind)
            .count()
    }

    /// How many requests were deleted.
    pub fn deleted_count(&self) -> usize {
        self.state.lock().deleted.len()
    }

    /// How many requests are currently installed.
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Build a synthetic native event stamped with the properties of the
    /// live request carrying `id`. None when no such request is installed.
    pub fn stamped_event(&self, id: &RequestId, event: Event) -> Option<NativeEvent> {
        let state = self.state.lock();
        state
            .live
            .values()
            .find(|request| {
                request.properties.get(UNIQUE_ID_PROPERTY).map(String::as_str)
                    == Some(id.as_str())
            })
            .map(|request| NativeEvent::with_properties(event, request.properties.clone()))
    }

    /// Enqueue a raw event for the next `poll_events` drain.
    pub fn emit(&self, event: NativeEvent) {
        self.queue.lock().push_back(event);
        self.queue_signal.notify_all();
    }

    /// Enqueue an event correlated to the live request carrying `id`.
    /// Returns false when no such request is installed.
    pub fn emit_for_id(&self, id: &RequestId, event: Event) -> bool {
        match self.stamped_event(id, event) {
            Some(native) => {
                self.emit(native);
                true
            }
            None => false,
        }
    }
}

impl DebuggerConnection for MockConnection {
    fn create_request(
        &self,
        spec: &RequestSpec,
        args: &[RequestArgument],
        extensions: &[serde_json::Value],
    ) -> Result<NativeRequest, NativeError> {
        let mut state = self.state.lock();
        state.created.push(CreateCall {
            spec: spec.clone(),
            args: args.to_vec(),
            extensions: extensions.to_vec(),
        });
        if let Some(error) = state.fail_create.pop_front() {
            return Err(error);
        }

        state.next_handle += 1;
        let handle = state.next_handle;
        let mut properties = PropertyMap::new();
        for arg in args {
            match arg {
                RequestArgument::UniqueIdProperty(id) => {
                    properties.insert(UNIQUE_ID_PROPERTY.to_string(), id.as_str().to_string());
                }
                RequestArgument::Property { key, value } => {
                    properties.insert(key.clone(), value.clone());
                }
                _ => {}
            }
        }
        let request = NativeRequest {
            handle,
            kind: spec.kind(),
            properties,
        };
        state.live.insert(handle, request.clone());
        Ok(request)
    }

    fn enable(&self, _request: &NativeRequest) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        match state.fail_enable.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn delete_request(&self, request: &NativeRequest) {
        let mut state = self.state.lock();
        state.live.remove(&request.handle);
        state.deleted.push(request.handle);
    }

    fn poll_events(&self, timeout: Duration) -> Vec<NativeEvent> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.queue_signal.wait_for(&mut queue, timeout);
        }
        queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jdi::ThreadId;

    #[test]
    fn test_create_stamps_properties() {
        let mock = MockConnection::new();
        let id = RequestId::generate();
        let request = mock
            .create_request(
                &RequestSpec::Plain(EventKind::MonitorWait),
                &[
                    id.as_property(),
                    RequestArgument::Property {
                        key: "color".into(),
                        value: "blue".into(),
                    },
                ],
                &[],
            )
            .unwrap();

        assert_eq!(
            request.properties.get(UNIQUE_ID_PROPERTY),
            Some(&id.as_str().to_string())
        );
        assert_eq!(request.properties.get("color"), Some(&"blue".to_string()));
        assert_eq!(mock.live_count(), 1);
    }

    #[test]
    fn test_scripted_failure_consumed_once() {
        let mock = MockConnection::new();
        mock.fail_next_create(NativeError::InvalidArguments("bad".into()));

        let spec = RequestSpec::Plain(EventKind::ThreadStart);
        assert!(mock.create_request(&spec, &[], &[]).is_err());
        assert!(mock.create_request(&spec, &[], &[]).is_ok());
        assert_eq!(mock.create_calls().len(), 2);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mock = MockConnection::new();
        let request = mock
            .create_request(&RequestSpec::Plain(EventKind::ThreadDeath), &[], &[])
            .unwrap();

        mock.delete_request(&request);
        mock.delete_request(&request);
        assert_eq!(mock.live_count(), 0);
        assert_eq!(mock.deleted_count(), 2);
    }

    #[test]
    fn test_emit_for_id_requires_live_request() {
        let mock = MockConnection::new();
        let id = RequestId::generate();
        assert!(!mock.emit_for_id(&id, Event::ThreadStart { thread: ThreadId(1) }));

        mock.create_request(
            &RequestSpec::Plain(EventKind::ThreadStart),
            &[id.as_property()],
            &[],
        )
        .unwrap();
        assert!(mock.emit_for_id(&id, Event::ThreadStart { thread: ThreadId(1) }));

        let drained = mock.poll_events(Duration::from_millis(1));
        assert_eq!(drained.len(), 1);
        assert_eq!(
            drained[0].properties.get(UNIQUE_ID_PROPERTY),
            Some(&id.as_str().to_string())
        );
    }

    #[test]
    fn test_poll_times_out_empty() {
        let mock = MockConnection::new();
        assert!(mock.poll_events(Duration::from_millis(1)).is_empty());
    }
}
