// Request managers
//
// One manager exists per event kind, all sharing this generic core. A
// manager owns two concurrent indices - natural key to request ids, and
// request id to record - and keeps them consistent with what is actually
// installed in the debuggee: registration is atomic (native create and
// enable succeed before either index is written) and removal tears down
// both indices before deleting the native request.

use crate::arguments::{unique_id_of, without_unique_id, RequestArgument, RequestId};
use crate::error::RequestError;
use crate::jdi::{DebuggerConnection, NativeRequest, VmStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

mod keys;

pub use keys::{
    AccessWatchpointKey, BreakpointKey, ClassPrepareKey, ClassUnloadKey, ExceptionKey,
    MethodEntryKey, MethodExitKey, ModificationWatchpointKey, MonitorContendedEnterKey,
    MonitorContendedEnteredKey, MonitorWaitKey, MonitorWaitedKey, NaturalKey, StepKey,
    ThreadDeathKey, ThreadStartKey, VmDeathKey, VmDisconnectKey, VmStartKey,
};

/// A live managed request: id, natural key, the installed native handle,
/// and the request-arguments it was subscribed with (always carrying the
/// unique-id property equal to `id`).
#[derive(Debug, Clone)]
pub struct RequestRecord<K> {
    pub id: RequestId,
    pub key: K,
    pub native: NativeRequest,
    pub args: Vec<RequestArgument>,
}

/// Generic per-kind request manager.
///
/// A natural key may map to several live requests that differ in their
/// request-arguments (e.g. two requests with different count filters), so
/// the key index is a multimap. Argument-set comparisons are always modulo
/// the unique-id property.
pub struct RequestManager<K: NaturalKey> {
    connection: Arc<dyn DebuggerConnection>,
    vm_status: Arc<VmStatus>,
    keys: RwLock<HashMap<K, Vec<RequestId>>>,
    records: RwLock<HashMap<RequestId, RequestRecord<K>>>,
}

impl<K: NaturalKey> RequestManager<K> {
    pub fn new(connection: Arc<dyn DebuggerConnection>, vm_status: Arc<VmStatus>) -> Self {
        Self {
            connection,
            vm_status,
            keys: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create a request under a freshly generated id (or the id carried by
    /// a unique-id property among `args`, if the caller supplied one).
    /// `extensions` are unrecognized user options handed to the low-level
    /// layer unchanged.
    pub fn create(
        &self,
        key: K,
        args: Vec<RequestArgument>,
        extensions: Vec<serde_json::Value>,
    ) -> Result<RequestId, RequestError> {
        let id = unique_id_of(&args).unwrap_or_else(RequestId::generate);
        self.create_with_id(id, key, args, extensions)
    }

    /// Create a request under the given id.
    ///
    /// On success the native request is installed and enabled and both
    /// indices are published. On failure nothing is written and no native
    /// request is left behind.
    pub fn create_with_id(
        &self,
        id: RequestId,
        key: K,
        args: Vec<RequestArgument>,
        extensions: Vec<serde_json::Value>,
    ) -> Result<RequestId, RequestError> {
        if self.vm_status.is_terminal() {
            return Err(RequestError::TerminalVm);
        }

        // The record's argument list always leads with the correlation id.
        let mut recorded = without_unique_id(&args);
        recorded.insert(0, id.as_property());

        let native_args = with_defaults(&recorded, key.default_args());
        let spec = key.spec();
        let native = self
            .connection
            .create_request(&spec, &native_args, &extensions)
            .map_err(|source| RequestError::NativeCreationFailed {
                kind: K::KIND,
                source,
            })?;
        if let Err(source) = self.connection.enable(&native) {
            self.connection.delete_request(&native);
            tracing::warn!(kind = %K::KIND, request_id = %id, error = %source,
                "Rolled back request that could not be enabled");
            return Err(RequestError::NativeCreationFailed {
                kind: K::KIND,
                source,
            });
        }

        {
            let mut keys = self.keys.write();
            let mut records = self.records.write();
            if records.contains_key(&id) {
                drop(records);
                drop(keys);
                self.connection.delete_request(&native);
                return Err(RequestError::NativeCreationFailed {
                    kind: K::KIND,
                    source: crate::error::NativeError::InvalidArguments(format!(
                        "request id {id} already in use"
                    )),
                });
            }
            keys.entry(key.clone()).or_default().push(id.clone());
            records.insert(
                id.clone(),
                RequestRecord {
                    id: id.clone(),
                    key,
                    native,
                    args: recorded,
                },
            );
        }

        tracing::debug!(kind = %K::KIND, request_id = %id, "Installed debugger request");
        Ok(id)
    }

    /// Whether any request exists under the natural key.
    pub fn has(&self, key: &K) -> bool {
        self.keys.read().get(key).is_some_and(|ids| !ids.is_empty())
    }

    pub fn has_by_id(&self, id: &RequestId) -> bool {
        self.records.read().contains_key(id)
    }

    /// The native handle of the first request under the natural key.
    pub fn get(&self, key: &K) -> Option<NativeRequest> {
        let keys = self.keys.read();
        let records = self.records.read();
        keys.get(key)?
            .first()
            .and_then(|id| records.get(id))
            .map(|record| record.native.clone())
    }

    pub fn get_by_id(&self, id: &RequestId) -> Option<NativeRequest> {
        self.records.read().get(id).map(|record| record.native.clone())
    }

    /// All natural keys with at least one live request.
    pub fn list(&self) -> Vec<K> {
        self.keys.read().keys().cloned().collect()
    }

    /// All live request ids.
    pub fn list_ids(&self) -> Vec<RequestId> {
        self.records.read().keys().cloned().collect()
    }

    /// The request-arguments a request was subscribed with, with the
    /// unique-id property stripped (the correlation id is internal).
    pub fn arguments_for(&self, id: &RequestId) -> Option<Vec<RequestArgument>> {
        self.records
            .read()
            .get(id)
            .map(|record| without_unique_id(&record.args))
    }

    /// Find the live request under `key` whose argument set equals
    /// `stripped_args` (modulo unique-id). This is the memoization cell's
    /// authority lookup.
    pub fn find_id(&self, key: &K, stripped_args: &[RequestArgument]) -> Option<RequestId> {
        let keys = self.keys.read();
        let records = self.records.read();
        keys.get(key)?
            .iter()
            .find(|id| {
                records
                    .get(*id)
                    .is_some_and(|record| without_unique_id(&record.args) == stripped_args)
            })
            .cloned()
    }

    /// Remove every request under the natural key. Returns whether any
    /// existed.
    pub fn remove(&self, key: &K) -> bool {
        let ids: Vec<RequestId> = self.keys.read().get(key).cloned().unwrap_or_default();
        let mut removed = false;
        for id in ids {
            removed |= self.remove_by_id(&id);
        }
        removed
    }

    /// Remove a request by id: clears both indices, then deletes the
    /// native request. Idempotent; a concurrent duplicate call returns
    /// false.
    pub fn remove_by_id(&self, id: &RequestId) -> bool {
        let record = {
            let mut keys = self.keys.write();
            let mut records = self.records.write();
            let Some(record) = records.remove(id) else {
                return false;
            };
            if let Some(ids) = keys.get_mut(&record.key) {
                ids.retain(|other| other != id);
                if ids.is_empty() {
                    keys.remove(&record.key);
                }
            }
            record
        };
        // Deleting an already-gone request is not an error; the connection
        // swallows it.
        self.connection.delete_request(&record.native);
        tracing::debug!(kind = %K::KIND, request_id = %id, "Removed debugger request");
        true
    }
}

/// Append each default whose variant is absent from `args`; user-supplied
/// values always win. Ordering of the user's arguments is preserved.
fn with_defaults(
    args: &[RequestArgument],
    defaults: Vec<RequestArgument>,
) -> Vec<RequestArgument> {
    let mut merged = args.to_vec();
    for default in defaults {
        if !merged.iter().any(|arg| arg.same_variant(&default)) {
            merged.push(default);
        }
    }
    merged
}

// Per-kind aliases over the generic core.
pub type BreakpointManager = RequestManager<BreakpointKey>;
pub type MethodEntryManager = RequestManager<MethodEntryKey>;
pub type MethodExitManager = RequestManager<MethodExitKey>;
pub type MonitorWaitManager = RequestManager<MonitorWaitKey>;
pub type MonitorWaitedManager = RequestManager<MonitorWaitedKey>;
pub type MonitorContendedEnterManager = RequestManager<MonitorContendedEnterKey>;
pub type MonitorContendedEnteredManager = RequestManager<MonitorContendedEnteredKey>;
pub type ClassPrepareManager = RequestManager<ClassPrepareKey>;
pub type ClassUnloadManager = RequestManager<ClassUnloadKey>;
pub type ThreadStartManager = RequestManager<ThreadStartKey>;
pub type ThreadDeathManager = RequestManager<ThreadDeathKey>;
pub type ExceptionManager = RequestManager<ExceptionKey>;
pub type AccessWatchpointManager = RequestManager<AccessWatchpointKey>;
pub type ModificationWatchpointManager = RequestManager<ModificationWatchpointKey>;
pub type StepManager = RequestManager<StepKey>;
pub type VmStartManager = RequestManager<VmStartKey>;
pub type VmDeathManager = RequestManager<VmDeathKey>;
pub type VmDisconnectManager = RequestManager<VmDisconnectKey>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arguments::UNIQUE_ID_PROPERTY;
    use crate::error::NativeError;
    use crate::jdi::mock::MockConnection;
    use crate::jdi::{EventKind, SuspendPolicy};

    fn method_entry_manager() -> (Arc<MockConnection>, MethodEntryManager) {
        let mock = MockConnection::new();
        let manager = MethodEntryManager::new(mock.clone(), Arc::new(VmStatus::new()));
        (mock, manager)
    }

    fn foo_bar() -> MethodEntryKey {
        MethodEntryKey {
            class_name: "com.example.Foo".into(),
            method_name: "bar".into(),
        }
    }

    #[test]
    fn test_create_round_trip() {
        let (mock, manager) = method_entry_manager();
        let id = manager.create(foo_bar(), vec![], vec![]).unwrap();

        assert!(manager.has(&foo_bar()));
        assert!(manager.has_by_id(&id));
        assert!(manager.get_by_id(&id).is_some());
        assert_eq!(manager.list(), vec![foo_bar()]);
        assert_eq!(manager.list_ids(), vec![id.clone()]);
        assert_eq!(mock.created_count(EventKind::MethodEntry), 1);
        assert_eq!(mock.live_count(), 1);
    }

    #[test]
    fn test_create_applies_defaults_without_clobbering_user_args() {
        let (mock, manager) = method_entry_manager();
        manager
            .create(
                foo_bar(),
                vec![RequestArgument::SuspendPolicy(SuspendPolicy::All)],
                vec![],
            )
            .unwrap();

        let call = &mock.create_calls()[0];
        // User value preserved, default not appended.
        assert_eq!(
            call.args
                .iter()
                .filter(|arg| matches!(arg, RequestArgument::SuspendPolicy(_)))
                .count(),
            1
        );
        assert!(call
            .args
            .contains(&RequestArgument::SuspendPolicy(SuspendPolicy::All)));
        assert!(call.args.contains(&RequestArgument::Enabled(true)));
        assert!(call
            .args
            .contains(&RequestArgument::ClassInclusion("com.example.Foo".into())));
    }

    #[test]
    fn test_record_args_lead_with_unique_id() {
        let (_mock, manager) = method_entry_manager();
        let id = manager
            .create(foo_bar(), vec![RequestArgument::CountFilter(3)], vec![])
            .unwrap();

        // The echoed argument list strips the correlation id.
        assert_eq!(
            manager.arguments_for(&id).unwrap(),
            vec![RequestArgument::CountFilter(3)]
        );
        // But the installed native request carries it.
        let native = manager.get_by_id(&id).unwrap();
        assert_eq!(
            native.properties.get(UNIQUE_ID_PROPERTY),
            Some(&id.as_str().to_string())
        );
    }

    #[test]
    fn test_user_supplied_unique_id_wins() {
        let (_mock, manager) = method_entry_manager();
        let mine = RequestId::new("caller-chosen");
        let id = manager.create(foo_bar(), vec![mine.as_property()], vec![]).unwrap();
        assert_eq!(id, mine);
    }

    #[test]
    fn test_duplicate_id_is_rejected_and_rolled_back() {
        let (mock, manager) = method_entry_manager();
        let id = manager.create(foo_bar(), vec![], vec![]).unwrap();

        let other = MethodEntryKey {
            class_name: "com.example.Other".into(),
            method_name: "baz".into(),
        };
        let result = manager.create_with_id(id.clone(), other.clone(), vec![], vec![]);
        assert!(result.is_err());
        assert!(!manager.has(&other));
        assert_eq!(mock.live_count(), 1);
    }

    #[test]
    fn test_same_key_holds_multiple_requests() {
        let (mock, manager) = method_entry_manager();
        let first = manager
            .create(foo_bar(), vec![RequestArgument::CountFilter(5)], vec![])
            .unwrap();
        let second = manager
            .create(foo_bar(), vec![RequestArgument::CountFilter(10)], vec![])
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(mock.live_count(), 2);

        assert_eq!(
            manager.find_id(&foo_bar(), &[RequestArgument::CountFilter(5)]),
            Some(first.clone())
        );
        assert_eq!(
            manager.find_id(&foo_bar(), &[RequestArgument::CountFilter(10)]),
            Some(second)
        );
        assert_eq!(manager.find_id(&foo_bar(), &[]), None);

        // Removing by key evicts every request under it.
        assert!(manager.remove(&foo_bar()));
        assert!(!manager.has(&foo_bar()));
        assert!(!manager.has_by_id(&first));
        assert_eq!(mock.live_count(), 0);
    }

    #[test]
    fn test_remove_by_id_is_idempotent() {
        let (mock, manager) = method_entry_manager();
        let id = manager.create(foo_bar(), vec![], vec![]).unwrap();

        assert!(manager.remove_by_id(&id));
        assert!(!manager.remove_by_id(&id));
        assert!(manager.get_by_id(&id).is_none());
        assert!(manager.list().is_empty());
        assert!(manager.list_ids().is_empty());
        assert_eq!(mock.deleted_count(), 1);
    }

    #[test]
    fn test_failed_create_writes_nothing() {
        let (mock, manager) = method_entry_manager();
        mock.fail_next_create(NativeError::InvalidArguments("rejected".into()));

        let result = manager.create(foo_bar(), vec![], vec![]);
        assert!(matches!(
            result,
            Err(RequestError::NativeCreationFailed { .. })
        ));
        assert!(!manager.has(&foo_bar()));
        assert!(manager.list_ids().is_empty());
        assert_eq!(mock.live_count(), 0);
    }

    #[test]
    fn test_failed_enable_rolls_back_native_request() {
        let (mock, manager) = method_entry_manager();
        mock.fail_next_enable(NativeError::Other("enable refused".into()));

        assert!(manager.create(foo_bar(), vec![], vec![]).is_err());
        assert!(!manager.has(&foo_bar()));
        // The half-installed request was deleted again.
        assert_eq!(mock.live_count(), 0);
        assert_eq!(mock.deleted_count(), 1);
    }

    #[test]
    fn test_terminal_vm_fails_fast() {
        let mock = MockConnection::new();
        let vm_status = Arc::new(VmStatus::new());
        let manager = MethodEntryManager::new(mock.clone(), vm_status.clone());

        vm_status.mark_terminal();
        let result = manager.create(foo_bar(), vec![], vec![]);
        assert!(matches!(result, Err(RequestError::TerminalVm)));
        // Fail-fast means the native layer was never consulted.
        assert_eq!(mock.create_calls().len(), 0);
    }

    #[test]
    fn test_index_consistency_after_mixed_ops() {
        let (_mock, manager) = method_entry_manager();
        let a = manager.create(foo_bar(), vec![], vec![]).unwrap();
        let other = MethodEntryKey {
            class_name: "com.example.Other".into(),
            method_name: "baz".into(),
        };
        let b = manager.create(other.clone(), vec![], vec![]).unwrap();
        manager.remove_by_id(&a);

        // Every listed id resolves through the key index and vice versa.
        let ids = manager.list_ids();
        assert_eq!(ids, vec![b.clone()]);
        for key in manager.list() {
            let native = manager.get(&key).unwrap();
            assert_eq!(manager.get_by_id(&b).unwrap().handle, native.handle);
        }
        assert!(!manager.has(&foo_bar()));
        assert!(manager.has(&other));
    }
}
