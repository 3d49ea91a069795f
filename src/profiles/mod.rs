// Profiles
//
// The user-facing subscription surface. Every `on_x` operation follows one
// protocol: partition the caller's arguments, memoize-create the request
// under a fresh correlation id, open an event stream filtered down to that
// id, bump the subscriber counter, and hook teardown onto pipeline close -
// the last subscriber to leave removes the request.
//
// The per-kind logic lives entirely in the natural-key schema; the
// subscribe routine, memoization and reference counting are shared
// generically across all kinds.

use crate::arguments::{
    partition, unique_id_of, without_unique_id, Argument, RequestArgument, RequestId,
};
use crate::error::RequestError;
use crate::events::{AuxData, DispatcherHandle, EventManager};
use crate::jdi::{DebuggerConnection, Event, StepDepth, StepSize, ThreadId, VmStatus};
use crate::memo::MemoCell;
use crate::pipeline::Pipeline;
use crate::requests::{
    AccessWatchpointKey, AccessWatchpointManager, BreakpointKey, BreakpointManager,
    ClassPrepareKey, ClassPrepareManager, ClassUnloadKey, ClassUnloadManager, ExceptionKey,
    ExceptionManager, MethodEntryKey, MethodEntryManager, MethodExitKey, MethodExitManager,
    ModificationWatchpointKey, ModificationWatchpointManager, MonitorContendedEnterKey,
    MonitorContendedEnterManager, MonitorContendedEnteredKey, MonitorContendedEnteredManager,
    MonitorWaitKey, MonitorWaitManager, MonitorWaitedKey, MonitorWaitedManager, NaturalKey,
    RequestManager, StepKey, StepManager, ThreadDeathKey, ThreadDeathManager, ThreadStartKey,
    ThreadStartManager, VmDeathKey, VmDeathManager, VmDisconnectKey, VmDisconnectManager,
    VmStartKey, VmStartManager,
};
use std::sync::Arc;

mod counters;

pub use counters::SubscriberCounters;

/// Stream of typed events.
pub type EventPipeline = Pipeline<Event>;

/// Stream of typed events paired with extracted aux data.
pub type EventDataPipeline = Pipeline<(Event, AuxData)>;

// Subscriber key: the natural key plus the request-arguments modulo
// unique-id. Identical to the memoization key, so the counter guards
// exactly one memoized request.
type ShareKey<K> = (K, Vec<RequestArgument>);

struct SubscribeInput<K> {
    key: K,
    request_args: Vec<RequestArgument>,
    extensions: Vec<serde_json::Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Generic subscribe engine
// ─────────────────────────────────────────────────────────────────────────────

/// Per-kind subscription engine: the kind's request manager, its
/// memoization cell, and the subscriber counters.
pub struct KindProfile<K: NaturalKey> {
    manager: Arc<RequestManager<K>>,
    events: EventManager,
    memo: Arc<MemoCell<SubscribeInput<K>, ShareKey<K>, RequestId, RequestError>>,
    counters: Arc<SubscriberCounters<ShareKey<K>>>,
}

impl<K: NaturalKey> KindProfile<K> {
    pub fn new(manager: Arc<RequestManager<K>>, events: EventManager) -> Self {
        let create = manager.clone();
        let authority = manager.clone();
        // Miss: stamp a fresh correlation id (the caller's own, if they
        // supplied one) and install the request. The invalidation predicate
        // defers to the manager as the authority, comparing argument sets
        // modulo the unique-id property.
        let memo = MemoCell::new(
            move |input: &SubscribeInput<K>| {
                let id = unique_id_of(&input.request_args).unwrap_or_else(RequestId::generate);
                create.create_with_id(
                    id,
                    input.key.clone(),
                    input.request_args.clone(),
                    input.extensions.clone(),
                )
            },
            |input: &SubscribeInput<K>| {
                (input.key.clone(), without_unique_id(&input.request_args))
            },
            move |key: &ShareKey<K>| authority.find_id(&key.0, &key.1).is_none(),
        );
        Self {
            manager,
            events,
            memo: Arc::new(memo),
            counters: Arc::new(SubscriberCounters::new()),
        }
    }

    /// The kind's request manager, for out-of-band inspection and removal.
    pub fn manager(&self) -> &Arc<RequestManager<K>> {
        &self.manager
    }

    /// Subscribe to this kind's events under `key`.
    pub fn subscribe(
        &self,
        key: K,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.subscribe_inner(key, extra_args, false)
    }

    /// Subscribe single-shot: the pipeline delivers exactly one event,
    /// then closes itself, tearing the request down.
    pub fn subscribe_single_shot(
        &self,
        key: K,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.subscribe_inner(key, extra_args, true)
    }

    fn subscribe_inner(
        &self,
        key: K,
        extra_args: Vec<Argument>,
        single_shot: bool,
    ) -> Result<EventDataPipeline, RequestError> {
        let parts = partition(extra_args);
        let input = SubscribeInput {
            key,
            request_args: parts.request,
            extensions: parts.other,
        };
        let id = self.memo.call(&input)?;

        // Correlate: only events produced by our request pass, ahead of
        // whatever event filters the caller added.
        let mut filters: Vec<Argument> = Vec::with_capacity(parts.event.len() + 1);
        filters.push(Argument::Event(id.as_filter()));
        filters.extend(parts.event.into_iter().map(Argument::Event));

        let stream = self.events.add_event_data_stream(K::KIND, filters);
        let typed = stream.map(|(native, aux)| (native.event, aux));

        let share_key: ShareKey<K> = (input.key.clone(), without_unique_id(&input.request_args));
        self.counters.increment(&share_key);

        let counters = self.counters.clone();
        let manager = self.manager.clone();
        let memo = self.memo.clone();
        let request_id = id.clone();
        let teardown_key = share_key.clone();
        typed.on_close(move || {
            if counters.decrement(&teardown_key) == 0 {
                memo.remove(&teardown_key);
                let removed = manager.remove_by_id(&request_id);
                tracing::debug!(kind = %K::KIND, request_id = %request_id, removed,
                    "Last subscriber closed; request torn down");
            }
        });

        if single_shot {
            // Attached after the subscriber's chain: the first delivered
            // event flows all the way through before the close fires.
            let chain = typed.clone();
            stream.for_each(move |_| chain.close());
        }

        tracing::debug!(kind = %K::KIND, request_id = %id, single_shot, "Subscriber attached");
        Ok(typed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Facade
// ─────────────────────────────────────────────────────────────────────────────

fn kind_profile<K: NaturalKey>(
    connection: &Arc<dyn DebuggerConnection>,
    vm_status: &Arc<VmStatus>,
    events: &EventManager,
) -> KindProfile<K> {
    KindProfile::new(
        Arc::new(RequestManager::new(connection.clone(), vm_status.clone())),
        events.clone(),
    )
}

/// The high-level debugger API: one subscription operation pair per event
/// kind, all sharing one event manager and one VM status.
pub struct Profile {
    connection: Arc<dyn DebuggerConnection>,
    vm_status: Arc<VmStatus>,
    events: EventManager,
    breakpoints: KindProfile<BreakpointKey>,
    method_entries: KindProfile<MethodEntryKey>,
    method_exits: KindProfile<MethodExitKey>,
    monitor_waits: KindProfile<MonitorWaitKey>,
    monitor_waiteds: KindProfile<MonitorWaitedKey>,
    monitor_contended_enters: KindProfile<MonitorContendedEnterKey>,
    monitor_contended_entereds: KindProfile<MonitorContendedEnteredKey>,
    class_prepares: KindProfile<ClassPrepareKey>,
    class_unloads: KindProfile<ClassUnloadKey>,
    thread_starts: KindProfile<ThreadStartKey>,
    thread_deaths: KindProfile<ThreadDeathKey>,
    exceptions: KindProfile<ExceptionKey>,
    access_watchpoints: KindProfile<AccessWatchpointKey>,
    modification_watchpoints: KindProfile<ModificationWatchpointKey>,
    steps: KindProfile<StepKey>,
    vm_starts: KindProfile<VmStartKey>,
    vm_deaths: KindProfile<VmDeathKey>,
    vm_disconnects: KindProfile<VmDisconnectKey>,
}

impl Profile {
    /// Build a profile over a connection with fresh collaborators.
    pub fn new(connection: Arc<dyn DebuggerConnection>) -> Self {
        let vm_status = Arc::new(VmStatus::new());
        let events = EventManager::new(vm_status.clone());
        Self::with_collaborators(connection, vm_status, events)
    }

    /// Build a profile from explicit collaborators. The event manager must
    /// share `vm_status` for terminal handling to line up.
    pub fn with_collaborators(
        connection: Arc<dyn DebuggerConnection>,
        vm_status: Arc<VmStatus>,
        events: EventManager,
    ) -> Self {
        Self {
            breakpoints: kind_profile(&connection, &vm_status, &events),
            method_entries: kind_profile(&connection, &vm_status, &events),
            method_exits: kind_profile(&connection, &vm_status, &events),
            monitor_waits: kind_profile(&connection, &vm_status, &events),
            monitor_waiteds: kind_profile(&connection, &vm_status, &events),
            monitor_contended_enters: kind_profile(&connection, &vm_status, &events),
            monitor_contended_entereds: kind_profile(&connection, &vm_status, &events),
            class_prepares: kind_profile(&connection, &vm_status, &events),
            class_unloads: kind_profile(&connection, &vm_status, &events),
            thread_starts: kind_profile(&connection, &vm_status, &events),
            thread_deaths: kind_profile(&connection, &vm_status, &events),
            exceptions: kind_profile(&connection, &vm_status, &events),
            access_watchpoints: kind_profile(&connection, &vm_status, &events),
            modification_watchpoints: kind_profile(&connection, &vm_status, &events),
            steps: kind_profile(&connection, &vm_status, &events),
            vm_starts: kind_profile(&connection, &vm_status, &events),
            vm_deaths: kind_profile(&connection, &vm_status, &events),
            vm_disconnects: kind_profile(&connection, &vm_status, &events),
            connection,
            vm_status,
            events,
        }
    }

    pub fn connection(&self) -> &Arc<dyn DebuggerConnection> {
        &self.connection
    }

    pub fn vm_status(&self) -> &Arc<VmStatus> {
        &self.vm_status
    }

    pub fn event_manager(&self) -> &EventManager {
        &self.events
    }

    /// Start the dispatcher thread against this profile's connection.
    pub fn spawn_dispatcher(&self) -> std::io::Result<DispatcherHandle> {
        self.events.spawn_dispatcher(self.connection.clone())
    }

    // ── Managers, for out-of-band inspection and removal ────────────────────

    pub fn breakpoint_manager(&self) -> &Arc<BreakpointManager> {
        self.breakpoints.manager()
    }

    pub fn method_entry_manager(&self) -> &Arc<MethodEntryManager> {
        self.method_entries.manager()
    }

    pub fn method_exit_manager(&self) -> &Arc<MethodExitManager> {
        self.method_exits.manager()
    }

    pub fn monitor_wait_manager(&self) -> &Arc<MonitorWaitManager> {
        self.monitor_waits.manager()
    }

    pub fn monitor_waited_manager(&self) -> &Arc<MonitorWaitedManager> {
        self.monitor_waiteds.manager()
    }

    pub fn monitor_contended_enter_manager(&self) -> &Arc<MonitorContendedEnterManager> {
        self.monitor_contended_enters.manager()
    }

    pub fn monitor_contended_entered_manager(&self) -> &Arc<MonitorContendedEnteredManager> {
        self.monitor_contended_entereds.manager()
    }

    pub fn class_prepare_manager(&self) -> &Arc<ClassPrepareManager> {
        self.class_prepares.manager()
    }

    pub fn class_unload_manager(&self) -> &Arc<ClassUnloadManager> {
        self.class_unloads.manager()
    }

    pub fn thread_start_manager(&self) -> &Arc<ThreadStartManager> {
        self.thread_starts.manager()
    }

    pub fn thread_death_manager(&self) -> &Arc<ThreadDeathManager> {
        self.thread_deaths.manager()
    }

    pub fn exception_manager(&self) -> &Arc<ExceptionManager> {
        self.exceptions.manager()
    }

    pub fn access_watchpoint_manager(&self) -> &Arc<AccessWatchpointManager> {
        self.access_watchpoints.manager()
    }

    pub fn modification_watchpoint_manager(&self) -> &Arc<ModificationWatchpointManager> {
        self.modification_watchpoints.manager()
    }

    pub fn step_manager(&self) -> &Arc<StepManager> {
        self.steps.manager()
    }

    pub fn vm_start_manager(&self) -> &Arc<VmStartManager> {
        self.vm_starts.manager()
    }

    pub fn vm_death_manager(&self) -> &Arc<VmDeathManager> {
        self.vm_deaths.manager()
    }

    pub fn vm_disconnect_manager(&self) -> &Arc<VmDisconnectManager> {
        self.vm_disconnects.manager()
    }

    // ── Subscriptions ───────────────────────────────────────────────────────

    pub fn on_breakpoint_with_data(
        &self,
        source_name: &str,
        line_number: u32,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.breakpoints.subscribe(
            BreakpointKey {
                source_name: source_name.to_string(),
                line_number,
            },
            extra_args,
        )
    }

    pub fn on_breakpoint(
        &self,
        source_name: &str,
        line_number: u32,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_breakpoint_with_data(
            source_name,
            line_number,
            extra_args,
        )?))
    }

    pub fn on_method_entry_with_data(
        &self,
        class_name: &str,
        method_name: &str,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.method_entries.subscribe(
            MethodEntryKey {
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
            },
            extra_args,
        )
    }

    pub fn on_method_entry(
        &self,
        class_name: &str,
        method_name: &str,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_method_entry_with_data(
            class_name,
            method_name,
            extra_args,
        )?))
    }

    pub fn on_method_exit_with_data(
        &self,
        class_name: &str,
        method_name: &str,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.method_exits.subscribe(
            MethodExitKey {
                class_name: class_name.to_string(),
                method_name: method_name.to_string(),
            },
            extra_args,
        )
    }

    pub fn on_method_exit(
        &self,
        class_name: &str,
        method_name: &str,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_method_exit_with_data(
            class_name,
            method_name,
            extra_args,
        )?))
    }

    pub fn on_monitor_wait_with_data(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.monitor_waits.subscribe(MonitorWaitKey, extra_args)
    }

    pub fn on_monitor_wait(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_monitor_wait_with_data(extra_args)?))
    }

    pub fn on_monitor_waited_with_data(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.monitor_waiteds.subscribe(MonitorWaitedKey, extra_args)
    }

    pub fn on_monitor_waited(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_monitor_waited_with_data(extra_args)?))
    }

    pub fn on_monitor_contended_enter_with_data(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.monitor_contended_enters
            .subscribe(MonitorContendedEnterKey, extra_args)
    }

    pub fn on_monitor_contended_enter(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(
            self.on_monitor_contended_enter_with_data(extra_args)?,
        ))
    }

    pub fn on_monitor_contended_entered_with_data(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.monitor_contended_entereds
            .subscribe(MonitorContendedEnteredKey, extra_args)
    }

    pub fn on_monitor_contended_entered(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(
            self.on_monitor_contended_entered_with_data(extra_args)?,
        ))
    }

    pub fn on_class_prepare_with_data(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.class_prepares.subscribe(ClassPrepareKey, extra_args)
    }

    pub fn on_class_prepare(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_class_prepare_with_data(extra_args)?))
    }

    pub fn on_class_unload_with_data(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.class_unloads.subscribe(ClassUnloadKey, extra_args)
    }

    pub fn on_class_unload(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_class_unload_with_data(extra_args)?))
    }

    pub fn on_thread_start_with_data(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.thread_starts.subscribe(ThreadStartKey, extra_args)
    }

    pub fn on_thread_start(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_thread_start_with_data(extra_args)?))
    }

    pub fn on_thread_death_with_data(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.thread_deaths.subscribe(ThreadDeathKey, extra_args)
    }

    pub fn on_thread_death(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_thread_death_with_data(extra_args)?))
    }

    /// Subscribe to throw events of one exception class.
    pub fn on_exception_with_data(
        &self,
        class_name: &str,
        notify_caught: bool,
        notify_uncaught: bool,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.exceptions.subscribe(
            ExceptionKey {
                class_name: Some(class_name.to_string()),
                notify_caught,
                notify_uncaught,
            },
            extra_args,
        )
    }

    pub fn on_exception(
        &self,
        class_name: &str,
        notify_caught: bool,
        notify_uncaught: bool,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_exception_with_data(
            class_name,
            notify_caught,
            notify_uncaught,
            extra_args,
        )?))
    }

    /// Subscribe to throw events of every exception class.
    pub fn on_all_exceptions_with_data(
        &self,
        notify_caught: bool,
        notify_uncaught: bool,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.exceptions.subscribe(
            ExceptionKey {
                class_name: None,
                notify_caught,
                notify_uncaught,
            },
            extra_args,
        )
    }

    pub fn on_all_exceptions(
        &self,
        notify_caught: bool,
        notify_uncaught: bool,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_all_exceptions_with_data(
            notify_caught,
            notify_uncaught,
            extra_args,
        )?))
    }

    pub fn on_access_watchpoint_with_data(
        &self,
        class_name: &str,
        field_name: &str,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.access_watchpoints.subscribe(
            AccessWatchpointKey {
                class_name: class_name.to_string(),
                field_name: field_name.to_string(),
            },
            extra_args,
        )
    }

    pub fn on_access_watchpoint(
        &self,
        class_name: &str,
        field_name: &str,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_access_watchpoint_with_data(
            class_name,
            field_name,
            extra_args,
        )?))
    }

    pub fn on_modification_watchpoint_with_data(
        &self,
        class_name: &str,
        field_name: &str,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.modification_watchpoints.subscribe(
            ModificationWatchpointKey {
                class_name: class_name.to_string(),
                field_name: field_name.to_string(),
            },
            extra_args,
        )
    }

    pub fn on_modification_watchpoint(
        &self,
        class_name: &str,
        field_name: &str,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_modification_watchpoint_with_data(
            class_name,
            field_name,
            extra_args,
        )?))
    }

    /// Subscribe to a single step event on a thread. The stream delivers
    /// exactly one event, then closes itself and removes the request.
    pub fn on_step_with_data(
        &self,
        thread: ThreadId,
        size: StepSize,
        depth: StepDepth,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.steps
            .subscribe_single_shot(StepKey { thread, size, depth }, extra_args)
    }

    pub fn on_step(
        &self,
        thread: ThreadId,
        size: StepSize,
        depth: StepDepth,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_step_with_data(
            thread, size, depth, extra_args,
        )?))
    }

    pub fn on_vm_start_with_data(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.vm_starts.subscribe(VmStartKey, extra_args)
    }

    pub fn on_vm_start(&self, extra_args: Vec<Argument>) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_vm_start_with_data(extra_args)?))
    }

    pub fn on_vm_death_with_data(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.vm_deaths.subscribe(VmDeathKey, extra_args)
    }

    pub fn on_vm_death(&self, extra_args: Vec<Argument>) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_vm_death_with_data(extra_args)?))
    }

    pub fn on_vm_disconnect_with_data(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventDataPipeline, RequestError> {
        self.vm_disconnects.subscribe(VmDisconnectKey, extra_args)
    }

    pub fn on_vm_disconnect(
        &self,
        extra_args: Vec<Argument>,
    ) -> Result<EventPipeline, RequestError> {
        Ok(drop_data(self.on_vm_disconnect_with_data(extra_args)?))
    }
}

fn drop_data(pipeline: EventDataPipeline) -> EventPipeline {
    pipeline.map(|(event, _)| event)
}
