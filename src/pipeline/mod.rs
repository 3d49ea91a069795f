// Closable push-stream pipelines
//
// A pipeline is an append-only graph of stages. Pushing an item walks
// downstream stages in registration order on the caller's thread; closing
// any handle closes the whole chain from its root, downstream stages first,
// and runs each stage's close callbacks exactly once.
//
// `on_close` is the teardown primitive; `union_output` (merge a foreign
// pipeline's teardown into this one) is derived from it.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

// Stage lifecycle: OPEN -> CLOSING -> CLOSED. CLOSING is held only while
// the single close pass runs its callbacks.
const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// A downstream stage: receives items and close notifications from its
/// parent node.
trait Stage<T>: Send + Sync {
    fn push(&self, item: &T);
    fn close(&self);
}

/// Type-erased handle to a pipeline's root, letting derived handles of any
/// item type close the whole chain.
trait Close: Send + Sync {
    fn close(&self);
}

struct Node<T> {
    state: AtomicU8,
    downstream: Mutex<Vec<Arc<dyn Stage<T>>>>,
    // None once the close pass has drained the callbacks.
    callbacks: Mutex<Option<Vec<Box<dyn FnOnce() + Send>>>>,
}

impl<T> Node<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(OPEN),
            downstream: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Some(Vec::new())),
        })
    }

    fn push(&self, item: &T) {
        if self.state.load(Ordering::Acquire) != OPEN {
            return;
        }
        // Snapshot outside the lock: stages may deregister or close
        // reentrantly while handling the item.
        let children: Vec<Arc<dyn Stage<T>>> = self.downstream.lock().clone();
        for child in children {
            child.push(item);
        }
    }

    fn attach(&self, stage: Arc<dyn Stage<T>>) {
        let mut children = self.downstream.lock();
        if self.state.load(Ordering::Acquire) == OPEN {
            children.push(stage);
        } else {
            // The chain is already torn down; give the new stage its close
            // notification immediately.
            drop(children);
            stage.close();
        }
    }

    fn on_close(&self, callback: Box<dyn FnOnce() + Send>) {
        let mut slot = self.callbacks.lock();
        match slot.as_mut() {
            Some(list) => list.push(callback),
            None => {
                // Registered after the close pass drained: run now so
                // teardown is never lost.
                drop(slot);
                callback();
            }
        }
    }

    fn close(&self) {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // Downstream stages close first, so callbacks overall run bottom-up.
        let children: Vec<Arc<dyn Stage<T>>> = std::mem::take(&mut *self.downstream.lock());
        for child in children {
            child.close();
        }
        let callbacks = self.callbacks.lock().take();
        if let Some(list) = callbacks {
            for callback in list {
                callback();
            }
        }
        self.state.store(CLOSED, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) != OPEN
    }
}

impl<T> Close for Node<T> {
    fn close(&self) {
        Node::close(self);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operator stages
// ─────────────────────────────────────────────────────────────────────────────

struct MapStage<T, U> {
    f: Box<dyn Fn(T) -> U + Send + Sync>,
    out: Arc<Node<U>>,
}

impl<T, U> Stage<T> for MapStage<T, U>
where
    T: Clone + Send + Sync + 'static,
    U: Send + Sync + 'static,
{
    fn push(&self, item: &T) {
        let mapped = (self.f)(item.clone());
        self.out.push(&mapped);
    }

    fn close(&self) {
        Node::close(&self.out);
    }
}

struct FilterStage<T> {
    pred: Box<dyn Fn(&T) -> bool + Send + Sync>,
    out: Arc<Node<T>>,
}

impl<T: Send + Sync + 'static> Stage<T> for FilterStage<T> {
    fn push(&self, item: &T) {
        if (self.pred)(item) {
            self.out.push(item);
        }
    }

    fn close(&self) {
        Node::close(&self.out);
    }
}

struct InspectStage<T> {
    f: Box<dyn Fn(&T) + Send + Sync>,
    out: Arc<Node<T>>,
}

impl<T: Send + Sync + 'static> Stage<T> for InspectStage<T> {
    fn push(&self, item: &T) {
        (self.f)(item);
        self.out.push(item);
    }

    fn close(&self) {
        Node::close(&self.out);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public handle
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to one stage of a push-stream.
///
/// Deriving operators (`map`, `filter`, `noop`, `for_each`) appends stages;
/// all handles derived from the same source share one root, and closing any
/// of them closes the entire chain.
pub struct Pipeline<T> {
    node: Arc<Node<T>>,
    root: Arc<dyn Close>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            root: self.root.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Pipeline<T> {
    /// Create a new source pipeline.
    pub fn new() -> Self {
        let node = Node::new();
        Self {
            root: node.clone() as Arc<dyn Close>,
            node,
        }
    }

    fn derive<U>(&self, stage: Arc<dyn Stage<T>>, out: Arc<Node<U>>) -> Pipeline<U> {
        self.node.attach(stage);
        Pipeline {
            node: out,
            root: self.root.clone(),
        }
    }

    /// Push an item into this stage, walking downstream in registration
    /// order. Ignored once the pipeline is closed.
    pub fn push(&self, item: T) {
        self.node.push(&item);
    }

    /// Transform each item.
    pub fn map<U>(&self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Pipeline<U>
    where
        U: Clone + Send + Sync + 'static,
    {
        let out = Node::new();
        self.derive(
            Arc::new(MapStage {
                f: Box::new(f),
                out: out.clone(),
            }),
            out,
        )
    }

    /// Keep only items matching the predicate.
    pub fn filter(&self, pred: impl Fn(&T) -> bool + Send + Sync + 'static) -> Pipeline<T> {
        let out = Node::new();
        self.derive(
            Arc::new(FilterStage {
                pred: Box::new(pred),
                out: out.clone(),
            }),
            out,
        )
    }

    /// Observe without transformation: a passthrough fork point.
    pub fn noop(&self) -> Pipeline<T> {
        let out = Node::new();
        self.derive(
            Arc::new(InspectStage {
                f: Box::new(|_: &T| {}),
                out: out.clone(),
            }),
            out,
        )
    }

    /// Run `f` on each item, forwarding items unchanged.
    pub fn for_each(&self, f: impl Fn(&T) + Send + Sync + 'static) -> Pipeline<T> {
        let out = Node::new();
        self.derive(
            Arc::new(InspectStage {
                f: Box::new(f),
                out: out.clone(),
            }),
            out,
        )
    }

    /// Register a teardown callback on this stage.
    ///
    /// Callbacks run exactly once during close, in registration order per
    /// stage, downstream stages before upstream ones. Registering on an
    /// already-closed pipeline runs the callback immediately.
    pub fn on_close(&self, callback: impl FnOnce() + Send + 'static) {
        self.node.on_close(Box::new(callback));
    }

    /// Merge a foreign pipeline's teardown into this one: closing the
    /// returned pipeline (or any handle of this chain) also closes `other`.
    /// Items flowing through `other` are ignored here.
    pub fn union_output<U>(&self, other: &Pipeline<U>) -> Pipeline<T>
    where
        U: Clone + Send + Sync + 'static,
    {
        let joined = self.noop();
        let foreign = other.clone();
        joined.on_close(move || foreign.close());
        joined
    }

    /// Close the entire chain this handle belongs to. Idempotent and
    /// reentrancy-safe.
    pub fn close(&self) {
        self.root.close();
    }

    /// True once close has begun anywhere in the chain.
    pub fn is_closed(&self) -> bool {
        self.node.is_closed()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Pipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}
