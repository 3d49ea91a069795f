// Memoization cell with external invalidation
//
// A keyed cache whose validity is decided by an external authority: the
// invalidation predicate is consulted on every lookup, which is what lets
// the cell track request removals it never sees directly. Failed
// computations are never stored, so a retry performs a fresh attempt.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

type ComputeFn<I, O, E> = Box<dyn Fn(&I) -> Result<O, E> + Send + Sync>;
type KeyFn<I, K> = Box<dyn Fn(&I) -> K + Send + Sync>;
type InvalidFn<K> = Box<dyn Fn(&K) -> bool + Send + Sync>;

/// A `key -> output` cache with a recompute predicate.
///
/// Lookup derives `k = key(input)`; if `k` is absent or the predicate
/// reports it invalid, the output is recomputed and stored, otherwise the
/// stored output is returned. The storage lock is held across recomputation
/// so simultaneous misses on one key observe a consistent output.
pub struct MemoCell<I, K, O, E> {
    storage: Mutex<HashMap<K, O>>,
    compute: ComputeFn<I, O, E>,
    key_of: KeyFn<I, K>,
    invalid: InvalidFn<K>,
}

impl<I, K, O, E> MemoCell<I, K, O, E>
where
    K: Eq + Hash + Clone,
    O: Clone,
{
    pub fn new(
        compute: impl Fn(&I) -> Result<O, E> + Send + Sync + 'static,
        key_of: impl Fn(&I) -> K + Send + Sync + 'static,
        invalid: impl Fn(&K) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            storage: Mutex::new(HashMap::new()),
            compute: Box::new(compute),
            key_of: Box::new(key_of),
            invalid: Box::new(invalid),
        }
    }

    /// Look up the output for `input`, recomputing on a miss or when the
    /// invalidation predicate rejects the stored entry.
    pub fn call(&self, input: &I) -> Result<O, E> {
        let key = (self.key_of)(input);
        let mut storage = self.storage.lock();
        if let Some(output) = storage.get(&key) {
            if !(self.invalid)(&key) {
                return Ok(output.clone());
            }
        }
        let output = (self.compute)(input)?;
        storage.insert(key, output.clone());
        Ok(output)
    }

    /// Evict a single entry.
    pub fn remove(&self, key: &K) -> Option<O> {
        self.storage.lock().remove(key)
    }

    /// Evict everything.
    pub fn clear(&self) {
        self.storage.lock().clear();
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_cell(
        computes: Arc<AtomicUsize>,
        stale: Arc<AtomicBool>,
    ) -> MemoCell<u32, u32, String, String> {
        MemoCell::new(
            move |input: &u32| {
                let n = computes.fetch_add(1, Ordering::SeqCst);
                Ok(format!("{input}-{n}"))
            },
            |input| *input,
            move |_| stale.load(Ordering::SeqCst),
        )
    }

    #[test]
    fn test_hit_returns_stored_output() {
        let computes = Arc::new(AtomicUsize::new(0));
        let cell = counting_cell(computes.clone(), Arc::new(AtomicBool::new(false)));

        let first = cell.call(&7).unwrap();
        let second = cell.call(&7).unwrap();
        assert_eq!(first, second);
        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_keys_compute_separately() {
        let computes = Arc::new(AtomicUsize::new(0));
        let cell = counting_cell(computes.clone(), Arc::new(AtomicBool::new(false)));

        cell.call(&1).unwrap();
        cell.call(&2).unwrap();
        assert_eq!(computes.load(Ordering::SeqCst), 2);
        assert_eq!(cell.len(), 2);
    }

    #[test]
    fn test_invalidation_forces_recompute() {
        let computes = Arc::new(AtomicUsize::new(0));
        let stale = Arc::new(AtomicBool::new(false));
        let cell = counting_cell(computes.clone(), stale.clone());

        let first = cell.call(&7).unwrap();
        stale.store(true, Ordering::SeqCst);
        let second = cell.call(&7).unwrap();
        assert_ne!(first, second);
        assert_eq!(computes.load(Ordering::SeqCst), 2);

        // Once valid again the recomputed entry is served.
        stale.store(false, Ordering::SeqCst);
        assert_eq!(cell.call(&7).unwrap(), second);
    }

    #[test]
    fn test_failed_computation_is_not_stored() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let cell: MemoCell<u32, u32, String, String> = MemoCell::new(
            move |input: &u32| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("refused".to_string())
                } else {
                    Ok(input.to_string())
                }
            },
            |input| *input,
            |_| false,
        );

        assert!(cell.call(&1).is_err());
        assert!(cell.is_empty());
        assert_eq!(cell.call(&1).unwrap(), "1");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_evicts_entry() {
        let computes = Arc::new(AtomicUsize::new(0));
        let cell = counting_cell(computes.clone(), Arc::new(AtomicBool::new(false)));

        cell.call(&7).unwrap();
        assert!(cell.remove(&7).is_some());
        cell.call(&7).unwrap();
        assert_eq!(computes.load(Ordering::SeqCst), 2);
    }
}
