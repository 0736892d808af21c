//! Per-key deduplication of concurrent async work.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use tokio::sync::oneshot;

/// At most one in-flight computation per key. Callers arriving while one runs
/// wait for it and receive a clone of its result.
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, Vec<oneshot::Sender<V>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key`, or join the run already in flight.
    ///
    /// If the leading caller is cancelled before finishing, its joiners start
    /// over and one of them leads the next run.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        while let Some(waiter) = self.join(&key) {
            if let Ok(value) = waiter.await {
                return value;
            }
        }

        let mut guard = LeaderGuard {
            flight: self,
            key: Some(key),
        };
        let value = work().await;
        guard.finish(&value);
        value
    }

    /// Whether a run is in flight for `key`.
    pub fn is_running(&self, key: &K) -> bool {
        self.inflight.lock().contains_key(key)
    }

    /// Register as a waiter if a run is in flight, otherwise claim the key.
    fn join(&self, key: &K) -> Option<oneshot::Receiver<V>> {
        let mut inflight = self.inflight.lock();
        match inflight.get_mut(key) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Some(rx)
            }
            None => {
                inflight.insert(key.clone(), Vec::new());
                None
            }
        }
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the key when the leader finishes or is dropped mid-flight.
struct LeaderGuard<'a, K: Eq + Hash, V> {
    flight: &'a SingleFlight<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V: Clone> LeaderGuard<'_, K, V> {
    fn finish(&mut self, value: &V) {
        if let Some(key) = self.key.take() {
            let waiters = self.flight.inflight.lock().remove(&key).unwrap_or_default();
            for waiter in waiters {
                let _ = waiter.send(value.clone());
            }
        }
    }
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        // Dropping the senders wakes the joiners with an error so they retry.
        if let Some(key) = self.key.take() {
            self.flight.inflight.lock().remove(&key);
        }
    }
}
