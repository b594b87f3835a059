//! Per-key de-duplication of concurrent work.
//!
//! The first caller for a key becomes the leader and runs the work; callers
//! arriving while it runs block on a condvar and receive a clone of the
//! leader's result. A leader that unwinds releases its waiters with
//! `PipelineError::Flight`. A waiter whose own token is cancelled stops
//! waiting with `PipelineError::Cancelled`; the leader keeps running.

use sentitap_core::data::CancelToken;
use sentitap_core::PipelineError;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How often a waiting follower re-checks its cancel token.
const CANCEL_POLL: Duration = Duration::from_millis(25);

struct Flight<V> {
    result: Mutex<Option<Result<V, PipelineError>>>,
    done: Condvar,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whether the caller ran the work or waited for someone else's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

/// Table of in-flight work, one entry per key.
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, Arc<Flight<V>>>>,
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

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Empty table.
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently being worked on.
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }

    /// Run `work` for `key` unless another caller is already running it.
    ///
    /// `cancel` only governs the wait: a follower whose token is cancelled
    /// returns `Cancelled` without affecting the leader. The leader's `work`
    /// observes cancellation itself.
    pub fn run<F>(
        &self,
        key: K,
        cancel: &CancelToken,
        work: F,
    ) -> (Result<V, PipelineError>, Role)
    where
        F: FnOnce() -> Result<V, PipelineError>,
    {
        let (flight, role) = {
            let mut inflight = lock(&self.inflight);
            match inflight.get(&key) {
                Some(existing) => (Arc::clone(existing), Role::Follower),
                None => {
                    let flight = Arc::new(Flight::new());
                    inflight.insert(key.clone(), Arc::clone(&flight));
                    (flight, Role::Leader)
                }
            }
        };

        match role {
            Role::Follower => (wait(&flight, cancel), Role::Follower),
            Role::Leader => {
                let mut guard = LeaderGuard {
                    owner: self,
                    key,
                    flight,
                    completed: false,
                };
                let result = work();
                guard.complete(result.clone());
                (result, Role::Leader)
            }
        }
    }
}

fn wait<V: Clone>(flight: &Flight<V>, cancel: &CancelToken) -> Result<V, PipelineError> {
    let mut slot = lock(&flight.result);
    loop {
        if let Some(result) = slot.as_ref() {
            return result.clone();
        }
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        slot = flight
            .done
            .wait_timeout(slot, CANCEL_POLL)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}

/// Publishes the leader's result; on unwind publishes a `Flight` error instead.
struct LeaderGuard<'a, K, V>
where
    K: Eq + Hash,
{
    owner: &'a SingleFlight<K, V>,
    key: K,
    flight: Arc<Flight<V>>,
    completed: bool,
}

impl<K, V> LeaderGuard<'_, K, V>
where
    K: Eq + Hash,
{
    fn complete(&mut self, result: Result<V, PipelineError>) {
        self.publish(result);
        self.completed = true;
    }

    fn publish(&self, result: Result<V, PipelineError>) {
        lock(&self.owner.inflight).remove(&self.key);
        *lock(&self.flight.result) = Some(result);
        self.flight.done.notify_all();
    }
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if !self.completed {
            tracing::error!("in-flight leader aborted; releasing waiters");
            self.publish(Err(PipelineError::Flight(
                "leader aborted before producing a result".into(),
            )));
        }
    }
}
