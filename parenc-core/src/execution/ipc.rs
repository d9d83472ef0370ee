//! Named IPC primitives shared between the controller and pool workers.
//!
//! The registry hands out `Arc` handles to queues, events, locks, and shared
//! scalars, keyed by caller-chosen string ids. Handles stay valid after the
//! registry entry is deleted; deletion only stops new lookups. The registry
//! table is guarded by its own mutexes, separate from scheduler and pool
//! state.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};

// ============================================================================
// QUEUE
// ============================================================================

/// An ordered queue of serialized payloads, usable from any worker thread.
///
/// `put` serializes the payload to JSON; a payload that cannot be serialized
/// fails with `CoreError::Resource`. A bounded queue rejects `put` when full
/// rather than blocking the producer.
pub struct IpcQueue {
    items: Mutex<VecDeque<Value>>,
    available: Condvar,
    capacity: Option<usize>,
}

impl IpcQueue {
    fn new(capacity: Option<usize>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Appends a payload to the queue.
    pub fn put<T: Serialize>(&self, payload: &T) -> CoreResult<()> {
        let value = serde_json::to_value(payload)
            .map_err(|e| CoreError::Resource(format!("unserializable queue payload: {e}")))?;
        let mut items = self.items.lock().unwrap();
        if let Some(cap) = self.capacity {
            if items.len() >= cap {
                return Err(CoreError::Resource(format!(
                    "queue is full (capacity {cap})"
                )));
            }
        }
        items.push_back(value);
        self.available.notify_one();
        Ok(())
    }

    /// Pops the oldest payload.
    ///
    /// With `timeout: None` this is a non-blocking poll; with a timeout the
    /// call waits at most that long and returns `None` if nothing arrived,
    /// so consumers stay responsive to shutdown.
    pub fn get(&self, timeout: Option<Duration>) -> Option<Value> {
        let mut items = self.items.lock().unwrap();
        if let Some(value) = items.pop_front() {
            return Some(value);
        }
        let timeout = timeout?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, wait) = self.available.wait_timeout(items, remaining).unwrap();
            items = guard;
            if let Some(value) = items.pop_front() {
                return Some(value);
            }
            if wait.timed_out() {
                return None;
            }
        }
    }

    /// Pops and deserializes the oldest payload.
    pub fn get_as<T: DeserializeOwned>(&self, timeout: Option<Duration>) -> Option<T> {
        self.get(timeout)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().unwrap().is_empty()
    }

    /// Always false for unbounded queues.
    pub fn is_full(&self) -> bool {
        match self.capacity {
            Some(cap) => self.items.lock().unwrap().len() >= cap,
            None => false,
        }
    }

    pub fn clear(&self) {
        self.items.lock().unwrap().clear();
    }
}

// ============================================================================
// EVENT
// ============================================================================

/// A manually reset boolean flag with blocking waiters.
pub struct IpcEvent {
    state: Mutex<bool>,
    signal: Condvar,
}

impl IpcEvent {
    fn new() -> Self {
        Self {
            state: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut state = self.state.lock().unwrap();
        *state = true;
        self.signal.notify_all();
    }

    pub fn clear(&self) {
        *self.state.lock().unwrap() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.state.lock().unwrap()
    }

    /// Waits until the event is set. Returns the flag state on exit, so a
    /// timed wait reports `false` when the timeout elapsed first.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.state.lock().unwrap();
        match timeout {
            None => {
                while !*state {
                    state = self.signal.wait(state).unwrap();
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !*state {
                    let remaining = match deadline.checked_duration_since(Instant::now()) {
                        Some(remaining) => remaining,
                        None => return false,
                    };
                    let (guard, wait) = self.signal.wait_timeout(state, remaining).unwrap();
                    state = guard;
                    if wait.timed_out() && !*state {
                        return false;
                    }
                }
                true
            }
        }
    }
}

// ============================================================================
// LOCK
// ============================================================================

/// A named mutual-exclusion lock.
///
/// `acquire` returns an RAII guard, so the lock is released on every exit
/// path, including panics and early returns.
pub struct IpcLock {
    inner: Mutex<()>,
}

/// Guard for an acquired [`IpcLock`]; releases on drop.
pub struct IpcLockGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

impl IpcLock {
    fn new() -> Self {
        Self { inner: Mutex::new(()) }
    }

    pub fn acquire(&self) -> IpcLockGuard<'_> {
        IpcLockGuard(self.inner.lock().unwrap())
    }

    /// Runs `f` while holding the lock.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.acquire();
        f()
    }
}

// ============================================================================
// SHARED SCALAR
// ============================================================================

/// A single shared value readable and writable by any holder of the handle.
pub struct IpcScalar {
    value: Mutex<Value>,
}

impl IpcScalar {
    fn new(initial: Value) -> Self {
        Self { value: Mutex::new(initial) }
    }

    pub fn get(&self) -> Value {
        self.value.lock().unwrap().clone()
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> CoreResult<T> {
        serde_json::from_value(self.get())
            .map_err(|e| CoreError::Resource(format!("scalar type mismatch: {e}")))
    }

    pub fn set<T: Serialize>(&self, value: &T) -> CoreResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| CoreError::Resource(format!("unserializable scalar value: {e}")))?;
        *self.value.lock().unwrap() = value;
        Ok(())
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Process-wide table of IPC primitives, one map per primitive kind.
#[derive(Default)]
pub struct IpcRegistry {
    queues: Mutex<HashMap<String, Arc<IpcQueue>>>,
    events: Mutex<HashMap<String, Arc<IpcEvent>>>,
    locks: Mutex<HashMap<String, Arc<IpcLock>>>,
    scalars: Mutex<HashMap<String, Arc<IpcScalar>>>,
}

impl IpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the queue registered under `id`, creating it on first use.
    /// The capacity of an already existing queue is left unchanged.
    pub fn create_queue(&self, id: &str, capacity: Option<usize>) -> Arc<IpcQueue> {
        self.queues
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(IpcQueue::new(capacity)))
            .clone()
    }

    pub fn queue(&self, id: &str) -> CoreResult<Arc<IpcQueue>> {
        self.queues
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::ipc_not_found("queue", id))
    }

    pub fn delete_queue(&self, id: &str) -> CoreResult<()> {
        self.queues
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::ipc_not_found("queue", id))
    }

    pub fn create_event(&self, id: &str) -> Arc<IpcEvent> {
        self.events
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(IpcEvent::new()))
            .clone()
    }

    pub fn event(&self, id: &str) -> CoreResult<Arc<IpcEvent>> {
        self.events
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::ipc_not_found("event", id))
    }

    pub fn delete_event(&self, id: &str) -> CoreResult<()> {
        self.events
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::ipc_not_found("event", id))
    }

    pub fn create_lock(&self, id: &str) -> Arc<IpcLock> {
        self.locks
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(IpcLock::new()))
            .clone()
    }

    pub fn lock(&self, id: &str) -> CoreResult<Arc<IpcLock>> {
        self.locks
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::ipc_not_found("lock", id))
    }

    pub fn delete_lock(&self, id: &str) -> CoreResult<()> {
        self.locks
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::ipc_not_found("lock", id))
    }

    pub fn create_scalar<T: Serialize>(&self, id: &str, initial: &T) -> CoreResult<Arc<IpcScalar>> {
        let value = serde_json::to_value(initial)
            .map_err(|e| CoreError::Resource(format!("unserializable scalar value: {e}")))?;
        Ok(self
            .scalars
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(IpcScalar::new(value)))
            .clone())
    }

    pub fn scalar(&self, id: &str) -> CoreResult<Arc<IpcScalar>> {
        self.scalars
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::ipc_not_found("scalar", id))
    }

    pub fn delete_scalar(&self, id: &str) -> CoreResult<()> {
        self.scalars
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CoreError::ipc_not_found("scalar", id))
    }
}
