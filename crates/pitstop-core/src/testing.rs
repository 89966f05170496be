//! Test doubles for the sync layer

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::models::Garage;
use crate::remote::{DocumentStore, RemoteError, RemoteResult};
use crate::sync::{ScheduledTask, Scheduler, TaskHandle};

/// In-memory document store that can be told to fail
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Garage>>,
    failing: AtomicBool,
    fail_calls: Mutex<HashSet<usize>>,
    calls: AtomicUsize,
}

impl MemoryStore {
    /// Fail every call while set
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the `n`th call (1-based, counting every call so far)
    pub fn fail_call(&self, n: usize) {
        self.fail_calls.lock().unwrap().insert(n);
    }

    /// Calls made so far, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, id: &str) -> Option<Garage> {
        self.docs.lock().unwrap().get(id).cloned()
    }

    pub fn insert(&self, id: &str, data: Garage) {
        self.docs.lock().unwrap().insert(id.to_string(), data);
    }

    fn call(&self) -> RemoteResult<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) || self.fail_calls.lock().unwrap().contains(&n) {
            return Err(RemoteError::Unavailable(format!("call {} rejected", n)));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, id: &str, data: &Garage) -> RemoteResult<()> {
        self.call()?;
        self.insert(id, data.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> RemoteResult<Option<Garage>> {
        self.call()?;
        Ok(self.get(id))
    }

    async fn delete_by_id(&self, id: &str) -> RemoteResult<()> {
        self.call()?;
        self.docs.lock().unwrap().remove(id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Memory store whose upserts wait until the gate is opened
pub struct GatedStore {
    pub store: MemoryStore,
    gate: Semaphore,
    entered: Notify,
}

impl Default for GatedStore {
    fn default() -> Self {
        Self {
            store: MemoryStore::default(),
            gate: Semaphore::new(0),
            entered: Notify::new(),
        }
    }
}

impl GatedStore {
    /// Wait until an upsert is blocked on the gate
    pub async fn upsert_started(&self) {
        self.entered.notified().await;
    }

    /// Let every upsert through from now on
    pub fn open(&self) {
        self.gate.close();
    }
}

#[async_trait]
impl DocumentStore for GatedStore {
    async fn upsert(&self, id: &str, data: &Garage) -> RemoteResult<()> {
        self.entered.notify_one();
        // A closed gate lets everything through
        let _ = self.gate.acquire().await;
        self.store.upsert(id, data).await
    }

    async fn get_by_id(&self, id: &str) -> RemoteResult<Option<Garage>> {
        self.store.get_by_id(id).await
    }

    async fn delete_by_id(&self, id: &str) -> RemoteResult<()> {
        self.store.delete_by_id(id).await
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

struct PendingTask {
    delay: Duration,
    task: ScheduledTask,
    cancelled: Arc<AtomicBool>,
}

/// Scheduler that records tasks and runs them only when asked
#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<PendingTask>>,
    history: Mutex<Vec<Duration>>,
}

impl ManualScheduler {
    /// Every delay ever scheduled, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.history.lock().unwrap().clone()
    }

    /// Scheduled tasks not yet run or cancelled
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Run the oldest live task, returning its delay
    pub async fn run_next(&self) -> Option<Duration> {
        let next = {
            let mut pending = self.pending.lock().unwrap();
            pending.retain(|t| !t.cancelled.load(Ordering::SeqCst));
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        let next = next?;
        next.task.await;
        Some(next.delay)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> TaskHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.history.lock().unwrap().push(delay);
        self.pending.lock().unwrap().push(PendingTask {
            delay,
            task,
            cancelled: cancelled.clone(),
        });
        TaskHandle::new(move || cancelled.store(true, Ordering::SeqCst))
    }
}
