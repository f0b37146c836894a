//! The orchestration queue: FIFO within priority tier, bounded to
//! `maxConcurrentOrchestrations` in flight (spec §4.1, §5).

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

/// Source-derived priority tier for orchestration queue ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    User,
    Scheduled,
    Background,
}

impl Priority {
    fn rank(self) -> u8 {
        match self {
            Priority::User => 2,
            Priority::Scheduled => 1,
            Priority::Background => 0,
        }
    }
}

struct WaitEntry {
    seq: u64,
    priority: Priority,
    tenant_key: String,
}

impl PartialEq for WaitEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for WaitEntry {}

impl PartialOrd for WaitEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for WaitEntry {
    /// `BinaryHeap` pops the greatest element; higher priority tier
    /// should pop first, and within a tier the lowest `seq` (earliest
    /// enqueued) should pop first, so we reverse the `seq` comparison.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .rank()
            .cmp(&other.priority.rank())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    in_flight: u32,
    max_concurrent: u32,
    waiting: BinaryHeap<WaitEntry>,
    next_seq: u64,
}

pub struct OrchestrationQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Debug)]
pub struct OrchestrationLease {
    id_str: String,
    tenant_key: String,
}

impl OrchestrationLease {
    pub fn id(&self) -> &str {
        &self.id_str
    }

    pub fn tenant_key(&self) -> &str {
        &self.tenant_key
    }
}

#[derive(Debug)]
pub enum QueueWaitOutcome {
    Allowed(OrchestrationLease),
    TimedOut { attempts: u32 },
    Aborted { attempts: u32 },
}

impl OrchestrationQueue {
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            state: Mutex::new(QueueState {
                in_flight: 0,
                max_concurrent: max_concurrent.max(1),
                waiting: BinaryHeap::new(),
                next_seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub async fn acquire(
        &self,
        tenant_key: String,
        priority: Priority,
        wait: Duration,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> QueueWaitOutcome {
        let seq = {
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiting.push(WaitEntry { seq, priority, tenant_key: tenant_key.clone() });
            seq
        };

        let deadline = Instant::now() + wait;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            {
                let mut state = self.state.lock().await;
                let is_next = state.waiting.peek().is_some_and(|top| top.seq == seq);
                if is_next && state.in_flight < state.max_concurrent {
                    state.waiting.pop();
                    state.in_flight += 1;
                    return QueueWaitOutcome::Allowed(OrchestrationLease {
                        id_str: Uuid::new_v4().to_string(),
                        tenant_key,
                    });
                }
            }

            if cancel.is_cancelled() {
                self.remove_waiter(seq).await;
                return QueueWaitOutcome::Aborted { attempts };
            }
            if Instant::now() >= deadline {
                self.remove_waiter(seq).await;
                return QueueWaitOutcome::TimedOut { attempts };
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.remove_waiter(seq).await;
                    return QueueWaitOutcome::Aborted { attempts };
                }
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }
    }

    async fn remove_waiter(&self, seq: u64) {
        let mut state = self.state.lock().await;
        let remaining: BinaryHeap<WaitEntry> = state.waiting.drain().filter(|e| e.seq != seq).collect();
        state.waiting = remaining;
    }

    pub async fn release(&self, _lease: &OrchestrationLease) {
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);
        drop(state);
        self.notify.notify_waiters();
    }

    pub async fn queued_tenant_keys(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.waiting.iter().map(|e| e.tenant_key.clone()).collect()
    }
}
