//! Reservation lifecycle: `held -> consumed -> released` (spec §4.1).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::Inner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    Held,
    Consumed,
    Released,
}

impl ReservationState {
    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => ReservationState::Held,
            1 => ReservationState::Consumed,
            _ => ReservationState::Released,
        }
    }
}

/// A pending charge against the admission controller's global counters,
/// and — when `tenant_key` is set — against that tenant's per-run/per-team
/// counters too.
pub struct CapacityReservation {
    id: Uuid,
    admission: Arc<Inner>,
    tenant_key: Option<String>,
    requests: u32,
    llm: u32,
    state: AtomicU8,
    released: AtomicBool,
    ttl: Duration,
    last_heartbeat: Mutex<Instant>,
}

impl CapacityReservation {
    pub(super) fn new(admission: Arc<Inner>, tenant_key: Option<String>, requests: u32, llm: u32, ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            admission,
            tenant_key,
            requests,
            llm,
            state: AtomicU8::new(0),
            released: AtomicBool::new(false),
            ttl,
            last_heartbeat: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ReservationState {
        ReservationState::from_tag(self.state.load(Ordering::SeqCst))
    }

    pub fn requests_charged(&self) -> u32 {
        self.requests
    }

    pub fn llm_charged(&self) -> u32 {
        self.llm
    }

    /// Transition to `consumed`. The caller now owns active-count
    /// bookkeeping for the work this reservation admitted (spec §4.1:
    /// admission vs. active are tracked separately).
    pub fn consume(&self) {
        let _ = self
            .state
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// Refresh the TTL clock. Call periodically (~5s) while work runs.
    pub async fn heartbeat(&self) {
        *self.last_heartbeat.lock().await = Instant::now();
    }

    pub fn is_expired(&self) -> bool {
        if self.released.load(Ordering::SeqCst) {
            return false;
        }
        // best-effort non-blocking read; a heartbeat in flight just means
        // we might sweep one tick later, which is fine for a TTL check.
        match self.last_heartbeat.try_lock() {
            Ok(guard) => guard.elapsed() > self.ttl,
            Err(_) => false,
        }
    }

    /// Decrement the appropriate counters. Idempotent: a second release
    /// of an already-released reservation is a no-op.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.store(2, Ordering::SeqCst);
        let mut totals = self.admission.totals.write().await;
        totals.requests = totals.requests.saturating_sub(self.requests);
        totals.llm = totals.llm.saturating_sub(self.llm);
        drop(totals);

        if let Some(tenant_key) = &self.tenant_key {
            let mut per_tenant = self.admission.per_tenant.write().await;
            if let Some(entry) = per_tenant.get_mut(tenant_key) {
                entry.requests = entry.requests.saturating_sub(self.requests);
                entry.llm = entry.llm.saturating_sub(self.llm);
                if entry.requests == 0 && entry.llm == 0 {
                    per_tenant.remove(tenant_key);
                }
            }
        }

        self.admission.live_reservations.write().await.remove(&self.id);

        tracing::debug!(
            reservation_id = %self.id,
            requests = self.requests,
            llm = self.llm,
            "reservation released"
        );
    }
}

// Deliberately not `Clone`: two independent copies would each believe
// they own the charge and could double-release it. Share a reservation
// across a sweeper and its owner via `Arc<CapacityReservation>` instead.

impl std::fmt::Debug for CapacityReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapacityReservation")
            .field("id", &self.id)
            .field("requests", &self.requests)
            .field("llm", &self.llm)
            .field("state", &self.state())
            .finish()
    }
}
