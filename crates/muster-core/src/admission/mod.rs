//! Runtime Admission Controller (spec §4.1).
//!
//! Enforces global upper bounds on concurrent requests and LLM calls,
//! serializes orchestration starts beyond a configured concurrency, and
//! hands out TTL-bound leases. Counters live behind a single
//! `tokio::sync::RwLock` — read-heavy snapshots, write-heavy mutation.

mod orchestration_queue;
mod reservation;

pub use orchestration_queue::{OrchestrationLease, OrchestrationQueue, Priority, QueueWaitOutcome};
pub use reservation::{CapacityReservation, ReservationState};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::error::AdmissionReason;

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    requests: u32,
    llm: u32,
}

/// A point-in-time view of admission state (spec §3's
/// `RuntimeCapacitySnapshot`).
#[derive(Debug, Clone)]
pub struct RuntimeCapacitySnapshot {
    pub active_requests: u32,
    pub active_llm: u32,
    pub max_total_active_requests: u32,
    pub max_total_active_llm: u32,
    pub max_parallel_subagents_per_run: u32,
    pub max_parallel_teammates_per_team: u32,
    pub max_concurrent_orchestrations: u32,
    pub capacity_wait_ms: u64,
    pub capacity_poll_ms: u64,
    pub active_orchestration_ids: Vec<String>,
    pub queued_tool_names: Vec<String>,
}

/// Outcome of `reserveWithWait` (spec §4.1).
pub enum ReserveOutcome {
    Allowed(Arc<CapacityReservation>),
    Aborted { attempts: u32 },
    TimedOut { attempts: u32, reasons: Vec<AdmissionReason> },
    Blocked { reasons: Vec<AdmissionReason> },
}

struct Inner {
    totals: RwLock<Totals>,
    /// Requests/llm currently reserved per tenant key, for the per-run
    /// (`max_parallel_subagents_per_run`) and per-team
    /// (`max_parallel_teammates_per_team`) caps — distinct from `totals`,
    /// which bounds the process-wide aggregate. An entry is removed once
    /// its reservation releases back to zero.
    per_tenant: RwLock<HashMap<String, Totals>>,
    /// Every reservation currently held, so the background sweeper (spec
    /// §9) can find expired ones on its own instead of depending on a
    /// caller-assembled list. A reservation removes itself on release.
    live_reservations: RwLock<HashMap<Uuid, Arc<CapacityReservation>>>,
    config: RuntimeConfig,
    orchestration_queue: OrchestrationQueue,
    active_orchestration_ids: RwLock<VecDeque<String>>,
}

#[derive(Clone)]
pub struct AdmissionController {
    inner: Arc<Inner>,
}

impl AdmissionController {
    pub fn new(config: RuntimeConfig) -> Self {
        let orchestration_queue = OrchestrationQueue::new(config.max_concurrent_orchestrations);
        Self {
            inner: Arc::new(Inner {
                totals: RwLock::new(Totals::default()),
                per_tenant: RwLock::new(HashMap::new()),
                live_reservations: RwLock::new(HashMap::new()),
                config,
                orchestration_queue,
                active_orchestration_ids: RwLock::new(VecDeque::new()),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Non-blocking: if projected totals stay within configured maxima,
    /// atomically charge them and return a held reservation; otherwise
    /// return the limit reasons that would be exceeded.
    pub async fn try_reserve(
        &self,
        additional_requests: u32,
        additional_llm: u32,
    ) -> Result<Arc<CapacityReservation>, Vec<AdmissionReason>> {
        let mut totals = self.inner.totals.write().await;
        let mut reasons = Vec::new();

        if totals.requests + additional_requests > self.inner.config.max_total_active_requests {
            reasons.push(AdmissionReason::MaxTotalRequests);
        }
        if totals.llm + additional_llm > self.inner.config.max_total_active_llm {
            reasons.push(AdmissionReason::MaxTotalLlm);
        }
        if !reasons.is_empty() {
            tracing::debug!(?reasons, "admission denied");
            return Err(reasons);
        }

        totals.requests += additional_requests;
        totals.llm += additional_llm;
        tracing::debug!(
            requests = additional_requests,
            llm = additional_llm,
            total_requests = totals.requests,
            total_llm = totals.llm,
            "admission granted"
        );

        let reservation = Arc::new(CapacityReservation::new(
            self.inner.clone_totals_handle(),
            None,
            additional_requests,
            additional_llm,
            Duration::from_millis(self.inner.config.reservation_ttl_ms),
        ));
        self.inner.live_reservations.write().await.insert(reservation.id(), reservation.clone());
        Ok(reservation)
    }

    /// Like [`Self::try_reserve`], but additionally bounds `additional_requests`
    /// against `max_parallel_subagents_per_run` and `additional_llm` against
    /// `max_parallel_teammates_per_team`, scoped to `tenant_key` rather than
    /// the process-wide totals (spec §4.1's `max_parallel_subagents_per_run`
    /// / `max_parallel_teammates_per_team` admission reasons). Callers that
    /// want a single run's dispatch tracked independently of every other
    /// concurrent run should pass a tenant key unique to that run.
    pub async fn try_reserve_for_tenant(
        &self,
        tenant_key: &str,
        additional_requests: u32,
        additional_llm: u32,
    ) -> Result<Arc<CapacityReservation>, Vec<AdmissionReason>> {
        let mut totals = self.inner.totals.write().await;
        let mut per_tenant = self.inner.per_tenant.write().await;
        let mut reasons = Vec::new();

        if totals.requests + additional_requests > self.inner.config.max_total_active_requests {
            reasons.push(AdmissionReason::MaxTotalRequests);
        }
        if totals.llm + additional_llm > self.inner.config.max_total_active_llm {
            reasons.push(AdmissionReason::MaxTotalLlm);
        }

        let tenant_totals = per_tenant.get(tenant_key).copied().unwrap_or_default();
        if tenant_totals.requests + additional_requests > self.inner.config.max_parallel_subagents_per_run {
            reasons.push(AdmissionReason::MaxParallelSubagentsPerRun);
        }
        if tenant_totals.llm + additional_llm > self.inner.config.max_parallel_teammates_per_team {
            reasons.push(AdmissionReason::MaxParallelTeammatesPerTeam);
        }

        if !reasons.is_empty() {
            tracing::debug!(?reasons, tenant_key, "admission denied");
            return Err(reasons);
        }

        totals.requests += additional_requests;
        totals.llm += additional_llm;
        let entry = per_tenant.entry(tenant_key.to_string()).or_default();
        entry.requests += additional_requests;
        entry.llm += additional_llm;
        tracing::debug!(
            requests = additional_requests,
            llm = additional_llm,
            total_requests = totals.requests,
            total_llm = totals.llm,
            tenant_key,
            "admission granted"
        );

        let reservation = Arc::new(CapacityReservation::new(
            self.inner.clone_totals_handle(),
            Some(tenant_key.to_string()),
            additional_requests,
            additional_llm,
            Duration::from_millis(self.inner.config.reservation_ttl_ms),
        ));
        self.inner.live_reservations.write().await.insert(reservation.id(), reservation.clone());
        Ok(reservation)
    }

    /// Poll `try_reserve` until success, timeout, or cancellation.
    pub async fn reserve_with_wait(
        &self,
        additional_requests: u32,
        additional_llm: u32,
        max_wait_ms: u64,
        poll_interval_ms: u64,
        cancel: &CancellationToken,
    ) -> ReserveOutcome {
        let deadline = Instant::now() + Duration::from_millis(max_wait_ms);
        let mut attempts = 0u32;
        let mut last_reasons = Vec::new();

        loop {
            attempts += 1;
            if cancel.is_cancelled() {
                return ReserveOutcome::Aborted { attempts };
            }

            match self.try_reserve(additional_requests, additional_llm).await {
                Ok(reservation) => return ReserveOutcome::Allowed(reservation),
                Err(reasons) => last_reasons = reasons,
            }

            if Instant::now() >= deadline {
                return ReserveOutcome::TimedOut { attempts, reasons: last_reasons };
            }

            tokio::select! {
                _ = cancel.cancelled() => return ReserveOutcome::Aborted { attempts },
                _ = tokio::time::sleep(Duration::from_millis(poll_interval_ms)) => {}
            }
        }
    }

    /// [`Self::reserve_with_wait`], polling [`Self::try_reserve_for_tenant`]
    /// instead so the per-run/per-team caps are enforced during the wait.
    pub async fn reserve_with_wait_for_tenant(
        &self,
        tenant_key: &str,
        additional_requests: u32,
        additional_llm: u32,
        max_wait_ms: u64,
        poll_interval_ms: u64,
        cancel: &CancellationToken,
    ) -> ReserveOutcome {
        let deadline = Instant::now() + Duration::from_millis(max_wait_ms);
        let mut attempts = 0u32;
        let mut last_reasons = Vec::new();

        loop {
            attempts += 1;
            if cancel.is_cancelled() {
                return ReserveOutcome::Aborted { attempts };
            }

            match self.try_reserve_for_tenant(tenant_key, additional_requests, additional_llm).await {
                Ok(reservation) => return ReserveOutcome::Allowed(reservation),
                Err(reasons) => last_reasons = reasons,
            }

            if Instant::now() >= deadline {
                return ReserveOutcome::TimedOut { attempts, reasons: last_reasons };
            }

            tokio::select! {
                _ = cancel.cancelled() => return ReserveOutcome::Aborted { attempts },
                _ = tokio::time::sleep(Duration::from_millis(poll_interval_ms)) => {}
            }
        }
    }

    /// Enqueue into the orchestration queue, block until under
    /// `maxConcurrentOrchestrations`, then return a lease.
    pub async fn acquire_orchestration_turn(
        &self,
        tenant_key: impl Into<String>,
        priority: orchestration_queue::Priority,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> QueueWaitOutcome {
        let tenant_key = tenant_key.into();
        let outcome = self
            .inner
            .orchestration_queue
            .acquire(tenant_key.clone(), priority, wait, cancel)
            .await;

        if let QueueWaitOutcome::Allowed(ref lease) = outcome {
            self.inner
                .active_orchestration_ids
                .write()
                .await
                .push_back(lease.id().to_string());
        }
        outcome
    }

    /// Composite: obtain an orchestration lease then reserve capacity
    /// atomically, releasing the lease on reservation failure.
    pub async fn acquire_dispatch_permit(
        &self,
        tenant_key: impl Into<String>,
        priority: orchestration_queue::Priority,
        additional_requests: u32,
        additional_llm: u32,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<(OrchestrationLease, Arc<CapacityReservation>), AdmissionReason> {
        let tenant_key = tenant_key.into();
        match self
            .acquire_orchestration_turn(tenant_key, priority, wait, cancel)
            .await
        {
            QueueWaitOutcome::Allowed(lease) => {
                let wait_ms = wait.as_millis() as u64;
                match self
                    .reserve_with_wait_for_tenant(
                        lease.tenant_key(),
                        additional_requests,
                        additional_llm,
                        wait_ms,
                        self.inner.config.capacity_poll_ms,
                        cancel,
                    )
                    .await
                {
                    ReserveOutcome::Allowed(reservation) => Ok((lease, reservation)),
                    ReserveOutcome::TimedOut { reasons, .. } => {
                        self.release_orchestration(&lease).await;
                        Err(reasons.into_iter().next().unwrap_or(AdmissionReason::MaxTotalLlm))
                    }
                    ReserveOutcome::Blocked { reasons } => {
                        self.release_orchestration(&lease).await;
                        Err(reasons.into_iter().next().unwrap_or(AdmissionReason::MaxTotalLlm))
                    }
                    ReserveOutcome::Aborted { .. } => {
                        self.release_orchestration(&lease).await;
                        Err(AdmissionReason::OrchestrationQueueFull)
                    }
                }
            }
            QueueWaitOutcome::TimedOut { .. } | QueueWaitOutcome::Aborted { .. } => {
                Err(AdmissionReason::OrchestrationQueueFull)
            }
        }
    }

    pub async fn release_orchestration(&self, lease: &OrchestrationLease) {
        self.inner
            .active_orchestration_ids
            .write()
            .await
            .retain(|id| id != lease.id());
        self.inner.orchestration_queue.release(lease).await;
    }

    pub async fn snapshot(&self) -> RuntimeCapacitySnapshot {
        let totals = self.inner.totals.read().await;
        let active_ids = self.inner.active_orchestration_ids.read().await;
        let queued = self.inner.orchestration_queue.queued_tenant_keys().await;
        RuntimeCapacitySnapshot {
            active_requests: totals.requests,
            active_llm: totals.llm,
            max_total_active_requests: self.inner.config.max_total_active_requests,
            max_total_active_llm: self.inner.config.max_total_active_llm,
            max_parallel_subagents_per_run: self.inner.config.max_parallel_subagents_per_run,
            max_parallel_teammates_per_team: self.inner.config.max_parallel_teammates_per_team,
            max_concurrent_orchestrations: self.inner.config.max_concurrent_orchestrations,
            capacity_wait_ms: self.inner.config.capacity_wait_ms,
            capacity_poll_ms: self.inner.config.capacity_poll_ms,
            active_orchestration_ids: active_ids.iter().cloned().collect(),
            queued_tool_names: queued,
        }
    }

    /// Background sweeper: release every live reservation not heartbeaten
    /// within its TTL. Driven by a scheduled task (spec §9) — see
    /// `muster-cli::runtime`'s recovery loop.
    pub async fn sweep_expired(&self) {
        let snapshot: Vec<Arc<CapacityReservation>> =
            self.inner.live_reservations.read().await.values().cloned().collect();
        for reservation in snapshot {
            if reservation.is_expired() {
                tracing::warn!(reservation_id = %reservation.id(), "releasing expired reservation");
                reservation.release().await;
            }
        }
    }
}

impl Inner {
    fn clone_totals_handle(self: &Arc<Self>) -> Arc<Inner> {
        self.clone()
    }
}


impl std::fmt::Debug for ReserveOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReserveOutcome::Allowed(_) => write!(f, "Allowed"),
            ReserveOutcome::Aborted { attempts } => write!(f, "Aborted(attempts={attempts})"),
            ReserveOutcome::TimedOut { attempts, reasons } => {
                write!(f, "TimedOut(attempts={attempts}, reasons={reasons:?})")
            }
            ReserveOutcome::Blocked { reasons } => write!(f, "Blocked(reasons={reasons:?})"),
        }
    }
}
