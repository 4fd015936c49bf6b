//! Reconciliation of roster snapshots against consumer state
//!
//! One [`Reconciler`] serves one session. It drains the session's roster
//! channel and, for every event, brings the [`ConsumerStateStore`] in line
//! with what the roster says:
//!
//! 1. Full snapshots first forget every recorded producer that is absent from
//!    the roster, or whose owner changed (an id reused by another client).
//! 2. Then every listed producer that still needs a consumer is ensured,
//!    concurrently.
//!
//! Removals always complete before any addition of the same pass is issued,
//! so a stale consumer never coexists with a fresh one for the same id.
//! Push events only ever add (or remove the single id they name).
//!
//! A failure for one producer never stops the rest of the pass.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::consumer_store::{ConsumerStateStore, EnsureOutcome};
use crate::events::{ClientEvent, EventEmitter};
use crate::roster::RosterEvent;
use crate::types::{ClientId, ProducerId, RosterEntry};

/// What a single reconciliation pass did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub removed: Vec<ProducerId>,
    pub activated: Vec<ProducerId>,
    pub failed: Vec<ProducerId>,
    pub self_marked: Vec<ProducerId>,
    /// Entries that needed no work (active, in flight, parked, or discarded)
    pub skipped: usize,
    /// Consume round-trips issued by this pass
    pub consumes_issued: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.consumes_issued == 0 && self.self_marked.is_empty()
    }

    fn record(&mut self, producer_id: ProducerId, outcome: &EnsureOutcome) {
        if outcome.issued_consume() {
            self.consumes_issued += 1;
        }
        match outcome {
            EnsureOutcome::Activated(_) => self.activated.push(producer_id),
            EnsureOutcome::Failed(_) => self.failed.push(producer_id),
            EnsureOutcome::SelfProducer => self.self_marked.push(producer_id),
            EnsureOutcome::InProgress
            | EnsureOutcome::AlreadyActive
            | EnsureOutcome::RetryLimitReached
            | EnsureOutcome::Discarded => self.skipped += 1,
        }
    }
}

pub struct Reconciler {
    store: Arc<ConsumerStateStore>,
    local_client_id: ClientId,
    events: Arc<EventEmitter>,
    push_events: AtomicU64,
    poll_passes: AtomicU64,
    forced_refreshes: AtomicU64,
}

impl Reconciler {
    pub fn new(
        store: Arc<ConsumerStateStore>,
        local_client_id: ClientId,
        events: Arc<EventEmitter>,
    ) -> Self {
        Self {
            store,
            local_client_id,
            events,
            push_events: AtomicU64::new(0),
            poll_passes: AtomicU64::new(0),
            forced_refreshes: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<ConsumerStateStore> {
        &self.store
    }

    pub fn push_events(&self) -> u64 {
        self.push_events.load(Ordering::Relaxed)
    }

    pub fn poll_passes(&self) -> u64 {
        self.poll_passes.load(Ordering::Relaxed)
    }

    pub fn forced_refreshes(&self) -> u64 {
        self.forced_refreshes.load(Ordering::Relaxed)
    }

    /// Apply one roster event
    pub async fn handle(&self, event: RosterEvent) -> ReconcileReport {
        match event {
            RosterEvent::Push(entry) => {
                self.push_events.fetch_add(1, Ordering::Relaxed);
                self.reconcile_additive(&entry).await
            }
            RosterEvent::Removed(producer_id) => {
                self.push_events.fetch_add(1, Ordering::Relaxed);
                let mut report = ReconcileReport::default();
                if self.remove(&producer_id).await {
                    report.removed.push(producer_id);
                }
                report
            }
            RosterEvent::PollSnapshot(roster) => {
                self.poll_passes.fetch_add(1, Ordering::Relaxed);
                self.reconcile_full(&roster).await
            }
            RosterEvent::ForcedRefresh(roster) => {
                self.forced_refreshes.fetch_add(1, Ordering::Relaxed);
                self.reconcile_full(&roster).await
            }
        }
    }

    /// Full pass: removals, then additions
    pub async fn reconcile_full(&self, roster: &[RosterEntry]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let mut seen = HashSet::new();
        let entries: Vec<&RosterEntry> = roster
            .iter()
            .filter(|entry| seen.insert(entry.producer_id.clone()))
            .collect();

        let stale: Vec<ProducerId> = self
            .store
            .producer_ids()
            .into_iter()
            .filter(|producer_id| match entries.iter().find(|e| &e.producer_id == producer_id) {
                None => true,
                Some(entry) => self.owner_changed(entry),
            })
            .collect();

        for producer_id in stale {
            if self.remove(&producer_id).await {
                report.removed.push(producer_id);
            }
        }

        let additions = entries
            .into_iter()
            .filter(|entry| self.store.needs_consumer(&entry.producer_id))
            .map(|entry| async move {
                let outcome = self.ensure(entry).await;
                (entry.producer_id.clone(), outcome)
            });

        for (producer_id, outcome) in join_all(additions).await {
            report.record(producer_id, &outcome);
        }

        if !report.is_noop() {
            info!(
                generation = %self.store.generation(),
                removed = report.removed.len(),
                activated = report.activated.len(),
                failed = report.failed.len(),
                self_marked = report.self_marked.len(),
                "Roster reconciled"
            );
        }
        report
    }

    /// Single-producer pass. Never evaluates other producers for removal.
    pub async fn reconcile_additive(&self, entry: &RosterEntry) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if self.owner_changed(entry) && self.remove(&entry.producer_id).await {
            report.removed.push(entry.producer_id.clone());
        }
        if self.store.needs_consumer(&entry.producer_id) {
            let outcome = self.ensure(entry).await;
            report.record(entry.producer_id.clone(), &outcome);
        } else {
            report.skipped += 1;
        }
        report
    }

    /// Forget one producer. Returns true if a record existed.
    pub async fn remove(&self, producer_id: &ProducerId) -> bool {
        let Some(record) = self.store.forget(producer_id).await else {
            return false;
        };
        if record.handle.is_some() {
            self.events.emit(ClientEvent::ConsumerRemoved {
                producer_id: producer_id.clone(),
                generation: self.store.generation(),
            });
        }
        true
    }

    /// Drain roster events until cancelled or every feed is dropped
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<RosterEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if self.store.is_closed() {
                break;
            }
            let source = event.source();
            let report = self.handle(event).await;
            debug!(
                generation = %self.store.generation(),
                ?source,
                consumes = report.consumes_issued,
                "Roster event handled"
            );
        }
        debug!(generation = %self.store.generation(), "Reconciler stopped");
    }

    fn owner_changed(&self, entry: &RosterEntry) -> bool {
        match self.store.owner_of(&entry.producer_id) {
            Some(owner) => owner != entry.owner_client_id,
            None => false,
        }
    }

    async fn ensure(&self, entry: &RosterEntry) -> EnsureOutcome {
        let is_self = entry.owner_client_id == self.local_client_id;
        let owner = Some(&entry.owner_client_id);
        let outcome = self
            .store
            .ensure_consumer_owned(&entry.producer_id, owner, is_self)
            .await;

        let generation = self.store.generation();
        match &outcome {
            EnsureOutcome::Activated(handle) => {
                self.events.emit(ClientEvent::ConsumerActive {
                    producer_id: entry.producer_id.clone(),
                    handle: handle.clone(),
                    generation,
                });
            }
            EnsureOutcome::Failed(error) => {
                self.events.emit(ClientEvent::ConsumerFailed {
                    producer_id: entry.producer_id.clone(),
                    error: error.clone(),
                    generation,
                });
            }
            _ => {}
        }
        outcome
    }
}
