//! Per-producer consumer state machine
//!
//! The store is the single arbiter of "has this remote producer already been
//! handled". Every roster source funnels into [`ConsumerStateStore::ensure_consumer`],
//! which guarantees at most one record per producer id and never two
//! concurrent creation attempts for the same id.
//!
//! # State Machine
//!
//! ```text
//!                 ensure(is_self)
//!   (absent) ──────────────────────────────► Active (no handle, never retried)
//!      │
//!      │ ensure(!is_self)
//!      ▼
//!   Creating ──── consume ok ────────────────► Active (handle)
//!      │  ▲
//!      │  └──────── ensure(!is_self) ────────┐
//!      │                                     │
//!      └─ consume failed ──────────────────► Error
//!      └─ "cannot consume own producer" ───► Active (no handle)
//! ```
//!
//! The check-and-set from `Idle`/`Error` to `Creating` happens under the map
//! shard lock, with no suspension point in between, so concurrent passes
//! cannot both observe `Idle`.
//!
//! A store belongs to exactly one session generation. Closing it on leave
//! discards every record; consume results that resolve afterwards are closed
//! and dropped instead of being installed.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::types::ConsumerStats;
use crate::error::{ClientError, ClientResult};
use crate::transport::ConsumerHandle;
use crate::types::{ClientId, ProducerId, SessionGeneration};

/// Creates and releases consumers on behalf of the store
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    async fn create_consumer(&self, producer_id: &ProducerId) -> ClientResult<ConsumerHandle>;

    async fn close_consumer(&self, handle: ConsumerHandle);
}

/// Status of one consumer record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsumerStatus {
    Idle,
    Creating,
    Active,
    Error,
}

/// Local bookkeeping for one remote producer
#[derive(Debug, Clone)]
pub struct ConsumerRecord {
    pub status: ConsumerStatus,
    /// Present iff `status == Active` and the producer is not our own
    pub handle: Option<ConsumerHandle>,
    /// Present iff `status == Error`
    pub last_error: Option<ClientError>,
    /// Owner reported by the roster entry that created this record
    pub owner: Option<ClientId>,
    /// Set when the producer turned out to be ours
    pub self_owned: bool,
    /// Ordinary (non-self) consume attempts so far
    pub attempts: u32,
    attempt: u64,
}

impl ConsumerRecord {
    fn idle(owner: Option<ClientId>) -> Self {
        Self {
            status: ConsumerStatus::Idle,
            handle: None,
            last_error: None,
            owner,
            self_owned: false,
            attempts: 0,
            attempt: 0,
        }
    }

    fn mark_self(&mut self) {
        self.status = ConsumerStatus::Active;
        self.handle = None;
        self.last_error = None;
        self.self_owned = true;
    }

    /// Active or in flight; nothing left to do for this producer
    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            ConsumerStatus::Active | ConsumerStatus::Creating
        )
    }
}

/// What one `ensure_consumer` call ended up doing
#[derive(Debug, Clone)]
pub enum EnsureOutcome {
    /// A consumer was created and installed
    Activated(ConsumerHandle),
    /// Marked as our own producer, no consume issued
    SelfProducer,
    /// Another attempt for this producer is in flight
    InProgress,
    /// Already active, nothing to do
    AlreadyActive,
    /// The consume attempt failed; the record is retryable
    Failed(ClientError),
    /// The record is in error and has used up its attempts
    RetryLimitReached,
    /// The result arrived for a closed store or a forgotten record and was dropped
    Discarded,
}

impl EnsureOutcome {
    /// Whether this call issued a consume round-trip
    pub fn issued_consume(&self) -> bool {
        matches!(
            self,
            EnsureOutcome::Activated(_) | EnsureOutcome::Failed(_) | EnsureOutcome::Discarded
        )
    }
}

enum Begin {
    Consume(u64),
    Done(EnsureOutcome),
}

enum Settled {
    Installed(EnsureOutcome),
    Stale(Option<ConsumerHandle>),
}

/// Session-scoped store of consumer records keyed by producer id
pub struct ConsumerStateStore {
    generation: SessionGeneration,
    records: DashMap<ProducerId, ConsumerRecord>,
    factory: Arc<dyn ConsumerFactory>,
    max_attempts: Option<u32>,
    next_attempt: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConsumerStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerStateStore")
            .field("generation", &self.generation)
            .field("records", &self.records.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConsumerStateStore {
    pub fn new(
        generation: SessionGeneration,
        factory: Arc<dyn ConsumerFactory>,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            generation,
            records: DashMap::new(),
            factory,
            max_attempts,
            next_attempt: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn generation(&self) -> SessionGeneration {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make sure a consumer exists (or is being created) for `producer_id`
    pub async fn ensure_consumer(&self, producer_id: &ProducerId, is_self: bool) -> EnsureOutcome {
        self.ensure_consumer_owned(producer_id, None, is_self).await
    }

    /// Like [`ensure_consumer`](Self::ensure_consumer), also recording the
    /// owner reported by the roster
    pub async fn ensure_consumer_owned(
        &self,
        producer_id: &ProducerId,
        owner: Option<&ClientId>,
        is_self: bool,
    ) -> EnsureOutcome {
        let attempt = match self.begin(producer_id, owner, is_self) {
            Begin::Consume(attempt) => attempt,
            Begin::Done(outcome) => return outcome,
        };

        debug!(
            generation = %self.generation,
            producer_id = %producer_id,
            attempt = attempt,
            "Creating consumer"
        );
        let result = self.factory.create_consumer(producer_id).await;

        match self.settle(producer_id, attempt, result) {
            Settled::Installed(outcome) => outcome,
            Settled::Stale(handle) => {
                if let Some(handle) = handle {
                    debug!(
                        generation = %self.generation,
                        producer_id = %producer_id,
                        consumer_id = %handle.id,
                        "Discarding consumer created for a stale record"
                    );
                    self.factory.close_consumer(handle).await;
                }
                EnsureOutcome::Discarded
            }
        }
    }

    /// Synchronous check-and-set. No await may be introduced in here.
    fn begin(&self, producer_id: &ProducerId, owner: Option<&ClientId>, is_self: bool) -> Begin {
        if self.is_closed() {
            return Begin::Done(EnsureOutcome::Discarded);
        }

        let mut record = self
            .records
            .entry(producer_id.clone())
            .or_insert_with(|| ConsumerRecord::idle(owner.cloned()));

        if record.owner.is_none() {
            record.owner = owner.cloned();
        }

        match record.status {
            ConsumerStatus::Creating => Begin::Done(EnsureOutcome::InProgress),
            ConsumerStatus::Active => Begin::Done(EnsureOutcome::AlreadyActive),
            ConsumerStatus::Idle | ConsumerStatus::Error => {
                if is_self {
                    record.mark_self();
                    debug!(
                        producer_id = %producer_id,
                        "Own producer, marked active without consumer"
                    );
                    return Begin::Done(EnsureOutcome::SelfProducer);
                }
                if record.status == ConsumerStatus::Error {
                    if let Some(max) = self.max_attempts {
                        if record.attempts >= max {
                            return Begin::Done(EnsureOutcome::RetryLimitReached);
                        }
                    }
                }
                let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst);
                record.status = ConsumerStatus::Creating;
                record.attempts += 1;
                record.attempt = attempt;
                Begin::Consume(attempt)
            }
        }
    }

    fn settle(
        &self,
        producer_id: &ProducerId,
        attempt: u64,
        result: ClientResult<ConsumerHandle>,
    ) -> Settled {
        if self.is_closed() {
            return Settled::Stale(result.ok());
        }

        let mut record = match self.records.get_mut(producer_id) {
            Some(record) if record.attempt == attempt => record,
            _ => return Settled::Stale(result.ok()),
        };
        if record.status != ConsumerStatus::Creating {
            return Settled::Stale(result.ok());
        }

        match result {
            Ok(handle) => {
                record.status = ConsumerStatus::Active;
                record.handle = Some(handle.clone());
                record.last_error = None;
                info!(
                    generation = %self.generation,
                    producer_id = %producer_id,
                    consumer_id = %handle.id,
                    "Consumer active"
                );
                Settled::Installed(EnsureOutcome::Activated(handle))
            }
            Err(e) if e.is_self_consume_rejection() => {
                record.mark_self();
                debug!(
                    producer_id = %producer_id,
                    "Server reported own producer, marked active without consumer"
                );
                Settled::Installed(EnsureOutcome::SelfProducer)
            }
            Err(e) => {
                record.status = ConsumerStatus::Error;
                record.last_error = Some(e.clone());
                warn!(
                    generation = %self.generation,
                    producer_id = %producer_id,
                    attempts = record.attempts,
                    error = %e,
                    category = e.category(),
                    "Consumer creation failed, will retry on next pass"
                );
                Settled::Installed(EnsureOutcome::Failed(e))
            }
        }
    }

    /// Drop the record for a producer that left the roster, closing its
    /// consumer first. Returns the removed record.
    pub async fn forget(&self, producer_id: &ProducerId) -> Option<ConsumerRecord> {
        let (_, mut record) = self.records.remove(producer_id)?;
        if let Some(handle) = record.handle.take() {
            self.factory.close_consumer(handle.clone()).await;
            record.handle = Some(handle);
        }
        debug!(
            generation = %self.generation,
            producer_id = %producer_id,
            status = ?record.status,
            "Forgot producer"
        );
        Some(record)
    }

    /// Close the store for good: every record is dropped and every handle
    /// closed. Returns the handles that were released.
    pub async fn close(&self) -> Vec<ConsumerHandle> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Vec::new();
        }
        let producer_ids: Vec<ProducerId> = self.records.iter().map(|r| r.key().clone()).collect();
        let mut released = Vec::new();
        for producer_id in producer_ids {
            if let Some((_, record)) = self.records.remove(&producer_id) {
                if let Some(handle) = record.handle {
                    self.factory.close_consumer(handle.clone()).await;
                    released.push(handle);
                }
            }
        }
        info!(generation = %self.generation, released = released.len(), "Consumer store closed");
        released
    }

    pub fn status(&self, producer_id: &ProducerId) -> Option<ConsumerStatus> {
        self.records.get(producer_id).map(|r| r.status)
    }

    pub fn record(&self, producer_id: &ProducerId) -> Option<ConsumerRecord> {
        self.records.get(producer_id).map(|r| r.value().clone())
    }

    pub fn handle(&self, producer_id: &ProducerId) -> Option<ConsumerHandle> {
        self.records.get(producer_id).and_then(|r| r.handle.clone())
    }

    pub fn owner_of(&self, producer_id: &ProducerId) -> Option<ClientId> {
        self.records.get(producer_id).and_then(|r| r.owner.clone())
    }

    /// Whether reconciliation still has work to do for this producer
    pub fn needs_consumer(&self, producer_id: &ProducerId) -> bool {
        match self.records.get(producer_id) {
            Some(record) => !record.is_settled(),
            None => true,
        }
    }

    pub fn producer_ids(&self) -> Vec<ProducerId> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        for record in self.records.iter() {
            match record.status {
                ConsumerStatus::Idle => stats.idle += 1,
                ConsumerStatus::Creating => stats.creating += 1,
                ConsumerStatus::Active if record.self_owned => stats.self_owned += 1,
                ConsumerStatus::Active => stats.active += 1,
                ConsumerStatus::Error => stats.errored += 1,
            }
        }
        stats
    }
}
