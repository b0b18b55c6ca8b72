//! Outbound emission engine (C8): drains the domain store's outbox,
//! generates one HL7 string per (entity, subscriber) pair, and dispatches
//! it over the subscriber's transport. Grounded on
//! `examples/original_source/app/services/entity_events.py`'s
//! `_pending_emissions` / `_emission_context` thread-local recursion guard
//! / `_emission_semaphore` — reworked from SQLAlchemy's `after_commit` event
//! into an explicit drain loop the inbound handler calls once per committed
//! message, since spec.md §9 replaces the ORM hook with an explicit
//! transaction-outbox call.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::domain::model::{EntityKind, LogDirection, LogStatus, MessageLogEntry, Operation, Subscriber, TransportKind};
use crate::domain::store::{OutboxEntry, Store};

tokio::task_local! {
    /// Mirrors `_emission_context.active`: while an emission task is
    /// running, any outbox entries it causes (e.g. a subscriber round-trip
    /// that writes back into the store) are recorded but not immediately
    /// re-drained by the same call, breaking the infinite self-trigger loop
    /// spec.md §8's S5 scenario exercises. Scoped per inbound call via
    /// `within_emission_scope` rather than shared process-wide, so two
    /// concurrent inbound messages each get their own recursion check
    /// instead of blocking each other's legitimate drain.
    static EMISSION_ACTIVE: std::cell::Cell<bool>;
}

/// Wraps one inbound message's end-to-end handling in its own emission
/// scope. `GatewayState::process_inbound` calls this once per message;
/// `try_enter_emission` below then governs re-entrancy within that scope.
pub async fn within_emission_scope<F: std::future::Future>(fut: F) -> F::Output {
    EMISSION_ACTIVE.scope(std::cell::Cell::new(false), fut).await
}

/// Claims this task's emission scope for the duration of one drain. Outside
/// any scope (e.g. a bare unit test) this always succeeds, since there is
/// nothing to recurse into.
fn try_enter_emission() -> Option<EmissionGuardHandle> {
    match EMISSION_ACTIVE.try_with(|active| {
        if active.get() {
            false
        } else {
            active.set(true);
            true
        }
    }) {
        Ok(true) => Some(EmissionGuardHandle(true)),
        Ok(false) => None,
        Err(_) => Some(EmissionGuardHandle(false)),
    }
}

struct EmissionGuardHandle(bool);

impl Drop for EmissionGuardHandle {
    fn drop(&mut self) {
        if self.0 {
            let _ = EMISSION_ACTIVE.try_with(|active| active.set(false));
        }
    }
}

/// One outbound send, already rendered to an HL7 (or, for a `Fhir`
/// subscriber, an opaque JSON) string.
pub trait MessageRenderer: Send + Sync {
    fn render(&self, entry: &OutboxEntry) -> Option<String>;
}

/// One subscriber transport send. spec.md §4.8's generic "dispatch" step;
/// concrete MLLP/file/FHIR implementations live in `transport`. Used only
/// through generic bounds in this module, so the native async-fn-in-trait
/// support (stable since the 2024 edition) is sufficient — no need for the
/// `async-trait` crate's boxing.
pub trait SubscriberSink: Send + Sync {
    fn send(&self, subscriber: &Subscriber, payload: &str) -> impl std::future::Future<Output = SendOutcome> + Send;
}

pub enum SendOutcome {
    AckOk,
    AckError(String),
    Timeout,
    TransportFailure(String),
}

pub struct EmissionEngine {
    store: Arc<Store>,
    semaphore: Arc<Semaphore>,
}

impl EmissionEngine {
    pub fn new(store: Arc<Store>, concurrency: usize) -> Self {
        EmissionEngine {
            store,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Drains only the outbox entries named in `wanted` and fans each one
    /// out to every enabled subscriber registered for its `EntityKind`,
    /// bounded by the semaphore. Called once per committed inbound message
    /// by C6, outside the per-file lock, so a slow subscriber never holds
    /// up ingestion. Scoping the drain to `wanted` means a concurrent
    /// inbound message's own entries are never stolen by this call.
    pub async fn drain_and_dispatch<R, S>(
        &self,
        wanted: &[(EntityKind, u64)],
        renderer: &R,
        sink: &S,
        correlation_id: &str,
    ) where
        R: MessageRenderer,
        S: SubscriberSink,
    {
        let Some(_entered) = try_enter_emission() else {
            log::debug!("emission already in flight on this task tree, skipping re-entrant drain");
            return;
        };

        let entries = self.store.drain_outbox_for(wanted).await;
        if entries.is_empty() {
            return;
        }

        let mut tasks = Vec::new();
        for entry in entries {
            let Some(payload) = renderer.render(&entry) else {
                continue;
            };
            let subscribers = self.store.subscribers_for(entry.kind).await;
            for subscriber in subscribers {
                let permit = self.semaphore.clone().acquire_owned().await;
                let Ok(permit) = permit else { continue };
                tasks.push(self.dispatch_one(sink, subscriber, payload.clone(), correlation_id.to_string(), permit));
            }
        }
        // not a barrier in the workflow-tool sense; this is plain async
        // fan-out within one Tokio task using join_all semantics.
        futures::future::join_all(tasks).await;
    }

    async fn dispatch_one<S: SubscriberSink>(
        &self,
        sink: &S,
        subscriber: Subscriber,
        payload: String,
        correlation_id: String,
        _permit: tokio::sync::OwnedSemaphorePermit,
    ) {
        log::info!(
            "dispatching to subscriber {} over {:?}",
            subscriber.id,
            subscriber.transport
        );
        let outcome = sink.send(&subscriber, &payload).await;
        let (status, ack_payload) = match outcome {
            SendOutcome::AckOk => (LogStatus::AckOk, None),
            SendOutcome::AckError(text) => (LogStatus::AckError, Some(text)),
            SendOutcome::Timeout => (LogStatus::Timeout, None),
            SendOutcome::TransportFailure(text) => (LogStatus::TransportFailure, Some(text)),
        };
        let store = self.store.clone();
        store
            .append_log(MessageLogEntry {
                id: 0,
                direction: LogDirection::Out,
                kind: subscriber.transport,
                endpoint_ref: Some(subscriber.id),
                correlation_id,
                status,
                payload,
                ack_payload,
                created_at: chrono::Utc::now().naive_utc(),
            })
            .await;
    }
}

pub fn resubscribe_kinds_for_transport(kind: TransportKind) -> &'static [EntityKind] {
    match kind {
        TransportKind::Mllp | TransportKind::File => &[
            EntityKind::Patient,
            EntityKind::AdminFile,
            EntityKind::Visit,
            EntityKind::Movement,
        ],
        TransportKind::Fhir => &[EntityKind::Patient, EntityKind::AdminFile],
    }
}

pub fn outbox_operation_label(op: Operation) -> &'static str {
    match op {
        Operation::Insert => "insert",
        Operation::Update => "update",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::*;

    struct EchoRenderer;
    impl MessageRenderer for EchoRenderer {
        fn render(&self, entry: &OutboxEntry) -> Option<String> {
            Some(format!("{:?}:{}", entry.kind, entry.entity_id))
        }
    }

    struct NoopSink;
    impl SubscriberSink for NoopSink {
        async fn send(&self, _subscriber: &Subscriber, _payload: &str) -> SendOutcome {
            SendOutcome::AckOk
        }
    }

    #[tokio::test]
    async fn recursion_guard_blocks_reentrant_drain_within_one_scope() {
        within_emission_scope(async {
            let outer = try_enter_emission().unwrap();
            assert!(try_enter_emission().is_none());
            drop(outer);
            assert!(try_enter_emission().is_some());
        })
        .await;
    }

    #[tokio::test]
    async fn separate_scopes_do_not_block_each_other() {
        let first = within_emission_scope(async {
            let _entered = try_enter_emission().unwrap();
            try_enter_emission().is_none()
        });
        let second = within_emission_scope(async { try_enter_emission().is_some() });
        let (blocked_reentry, independent_entry) = tokio::join!(first, second);
        assert!(blocked_reentry);
        assert!(independent_entry);
    }

    #[tokio::test]
    async fn drain_dispatches_to_enabled_subscribers_only() {
        let store = Arc::new(Store::new());
        let sub_id = store.allocate_subscriber_id().await;
        store
            .add_subscriber(Subscriber {
                id: sub_id,
                transport: TransportKind::Mllp,
                endpoint: "127.0.0.1:2576".to_string(),
                strict_mode: false,
                enabled: true,
                kinds: vec![EntityKind::AdminFile],
            })
            .await;
        store
            .enqueue_outbox(1, EntityKind::AdminFile, Operation::Insert)
            .await;

        let engine = EmissionEngine::new(store.clone(), 5);
        let wanted = [(EntityKind::AdminFile, 1)];
        within_emission_scope(engine.drain_and_dispatch(&wanted, &EchoRenderer, &NoopSink, "CID1")).await;

        let logs = store.all_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].endpoint_ref, Some(sub_id));
    }

    #[tokio::test]
    async fn unwanted_entries_are_left_in_the_outbox() {
        let store = Arc::new(Store::new());
        store
            .enqueue_outbox(1, EntityKind::AdminFile, Operation::Insert)
            .await;
        store
            .enqueue_outbox(2, EntityKind::AdminFile, Operation::Insert)
            .await;

        let engine = EmissionEngine::new(store.clone(), 5);
        let wanted = [(EntityKind::AdminFile, 1)];
        within_emission_scope(engine.drain_and_dispatch(&wanted, &EchoRenderer, &NoopSink, "CID1")).await;

        // entity 2 was never named in `wanted`, so it stays queued for its
        // own caller's drain rather than being swallowed by this one.
        let remaining = store.drain_outbox_for(&[(EntityKind::AdminFile, 2)]).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].entity_id, 2);
    }

    #[tokio::test]
    async fn empty_outbox_dispatches_nothing() {
        let store = Arc::new(Store::new());
        let engine = EmissionEngine::new(store.clone(), 5);
        within_emission_scope(engine.drain_and_dispatch(&[], &EchoRenderer, &NoopSink, "CID2")).await;
        assert!(store.all_logs().await.is_empty());
    }
}
