//! Transports (C9): MLLP server, MLLP client, file poller, plus the glue
//! that ties C6's inbound handler and C8's emission engine to a concrete
//! subscriber registry. Grounded in `examples/hamaluik-hermes`'s
//! `communication::{listen, send}` modules for the MLLP accept/connect
//! shape, reworked from a Tauri command into a long-running server task.

pub mod file_poller;
pub mod mllp_client;
pub mod mllp_server;

use std::collections::HashMap;
use std::sync::Arc;

use rand::distr::{Alphanumeric, SampleString};

use crate::config::AppConfig;
use crate::domain::model::{EntityKind, IdentifierOwnerKind, IdentifierStatus, Operation, TransportKind};
use crate::domain::model::{AdminFileId, MovementId, PatientId, VisitId};
use crate::domain::store::{OutboxEntry, Store};
use crate::emission::{self, EmissionEngine, MessageRenderer, SendOutcome, SubscriberSink};
use crate::fhir_bridge;
use crate::generator::{self, GeneratorContext};
use crate::inbound::{self, InboundOutcome};

/// Everything a transport needs to run one message through C6 and then
/// drive C8's fan-out: the shared store, resolved configuration, and the
/// emission engine built on top of it. One instance is shared across every
/// MLLP listener, file-poller worker and client dispatch in the process.
pub struct GatewayState {
    pub store: Arc<Store>,
    pub config: AppConfig,
    pub engine: EmissionEngine,
}

impl GatewayState {
    pub fn new(store: Arc<Store>, config: AppConfig) -> Self {
        let engine = EmissionEngine::new(store.clone(), config.pam.emission_concurrency);
        GatewayState { store, config, engine }
    }

    fn generator_context<'a>(&'a self, control_id: &'a str) -> GeneratorContext<'a> {
        GeneratorContext {
            sending_application: &self.config.app.app_name,
            sending_facility: &self.config.app.app_name,
            receiving_application: "SIH",
            receiving_facility: "SIH",
            strict_mode: self.config.pam.strict_pam_fr,
            control_id,
            namespace_authority: &self.config.app.namespace_authority,
            namespace_oid: &self.config.app.namespace_oid,
        }
    }

    /// Runs one HL7 payload through C6, logs the inbound row (C10), then —
    /// outside the per-file lock C6 already released — enqueues the
    /// touched entities and drives C8's drain-and-dispatch. Mirrors
    /// spec.md §2's inbound data flow end to end. The whole call runs
    /// inside its own emission scope so this message's recursion guard
    /// never blocks (or is blocked by) a concurrent inbound message's.
    pub async fn process_inbound(&self, raw: &str, transport_kind: TransportKind) -> InboundOutcome {
        emission::within_emission_scope(self.process_inbound_inner(raw, transport_kind)).await
    }

    async fn process_inbound_inner(&self, raw: &str, transport_kind: TransportKind) -> InboundOutcome {
        let outcome = inbound::handle_inbound(
            &self.store,
            raw,
            self.config.pam.strict_pam_fr,
            self.config.pam.allow_implicit_namespaces,
        )
        .await;

        self.store
            .append_log(crate::domain::model::MessageLogEntry {
                id: 0,
                direction: crate::domain::model::LogDirection::In,
                kind: transport_kind,
                endpoint_ref: None,
                correlation_id: outcome.control_id.clone(),
                status: outcome.status,
                payload: raw.to_string(),
                ack_payload: Some(outcome.ack.clone()),
                created_at: chrono::Utc::now().naive_utc(),
            })
            .await;

        self.emit(&outcome.control_id, &outcome.touched).await;
        outcome
    }

    /// C8: enqueues every entity C6 touched, pre-renders the HL7 string
    /// each one needs (the generator requires async store reads the
    /// `MessageRenderer` trait's synchronous `render` cannot perform), then
    /// hands the finished lookup table to the emission engine, naming
    /// exactly the entities this call enqueued so the drain can never pick
    /// up another concurrent call's entries.
    async fn emit(&self, correlation_id: &str, touched: &[(EntityKind, u64, Operation)]) {
        if touched.is_empty() {
            return;
        }
        for (kind, id, op) in touched {
            self.store.enqueue_outbox(*id, *kind, *op).await;
        }
        let wanted: Vec<(EntityKind, u64)> = touched.iter().map(|(kind, id, _)| (*kind, *id)).collect();

        let outbound_control_id = Alphanumeric.sample_string(&mut rand::rng(), 20);
        let ctx = self.generator_context(&outbound_control_id);

        let mut payloads = HashMap::new();
        for (kind, id, _) in touched {
            let entry = OutboxEntry {
                entity_id: *id,
                kind: *kind,
                operation: Operation::Update,
            };
            if let Some(rendered) = render_outbox_entry(&self.store, &ctx, &entry).await {
                payloads.insert((*kind, *id), rendered);
            }
        }

        let renderer = PrebuiltRenderer { payloads };
        let sink = GatewaySink::new(std::time::Duration::from_secs(self.config.pam.ack_timeout_seconds));
        self.engine.drain_and_dispatch(&wanted, &renderer, &sink, correlation_id).await;
    }
}

/// A `MessageRenderer` over HL7 strings computed ahead of time by an async
/// walk of the store. `EmissionEngine::drain_and_dispatch` calls `render`
/// synchronously per drained entry; by the time it runs, every entry this
/// call could possibly drain has already been rendered into `payloads`
/// because `GatewayState::emit` enqueues exactly the entities it pre-renders.
struct PrebuiltRenderer {
    payloads: HashMap<(EntityKind, u64), String>,
}

impl MessageRenderer for PrebuiltRenderer {
    fn render(&self, entry: &OutboxEntry) -> Option<String> {
        self.payloads.get(&(entry.kind, entry.entity_id)).cloned()
    }
}

/// Resolves the full patient/file/visit/movement chain C7's generator needs
/// from whichever entity actually changed. A `Movement` touch carries its
/// own ZBE context; a `Patient`, `AdminFile` or `Visit` touch borrows the
/// dossier's latest non-cancelled movement, since PAM-FR requires every
/// generated message to carry a ZBE segment even when the change itself
/// was a demographic or UF correction.
async fn resolve_entity_chain(
    store: &Store,
    entry: &OutboxEntry,
) -> Option<(
    crate::domain::model::Patient,
    crate::domain::model::AdminFile,
    crate::domain::model::Visit,
    crate::domain::model::Movement,
)> {
    match entry.kind {
        EntityKind::Movement => {
            let movement = store.get_movement(MovementId(entry.entity_id)).await?;
            let visit = store.get_visit(movement.visit_id).await?;
            let file = store.get_file(visit.file_id).await?;
            let patient = store.get_patient(file.patient_id).await?;
            Some((patient, file, visit, movement))
        }
        EntityKind::Visit => {
            let visit = store.get_visit(VisitId(entry.entity_id)).await?;
            let file = store.get_file(visit.file_id).await?;
            let patient = store.get_patient(file.patient_id).await?;
            let movement = store.latest_non_cancelled_movement(file.id).await?;
            Some((patient, file, visit, movement))
        }
        EntityKind::AdminFile => {
            let file = store.get_file(AdminFileId(entry.entity_id)).await?;
            let patient = store.get_patient(file.patient_id).await?;
            let visit = store.latest_visit_for_file(file.id).await?;
            let movement = store.latest_non_cancelled_movement(file.id).await?;
            Some((patient, file, visit, movement))
        }
        EntityKind::Patient => {
            let patient = store.get_patient(PatientId(entry.entity_id)).await?;
            let file = store.files_of_patient(patient.id).await.into_iter().next()?;
            let visit = store.latest_visit_for_file(file.id).await?;
            let movement = store.latest_non_cancelled_movement(file.id).await?;
            Some((patient, file, visit, movement))
        }
    }
}

/// Resolves every active identifier owned by a patient into the CX
/// components the generator needs for each PID-3 repetition, IPP
/// (namespace kind `Ipp`) first to keep the primary identifier's
/// repetition stable across messages.
async fn patient_identifiers(store: &Store, patient_id: PatientId) -> Vec<generator::GeneratorIdentifier> {
    let idents = store.identifiers_of(IdentifierOwnerKind::Patient, patient_id.0).await;
    let mut resolved = Vec::new();
    for ident in idents.into_iter().filter(|i| matches!(i.status, IdentifierStatus::Active)) {
        let Some(ns) = store.namespace(ident.namespace_id).await else { continue };
        let id_type = if matches!(ns.kind, crate::domain::model::NamespaceType::Ipp) { "PI" } else { "NI" };
        resolved.push(generator::GeneratorIdentifier {
            value: ident.value,
            authority: ns.name,
            oid: ns.oid,
            id_type: id_type.to_string(),
        });
    }
    resolved.sort_by_key(|i| i.id_type != "PI");
    resolved
}

async fn file_visit_number(store: &Store, file_id: AdminFileId) -> String {
    store
        .identifiers_of(IdentifierOwnerKind::AdminFile, file_id.0)
        .await
        .into_iter()
        .find(|i| matches!(i.status, IdentifierStatus::Active))
        .map(|i| i.value)
        .unwrap_or_default()
}

async fn render_outbox_entry(store: &Store, ctx: &GeneratorContext<'_>, entry: &OutboxEntry) -> Option<String> {
    let (patient, file, visit, movement) = resolve_entity_chain(store, entry).await?;
    let identifiers = patient_identifiers(store, patient.id).await;
    let visit_number = file_visit_number(store, file.id).await;
    let original_trigger = match movement.cancels {
        Some(cancelled_id) => store.get_movement(cancelled_id).await.map(|m| m.trigger_event),
        None => None,
    };
    match generator::generate_adt_message(
        ctx,
        &patient,
        &identifiers,
        &file,
        &visit,
        &visit_number,
        &movement,
        original_trigger.as_deref(),
    ) {
        Ok(rendered) => Some(rendered),
        Err(e) => {
            log::warn!("generator skipped outbox entry {:?}: {e}", entry);
            None
        }
    }
}

/// Dispatches a rendered payload to one subscriber over its transport.
/// MLLP subscribers get a client round trip (C9 client); file and FHIR
/// subscribers get a dropped file, the FHIR case wrapped in the opaque
/// envelope `fhir_bridge` produces — spec.md §6 treats the real FHIR
/// mapping as an external collaborator, so this is as far as the gateway
/// goes.
pub struct GatewaySink {
    ack_timeout: std::time::Duration,
}

impl GatewaySink {
    pub fn new(ack_timeout: std::time::Duration) -> Self {
        GatewaySink { ack_timeout }
    }
}

impl SubscriberSink for GatewaySink {
    async fn send(&self, subscriber: &crate::domain::model::Subscriber, payload: &str) -> SendOutcome {
        match subscriber.transport {
            TransportKind::Mllp => mllp_client::send_and_await_ack(&subscriber.endpoint, payload, self.ack_timeout).await,
            TransportKind::File => file_poller::drop_outbound_file(&subscriber.endpoint, payload).await,
            TransportKind::Fhir => {
                let wrapped = fhir_bridge::wrap_for_fhir_subscriber(payload);
                file_poller::drop_outbound_file(&subscriber.endpoint, &wrapped).await
            }
        }
    }
}
