//! In-process domain store. spec.md §1 names the SQL persistence layer
//! choice an out-of-scope external collaborator; this store stands in for
//! it with the same transactional contract (serializable mutation of one
//! admin file's state, append-only MessageLog, monotonic sequences) that
//! spec.md §5 and §9 describe, grounded in the transaction-outbox pattern
//! spec.md §9 prescribes as the replacement for the source's ORM
//! after_commit hook (see `examples/original_source/app/services/entity_events.py`).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDateTime;
use tokio::sync::{Mutex, RwLock};

use super::model::*;

/// Named monotonic counters. spec.md §4.3: `next(name)` atomically
/// increments and returns; `sequence_cache_size` in spec.md §6 documents a
/// preallocation batch — here that's a no-op since contention on an
/// `AtomicU64` is already cheap, but the field is threaded through so a
/// future on-disk sequence table can honor it without an API change.
#[derive(Debug, Default)]
pub struct Sequences {
    counters: std::sync::Mutex<HashMap<&'static str, Arc<AtomicU64>>>,
}

impl Sequences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, name: &'static str) -> u64 {
        let counter = {
            let mut guard = self.counters.lock().expect("sequence counter lock poisoned");
            guard
                .entry(name)
                .or_insert_with(|| Arc::new(AtomicU64::new(1)))
                .clone()
        };
        counter.fetch_add(1, Ordering::SeqCst)
    }
}

/// Keys a per-entity lock that approximates the "row lock on the file"
/// spec.md §5 describes. Before an AdminFile exists we lock on the
/// identity that will own it so concurrent creation attempts for the same
/// (patient, admit_time) still serialize (spec.md §8's 100-concurrent-A01
/// boundary case).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    File(AdminFileId),
    PendingFile { namespace: NamespaceId, value: String },
}

#[derive(Debug, Default)]
struct StoreInner {
    patients: HashMap<PatientId, Patient>,
    admin_files: HashMap<AdminFileId, AdminFile>,
    visits: HashMap<VisitId, Visit>,
    movements: HashMap<MovementId, Movement>,
    identifiers: HashMap<IdentifierId, Identifier>,
    namespaces: HashMap<NamespaceId, Namespace>,
    subscribers: HashMap<SubscriberId, Subscriber>,
    message_log: Vec<MessageLogEntry>,
    outbox: Vec<OutboxEntry>,
    /// (namespace_id, value) -> owning entity id, for active identifiers only. I1.
    identity_index: HashMap<(NamespaceId, IdentifierOwnerKind, String), u64>,
    /// (patient_id, admit_time) -> file id, used to detect concurrent A01 duplicates.
    file_by_patient_admit: HashMap<(PatientId, NaiveDateTime), AdminFileId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxEntry {
    pub entity_id: u64,
    pub kind: EntityKind,
    pub operation: Operation,
}

pub struct Store {
    inner: RwLock<StoreInner>,
    seq: Sequences,
    file_locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
    log_seq: AtomicU64,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            inner: RwLock::new(StoreInner::default()),
            seq: Sequences::new(),
            file_locks: Mutex::new(HashMap::new()),
            log_seq: AtomicU64::new(1),
        }
    }

    pub fn sequences(&self) -> &Sequences {
        &self.seq
    }

    /// Acquires (creating if absent) the keyed lock and holds it for the
    /// duration of `f`, giving the whole inbound pipeline — identity
    /// resolution, state-machine validation, persistence — the
    /// serializable-per-file semantics spec.md §5 requires.
    pub async fn with_lock<T, F, Fut>(&self, key: LockKey, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let lock = {
            let mut locks = self.file_locks.lock().await;
            locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = lock.lock().await;
        f().await
    }

    async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().await
    }

    // ---- Namespace -------------------------------------------------

    pub async fn upsert_namespace(&self, ns: Namespace) -> NamespaceId {
        let mut w = self.write().await;
        let id = ns.id;
        w.namespaces.insert(id, ns);
        id
    }

    pub async fn find_namespace_by_oid(&self, oid: &str) -> Option<Namespace> {
        let r = self.inner.read().await;
        r.namespaces.values().find(|n| n.oid == oid).cloned()
    }

    pub async fn allocate_namespace_id(&self) -> NamespaceId {
        NamespaceId(self.seq.next("namespace"))
    }

    // ---- Identity ----------------------------------------------------

    pub async fn find_active_identifier(
        &self,
        namespace_id: NamespaceId,
        owner_kind: IdentifierOwnerKind,
        value: &str,
    ) -> Option<u64> {
        let r = self.inner.read().await;
        r.identity_index
            .get(&(namespace_id, owner_kind, value.to_string()))
            .copied()
    }

    pub async fn register_identifier(&self, ident: Identifier) -> IdentifierId {
        let mut w = self.write().await;
        let id = ident.id;
        if matches!(ident.status, IdentifierStatus::Active) {
            w.identity_index.insert(
                (ident.namespace_id, ident.owner_kind, ident.value.clone()),
                ident.owner_id,
            );
        }
        w.identifiers.insert(id, ident);
        id
    }

    pub async fn allocate_identifier_id(&self) -> IdentifierId {
        IdentifierId(self.seq.next("identifier"))
    }

    // ---- Patient -------------------------------------------------------

    pub async fn create_patient(&self, patient: Patient) -> PatientId {
        let mut w = self.write().await;
        let id = patient.id;
        w.patients.insert(id, patient);
        id
    }

    pub async fn allocate_patient_id(&self) -> PatientId {
        PatientId(self.seq.next("patient"))
    }

    pub async fn get_patient(&self, id: PatientId) -> Option<Patient> {
        self.inner.read().await.patients.get(&id).cloned()
    }

    pub async fn update_patient<F: FnOnce(&mut Patient)>(&self, id: PatientId, f: F) -> Option<()> {
        let mut w = self.write().await;
        let p = w.patients.get_mut(&id)?;
        f(p);
        Some(())
    }

    /// 4.S4: reassigns every owned record from `loser` to `survivor` and
    /// flags `loser` as merged.
    pub async fn merge_patients(&self, survivor: PatientId, loser: PatientId) {
        let mut w = self.write().await;
        let loser_file_ids: Vec<AdminFileId> = w
            .admin_files
            .values()
            .filter(|f| f.patient_id == loser)
            .map(|f| f.id)
            .collect();
        for fid in loser_file_ids {
            if let Some(f) = w.admin_files.get_mut(&fid) {
                f.patient_id = survivor;
            }
        }
        let loser_ident_ids: Vec<IdentifierId> = w
            .identifiers
            .values()
            .filter(|i| {
                matches!(i.owner_kind, IdentifierOwnerKind::Patient) && i.owner_id == loser.0
            })
            .map(|i| i.id)
            .collect();
        for iid in loser_ident_ids {
            if let Some(i) = w.identifiers.get_mut(&iid) {
                i.owner_id = survivor.0;
                if matches!(i.status, IdentifierStatus::Active) {
                    let key = (i.namespace_id, i.owner_kind, i.value.clone());
                    w.identity_index.insert(key, survivor.0);
                }
            }
        }
        if let Some(loser_patient) = w.patients.get_mut(&loser) {
            loser_patient.merged_into = Some(survivor);
        }
    }

    // ---- AdminFile -----------------------------------------------------

    pub async fn allocate_file_id(&self) -> AdminFileId {
        AdminFileId(self.seq.next("admin_file"))
    }

    /// Returns `Err(())` when a file already exists for (patient, admit_time)
    /// — the caller translates this into `SequenceAllocationConflict`
    /// per spec.md §8's concurrent-A01 boundary case.
    pub async fn create_file_if_absent(
        &self,
        patient_id: PatientId,
        admit_time: NaiveDateTime,
        file: AdminFile,
    ) -> Result<AdminFileId, AdminFileId> {
        let mut w = self.write().await;
        if let Some(existing) = w.file_by_patient_admit.get(&(patient_id, admit_time)) {
            return Err(*existing);
        }
        let id = file.id;
        w.file_by_patient_admit.insert((patient_id, admit_time), id);
        w.admin_files.insert(id, file);
        Ok(id)
    }

    pub async fn find_file_by_patient_admit(
        &self,
        patient_id: PatientId,
        admit_time: NaiveDateTime,
    ) -> Option<AdminFile> {
        let r = self.inner.read().await;
        let id = r.file_by_patient_admit.get(&(patient_id, admit_time))?;
        r.admin_files.get(id).cloned()
    }

    pub async fn find_file_by_nda(&self, nda_namespace: NamespaceId, nda: &str) -> Option<AdminFile> {
        let owner = self
            .find_active_identifier(nda_namespace, IdentifierOwnerKind::AdminFile, nda)
            .await?;
        self.get_file(AdminFileId(owner)).await
    }

    pub async fn get_file(&self, id: AdminFileId) -> Option<AdminFile> {
        self.inner.read().await.admin_files.get(&id).cloned()
    }

    /// All dossiers owned by a patient, most recently admitted first. Used
    /// when emission needs a ZBE/PV1 context for a Patient-kind outbox entry
    /// that carries no file of its own (a demographic-only update).
    pub async fn files_of_patient(&self, patient_id: PatientId) -> Vec<AdminFile> {
        let r = self.inner.read().await;
        let mut files: Vec<AdminFile> = r
            .admin_files
            .values()
            .filter(|f| f.patient_id == patient_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| b.admit_time.cmp(&a.admit_time));
        files
    }

    pub async fn update_file<F: FnOnce(&mut AdminFile)>(&self, id: AdminFileId, f: F) -> Option<()> {
        let mut w = self.write().await;
        let file = w.admin_files.get_mut(&id)?;
        f(file);
        Some(())
    }

    // ---- Visit -----------------------------------------------------------

    pub async fn allocate_visit_id(&self) -> VisitId {
        VisitId(self.seq.next("visit"))
    }

    pub async fn create_visit(&self, visit: Visit) -> VisitId {
        let mut w = self.write().await;
        let id = visit.id;
        if let Some(file) = w.admin_files.get_mut(&visit.file_id) {
            file.visit_ids.push(id);
        }
        w.visits.insert(id, visit);
        id
    }

    pub async fn get_visit(&self, id: VisitId) -> Option<Visit> {
        self.inner.read().await.visits.get(&id).cloned()
    }

    pub async fn latest_visit_for_file(&self, file_id: AdminFileId) -> Option<Visit> {
        let r = self.inner.read().await;
        let file = r.admin_files.get(&file_id)?;
        let last = file.visit_ids.last()?;
        r.visits.get(last).cloned()
    }

    pub async fn update_visit<F: FnOnce(&mut Visit)>(&self, id: VisitId, f: F) -> Option<()> {
        let mut w = self.write().await;
        let v = w.visits.get_mut(&id)?;
        f(v);
        Some(())
    }

    // ---- Movement ----------------------------------------------------------

    pub async fn allocate_movement_id(&self) -> MovementId {
        MovementId(self.seq.next("movement"))
    }

    pub async fn next_movement_sequence(&self) -> u64 {
        self.seq.next("movement_seq")
    }

    pub async fn create_movement(&self, movement: Movement) -> MovementId {
        let mut w = self.write().await;
        let id = movement.id;
        if let Some(visit) = w.visits.get_mut(&movement.visit_id) {
            visit.movement_ids.push(id);
        }
        w.movements.insert(id, movement);
        id
    }

    pub async fn get_movement(&self, id: MovementId) -> Option<Movement> {
        self.inner.read().await.movements.get(&id).cloned()
    }

    pub async fn update_movement<F: FnOnce(&mut Movement)>(&self, id: MovementId, f: F) -> Option<()> {
        let mut w = self.write().await;
        let m = w.movements.get_mut(&id)?;
        f(m);
        Some(())
    }

    pub async fn latest_non_cancelled_movement(&self, file_id: AdminFileId) -> Option<Movement> {
        let r = self.inner.read().await;
        let file = r.admin_files.get(&file_id)?;
        for vid in file.visit_ids.iter().rev() {
            let Some(visit) = r.visits.get(vid) else { continue };
            for mid in visit.movement_ids.iter().rev() {
                if let Some(m) = r.movements.get(mid) {
                    if !m.cancelled {
                        return Some(m.clone());
                    }
                }
            }
        }
        None
    }

    pub async fn find_movement_by_visit_and_trigger(
        &self,
        visit_id: VisitId,
        trigger: &str,
    ) -> Option<Movement> {
        let r = self.inner.read().await;
        let visit = r.visits.get(&visit_id)?;
        visit
            .movement_ids
            .iter()
            .rev()
            .filter_map(|id| r.movements.get(id))
            .find(|m| m.trigger_event == trigger && !m.cancelled)
            .cloned()
    }

    // ---- Subscriber --------------------------------------------------------

    pub async fn add_subscriber(&self, sub: Subscriber) -> SubscriberId {
        let mut w = self.write().await;
        let id = sub.id;
        w.subscribers.insert(id, sub);
        id
    }

    pub async fn allocate_subscriber_id(&self) -> SubscriberId {
        SubscriberId(self.seq.next("subscriber"))
    }

    pub async fn subscribers_for(&self, kind: EntityKind) -> Vec<Subscriber> {
        let r = self.inner.read().await;
        r.subscribers
            .values()
            .filter(|s| s.enabled && s.kinds.contains(&kind))
            .cloned()
            .collect()
    }

    // ---- Message log / outbox ------------------------------------------

    pub async fn append_log(&self, mut entry: MessageLogEntry) -> u64 {
        entry.id = self.log_seq.fetch_add(1, Ordering::SeqCst);
        let id = entry.id;
        let mut w = self.write().await;
        w.message_log.push(entry);
        id
    }

    pub async fn all_logs(&self) -> Vec<MessageLogEntry> {
        self.inner.read().await.message_log.clone()
    }

    /// Appends a pending emission to the outbox inside the caller's held
    /// write — the same transaction that mutated the entity, per the
    /// outbox pattern spec.md §9 describes.
    pub async fn enqueue_outbox(&self, entity_id: u64, kind: EntityKind, operation: Operation) {
        let mut w = self.write().await;
        let entry = OutboxEntry { entity_id, kind, operation };
        if !w.outbox.contains(&entry) {
            w.outbox.push(entry);
        }
    }

    /// Drains and returns only the outbox entries matching `wanted`, leaving
    /// everything else in place for its own caller's later drain. Scoped
    /// this way so two genuinely concurrent inbound messages never steal
    /// each other's freshly-enqueued entries — each caller only ever drains
    /// what it itself just enqueued and pre-rendered (see
    /// `transport::GatewayState::emit`).
    pub async fn drain_outbox_for(&self, wanted: &[(EntityKind, u64)]) -> Vec<OutboxEntry> {
        let mut w = self.write().await;
        let (matching, rest) = std::mem::take(&mut w.outbox)
            .into_iter()
            .partition(|e: &OutboxEntry| wanted.contains(&(e.kind, e.entity_id)));
        w.outbox = rest;
        matching
    }

    pub async fn identifiers_of(&self, owner_kind: IdentifierOwnerKind, owner_id: u64) -> Vec<Identifier> {
        let r = self.inner.read().await;
        r.identifiers
            .values()
            .filter(|i| i.owner_kind == owner_kind && i.owner_id == owner_id)
            .cloned()
            .collect()
    }

    pub async fn namespace(&self, id: NamespaceId) -> Option<Namespace> {
        self.inner.read().await.namespaces.get(&id).cloned()
    }
}
