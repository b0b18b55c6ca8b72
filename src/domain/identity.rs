//! Identity resolution (C4): maps an HL7 CX-style identifier onto a domain
//! Patient, creating namespaces and patients as needed, and records A40
//! merges. Grounded on `examples/original_source/app/services/adt_parser.py`
//! (`parse_cx_identifier`, `import_adt_into_ght`) and the merge handling in
//! `examples/original_source/app/services/entity_events.py` /
//! `fhir/patient.rs::create_patient_merge` for the target shape, reworked
//! against the in-process store instead of an ORM session.

use thiserror::Error;

use super::model::*;
use super::store::Store;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identifier value is empty")]
    EmptyIdentifier,
    #[error("namespace oid {0} is not configured and implicit creation is disabled")]
    UnknownNamespace(String),
    #[error("identifier {value} in namespace {namespace} is ambiguous across {count} owners")]
    AmbiguousIdentity {
        value: String,
        namespace: String,
        count: usize,
    },
    #[error("merge target identifier {0} could not be resolved to a patient")]
    MergeTargetNotFound(String),
}

/// A parsed CX component set: `value^^^authority&oid&ISO^type`.
#[derive(Debug, Clone)]
pub struct CxIdentifier {
    pub value: String,
    pub authority: Option<String>,
    pub oid: Option<String>,
    pub id_type: Option<String>,
}

pub struct IdentityResolver<'a> {
    store: &'a Store,
    /// spec.md §4.1: unknown namespaces are created implicitly unless the
    /// deployment disables it — mirrors `AppConfig.allow_implicit_namespaces`.
    allow_implicit_namespaces: bool,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(store: &'a Store, allow_implicit_namespaces: bool) -> Self {
        IdentityResolver {
            store,
            allow_implicit_namespaces,
        }
    }

    /// Resolves (and, if allowed, implicitly creates) the namespace a CX
    /// component set is assigned by. Exposed beyond identity resolution
    /// proper so callers can register non-Patient-owned identifiers (an
    /// AdminFile's NDA, a Visit's visit number) against the same namespace
    /// table.
    pub async fn resolve_namespace(&self, cx: &CxIdentifier) -> Result<NamespaceId, IdentityError> {
        let oid = cx
            .oid
            .clone()
            .or_else(|| cx.authority.clone())
            .unwrap_or_default();
        if let Some(ns) = self.store.find_namespace_by_oid(&oid).await {
            return Ok(ns.id);
        }
        if !self.allow_implicit_namespaces {
            return Err(IdentityError::UnknownNamespace(oid));
        }
        log::warn!("creating implicit namespace for oid {oid}");
        let id = self.store.allocate_namespace_id().await;
        let ns = Namespace {
            id,
            name: cx.authority.clone().unwrap_or_else(|| oid.clone()),
            oid,
            kind: NamespaceType::Ipp,
            scope: NamespaceScope::LegalEntity,
        };
        self.store.upsert_namespace(ns).await;
        Ok(id)
    }

    /// I1: resolves a patient identifier to the owning Patient, creating a
    /// new provisional Patient when no active identifier matches.
    pub async fn resolve_or_create_patient(
        &self,
        cx: &CxIdentifier,
    ) -> Result<PatientId, IdentityError> {
        if cx.value.trim().is_empty() {
            return Err(IdentityError::EmptyIdentifier);
        }
        let namespace_id = self.resolve_namespace(cx).await?;
        if let Some(owner) = self
            .store
            .find_active_identifier(namespace_id, IdentifierOwnerKind::Patient, &cx.value)
            .await
        {
            let patient_id = PatientId(owner);
            // Follow merge chains: an identifier may still point at a
            // patient who has since been merged into another.
            return Ok(self.follow_merge_chain(patient_id).await);
        }
        let patient_id = self.store.allocate_patient_id().await;
        let patient = Patient::new(patient_id);
        self.store.create_patient(patient).await;
        let ident_id = self.store.allocate_identifier_id().await;
        self.store
            .register_identifier(Identifier {
                id: ident_id,
                value: cx.value.clone(),
                namespace_id,
                status: IdentifierStatus::Active,
                owner_kind: IdentifierOwnerKind::Patient,
                owner_id: patient_id.0,
            })
            .await;
        self.store
            .update_patient(patient_id, |p| p.identifier_ids.push(ident_id))
            .await;
        Ok(patient_id)
    }

    /// I1 extended to PID-3's full repetition set: resolves (or creates) a
    /// patient for every non-empty identifier and fails with
    /// `AmbiguousIdentity` when they disagree, per spec.md §4.4 "when
    /// multiple identifiers resolve to different patients". A message
    /// carrying a single PID-3 repetition behaves exactly like
    /// `resolve_or_create_patient`.
    pub async fn resolve_patient_for_identifiers(
        &self,
        identifiers: &[CxIdentifier],
    ) -> Result<PatientId, IdentityError> {
        let mut resolved: Option<(PatientId, &CxIdentifier)> = None;
        for cx in identifiers.iter().filter(|cx| !cx.value.trim().is_empty()) {
            let patient_id = self.resolve_or_create_patient(cx).await?;
            match resolved {
                None => resolved = Some((patient_id, cx)),
                Some((existing, _)) if existing != patient_id => {
                    return Err(IdentityError::AmbiguousIdentity {
                        value: cx.value.clone(),
                        namespace: cx.authority.clone().or_else(|| cx.oid.clone()).unwrap_or_default(),
                        count: identifiers.len(),
                    });
                }
                Some(_) => {}
            }
        }
        resolved.map(|(id, _)| id).ok_or(IdentityError::EmptyIdentifier)
    }

    async fn follow_merge_chain(&self, mut patient_id: PatientId) -> PatientId {
        loop {
            match self.store.get_patient(patient_id).await {
                Some(p) if p.merged_into.is_some() => patient_id = p.merged_into.unwrap(),
                _ => return patient_id,
            }
        }
    }

    /// 4.S4: performs an A40 merge. `survivor_cx` identifies the patient
    /// being kept (PID-3), `loser_cx` the one MRG-1 names as replaced.
    pub async fn merge(
        &self,
        survivor_cx: &CxIdentifier,
        loser_cx: &CxIdentifier,
    ) -> Result<(PatientId, PatientId), IdentityError> {
        let survivor = self.resolve_or_create_patient(survivor_cx).await?;
        let namespace_id = self.resolve_namespace(loser_cx).await?;
        let loser_owner = self
            .store
            .find_active_identifier(namespace_id, IdentifierOwnerKind::Patient, &loser_cx.value)
            .await
            .ok_or_else(|| IdentityError::MergeTargetNotFound(loser_cx.value.clone()))?;
        let loser = PatientId(loser_owner);
        if loser == survivor {
            return Ok((survivor, loser));
        }
        self.store.merge_patients(survivor, loser).await;
        Ok((survivor, loser))
    }
}

/// Parses the HL7 CX data type: `ID^checkDigit^checkDigitScheme^assigningAuthority&oid&ISO^idType`.
/// Grounded on `examples/original_source/app/services/adt_parser.py::parse_cx_identifier`.
pub fn parse_cx(raw: &str) -> CxIdentifier {
    let components: Vec<&str> = raw.split('^').collect();
    let value = components.first().copied().unwrap_or("").to_string();
    let (authority, oid) = components
        .get(3)
        .map(|assigning| {
            let subparts: Vec<&str> = assigning.split('&').collect();
            let authority = subparts.first().filter(|s| !s.is_empty()).map(|s| s.to_string());
            let oid = subparts.get(1).filter(|s| !s.is_empty()).map(|s| s.to_string());
            (authority, oid)
        })
        .unwrap_or((None, None));
    let id_type = components.get(4).filter(|s| !s.is_empty()).map(|s| s.to_string());
    CxIdentifier {
        value,
        authority,
        oid,
        id_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cx_extracts_value_authority_oid() {
        let cx = parse_cx("1234567^^^CHU PARIS&1.2.250.1.1&ISO^PI");
        assert_eq!(cx.value, "1234567");
        assert_eq!(cx.authority.as_deref(), Some("CHU PARIS"));
        assert_eq!(cx.oid.as_deref(), Some("1.2.250.1.1"));
        assert_eq!(cx.id_type.as_deref(), Some("PI"));
    }

    #[test]
    fn parse_cx_tolerates_missing_authority() {
        let cx = parse_cx("998877");
        assert_eq!(cx.value, "998877");
        assert!(cx.authority.is_none());
        assert!(cx.oid.is_none());
    }

    #[tokio::test]
    async fn resolve_creates_patient_on_first_sight() {
        let store = Store::new();
        let resolver = IdentityResolver::new(&store, true);
        let cx = parse_cx("1234567^^^CHU&1.2.250.1.1&ISO^PI");
        let p1 = resolver.resolve_or_create_patient(&cx).await.unwrap();
        let p2 = resolver.resolve_or_create_patient(&cx).await.unwrap();
        assert_eq!(p1, p2, "same identifier must resolve to the same patient");
    }

    #[tokio::test]
    async fn unknown_namespace_rejected_when_implicit_creation_disabled() {
        let store = Store::new();
        let resolver = IdentityResolver::new(&store, false);
        let cx = parse_cx("1234567^^^CHU&1.2.250.1.1&ISO^PI");
        let err = resolver.resolve_or_create_patient(&cx).await.unwrap_err();
        assert!(matches!(err, IdentityError::UnknownNamespace(_)));
    }

    #[tokio::test]
    async fn resolve_patient_for_identifiers_matches_single_repetition() {
        let store = Store::new();
        let resolver = IdentityResolver::new(&store, true);
        let cx = parse_cx("1234567^^^CHU&1.2.250.1.1&ISO^PI");
        let direct = resolver.resolve_or_create_patient(&cx).await.unwrap();
        let via_list = resolver.resolve_patient_for_identifiers(&[cx.clone()]).await.unwrap();
        assert_eq!(direct, via_list);
    }

    #[tokio::test]
    async fn resolve_patient_for_identifiers_rejects_conflicting_repetitions() {
        let store = Store::new();
        let resolver = IdentityResolver::new(&store, true);
        let cx_a = parse_cx("AAA^^^CHU&1.2.250.1.1&ISO^PI");
        let cx_b = parse_cx("BBB^^^GHT&1.2.250.1.2&ISO^PI");
        // Pre-seed two distinct patients so the identifiers genuinely diverge.
        resolver.resolve_or_create_patient(&cx_a).await.unwrap();
        resolver.resolve_or_create_patient(&cx_b).await.unwrap();
        let err = resolver
            .resolve_patient_for_identifiers(&[cx_a, cx_b])
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::AmbiguousIdentity { .. }));
    }

    #[tokio::test]
    async fn merge_reassigns_identifiers_and_follows_chain() {
        let store = Store::new();
        let resolver = IdentityResolver::new(&store, true);
        let survivor_cx = parse_cx("AAA^^^CHU&1.2.250.1.1&ISO^PI");
        let loser_cx = parse_cx("BBB^^^CHU&1.2.250.1.1&ISO^PI");
        let survivor = resolver.resolve_or_create_patient(&survivor_cx).await.unwrap();
        let loser = resolver.resolve_or_create_patient(&loser_cx).await.unwrap();
        let (s, l) = resolver.merge(&survivor_cx, &loser_cx).await.unwrap();
        assert_eq!(s, survivor);
        assert_eq!(l, loser);
        let resolved_again = resolver.resolve_or_create_patient(&loser_cx).await.unwrap();
        assert_eq!(resolved_again, survivor, "lookup by the old identifier must follow the merge");
    }
}
