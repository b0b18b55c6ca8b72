//! Domain entities: Patient, AdminFile, Visit, Movement, Identifier, Namespace,
//! Subscriber. Grounded on the attribute lists in spec.md §3; ids are opaque
//! newtypes over u64 the way a sequence-allocated primary key would be.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(PatientId);
entity_id!(AdminFileId);
entity_id!(VisitId);
entity_id!(MovementId);
entity_id!(IdentifierId);
entity_id!(NamespaceId);
entity_id!(SubscriberId);

/// Authority issuing identifiers of a given type. spec.md §3 "Namespace".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: NamespaceId,
    pub name: String,
    pub oid: String,
    pub kind: NamespaceType,
    pub scope: NamespaceScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NamespaceType {
    Ipp,
    Nda,
    Vn,
    Mvt,
    Finess,
    Pi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespaceScope {
    Ght,
    LegalEntity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentifierOwnerKind {
    Patient,
    AdminFile,
    Visit,
    Movement,
}

/// spec.md §3 "Identifier": (value, namespace_ref, status, owner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    pub id: IdentifierId,
    pub value: String,
    pub namespace_id: NamespaceId,
    pub status: IdentifierStatus,
    pub owner_kind: IdentifierOwnerKind,
    pub owner_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NameKind {
    /// D = usual
    Usual,
    /// L = birth
    Birth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
    pub kind: NameKind,
    pub family: String,
    pub given: String,
    pub middle: Option<String>,
    pub suffix: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressKind {
    Home,
    Birth,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub kind: AddressKind,
    pub street: String,
    pub other: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhoneKind {
    Home,
    Mobile,
    Work,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phone {
    pub kind: PhoneKind,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdministrativeGender {
    Male,
    Female,
    Other,
    Unknown,
}

/// VALI / PROV / DOUB — identity reliability as carried in PID-32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityReliability {
    Validated,
    Provisional,
    Doubtful,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub names: Vec<PersonName>,
    pub addresses: Vec<Address>,
    pub phones: Vec<Phone>,
    pub birth_date: Option<chrono::NaiveDate>,
    pub gender: Option<AdministrativeGender>,
    pub reliability: IdentityReliability,
    pub identifier_ids: Vec<IdentifierId>,
    /// Set when this patient lost an A40 merge; points at the surviving patient.
    pub merged_into: Option<PatientId>,
}

impl Patient {
    pub fn new(id: PatientId) -> Self {
        Patient {
            id,
            names: Vec::new(),
            addresses: Vec::new(),
            phones: Vec::new(),
            birth_date: None,
            gender: None,
            reliability: IdentityReliability::Provisional,
            identifier_ids: Vec::new(),
            merged_into: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionType {
    Hospitalized,
    Outpatient,
    Emergency,
}

/// spec.md §3 "AdminFile (dossier)".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminFile {
    pub id: AdminFileId,
    pub patient_id: PatientId,
    pub admission_type: AdmissionType,
    pub uf_medical: Option<String>,
    pub uf_housing: Option<String>,
    pub uf_care: Option<String>,
    pub admit_time: NaiveDateTime,
    pub discharge_time: Option<NaiveDateTime>,
    /// I3: the trigger_event of the latest non-cancelled movement, or None.
    pub current_state: Option<String>,
    pub visit_ids: Vec<VisitId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisitStatus {
    Planned,
    Active,
    Suspended,
    Cancelled,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub file_id: AdminFileId,
    pub start_time: NaiveDateTime,
    pub end_time: Option<NaiveDateTime>,
    pub location: String,
    pub uf_medical: Option<String>,
    pub uf_housing: Option<String>,
    pub uf_care: Option<String>,
    pub status: VisitStatus,
    pub movement_ids: Vec<MovementId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementNature {
    Medical,
    Housing,
    Care,
    Localization,
    Date,
    Cancellation,
}

impl MovementNature {
    pub fn from_zbe9(code: &str) -> Option<Self> {
        match code {
            "M" => Some(Self::Medical),
            "H" => Some(Self::Housing),
            "S" => Some(Self::Care),
            "L" => Some(Self::Localization),
            "D" => Some(Self::Date),
            "C" => Some(Self::Cancellation),
            _ => None,
        }
    }

    /// Inverse of `from_zbe9`, used by the generator to echo the
    /// responsibility nature letter back out on outbound ZBE-9.
    pub fn to_zbe9(self) -> &'static str {
        match self {
            Self::Medical => "M",
            Self::Housing => "H",
            Self::Care => "S",
            Self::Localization => "L",
            Self::Date => "D",
            Self::Cancellation => "C",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementAction {
    Insert,
    Update,
    Cancel,
}

impl MovementAction {
    pub fn from_zbe4(code: &str) -> Option<Self> {
        match code {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "CANCEL" => Some(Self::Cancel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub visit_id: VisitId,
    pub sequence: u64,
    pub timestamp: NaiveDateTime,
    pub trigger_event: String,
    pub nature: Option<MovementNature>,
    pub action: MovementAction,
    pub location: Option<String>,
    pub cancelled: bool,
    pub cancels: Option<MovementId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    Mllp,
    File,
    Fhir,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub transport: TransportKind,
    pub endpoint: String,
    pub strict_mode: bool,
    pub enabled: bool,
    pub kinds: Vec<EntityKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Patient,
    AdminFile,
    Visit,
    Movement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Insert,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStatus {
    AckOk,
    AckError,
    ParseError,
    Sent,
    Timeout,
    GeneratorError,
    Merged,
    TransportFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLogEntry {
    pub id: u64,
    pub direction: LogDirection,
    pub kind: TransportKind,
    pub endpoint_ref: Option<SubscriberId>,
    pub correlation_id: String,
    pub status: LogStatus,
    pub payload: String,
    pub ack_payload: Option<String>,
    pub created_at: NaiveDateTime,
}
