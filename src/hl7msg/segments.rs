//! Neutral segment extraction: pulls MSH, EVN, PID, PV1, ZBE, MRG, PD1 and
//! Z99 data out of a parsed `hl7_parser::Message` into plain structs the
//! rest of the crate consumes, so no other module touches `hl7_parser`
//! directly. Grounded on `fhir/mapper.rs`'s `parse_field`/`parse_component`
//! helpers and `message_type`, generalized from "extract what FHIR mapping
//! needs" to "extract the full PAM-FR segment set" spec.md §4.2 names.

use hl7_parser::Message;
use thiserror::Error;

use crate::domain::identity::{parse_cx, CxIdentifier};
use crate::hl7msg::datetime::{parse_hl7_datetime, DateFormatInvalid};

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("missing required segment {0}")]
    MissingSegment(&'static str),
    #[error("missing required field {field} in segment {segment}")]
    MissingField { segment: &'static str, field: usize },
    #[error(transparent)]
    BadDateTime(#[from] DateFormatInvalid),
    #[error("could not parse message: {0}")]
    Parse(String),
}

fn field<'a>(msg: &'a Message, segment: &'static str, idx: usize) -> Result<&'a str, SegmentError> {
    let value = msg
        .segment(segment)
        .ok_or(SegmentError::MissingSegment(segment))?
        .field(idx)
        .map(|f| f.raw_value())
        .unwrap_or("");
    Ok(value)
}

fn required_field<'a>(msg: &'a Message, segment: &'static str, idx: usize) -> Result<&'a str, SegmentError> {
    let v = field(msg, segment, idx)?;
    if v.is_empty() {
        return Err(SegmentError::MissingField { segment, field: idx });
    }
    Ok(v)
}

fn component(msg: &Message, segment: &'static str, field_idx: usize, component_idx: usize) -> String {
    msg.segment(segment)
        .and_then(|s| s.field(field_idx))
        .and_then(|f| f.component(component_idx))
        .map(|c| c.raw_value().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct MshData {
    pub sending_application: String,
    pub sending_facility: String,
    pub receiving_application: String,
    pub receiving_facility: String,
    pub message_datetime: chrono::NaiveDateTime,
    pub trigger_event: String,
    pub message_control_id: String,
    pub processing_id: String,
    pub version_id: String,
}

pub fn parse_msh(msg: &Message) -> Result<MshData, SegmentError> {
    let msh9 = required_field(msg, "MSH", 9)?;
    let trigger_event = msh9.split('^').nth(1).unwrap_or(msh9).to_string();
    Ok(MshData {
        sending_application: field(msg, "MSH", 3)?.to_string(),
        sending_facility: field(msg, "MSH", 4)?.to_string(),
        receiving_application: field(msg, "MSH", 5)?.to_string(),
        receiving_facility: field(msg, "MSH", 6)?.to_string(),
        message_datetime: parse_hl7_datetime(required_field(msg, "MSH", 7)?)?,
        trigger_event,
        message_control_id: required_field(msg, "MSH", 10)?.to_string(),
        processing_id: field(msg, "MSH", 11)?.to_string(),
        version_id: field(msg, "MSH", 12)?.to_string(),
    })
}

/// EVN-1 is the authoritative trigger event per spec.md §4.2, matching
/// `fhir/mapper.rs::message_type`'s choice to read EVN over MSH-9.2.
pub fn parse_trigger_event(msg: &Message) -> Result<String, SegmentError> {
    Ok(required_field(msg, "EVN", 1)?.to_string())
}

/// spec.md §4.2's neutral PID record: identifiers, every PID-5 name
/// repetition (usual and birth), and the demographic fields SPEC_FULL 4.2
/// adds (addresses, phones, ssn/nir, marital status, mother's maiden name,
/// birth place) plus the PID-32 reliability code the generator echoes back
/// out on PID-32.
#[derive(Debug, Clone)]
pub struct PidData {
    pub identifiers: Vec<CxIdentifier>,
    pub names: Vec<crate::domain::model::PersonName>,
    pub birth_date: Option<chrono::NaiveDate>,
    pub gender: String,
    pub addresses: Vec<crate::domain::model::Address>,
    pub phones: Vec<crate::domain::model::Phone>,
    pub ssn: String,
    pub marital_status: String,
    pub mothers_maiden_name: String,
    pub birth_place: String,
    pub reliability_code: String,
}

/// PID-5 repetition: `family^given^middle^suffix^prefix^degree^nameTypeCode`.
/// `L` (legal) is carried as the birth name, anything else (including the
/// usual empty type code) as the usual name.
fn parse_name(raw: &str) -> Option<crate::domain::model::PersonName> {
    use crate::domain::model::{NameKind, PersonName};
    if raw.trim().is_empty() {
        return None;
    }
    let parts: Vec<&str> = raw.split('^').collect();
    let family = parts.first().copied().unwrap_or("").to_string();
    let given = parts.get(1).copied().unwrap_or("").to_string();
    if family.is_empty() && given.is_empty() {
        return None;
    }
    let non_empty = |idx: usize| parts.get(idx).filter(|s| !s.is_empty()).map(|s| s.to_string());
    let kind = match parts.get(6) {
        Some(&"L") => NameKind::Birth,
        _ => NameKind::Usual,
    };
    Some(PersonName {
        kind,
        family,
        given,
        middle: non_empty(2),
        suffix: non_empty(3),
        prefix: non_empty(4),
    })
}

/// PID-11 address: `street^other^city^state^zip^country`.
fn parse_address(raw: &str) -> Option<crate::domain::model::Address> {
    use crate::domain::model::{Address, AddressKind};
    if raw.trim().is_empty() {
        return None;
    }
    let parts: Vec<&str> = raw.split('^').collect();
    let non_empty = |idx: usize| parts.get(idx).filter(|s| !s.is_empty()).map(|s| s.to_string());
    Some(Address {
        kind: AddressKind::Home,
        street: parts.first().copied().unwrap_or("").to_string(),
        other: non_empty(1),
        city: non_empty(2),
        state: non_empty(3),
        zip: non_empty(4),
        country: non_empty(5),
    })
}

pub fn parse_pid(msg: &Message) -> Result<PidData, SegmentError> {
    use crate::domain::model::{Phone, PhoneKind};

    let pid = msg.segment("PID").ok_or(SegmentError::MissingSegment("PID"))?;
    let identifiers = pid
        .field(3)
        .map(|f| f.repeats().map(|r| parse_cx(r.raw_value())).collect())
        .unwrap_or_default();
    let names = pid
        .field(5)
        .map(|f| f.repeats().filter_map(|r| parse_name(r.raw_value())).collect())
        .unwrap_or_default();
    let birth_date = {
        let raw = field(msg, "PID", 7)?;
        if raw.is_empty() {
            None
        } else {
            Some(crate::hl7msg::datetime::parse_hl7_date(raw)?)
        }
    };
    let addresses = pid
        .field(11)
        .map(|f| f.repeats().filter_map(|r| parse_address(r.raw_value())).collect())
        .unwrap_or_default();
    let phones = pid
        .field(13)
        .map(|f| {
            f.repeats()
                .map(|r| r.raw_value())
                .filter(|v| !v.is_empty())
                .map(|v| Phone {
                    kind: PhoneKind::Home,
                    value: v.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(PidData {
        identifiers,
        names,
        birth_date,
        gender: field(msg, "PID", 8)?.to_string(),
        addresses,
        phones,
        ssn: field(msg, "PID", 19)?.to_string(),
        marital_status: field(msg, "PID", 16)?.to_string(),
        mothers_maiden_name: component(msg, "PID", 6, 1),
        birth_place: field(msg, "PID", 23)?.to_string(),
        reliability_code: field(msg, "PID", 32)?.to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct Pv1Data {
    pub patient_class: String,
    pub location: String,
    pub admit_time: Option<chrono::NaiveDateTime>,
    pub discharge_time: Option<chrono::NaiveDateTime>,
    pub visit_number: Option<CxIdentifier>,
}

pub fn parse_pv1(msg: &Message) -> Result<Pv1Data, SegmentError> {
    let admit_raw = field(msg, "PV1", 44)?;
    let discharge_raw = field(msg, "PV1", 45)?;
    let visit_number_raw = field(msg, "PV1", 19)?;
    Ok(Pv1Data {
        patient_class: required_field(msg, "PV1", 2)?.to_string(),
        location: component(msg, "PV1", 3, 1),
        admit_time: if admit_raw.is_empty() {
            None
        } else {
            Some(parse_hl7_datetime(admit_raw)?)
        },
        discharge_time: if discharge_raw.is_empty() {
            None
        } else {
            Some(parse_hl7_datetime(discharge_raw)?)
        },
        visit_number: if visit_number_raw.is_empty() {
            None
        } else {
            Some(parse_cx(visit_number_raw))
        },
    })
}

#[derive(Debug, Clone)]
pub struct ZbeData {
    pub movement_id: String,
    pub timestamp: chrono::NaiveDateTime,
    pub action: String,
    /// ZBE-5: `Y` when this movement itself is the cancellation record.
    pub cancel_flag: bool,
    /// ZBE-6: the trigger_event this movement cancels or corrects, carried
    /// on CANCEL actions and on ZBE-9=C corrections — SPEC_FULL 4.S1's
    /// correction-window check reads this, not ZBE-4.
    pub original_trigger: Option<String>,
    pub responsibility_nature: Option<String>,
    pub uf: String,
}

pub fn parse_zbe(msg: &Message) -> Result<Option<ZbeData>, SegmentError> {
    if msg.segment("ZBE").is_none() {
        return Ok(None);
    }
    let movement_id = component(msg, "ZBE", 1, 1);
    let timestamp_raw = required_field(msg, "ZBE", 2)?;
    let action = required_field(msg, "ZBE", 4)?.to_string();
    let cancel_raw = field(msg, "ZBE", 5)?;
    let original_trigger_raw = field(msg, "ZBE", 6)?;
    let nature_raw = field(msg, "ZBE", 9)?;
    Ok(Some(ZbeData {
        movement_id,
        timestamp: parse_hl7_datetime(timestamp_raw)?,
        action,
        cancel_flag: cancel_raw == "Y",
        original_trigger: if original_trigger_raw.is_empty() {
            None
        } else {
            Some(original_trigger_raw.to_string())
        },
        responsibility_nature: if nature_raw.is_empty() {
            None
        } else {
            Some(nature_raw.to_string())
        },
        // ZBE-7 is formatted `^^^^^^UF^^^{code}` by the generator (component
        // 7 carries the literal "UF" tag, the code itself sits at component 10).
        uf: component(msg, "ZBE", 7, 10),
    }))
}

#[derive(Debug, Clone)]
pub struct MrgData {
    pub prior_identifier: CxIdentifier,
}

pub fn parse_mrg(msg: &Message) -> Result<Option<MrgData>, SegmentError> {
    if msg.segment("MRG").is_none() {
        return Ok(None);
    }
    let raw = required_field(msg, "MRG", 1)?;
    Ok(Some(MrgData {
        prior_identifier: parse_cx(raw),
    }))
}

#[derive(Debug, Clone)]
pub struct Pd1Data {
    pub primary_care_provider: Option<String>,
}

pub fn parse_pd1(msg: &Message) -> Result<Option<Pd1Data>, SegmentError> {
    if msg.segment("PD1").is_none() {
        return Ok(None);
    }
    let raw = component(msg, "PD1", 4, 1);
    Ok(Some(Pd1Data {
        primary_care_provider: if raw.is_empty() { None } else { Some(raw) },
    }))
}

/// A single `Z99|Entity|seq|field|value` correction row. spec.md §9 /
/// SPEC_FULL 4.S1 restricts the mutable fields via an allow-list applied
/// downstream; this layer only tokenizes the segment.
#[derive(Debug, Clone)]
pub struct Z99Update {
    pub entity: String,
    pub sequence: String,
    pub target_field: String,
    pub value: String,
}

pub fn parse_z99(msg: &Message) -> Vec<Z99Update> {
    msg.segments()
        .filter(|seg| seg.name == "Z99")
        .map(|seg| Z99Update {
            entity: seg.field(1).map(|f| f.raw_value().to_string()).unwrap_or_default(),
            sequence: seg.field(2).map(|f| f.raw_value().to_string()).unwrap_or_default(),
            target_field: seg.field(3).map(|f| f.raw_value().to_string()).unwrap_or_default(),
            value: seg.field(4).map(|f| f.raw_value().to_string()).unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "MSH|^~\\&|GAM|CHU|DEST|CHU|20240315123000||ADT^A01|MSG00001|P|2.5\rEVN|A01|20240315123000\rPID|1||1234567^^^CHU&1.2.250.1.1&ISO^PI||DUPONT^JEAN||19800101|M\rPV1|1|I|UF_CARDIO^^^^^^^^\rZBE|MVT0001^CHU^1.2.250.1.1^ISO|20240315123000||INSERT|N||^^^^^^UF^^^UF_CARDIO||M\r";

    const SAMPLE_EXTENDED_PID: &str = "MSH|^~\\&|GAM|CHU|DEST|CHU|20240315123000||ADT^A08|MSG00003|P|2.5\rEVN|A08|20240315123000\rPID|1||1234567^^^CHU&1.2.250.1.1&ISO^PI||DUPONT^JEAN^^^^^D~DELAUNAY^JEAN^^^^^L|MARTIN|19800101|M|||12 RUE DE LA PAIX^^PARIS^^75002^FR||0102030405||FR|M|||123456789012345||||PARIS|||||||||VALI\r";

    fn parse(raw: &str) -> Message {
        Message::parse_with_lenient_newlines(raw, true).unwrap()
    }

    #[test]
    fn parses_msh_trigger_and_control_id() {
        let msg = parse(SAMPLE);
        let msh = parse_msh(&msg).unwrap();
        assert_eq!(msh.trigger_event, "A01");
        assert_eq!(msh.message_control_id, "MSG00001");
    }

    #[test]
    fn parses_pid_identifier_and_name() {
        use crate::domain::model::NameKind;

        let msg = parse(SAMPLE);
        let pid = parse_pid(&msg).unwrap();
        assert_eq!(pid.identifiers[0].value, "1234567");
        let usual = pid.names.iter().find(|n| n.kind == NameKind::Usual).unwrap();
        assert_eq!(usual.family, "DUPONT");
        assert_eq!(usual.given, "JEAN");
    }

    #[test]
    fn parses_pid_birth_name_repetition() {
        use crate::domain::model::NameKind;

        let msg = parse(SAMPLE_EXTENDED_PID);
        let pid = parse_pid(&msg).unwrap();
        let birth = pid.names.iter().find(|n| n.kind == NameKind::Birth).unwrap();
        assert_eq!(birth.family, "DELAUNAY");
        assert_eq!(birth.given, "JEAN");
    }

    #[test]
    fn parses_pid_extended_demographics() {
        let msg = parse(SAMPLE_EXTENDED_PID);
        let pid = parse_pid(&msg).unwrap();
        assert_eq!(pid.mothers_maiden_name, "MARTIN");
        assert_eq!(pid.addresses[0].street, "12 RUE DE LA PAIX");
        assert_eq!(pid.addresses[0].city.as_deref(), Some("PARIS"));
        assert_eq!(pid.phones[0].value, "0102030405");
        assert_eq!(pid.marital_status, "M");
        assert_eq!(pid.ssn, "123456789012345");
        assert_eq!(pid.birth_place, "PARIS");
        assert_eq!(pid.reliability_code, "VALI");
    }

    #[test]
    fn parses_pv1_class_and_location() {
        let msg = parse(SAMPLE);
        let pv1 = parse_pv1(&msg).unwrap();
        assert_eq!(pv1.patient_class, "I");
        assert_eq!(pv1.location, "UF_CARDIO");
    }

    #[test]
    fn parses_zbe_movement_and_uf() {
        let msg = parse(SAMPLE);
        let zbe = parse_zbe(&msg).unwrap().expect("ZBE present");
        assert_eq!(zbe.movement_id, "MVT0001");
        assert_eq!(zbe.action, "INSERT");
        assert_eq!(zbe.uf, "UF_CARDIO");
        assert!(!zbe.cancel_flag);
        assert_eq!(zbe.original_trigger, None);
        assert_eq!(zbe.responsibility_nature.as_deref(), Some("M"));
    }

    #[test]
    fn parses_zbe_cancel_flag_and_original_trigger() {
        let raw = "MSH|^~\\&|GAM|CHU|DEST|CHU|20240315123000||ADT^A11|MSG00004|P|2.5\rEVN|A11|20240315123000\rZBE|MVT0002^CHU^1.2.250.1.1^ISO|20240315123000||CANCEL|Y|A01|^^^^^^UF^^^UF_CARDIO||C\r";
        let msg = parse(raw);
        let zbe = parse_zbe(&msg).unwrap().expect("ZBE present");
        assert!(zbe.cancel_flag);
        assert_eq!(zbe.original_trigger.as_deref(), Some("A01"));
        assert_eq!(zbe.responsibility_nature.as_deref(), Some("C"));
    }

    #[test]
    fn missing_zbe_is_none() {
        let msg = parse("MSH|^~\\&|GAM|CHU|DEST|CHU|20240315123000||ADT^A08|MSG00002|P|2.5\rEVN|A08|20240315123000\r");
        assert!(parse_zbe(&msg).unwrap().is_none());
    }
}
