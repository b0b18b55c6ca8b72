//! Z99 correction allow-list (SPEC_FULL 4.S1). Grounded on
//! `examples/original_source/app/services/transport_inbound.py`'s
//! `_handle_z99_updates`, which resolves the entity by a case-insensitive
//! prefix match and applies the field via reflection; this reimplements
//! the entity resolution but replaces the reflective field set with a
//! fixed allow-list, since spec.md §9 names the original's unrestricted
//! reflection as an open risk to close.

use thiserror::Error;

use crate::domain::model::{AdminFile, Movement, Visit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Z99Entity {
    AdminFile,
    Visit,
    Movement,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Z99Error {
    #[error("unrecognized Z99 entity prefix {0:?}")]
    UnknownEntity(String),
    #[error("field {field} is not in the Z99 correction allow-list for entity {entity}")]
    InvalidZ99Target { entity: String, field: String },
}

/// `doss*` → AdminFile, `ven*` → Visit, `mouv*`/`mvt*` → Movement, matched
/// case-insensitively the way the source's entity resolver does.
pub fn resolve_entity(raw: &str) -> Result<Z99Entity, Z99Error> {
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("doss") {
        Ok(Z99Entity::AdminFile)
    } else if lower.starts_with("ven") {
        Ok(Z99Entity::Visit)
    } else if lower.starts_with("mouv") || lower.starts_with("mvt") {
        Ok(Z99Entity::Movement)
    } else {
        Err(Z99Error::UnknownEntity(raw.to_string()))
    }
}

fn check_allowed(entity: Z99Entity, field: &str) -> Result<(), Z99Error> {
    let allowed: &[&str] = match entity {
        Z99Entity::AdminFile => &["uf_medical", "uf_housing", "uf_care"],
        Z99Entity::Visit => &["location", "operational_status"],
        Z99Entity::Movement => &["location"],
    };
    if allowed.contains(&field) {
        Ok(())
    } else {
        Err(Z99Error::InvalidZ99Target {
            entity: format!("{entity:?}"),
            field: field.to_string(),
        })
    }
}

pub fn apply_admin_file_field(file: &mut AdminFile, field: &str, value: &str) -> Result<(), Z99Error> {
    check_allowed(Z99Entity::AdminFile, field)?;
    match field {
        "uf_medical" => file.uf_medical = Some(value.to_string()),
        "uf_housing" => file.uf_housing = Some(value.to_string()),
        "uf_care" => file.uf_care = Some(value.to_string()),
        _ => unreachable!("checked by check_allowed"),
    }
    Ok(())
}

pub fn apply_visit_field(visit: &mut Visit, field: &str, value: &str) -> Result<(), Z99Error> {
    check_allowed(Z99Entity::Visit, field)?;
    match field {
        "location" => visit.location = value.to_string(),
        "operational_status" => {
            visit.status = match value {
                "planned" => crate::domain::model::VisitStatus::Planned,
                "active" => crate::domain::model::VisitStatus::Active,
                "suspended" => crate::domain::model::VisitStatus::Suspended,
                "cancelled" => crate::domain::model::VisitStatus::Cancelled,
                "finished" => crate::domain::model::VisitStatus::Finished,
                other => {
                    return Err(Z99Error::InvalidZ99Target {
                        entity: "Visit".to_string(),
                        field: format!("operational_status={other}"),
                    })
                }
            };
        }
        _ => unreachable!("checked by check_allowed"),
    }
    Ok(())
}

pub fn apply_movement_field(movement: &mut Movement, field: &str, value: &str) -> Result<(), Z99Error> {
    check_allowed(Z99Entity::Movement, field)?;
    match field {
        "location" => movement.location = Some(value.to_string()),
        _ => unreachable!("checked by check_allowed"),
    }
    Ok(())
}
