//! FHIR bridge: the companion mapper is an external collaborator spec.md
//! §6 explicitly keeps out of scope ("a thin mapper, no algorithm"). This
//! module only satisfies the interface contract §6 states: "on each domain
//! change, the emission engine MAY call a FHIR mapper that returns a JSON
//! string treated identically to an HL7 string for log/dispatch purposes."
//! It wraps an already-generated HL7 payload in a minimal JSON envelope
//! instead of building `fhir-model` resources, since the real FHIR bundle
//! algorithm is the dropped dependency's job, not this gateway's.

use serde_json::json;

/// Produces the opaque JSON payload a `Fhir`-transport subscriber receives.
/// `hl7_payload` is the same HL7 string generated for MLLP/file subscribers
/// of the same entity — the bridge carries it along rather than re-deriving
/// FHIR resources from domain state.
pub fn wrap_for_fhir_subscriber(hl7_payload: &str) -> String {
    json!({
        "resourceType": "Parameters",
        "parameter": [
            { "name": "hl7v2Content", "valueString": hl7_payload },
        ]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_hl7_payload_as_opaque_json() {
        let wrapped = wrap_for_fhir_subscriber("MSH|^~\\&|...");
        assert!(wrapped.contains("\"resourceType\":\"Parameters\""));
        assert!(wrapped.contains("MSH|"));
    }
}
