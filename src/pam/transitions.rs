//! The PAM trigger-transition table (C5): given a file's current state and
//! an incoming trigger event, decides whether the transition is admissible
//! and what guard failed when it isn't. Grounded on
//! `examples/original_source/tests/test_transition_validation.py`'s exact
//! ACK text assertions and `app/services/transport_inbound.py`'s
//! `is_valid_transition` call site, generalized from that file's ad-hoc
//! dict lookup into the full table spec.md §4.5 specifies.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PamError {
    #[error("trigger {0} is not supported by the state machine")]
    UnsupportedTrigger(String),
    #[error("Transition IHE invalide: {current} -> {incoming}")]
    InvalidTransition { current: String, incoming: String },
    #[error("changement de classe invalide pour {trigger}: attendu {expected}, reçu {actual}")]
    InvalidClassChange {
        trigger: String,
        expected: &'static str,
        actual: String,
    },
    #[error(
        "correction ZBE-9=C hors fenêtre valide: original_trigger={original_trigger:?}, operational_status={operational_status}"
    )]
    InvalidCorrectionContext {
        original_trigger: Option<String>,
        operational_status: String,
    },
    #[error("segment ZBE obligatoire pour le trigger {0}")]
    MissingZbe(String),
    #[error("segment MRG obligatoire pour le trigger {0}")]
    MissingMrg(String),
    #[error("A08 désactivé en mode strict PAM FR")]
    StrictModeBlocked,
}

/// I/R (hospitalisé) vs O/E (outpatient/emergency) — spec.md §4.5's class
/// guards only ever distinguish these two groups.
fn is_inpatient_class(class: &str) -> bool {
    matches!(class, "I" | "R")
}

fn is_outpatient_class(class: &str) -> bool {
    matches!(class, "O" | "E")
}

pub struct TransitionContext<'a> {
    pub trigger: &'a str,
    pub current_state: Option<&'a str>,
    pub class: &'a str,
    pub zbe_present: bool,
    pub zbe_action: Option<&'a str>,
    pub has_mrg: bool,
    pub strict_mode: bool,
}

fn invalid(current: Option<&str>, incoming: &str) -> PamError {
    PamError::InvalidTransition {
        current: current.unwrap_or("null").to_string(),
        incoming: incoming.to_string(),
    }
}

fn require_zbe(ctx: &TransitionContext) -> Result<(), PamError> {
    if !ctx.zbe_present {
        return Err(PamError::MissingZbe(ctx.trigger.to_string()));
    }
    Ok(())
}

fn require_zbe_action(ctx: &TransitionContext, expected: &str) -> Result<(), PamError> {
    require_zbe(ctx)?;
    if ctx.zbe_action != Some(expected) {
        return Err(PamError::MissingZbe(ctx.trigger.to_string()));
    }
    Ok(())
}

/// Validates one inbound trigger against the file's `current_state`.
/// `current_state` is the trigger_event of the latest non-Z99 movement
/// (Z99 corrections never update it, so A22's "prior A21" guard does not
/// need separate bookkeeping — see SPEC_FULL 4.S3).
pub fn validate_transition(ctx: &TransitionContext) -> Result<(), PamError> {
    match ctx.trigger {
        "A01" => {
            if !matches!(ctx.current_state, None | Some("A03") | Some("A11")) {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            if !is_inpatient_class(ctx.class) {
                return Err(PamError::InvalidClassChange {
                    trigger: "A01".to_string(),
                    expected: "I or R",
                    actual: ctx.class.to_string(),
                });
            }
            require_zbe_action(ctx, "INSERT")
        }
        "A02" => {
            if !matches!(
                ctx.current_state,
                Some("A01") | Some("A02") | Some("A06") | Some("A07") | Some("A22")
            ) {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            if !is_inpatient_class(ctx.class) {
                return Err(PamError::InvalidClassChange {
                    trigger: "A02".to_string(),
                    expected: "I or R",
                    actual: ctx.class.to_string(),
                });
            }
            require_zbe(ctx)
        }
        "A03" => {
            if !matches!(
                ctx.current_state,
                Some("A01") | Some("A02") | Some("A06") | Some("A07") | Some("A22")
            ) {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            if !is_inpatient_class(ctx.class) {
                return Err(PamError::InvalidClassChange {
                    trigger: "A03".to_string(),
                    expected: "I or R",
                    actual: ctx.class.to_string(),
                });
            }
            require_zbe(ctx)
        }
        "A04" => {
            if !matches!(ctx.current_state, None | Some("A03") | Some("A05")) {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            if !is_outpatient_class(ctx.class) {
                return Err(PamError::InvalidClassChange {
                    trigger: "A04".to_string(),
                    expected: "O or E",
                    actual: ctx.class.to_string(),
                });
            }
            require_zbe(ctx)
        }
        "A05" => {
            if !matches!(ctx.current_state, None | Some("A03")) {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            require_zbe(ctx)
        }
        "A06" => {
            if ctx.current_state != Some("A04") {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            if ctx.class != "I" {
                return Err(PamError::InvalidClassChange {
                    trigger: "A06".to_string(),
                    expected: "I",
                    actual: ctx.class.to_string(),
                });
            }
            require_zbe_action(ctx, "INSERT")
        }
        "A07" => {
            if ctx.current_state != Some("A01") {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            if ctx.class != "O" {
                return Err(PamError::InvalidClassChange {
                    trigger: "A07".to_string(),
                    expected: "O",
                    actual: ctx.class.to_string(),
                });
            }
            require_zbe_action(ctx, "INSERT")
        }
        "A08" => {
            if ctx.strict_mode {
                return Err(PamError::StrictModeBlocked);
            }
            match ctx.current_state {
                Some(s) if s != "A03" => {}
                _ => return Err(invalid(ctx.current_state, ctx.trigger)),
            }
            require_zbe(ctx)
        }
        "A11" => {
            if ctx.current_state != Some("A01") {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            require_zbe_action(ctx, "CANCEL")
        }
        "A12" => {
            if ctx.current_state != Some("A02") {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            require_zbe_action(ctx, "CANCEL")
        }
        "A13" => {
            if ctx.current_state != Some("A03") {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            require_zbe_action(ctx, "CANCEL")
        }
        "A21" => {
            if !matches!(ctx.current_state, Some("A01") | Some("A02")) {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            if !is_inpatient_class(ctx.class) {
                return Err(PamError::InvalidClassChange {
                    trigger: "A21".to_string(),
                    expected: "I or R",
                    actual: ctx.class.to_string(),
                });
            }
            require_zbe(ctx)
        }
        "A22" => {
            if ctx.current_state != Some("A21") {
                return Err(invalid(ctx.current_state, ctx.trigger));
            }
            if !is_inpatient_class(ctx.class) {
                return Err(PamError::InvalidClassChange {
                    trigger: "A22".to_string(),
                    expected: "I or R",
                    actual: ctx.class.to_string(),
                });
            }
            require_zbe(ctx)
        }
        "A28" | "A31" => Ok(()),
        "A40" => {
            if !ctx.has_mrg {
                return Err(PamError::MissingMrg(ctx.trigger.to_string()));
            }
            Ok(())
        }
        other => Err(PamError::UnsupportedTrigger(other.to_string())),
    }
}

/// 4.S1/§4.6 step 6's ZBE-9=C window check for Z99 corrections: the
/// original trigger named in ZBE-6 must be one of {A01, A04, A05}, and the
/// visit's operational_status must be planned or active.
pub fn validate_correction_window(
    original_trigger: Option<&str>,
    operational_status: &str,
) -> Result<(), PamError> {
    let trigger_ok = matches!(original_trigger, Some("A01") | Some("A04") | Some("A05"));
    let status_ok = matches!(operational_status, "planned" | "active");
    if trigger_ok && status_ok {
        Ok(())
    } else {
        Err(PamError::InvalidCorrectionContext {
            original_trigger: original_trigger.map(|s| s.to_string()),
            operational_status: operational_status.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(trigger: &'a str, current: Option<&'a str>, class: &'a str) -> TransitionContext<'a> {
        TransitionContext {
            trigger,
            current_state: current,
            class,
            zbe_present: true,
            zbe_action: Some("INSERT"),
            has_mrg: false,
            strict_mode: false,
        }
    }

    #[test]
    fn a01_accepted_from_fresh_file() {
        assert!(validate_transition(&ctx("A01", None, "I")).is_ok());
    }

    #[test]
    fn a01_accepted_after_discharge() {
        assert!(validate_transition(&ctx("A01", Some("A03"), "I")).is_ok());
    }

    #[test]
    fn a03_accepted_from_a01() {
        assert!(validate_transition(&ctx("A03", Some("A01"), "I")).is_ok());
    }

    #[test]
    fn a22_rejected_without_prior_a21() {
        let err = validate_transition(&ctx("A22", Some("A03"), "I")).unwrap_err();
        assert_eq!(
            err,
            PamError::InvalidTransition {
                current: "A03".to_string(),
                incoming: "A22".to_string(),
            }
        );
        assert_eq!(err.to_string(), "Transition IHE invalide: A03 -> A22");
    }

    #[test]
    fn a22_accepted_after_a21() {
        assert!(validate_transition(&ctx("A22", Some("A21"), "I")).is_ok());
    }

    #[test]
    fn a08_blocked_in_strict_mode() {
        let mut c = ctx("A08", Some("A01"), "I");
        c.strict_mode = true;
        let err = validate_transition(&c).unwrap_err();
        assert_eq!(err, PamError::StrictModeBlocked);
        assert!(err.to_string().contains("A08 désactivé"));
    }

    #[test]
    fn a08_allowed_without_strict_mode() {
        assert!(validate_transition(&ctx("A08", Some("A01"), "I")).is_ok());
    }

    #[test]
    fn a11_cancels_a01() {
        let mut c = ctx("A11", Some("A01"), "I");
        c.zbe_action = Some("CANCEL");
        assert!(validate_transition(&c).is_ok());
    }

    #[test]
    fn a11_rejects_wrong_zbe_action() {
        let c = ctx("A11", Some("A01"), "I");
        assert_eq!(
            validate_transition(&c).unwrap_err(),
            PamError::MissingZbe("A11".to_string())
        );
    }

    #[test]
    fn a40_requires_mrg() {
        let c = ctx("A40", Some("A01"), "I");
        assert_eq!(
            validate_transition(&c).unwrap_err(),
            PamError::MissingMrg("A40".to_string())
        );
    }

    #[test]
    fn a06_requires_class_i_and_insert() {
        let mut c = ctx("A06", Some("A04"), "I");
        assert!(validate_transition(&c).is_ok());
        c.class = "O";
        assert!(matches!(
            validate_transition(&c),
            Err(PamError::InvalidClassChange { .. })
        ));
    }

    #[test]
    fn correction_window_rejects_outside_allowed_triggers() {
        assert!(validate_correction_window(Some("A02"), "active").is_err());
        assert!(validate_correction_window(Some("A01"), "active").is_ok());
        assert!(validate_correction_window(Some("A01"), "finished").is_err());
    }
}
