pub mod transitions;
pub mod z99;

pub use transitions::{validate_correction_window, validate_transition, PamError, TransitionContext};
pub use z99::{resolve_entity, Z99Entity, Z99Error};
