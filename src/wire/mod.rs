pub mod mllp;

pub use mllp::{MllpCodec, MllpError};
