pub mod identity;
pub mod model;
pub mod store;

pub use identity::{parse_cx, CxIdentifier, IdentityError, IdentityResolver};
pub use model::*;
pub use store::{LockKey, OutboxEntry, Sequences, Store};
