//! Shared domain types for the taskdeck client: entity identifiers, the
//! project/task/attachment models and the mutation inputs.

pub mod ids;
pub mod models;

pub use ids::{EntityId, EntityKind, TEMP_ID_PREFIX, TempIdGenerator};
pub use models::*;
