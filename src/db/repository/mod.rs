//! Repository layer: entity-scoped database operations.
//!
//! Every write is an upsert on a natural key so reconciliation can be
//! re-applied to the same batch output without duplicating rows.

mod document;
mod message;
mod transcription;

pub use document::*;
pub use message::*;
pub use transcription::*;
