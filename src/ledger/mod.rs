//! Durable request and outcome ledgers (JSON lines).

mod outcome;
mod pending;

pub use outcome::OutcomeLedger;
pub use pending::{PendingLedger, PendingRecords, RecordDefaults, load_pending};
