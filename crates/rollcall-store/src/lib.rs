//! rollcall-store — durable state behind enrollment and recognition.
//!
//! - [`IdentityStore`]: one embedding per identity, in SQLite via
//!   [`tokio_rusqlite`] so queries never block the async runtime.
//! - [`AttendanceLedger`]: append-only CSV log with a single writer lock.
//! - [`EvidenceStore`]: probe images referenced by ledger rows.

mod csv;
mod schema;

pub mod error;
pub mod evidence;
pub mod identity;
pub mod ledger;

pub use error::{Result, StoreError};
pub use evidence::{EvidenceStore, StagedEvidence};
pub use identity::IdentityStore;
pub use ledger::AttendanceLedger;
