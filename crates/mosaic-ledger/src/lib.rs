//! Job Ledger: durable map from provider job id to the asset it belongs to.
//!
//! The ledger is independent of the relational store. Records are never
//! removed while a job is outstanding; terminal records carry an expiry after
//! which the backend may drop them.

pub mod error;
pub mod factory;
pub mod memory;
pub mod traits;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;

pub use error::{LedgerError, LedgerResult};
pub use factory::create_ledger;
pub use memory::MemoryJobLedger;
pub use traits::JobLedger;

#[cfg(feature = "dynamodb")]
pub use dynamodb::DynamoJobLedger;

use chrono::{DateTime, Duration, Utc};
use mosaic_core::models::JobStatus;

/// Expiry for a record entering `status` at `now`; `None` while outstanding.
pub(crate) fn expiry_for(
    status: JobStatus,
    now: DateTime<Utc>,
    ttl_hours: i64,
) -> Option<DateTime<Utc>> {
    status
        .is_terminal()
        .then(|| now + Duration::hours(ttl_hours.max(0)))
}
