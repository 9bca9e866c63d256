use std::path::PathBuf;

use thiserror::Error;

use crate::habit::HabitId;

pub type Result<T, E = HabitError> = std::result::Result<T, E>;

/// Errors surfaced by the recurrence engine and the completion coordinator.
#[derive(Debug, Error)]
pub enum HabitError {
    /// Rejected before anything is persisted, e.g. a zero-day custom interval.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The operation does not apply to this habit (wrong habit type).
    #[error("habit {id}: {reason}")]
    InvalidOperation { id: HabitId, reason: String },

    #[error("habit {0} not found")]
    NotFound(HabitId),

    /// The store refused the write. Nothing was applied and no alarm was touched.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    /// Calendar arithmetic left chrono's representable range.
    #[error("due date out of range while advancing from {0}")]
    OutOfRange(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed store snapshot: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotificationError {
    /// The entity id does not fit into its request-id range.
    #[error("{kind} id {id} exceeds the reminder id range")]
    IdOutOfRange { kind: &'static str, id: u64 },

    /// The platform refused to arm or disarm, e.g. missing alarm permission.
    #[error("alarm capability refused the request: {0}")]
    Refused(String),
}
