pub mod agenda;
pub mod clock;
pub mod coordinator;
pub mod error;
pub mod habit;
pub mod notifications;
pub mod recurrence;
pub mod service;
pub mod store;

pub use crate::coordinator::{CompletionCoordinator, CompletionOutcome};
pub use crate::error::{HabitError, Result};
pub use crate::service::{HabitService, HabitServiceBuilder};
