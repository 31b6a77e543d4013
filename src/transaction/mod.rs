//! Multi-document writes with compensation.

/// This module contains the compensating-write planner.
pub mod compensation;
/// This module contains the transaction coordinator.
pub mod coordinator;
/// This module contains the phase hook types.
pub mod phase;
/// This module contains the persisted transaction record.
pub mod record;

pub use coordinator::TransactionCoordinator;
pub use phase::{PhaseHook, TransactionPhase};
pub use record::{TransactionRecord, TransactionStatus};
