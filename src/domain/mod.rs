//! Domain types for the cadenza orchestrator.
//!
//! This module contains the core data structures:
//! - Contact: the central funnel entity and its state machine
//! - Touch: immutable records of dispatch attempts
//! - PipelineMode / HeartbeatRecord: cross-invocation singletons

pub mod contact;
pub mod state;
pub mod touch;

// Re-export commonly used types
pub use contact::{bucket_for, normalize_name, Contact, ContactStatus, ParseStatusError};
pub use state::{HeartbeatRecord, ParseModeError, PipelineMode};
pub use touch::{Channel, ParseChannelError, ParseOutcomeError, Touch, TouchOutcome};
