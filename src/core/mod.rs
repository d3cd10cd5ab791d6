//! Core orchestration logic.
//!
//! This module contains:
//! - CadenceScheduler: tick-modulo fan-out over every recurring job
//! - ChannelDispatcher: channel selection and dispatch execution
//! - CircuitBreaker: the failure-rate kill switch
//! - RequeueWorker: the bounded backward edge for unresponsive contacts
//! - pool: the bounded worker pool dispatch jobs run on

pub mod breaker;
pub mod dispatcher;
pub mod pool;
pub mod requeue;
pub mod scheduler;

// Re-export main types
pub use breaker::{BreakerVerdict, CircuitBreaker};
pub use dispatcher::{select_channel, ChannelDispatcher, PassSummary};
pub use pool::{DispatchJob, DispatchOutcome, DispatchPurpose, JobHandler};
pub use requeue::{RequeueSummary, RequeueWorker};
pub use scheduler::{CadenceScheduler, ResearchSummary, TickReport};
