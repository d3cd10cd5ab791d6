//! Cross-invocation pipeline state and heartbeat records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Global pipeline mode, held in the PipelineState table.
///
/// The transition to `Halted` is a one-way latch tripped by the circuit
/// breaker; only an explicit clear operation restores `Working`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Normal operation
    Working,

    /// Dispatch-class work suspended pipeline-wide
    Halted,
}

impl PipelineMode {
    pub fn is_halted(&self) -> bool {
        matches!(self, Self::Halted)
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Working => write!(f, "working"),
            Self::Halted => write!(f, "halted"),
        }
    }
}

/// Error parsing a mode string from the store
#[derive(Debug, Clone, Error)]
#[error("Unknown pipeline mode: {0}")]
pub struct ParseModeError(pub String);

impl FromStr for PipelineMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "working" => Ok(Self::Working),
            "halted" => Ok(Self::Halted),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// A periodic liveness record written by the scheduler.
///
/// Pure output for external monitoring; nothing in the engine reads
/// these back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    /// Unique identifier
    pub id: Uuid,

    /// The tick that produced this heartbeat
    pub tick_index: u64,

    /// Pipeline mode at the time of the heartbeat
    pub mode: PipelineMode,

    /// Short status note for the health log stream
    pub note: String,

    /// When the heartbeat was written
    pub created_at: DateTime<Utc>,
}

impl HeartbeatRecord {
    /// Create a heartbeat for the given tick
    pub fn new(tick_index: u64, mode: PipelineMode, note: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tick_index,
            mode,
            note: note.into(),
            created_at: Utc::now(),
        }
    }
}
