use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Manual commands accepted on the trigger channel and the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Run one ingestion cycle now
    Ingest,
    /// Drain one batch from the pending stream
    ProcessBatch,
    /// Drain one batch, then run the curator regardless of the success count
    ProcessWithCurator,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Ingest => "ingest",
            Trigger::ProcessBatch => "process_batch",
            Trigger::ProcessWithCurator => "process_with_curator",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trigger {0:?} (expected ingest, process_batch or process_with_curator)")]
pub struct UnknownTrigger(pub String);

impl FromStr for Trigger {
    type Err = UnknownTrigger;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ingest" => Ok(Trigger::Ingest),
            "process_batch" => Ok(Trigger::ProcessBatch),
            "process_with_curator" => Ok(Trigger::ProcessWithCurator),
            other => Err(UnknownTrigger(other.to_string())),
        }
    }
}

/// What the worker is doing right now, as published under the status key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Polling,
    Processing,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Polling => "polling",
            WorkerState::Processing => "processing",
        }
    }
}
