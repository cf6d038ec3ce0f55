//! Resumable reconciliation context.
//!
//! The context is the only state that survives between invocations. The
//! caller persists it whenever a step returns `InProgress` and hands it back
//! on the next invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position within a create, update or delete step sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Issue the initial create, update-config or delete call.
    #[default]
    Submit,
    /// Poll the lifecycle state machine until the server is ready.
    Stabilize,
    SecurityGroups,
    AddTags,
    RemoveTags,
    ReadBack,
    AwaitDeletion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationContext {
    /// Only ever decremented.
    pub retries_remaining: u32,
    pub phase: Phase,
    /// Filled in once the control plane assigns an id.
    pub server_id: Option<String>,
    pub arn: Option<String>,
    pub vpc_endpoint_id: Option<String>,
    /// Stops issued to re-enter offline reconfiguration.
    pub stop_start_cycles: u32,
    pub started_at: DateTime<Utc>,
}

impl ReconciliationContext {
    pub fn new(retry_budget: u32) -> Self {
        Self {
            retries_remaining: retry_budget,
            phase: Phase::Submit,
            server_id: None,
            arn: None,
            vpc_endpoint_id: None,
            stop_start_cycles: 0,
            started_at: Utc::now(),
        }
    }

    pub fn advance(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Spend one retry. Returns false once the budget is exhausted.
    pub fn consume_retry(&mut self) -> bool {
        if self.retries_remaining == 0 {
            return false;
        }
        self.retries_remaining -= 1;
        true
    }

    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}
