//! Operation Context
//!
//! Who triggered a run and under which correlation id, for the audit trail
//! and for tracing.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Entry point a run came through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduler,
    Api,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Scheduler => "scheduler",
            Trigger::Api => "api",
            Trigger::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduler" => Some(Trigger::Scheduler),
            "api" => Some(Trigger::Api),
            "manual" => Some(Trigger::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context for an operation, used for auditing and tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    pub trigger: Trigger,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl OperationContext {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            correlation_id: None,
        }
    }

    pub fn scheduler() -> Self {
        Self::new(Trigger::Scheduler)
    }

    pub fn manual() -> Self {
        Self::new(Trigger::Manual)
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::manual()
    }
}
