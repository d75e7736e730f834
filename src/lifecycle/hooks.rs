use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::AgentId;

/// Coarse lifecycle milestones observers can hook into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Created,
    Initialized,
    Started,
    Stopped,
    Error,
    Destroyed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleRecord {
    pub agent_id: AgentId,
    pub stage: LifecycleStage,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
}

impl LifecycleRecord {
    pub fn new(agent_id: AgentId, stage: LifecycleStage) -> Self {
        Self {
            agent_id,
            stage,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

pub type LifecycleHandler = Arc<dyn Fn(&LifecycleRecord) + Send + Sync>;

#[derive(Default)]
pub struct LifecycleHooks {
    handlers: RwLock<HashMap<LifecycleStage, Vec<LifecycleHandler>>>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, stage: LifecycleStage, handler: LifecycleHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stage)
            .or_default()
            .push(handler);
    }

    /// Runs every handler for the record's stage. A panicking handler is
    /// logged and skipped.
    pub fn emit(&self, record: LifecycleRecord) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&record.stage)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&record))).is_err() {
                log::error!(
                    "Lifecycle handler failed for {:?} of agent {}",
                    record.stage,
                    record.agent_id
                );
            }
        }
    }
}
