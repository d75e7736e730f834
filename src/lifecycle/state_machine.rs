use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Result, RuntimeError};
use crate::types::{AgentId, AgentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    Initialized,
    Started,
    TaskStarted,
    ToolInvoked,
    ToolReturned,
    AwaitingMessage,
    MessageReceived,
    TaskFinished,
    TaskCompleted,
    Faulted,
    Stopped,
    Destroyed,
}

pub struct AgentStateMachine;

impl AgentStateMachine {
    pub fn next(status: AgentStatus, event: LifecycleEvent) -> Option<AgentStatus> {
        use AgentStatus::*;
        use LifecycleEvent as E;

        let next = match (status, event) {
            (Destroyed, _) => return None,
            (_, E::Destroyed) => Destroyed,

            (Created, E::Initialized) => Idle,
            (Idle | Error | Completed, E::Started) => status,

            (Idle | Error | Completed, E::TaskStarted) => Thinking,
            (Thinking, E::ToolInvoked) => Acting,
            (Acting, E::ToolReturned) => Thinking,
            (Thinking | Acting, E::AwaitingMessage) => Waiting,
            (Waiting, E::MessageReceived) => Thinking,

            (Thinking | Acting | Waiting, E::TaskFinished) => Idle,
            (Thinking | Acting | Waiting, E::TaskCompleted) => Completed,
            (Thinking | Acting | Waiting, E::Faulted) => Error,

            (Idle | Thinking | Acting | Waiting | Error | Completed, E::Stopped) => Idle,

            _ => return None,
        };

        Some(next)
    }

    pub fn transition(
        id: AgentId,
        status: &mut AgentStatus,
        event: LifecycleEvent,
    ) -> Result<AgentStatus> {
        let next = Self::next(*status, event).ok_or(RuntimeError::InvalidState {
            id,
            status: *status,
            operation: event_operation(event),
        })?;

        if next != *status {
            log::debug!("Agent {} {:?} -> {:?} on {:?}", id, status, next, event);
        }
        *status = next;
        Ok(next)
    }
}

fn event_operation(event: LifecycleEvent) -> &'static str {
    match event {
        LifecycleEvent::Initialized => "initialize",
        LifecycleEvent::Started => "start",
        LifecycleEvent::TaskStarted => "run a task on",
        LifecycleEvent::ToolInvoked => "invoke a tool from",
        LifecycleEvent::ToolReturned => "return a tool result to",
        LifecycleEvent::AwaitingMessage => "wait on",
        LifecycleEvent::MessageReceived => "deliver a message to",
        LifecycleEvent::TaskFinished | LifecycleEvent::TaskCompleted => "finish a task on",
        LifecycleEvent::Faulted => "fault",
        LifecycleEvent::Stopped => "stop",
        LifecycleEvent::Destroyed => "destroy",
    }
}

/// Status shared between an agent's record and the task that currently owns it.
#[derive(Debug, Clone)]
pub struct SharedStatus {
    id: AgentId,
    inner: Arc<Mutex<AgentStatus>>,
}

impl SharedStatus {
    pub fn new(id: AgentId, status: AgentStatus) -> Self {
        Self {
            id,
            inner: Arc::new(Mutex::new(status)),
        }
    }

    pub fn get(&self) -> AgentStatus {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apply(&self, event: LifecycleEvent) -> Result<AgentStatus> {
        let mut status = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        AgentStateMachine::transition(self.id, &mut status, event)
    }

    /// Applies the event if legal, otherwise leaves the status untouched.
    pub fn try_apply(&self, event: LifecycleEvent) -> AgentStatus {
        let mut status = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(next) = AgentStateMachine::next(*status, event) {
            *status = next;
        }
        *status
    }
}
