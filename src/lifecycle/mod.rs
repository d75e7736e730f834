pub mod hooks;
pub mod state_machine;

pub use hooks::{LifecycleHandler, LifecycleHooks, LifecycleRecord, LifecycleStage};
pub use state_machine::{AgentStateMachine, LifecycleEvent, SharedStatus};
