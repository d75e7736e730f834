pub mod capabilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod factory;
pub mod lifecycle;
pub mod tools;
pub mod types;

pub use capabilities::Agent;
pub use config::RuntimeConfig;
pub use engine::{
    CommunicationProtocol, LifecycleManager, MessageBus, Orchestrator, TaskContext, TaskStream,
    ToolExecutor,
};
pub use error::{Result, RuntimeError};
pub use factory::AgentRegistry;
pub use tools::{Tool, ToolResult};
pub use types::*;
