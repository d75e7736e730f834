pub mod bus;
pub mod conversation;
pub mod executor;
pub mod lifecycle_management;
pub mod orchestrator;
pub mod protocol;
pub mod task;

pub use bus::{BusStats, DropHook, DropReason, Inbox, MessageBus, PublishReport};
pub use conversation::ConversationState;
pub use executor::{ExecutionScope, ExecutorUsage, InFlightTool, ToolExecutor};
pub use lifecycle_management::{AgentStatusSnapshot, LifecycleManager, ShutdownReport};
pub use orchestrator::{Orchestrator, Workflow, WorkflowStep, WorkflowStream};
pub use protocol::CommunicationProtocol;
pub use task::{TaskContext, TaskStream, ToolSet};
