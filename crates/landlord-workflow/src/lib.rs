pub mod error;
pub mod local;
pub mod manager;
pub mod provider;

pub use error::WorkflowError;
pub use local::{LocalEngineConfig, LocalWorkflowEngine};
pub use manager::WorkflowManager;
pub use provider::{
    map_native_state, CallbackSink, ComputeCallback, ExecutionContext, ExecutionHandler,
    ExecutionInput, ExecutionMetadata, ExecutionStatus, WorkflowProvider,
};
