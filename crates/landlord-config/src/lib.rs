mod settings;
pub mod error;

pub use error::ConfigError;
pub use settings::{
    ApiSettings, ComputeSettings, LocalComputeSettings, LocalWorkflowSettings,
    ReconcilerSettings, Settings, StoreSettings, WorkflowSettings,
};
