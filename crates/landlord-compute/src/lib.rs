pub mod error;
pub mod local;
pub mod provider;
pub mod registry;

pub use error::ComputeError;
pub use local::LocalComputeProvider;
pub use provider::{ComputeOutcome, ComputeProvider, ComputeSchema, ComputeSpec, ComputeState};
pub use registry::ComputeRegistry;
