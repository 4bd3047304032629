pub mod error;
pub mod queue;
pub mod reconciler;

pub use error::ReconcileError;
pub use queue::WorkQueue;
pub use reconciler::{Reconciler, ReconcilerConfig};
