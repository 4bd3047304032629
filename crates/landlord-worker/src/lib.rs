pub mod control_plane;
pub mod error;
pub mod handler;

pub use control_plane::ControlPlaneClient;
pub use error::WorkerError;
pub use handler::WorkerHandler;
