pub mod app;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod state;

pub use app::build_app;
pub use error::{ApiError, ErrorCode};
pub use state::AppState;
