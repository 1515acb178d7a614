pub mod error;
pub mod handlers;
pub mod server;
pub mod websocket;

pub use error::{ApiError, ErrorBody};
pub use handlers::StatusResponse;
pub use server::ApiServer;
