pub mod auth;
pub mod canvas;
pub mod cleanup;
pub mod error;
pub mod files;
pub mod identity;
pub mod messages;
pub mod middleware;
pub mod rooms;
pub mod routes;
pub mod settings;
pub mod storage;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use routes::router;
