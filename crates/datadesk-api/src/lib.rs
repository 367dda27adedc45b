//! Datadesk API crate - axum HTTP server and route handlers.
//!
//! Exposes chat, session history, store refresh and source catalog
//! management over JSON.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
