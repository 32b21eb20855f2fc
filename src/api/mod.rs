//! HTTP surface for submitting and polling background tasks.

pub mod routes;

pub use routes::{AppState, task_routes};
