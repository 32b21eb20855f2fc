//! Doc Analysis — background processing for document and image analysis.

pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod store;
pub mod worker;
