//! Configuration loading, validation, and the shared catalog fingerprint.

pub mod cache;
pub mod loader;
pub mod model;

pub use loader::{load_and_validate, load_from_path};
pub use model::AppConfig;
