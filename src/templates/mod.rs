pub mod dto;
pub mod handlers;
mod repo;
pub mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use repo_types::Template;

/// Key prefix of a template's files inside the template bucket.
pub fn template_prefix(name: &str) -> String {
    format!("templates/{name}/")
}

pub fn router() -> Router<AppState> {
    handlers::routes()
}
