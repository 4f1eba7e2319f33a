pub mod dto;
pub mod handlers;
mod repo;
pub mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub use repo_types::{Access, Project};

/// Project tree: the project routes plus its files and groups.
fn tree() -> Router<AppState> {
    Router::new()
        .merge(handlers::routes())
        .merge(crate::files::routes())
        .merge(crate::groups::project_routes())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/projects", tree())
        .nest("/apps", tree())
        .merge(handlers::user_routes())
}
