pub mod dto;
pub mod handlers;
mod repo;
pub mod repo_types;
pub mod services;

pub use handlers::{project_routes, routes};
pub use repo_types::Group;
