//! HTTP surface: admin routes, match lookup and health

pub mod middleware;
pub mod routes;

pub use routes::build_router;
