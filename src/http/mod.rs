//! HTTP surface: health, admin tooling and the WebSocket upgrade route

pub mod middleware;
pub mod routes;

pub use routes::build_router;
