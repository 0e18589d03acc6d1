//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /set` - Store a JSON value with optional TTL and tags
//! - `GET /get/:key`, `GET /has/:key`, `GET /meta/:key`
//! - `DELETE /del/:key`, `POST /touch/:key`
//! - `GET /keys`, `POST /clear`
//! - `GET /tags/:tag`, `DELETE /tags/:tag`
//! - `GET /stats`, `POST /stats/reset`
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
