//! API Module
//!
//! HTTP handlers and routing over the cache.
//!
//! # Endpoints
//! - `PUT /set` - Store a value (optional `ttl` in milliseconds)
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Reset a key
//! - `GET /stats` - Get cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
