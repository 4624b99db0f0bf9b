//! API Module
//!
//! HTTP handlers and routing for the cache inspection API.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Memory-tier statistics
//! - `GET /keys` - Keys held in either tier
//! - `GET /cache/:key` - Read through both tiers
//! - `PUT /cache` - Store a JSON value
//! - `DELETE /cache/:key` - Delete a key from both tiers
//! - `DELETE /cache` - Clear the namespace

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
