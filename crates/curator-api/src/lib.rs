//! Curator API - HTTP request surface
//!
//! Typed request/response shapes, basic-auth with ordered authorisation
//! levels, a socketless dispatch layer, and the hyper server that frames
//! requests into it.

pub mod auth;
pub mod router;
pub mod server;
pub mod types;

pub use router::AppState;
pub use server::ApiServer;
pub use types::ApiError;
