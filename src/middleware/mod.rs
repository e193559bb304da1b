//! HTTP middleware layers.
//!
//! - `auth` - shared-secret bearer token validation
//! - `connection_limit` - global and per-IP WebSocket connection caps

pub mod auth;
pub mod connection_limit;

pub use auth::{Auth, AuthError, auth_middleware};
pub use connection_limit::{ClientIp, connection_limit_middleware};
