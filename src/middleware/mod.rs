//! Middleware layer.
//!
//! Each middleware wraps the next [`Handler`](crate::Handler) and is itself a
//! `Handler`, so the request chain is built inside-out. CORS sits outside the
//! chain as a tower layer applied by the server:
//!
//! ```text
//! cors_layer → RequestLogger → Router → [Authenticate →] route handler
//! ```
//!
//! - [`cors_layer`] — answers preflights, decorates cross-origin responses.
//! - [`RequestLogger`] — correlation ID, started/completed records, panic containment.
//! - [`Authenticate`] — bearer-token check in front of protected routes.

mod auth;
mod cors;
mod logger;
mod observer;

pub use auth::{AuthFailure, AuthLayer, Authenticate, StaticTokenValidator, TokenValidator};
pub use cors::cors_layer;
pub use logger::{REQUEST_ID_HEADER, RequestLogger};
pub use observer::ResponseObserver;
