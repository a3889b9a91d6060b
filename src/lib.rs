//! # qce-gateway
//!
//! The request-handling shell of the Quantum Circuit Editor backend.
//!
//! Three pieces carry real behaviour:
//!
//! - **Authentication** — [`middleware::Authenticate`] checks
//!   `Authorization: Bearer <token>` through a pluggable
//!   [`middleware::TokenValidator`] and attaches the [`Principal`] to the
//!   request's [`RequestContext`].
//! - **Request logging** — [`middleware::RequestLogger`] gives each request a
//!   [`CorrelationId`] and emits one `Request started` and one
//!   `Request completed` record for it.
//! - **Lifecycle** — [`LifecycleController`] binds, serves, and on SIGINT or
//!   SIGTERM drains in-flight requests within a deadline.
//!
//! Everything behind `/api/v1` is a placeholder answering `501`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use qce_gateway::middleware::StaticTokenValidator;
//! use qce_gateway::{LifecycleController, LogSink, ServerConfig, app, shutdown_signal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), qce_gateway::Error> {
//!     let log = LogSink::stdout();
//!     let config = ServerConfig::from_env()?;
//!     let app = app(&config, Arc::new(StaticTokenValidator::default()), log.clone());
//!
//!     LifecycleController::new(config, log)
//!         .start(app)
//!         .await?
//!         .shutdown_on(shutdown_signal())
//!         .await
//! }
//! ```

mod config;
mod context;
mod error;
mod handler;
mod health;
mod io;
mod logging;
mod request;
mod response;
mod router;
mod server;

pub mod api;
pub mod middleware;

use std::sync::Arc;

pub use config::{DEFAULT_BODY_LIMIT, DEFAULT_PORT, ServerConfig, Timeouts};
pub use context::{CorrelationId, Principal, RequestContext, principal_from_context};
pub use error::Error;
pub use handler::Handler;
pub use health::health;
pub use logging::LogSink;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{LifecycleController, Phase, Serving, shutdown_signal};

use middleware::{RequestLogger, TokenValidator};

/// Assembles the handler chain: the request logger around the route table.
///
/// CORS is not part of it; [`LifecycleController`] layers
/// [`middleware::cors_layer`] in front of every connection.
pub fn app(config: &ServerConfig, validator: Arc<dyn TokenValidator>, log: LogSink) -> RequestLogger {
    let routes = api::routes(validator, log.clone(), config.require_auth);
    RequestLogger::new(routes, log)
}
