//! Route table for the circuit editor API.
//!
//! Only `/health` does real work today. Auth, circuit storage, simulation and
//! QASM export are reserved paths that answer `501` until their services exist.

use std::sync::Arc;

use http::StatusCode;
use serde_json::json;

use crate::handler::{Erased, Handler};
use crate::health::health;
use crate::logging::LogSink;
use crate::middleware::{AuthLayer, TokenValidator};
use crate::{Request, Response, Router};

/// Placeholder for endpoints that are planned but not built.
pub async fn not_implemented(_req: Request) -> Response {
    Response::json(
        StatusCode::NOT_IMPLEMENTED,
        &json!({
            "error": "Not implemented yet",
            "message": "This endpoint is planned but not yet available",
        }),
    )
}

/// Wraps handlers in authentication, or passes them through when disabled.
struct Guard(Option<AuthLayer>);

impl Guard {
    fn wrap(&self, handler: impl Handler) -> Erased {
        match &self.0 {
            Some(layer) => Erased(layer.protect(handler).into_boxed_handler()),
            None => Erased(handler.into_boxed_handler()),
        }
    }
}

/// Builds the route table.
///
/// With `require_auth`, every `/api/v1` route except `POST /api/v1/auth/login`
/// needs a valid bearer token. Without it, all routes are public.
pub fn routes(validator: Arc<dyn TokenValidator>, log: LogSink, require_auth: bool) -> Router {
    let guard = Guard(require_auth.then(|| AuthLayer::new(validator, log)));

    Router::new()
        .get("/health", health)
        .post("/api/v1/auth/login", not_implemented)
        .post("/api/v1/auth/logout", guard.wrap(not_implemented))
        .get("/api/v1/circuits", guard.wrap(not_implemented))
        .post("/api/v1/circuits", guard.wrap(not_implemented))
        .get("/api/v1/circuits/{id}", guard.wrap(not_implemented))
        .put("/api/v1/circuits/{id}", guard.wrap(not_implemented))
        .delete("/api/v1/circuits/{id}", guard.wrap(not_implemented))
        .post("/api/v1/simulate", guard.wrap(not_implemented))
        .post("/api/v1/export/qasm", guard.wrap(not_implemented))
}
