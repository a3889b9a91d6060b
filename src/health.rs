//! Liveness endpoint.
//!
//! `GET /health` answers `200 {"status":"ok"}` whenever the process can serve
//! HTTP at all. It has no dependencies and is never behind authentication, so
//! load balancers and orchestrators can probe it freely.

use http::StatusCode;
use serde_json::json;

use crate::{Request, Response};

pub async fn health(_req: Request) -> Response {
    Response::json(StatusCode::OK, &json!({"status": "ok"}))
}
