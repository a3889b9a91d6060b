//! Cross-origin resource sharing.
//!
//! The policy is wide open: any origin, credentials allowed. Narrow
//! [`cors_layer`] before exposing the service to browsers outside
//! development.

use http::{Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// The CORS policy layered in front of every connection's handler chain.
///
/// A `*` origin cannot be combined with credentials, so the request's
/// `Origin` is echoed back instead. Every origin is still admitted.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
