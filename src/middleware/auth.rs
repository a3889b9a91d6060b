//! Bearer-token authentication.
//!
//! [`Authenticate`] reads `Authorization: Bearer <token>`, hands the token to
//! a [`TokenValidator`], and either attaches the resulting [`Principal`] to
//! the request context or answers `401` itself. Every rejection looks the
//! same to the caller; the reason only goes to the server log.

use std::sync::Arc;

use http::{StatusCode, header};
use serde_json::json;
use tracing::info;

use crate::context::Principal;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, erased_handler};
use crate::logging::LogSink;
use crate::request::Request;
use crate::response::Response;

const BEARER: &str = "Bearer";

/// Why a request was rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AuthFailure {
    #[error("no authorization header provided")]
    MissingCredential,
    #[error("invalid authorization header format")]
    MalformedCredential,
    #[error("invalid authentication token")]
    InvalidCredential,
}

/// Maps a bearer credential to a principal.
///
/// Implementations must be free of side effects other than the decision
/// itself: no logging, and the middleware calls them at most once per request.
pub trait TokenValidator: Send + Sync + 'static {
    fn validate(&self, credential: &str) -> Result<Principal, AuthFailure>;
}

/// Development validator: accepts a single fixed token.
///
/// Stands in until real signature and expiry checks exist. Do not deploy.
#[derive(Clone, Debug)]
pub struct StaticTokenValidator {
    token: String,
    principal: Principal,
}

impl StaticTokenValidator {
    pub fn new(token: impl Into<String>, principal: Principal) -> Self {
        Self { token: token.into(), principal }
    }
}

impl Default for StaticTokenValidator {
    fn default() -> Self {
        Self::new("test-token", Principal::new("test-user-id", "test@example.com"))
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, credential: &str) -> Result<Principal, AuthFailure> {
        if credential == self.token {
            Ok(self.principal.clone())
        } else {
            Err(AuthFailure::InvalidCredential)
        }
    }
}

/// Splits `Bearer <token>` on single spaces. Anything other than exactly two
/// parts with the literal scheme first is malformed.
fn bearer_token(value: &str) -> Result<&str, AuthFailure> {
    let mut parts = value.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(BEARER), Some(token), None) => Ok(token),
        _ => Err(AuthFailure::MalformedCredential),
    }
}

/// Builds [`Authenticate`] wrappers that share one validator and log sink.
#[derive(Clone)]
pub struct AuthLayer {
    validator: Arc<dyn TokenValidator>,
    log: LogSink,
}

impl AuthLayer {
    pub fn new(validator: Arc<dyn TokenValidator>, log: LogSink) -> Self {
        Self { validator, log }
    }

    /// Puts `next` behind authentication.
    pub fn protect(&self, next: impl Handler) -> Authenticate {
        Authenticate {
            validator: Arc::clone(&self.validator),
            log: self.log.clone(),
            next: next.into_boxed_handler(),
        }
    }
}

/// Middleware that only lets authenticated requests reach `next`.
pub struct Authenticate {
    validator: Arc<dyn TokenValidator>,
    log: LogSink,
    next: BoxedHandler,
}

impl Authenticate {
    fn authenticate(&self, req: &Request) -> Result<Principal, AuthFailure> {
        let value = match req.headers().get(header::AUTHORIZATION) {
            None => return Err(AuthFailure::MissingCredential),
            Some(v) if v.is_empty() => return Err(AuthFailure::MissingCredential),
            Some(v) => v.to_str().map_err(|_| AuthFailure::MalformedCredential)?,
        };
        let token = bearer_token(value)?;
        self.validator.validate(token).map_err(|_| AuthFailure::InvalidCredential)
    }

    fn reject(&self, req: &Request, failure: AuthFailure) -> Response {
        self.log.emit(|| {
            info!(
                error = %failure,
                path = req.path(),
                method = %req.method(),
                remote_addr = %req.remote_addr(),
                "Authentication failed"
            )
        });
        Response::json(StatusCode::UNAUTHORIZED, &json!({"error": "Authentication required"}))
    }
}

impl ErasedHandler for Authenticate {
    fn call(&self, mut req: Request) -> BoxFuture {
        match self.authenticate(&req) {
            Ok(principal) => {
                req.context_mut().attach_principal(principal);
                self.next.call(req)
            }
            Err(failure) => {
                let res = self.reject(&req, failure);
                Box::pin(async move { res })
            }
        }
    }
}

erased_handler!(Authenticate);
