//! Per-request context: correlation ID and authenticated principal.
//!
//! Every [`Request`](crate::Request) owns exactly one [`RequestContext`]. It is
//! created empty when the request is read off the wire, filled in by the
//! middleware chain, and dropped with the request. Nothing in it is shared
//! across requests.

use std::fmt;

use uuid::Uuid;

/// Identity established by a successful credential check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Principal {
    id: String,
    email: String,
}

impl Principal {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self { id: id.into(), email: email.into() }
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn email(&self) -> &str { &self.email }
}

/// Identifier joining the "started" and "completed" log records of one
/// request. 128 random bits (UUID v4).
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self { Self::new() }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Typed request-scoped values threaded through the handler chain.
#[derive(Debug, Default)]
pub struct RequestContext {
    correlation_id: Option<CorrelationId>,
    principal: Option<Principal>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set by the request logger before any other middleware runs.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    /// The authenticated principal, if the auth middleware ran and accepted
    /// the request.
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub(crate) fn set_correlation_id(&mut self, id: CorrelationId) {
        self.correlation_id = Some(id);
    }

    pub(crate) fn attach_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }
}

/// Returns the principal attached by the auth middleware.
///
/// `None` means "not authenticated". Handlers must not assume the middleware
/// ran in front of them.
pub fn principal_from_context(ctx: &RequestContext) -> Option<&Principal> {
    ctx.principal()
}
