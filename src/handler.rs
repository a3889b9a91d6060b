//! Handler trait and type erasure.
//!
//! # How handlers and middleware are stored
//!
//! The router holds handlers of *different* types in one map, and every
//! middleware wraps "whatever comes next" without knowing its type. Both use
//! the same trait object, [`BoxedHandler`]:
//!
//! ```text
//! async fn health(req: Request) -> Response { … }   ← user writes this
//!        ↓ router.get("/health", health)
//! health.into_boxed_handler()                      ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(health))                      ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(req)  at request time               ← one vtable dispatch
//! ```
//!
//! Middleware ([`RequestLogger`](crate::middleware::RequestLogger),
//! [`Authenticate`](crate::middleware::Authenticate)) and the
//! [`Router`](crate::Router) itself implement `ErasedHandler` directly,
//! so a chain is just nested `BoxedHandler`s.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future that resolves to a [`Response`].
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A heap-allocated, type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler and for the crate's middleware.
///
/// It is automatically satisfied for any `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// The trait is **sealed**: only the blanket impl below and the crate's own
/// middleware types can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

pub(crate) mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Implements [`Handler`] for a crate type that already implements
/// [`ErasedHandler`].
macro_rules! erased_handler {
    ($ty:ty) => {
        impl $crate::handler::private::Sealed for $ty {}

        impl $crate::handler::Handler for $ty {
            fn into_boxed_handler(self) -> $crate::handler::BoxedHandler {
                ::std::sync::Arc::new(self)
            }
        }
    };
}
pub(crate) use erased_handler;

/// A handler chosen at runtime and already type-erased.
pub(crate) struct Erased(pub(crate) BoxedHandler);

impl private::Sealed for Erased {}

impl Handler for Erased {
    fn into_boxed_handler(self) -> BoxedHandler {
        self.0
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
