//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. The router is itself a
//! handler, so middleware can wrap it like any other.

use std::collections::HashMap;
use std::sync::Arc;

use http::header::{self, HeaderValue};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;
use serde_json::json;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, erased_handler};
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// Build it once at startup and hand it to the middleware chain. Each
/// registration returns `self` so calls chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `req.param("name")` retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`. Routes are fixed at startup, so this is a
    /// programming error.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    /// Methods that have a route for `path`, sorted for a stable `Allow` header.
    fn allowed_methods(&self, path: &str) -> Vec<&Method> {
        let mut methods: Vec<&Method> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(m, _)| m)
            .collect();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        methods
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

impl ErasedHandler for Router {
    fn call(&self, mut req: Request) -> BoxFuture {
        if let Some((handler, params)) = self.lookup(req.method(), req.path()) {
            req.params = params;
            return handler.call(req);
        }

        let allowed = self.allowed_methods(req.path());
        let res = if allowed.is_empty() {
            Response::json(StatusCode::NOT_FOUND, &json!({"error": "Not found"}))
        } else {
            let allow = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
            let mut res = Response::json(StatusCode::METHOD_NOT_ALLOWED, &json!({"error": "Method not allowed"}));
            if let Ok(v) = HeaderValue::from_str(&allow) {
                res.headers_mut().insert(header::ALLOW, v);
            }
            res
        };
        Box::pin(async move { res })
    }
}

erased_handler!(Router);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::test_support::request;

    fn router() -> Router {
        Router::new()
            .get("/api/v1/circuits/{id}", |req: Request| async move {
                format!("circuit {}", req.param("id").unwrap_or("?"))
            })
            .delete("/api/v1/circuits/{id}", |_req: Request| async { StatusCode::NO_CONTENT })
    }

    #[tokio::test]
    async fn path_params_reach_the_handler() {
        let res = router().call(request(Method::GET, "/api/v1/circuits/42", &[])).await;
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.body(), b"circuit 42");
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let res = router().call(request(Method::GET, "/nope", &[])).await;
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn known_path_wrong_method_is_405_with_allow() {
        let res = router().call(request(Method::POST, "/api/v1/circuits/42", &[])).await;
        assert_eq!(res.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers()[header::ALLOW], "DELETE, GET");
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_routes_panic_at_startup() {
        let _ = Router::new()
            .get("/x/{a}", |_req: Request| async { "a" })
            .get("/x/{b}", |_req: Request| async { "b" });
    }
}
