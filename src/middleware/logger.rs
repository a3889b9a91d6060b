//! Request lifecycle logging.
//!
//! [`RequestLogger`] tags every request with a fresh
//! [`CorrelationId`](crate::context::CorrelationId) and emits exactly two
//! records for it, `Request started` before the inner handler runs and
//! `Request completed` after it returns. A panic anywhere below is turned
//! into a `500` here. When the client goes away mid-request and the server
//! drops the request's future, the completed record is still written, marked
//! `client_closed=true`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use futures::FutureExt;
use http::header::HeaderValue;
use http::{Method, StatusCode};
use serde_json::json;
use tracing::{error, info};

use crate::context::CorrelationId;
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler, Handler, erased_handler};
use crate::logging::LogSink;
use crate::middleware::ResponseObserver;
use crate::request::Request;
use crate::response::Response;

/// Response header carrying the correlation ID back to the client.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub struct RequestLogger {
    next: BoxedHandler,
    log: LogSink,
}

impl RequestLogger {
    pub fn new(next: impl Handler, log: LogSink) -> Self {
        Self { next: next.into_boxed_handler(), log }
    }
}

impl ErasedHandler for RequestLogger {
    fn call(&self, mut req: Request) -> BoxFuture {
        let next = self.next.clone();
        let log = self.log.clone();

        Box::pin(async move {
            let correlation_id = CorrelationId::new();
            let start = Instant::now();

            req.context_mut().set_correlation_id(correlation_id.clone());

            log.emit(|| {
                info!(
                    request_id = %correlation_id,
                    method = %req.method(),
                    path = %req.path(),
                    remote_addr = %req.remote_addr(),
                    user_agent = req.user_agent(),
                    "Request started"
                )
            });

            let completion = Completion {
                log: log.clone(),
                correlation_id: correlation_id.clone(),
                method: req.method().clone(),
                path: req.path().to_owned(),
                start,
                observer: ResponseObserver::new(),
                finished: false,
            };

            let mut response = match call_contained(&next, req).await {
                Ok(res) => res,
                Err(panic) => {
                    let reason = panic_message(panic.as_ref());
                    log.emit(|| {
                        error!(request_id = %correlation_id, panic = reason, "Handler panicked")
                    });
                    Response::json(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &json!({"error": "Internal server error"}),
                    )
                }
            };

            if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            completion.finish(response)
        })
    }
}

/// Writes the `Request completed` record when dropped.
///
/// Dropped either by [`Completion::finish`] or, if the client disconnected,
/// together with the abandoned request future.
struct Completion {
    log: LogSink,
    correlation_id: CorrelationId,
    method: Method,
    path: String,
    start: Instant,
    observer: ResponseObserver,
    finished: bool,
}

impl Completion {
    fn finish(mut self, response: Response) -> Response {
        let response = self.observer.observe(response);
        self.finished = true;
        response
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let status = self.observer.status().as_u16();
        let duration_ms = self.start.elapsed().as_millis() as u64;

        if self.finished {
            self.log.emit(|| {
                info!(
                    request_id = %self.correlation_id,
                    method = %self.method,
                    path = %self.path,
                    status,
                    duration_ms,
                    "Request completed"
                )
            });
        } else {
            self.log.emit(|| {
                info!(
                    request_id = %self.correlation_id,
                    method = %self.method,
                    path = %self.path,
                    status,
                    duration_ms,
                    client_closed = true,
                    "Request completed"
                )
            });
        }
    }
}

erased_handler!(RequestLogger);

/// Runs `next`, catching a panic raised either while it builds its future or
/// while that future is polled.
async fn call_contained(
    next: &BoxedHandler,
    req: Request,
) -> Result<Response, Box<dyn Any + Send>> {
    let fut = panic::catch_unwind(AssertUnwindSafe(|| next.call(req)))?;
    AssertUnwindSafe(fut).catch_unwind().await
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
