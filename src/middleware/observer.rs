//! Status capture for the request logger.

use http::StatusCode;

use crate::response::Response;

/// Remembers the status code a single request ends up sending.
///
/// Starts at `200 OK`, the status a handler gets when it never sets one.
/// Owned by one request; never shared.
#[derive(Debug)]
pub struct ResponseObserver {
    status: StatusCode,
}

impl ResponseObserver {
    pub fn new() -> Self {
        Self { status: StatusCode::OK }
    }

    /// Overwrites the observed status.
    pub fn record(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Records the status of `response` and hands it back unchanged.
    pub fn observe(&mut self, response: Response) -> Response {
        self.record(response.status_code());
        response
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl Default for ResponseObserver {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_ok() {
        assert_eq!(ResponseObserver::new().status(), StatusCode::OK);
    }

    #[test]
    fn last_write_wins() {
        let mut observer = ResponseObserver::new();
        observer.record(StatusCode::UNAUTHORIZED);
        let res = observer.observe(Response::status(StatusCode::NOT_IMPLEMENTED));
        assert_eq!(res.status_code(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(observer.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
