//! Log sink injection.
//!
//! Components never reach for a process-wide logger. Each one is handed a
//! [`LogSink`] at construction and emits its records through it; the server
//! also runs every spawned task under the sink's dispatcher so that records
//! from deeper code land in the same place.

use std::future::Future;

use tracing::Dispatch;
use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing_subscriber::EnvFilter;

/// Handle to the `tracing` subscriber that receives the gateway's records.
#[derive(Clone, Debug)]
pub struct LogSink {
    dispatch: Dispatch,
}

impl LogSink {
    pub fn new(subscriber: impl tracing::Subscriber + Send + Sync + 'static) -> Self {
        Self { dispatch: Dispatch::new(subscriber) }
    }

    /// Whatever dispatcher is the default for the calling context.
    pub fn current() -> Self {
        Self { dispatch: tracing::dispatcher::get_default(Dispatch::clone) }
    }

    /// Line-oriented text output on stdout, `info` unless `RUST_LOG` says
    /// otherwise.
    pub fn stdout() -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        Self::new(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .finish(),
        )
    }

    /// Runs `f` with this sink as the default dispatcher.
    pub fn emit<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    /// Wraps `fut` so every poll runs with this sink as the default dispatcher.
    pub fn scope<F: Future>(&self, fut: F) -> WithDispatch<F> {
        fut.with_subscriber(self.dispatch.clone())
    }
}

impl From<Dispatch> for LogSink {
    fn from(dispatch: Dispatch) -> Self {
        Self { dispatch }
    }
}


#[cfg(test)]
mod tests {
    use tracing::info;

    use super::capture;

    #[test]
    fn emit_routes_records_to_the_injected_sink() {
        let (sink, captured) = capture::sink();
        sink.emit(|| info!(path = "/health", "hello"));
        let records = captured.with_message("hello");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field("path"), Some("/health"));
    }

    #[tokio::test]
    async fn scope_routes_records_from_inside_a_future() {
        let (sink, captured) = capture::sink();
        sink.scope(async {
            tokio::task::yield_now().await;
            info!("inside");
        })
        .await;
        assert_eq!(captured.with_message("inside").len(), 1);
    }
}
