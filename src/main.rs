//! Quantum Circuit Editor API server.
//!
//! Run with:
//!   PORT=8080 RUST_LOG=info cargo run
//!
//! Try:
//!   curl http://localhost:8080/health
//!   curl -X POST http://localhost:8080/api/v1/simulate \
//!        -H 'authorization: Bearer test-token'

use std::process::ExitCode;
use std::sync::Arc;

use qce_gateway::middleware::StaticTokenValidator;
use qce_gateway::{LifecycleController, LogSink, ServerConfig, app, shutdown_signal};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let log = LogSink::stdout();
    log.scope(run(log.clone())).await
}

async fn run(log: LogSink) -> ExitCode {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let app = app(&config, Arc::new(StaticTokenValidator::default()), log.clone());
    let signal = shutdown_signal();

    // Bind failures are logged by the controller.
    let Ok(serving) = LifecycleController::new(config, log).start(app).await else {
        return ExitCode::FAILURE;
    };

    match serving.shutdown_on(signal).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
