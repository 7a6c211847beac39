//! boltwire demo server.
//!
//! Loads `boltwire.yaml` (or the path given as the first argument), registers
//! an echo user processor for class `echo`, and serves until ctrl-c.

use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use boltwire_remoting::services::EchoProcessor;
use boltwire_remoting::{config, RpcServer};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "boltwire.yaml".to_string());
    let cfg = config::load_from_file(&path).expect("config load failed");

    let server = RpcServer::new(cfg).expect("remoting context failed");
    server
        .register_user_processor(Arc::new(EchoProcessor::new("echo")))
        .expect("echo processor registration failed");

    let addr = server.start().await.expect("server failed to start");
    tracing::info!(%addr, "boltwire-server started");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "ctrl-c handler failed");
    }
    server.stop();
    tracing::info!(metrics = %server.context().metrics().render(), "boltwire-server stopped");
}
