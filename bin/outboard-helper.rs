//! Helper process entry point
//!
//! This binary is spawned by the host to run one plugin instance in isolation.

use outboard::{BuiltinFactory, HelperArgs, HelperServer};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("OUTBOARD_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match HelperArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            tracing::error!(error = %e, "invalid helper arguments");
            std::process::exit(2);
        }
    };

    if let Err(e) = HelperServer::run(args, Box::new(BuiltinFactory)) {
        tracing::error!(error = %e, "helper failed");
        std::process::exit(1);
    }
}
