//! IM Gateway entry point
//!
//! Run with:
//! ```bash
//! cargo run -p im-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use im_common::{try_init_tracing, AppConfig, TracingConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(im_common::AppError::from(e).exit_code());
        }
    };

    // Initialize tracing
    if let Err(e) = try_init_tracing(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        env = ?config.app.env,
        address = %config.gateway.server.address(),
        policy = config.multi_login.policy.name(),
        "Configuration loaded"
    );

    // Run the gateway server
    if let Err(e) = im_gateway::run(config).await {
        error!(error = %e, "Gateway failed");
        std::process::exit(e.exit_code());
    }
}
