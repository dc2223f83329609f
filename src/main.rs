use std::net::TcpListener;
use std::sync::Arc;

use liftlog::configuration::get_configuration;
use liftlog::startup::{build_auth_service, cookie_policy, run};
use liftlog::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = get_configuration().map_err(|e| {
        tracing::error!("Failed to read configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;

    // Missing signing secrets stop the process here, before any request.
    configuration.validate().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;

    let auth = build_auth_service(&configuration).await.map_err(|e| {
        tracing::error!("Failed to initialise auth service: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, "Startup error")
    })?;
    let cookies = cookie_policy(auth.issuer(), configuration.application.production);

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, Arc::new(auth), cookies)?.await
}
