use std::sync::Arc;
use tracing::{error, info};

use encoder_relay::cli::{apply_cli_overrides, parse_cli_args};
use encoder_relay::config::{resolve_config_path, Settings};
use encoder_relay::logging::init_logging;
use encoder_relay::transport::{MqttTransport, Transport};
use encoder_relay::{CancellationToken, Pipeline, ShutdownCoordinator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_cli_args();
    let mut settings = Settings::load(args.config_file.as_deref())?;

    init_logging(&settings.logging)?;
    info!("🚀 Starting encoder relay");
    match resolve_config_path(args.config_file.as_deref()) {
        Some(path) => info!("⚙️ Configuration loaded from {}", path.display()),
        None => info!("⚙️ No configuration file, using defaults and environment"),
    }

    apply_cli_overrides(&mut settings, &args);
    settings.validate()?;

    // Startup failure is fatal: nothing runs without a broker session.
    let transport = Arc::new(MqttTransport::connect(&settings.broker).await?);

    // Shutdown coordination via a single cancellation token
    let shutdown = CancellationToken::new();
    let coordinator = ShutdownCoordinator::new(shutdown.clone());

    let signal_listener = tokio::spawn({
        let coordinator = coordinator.clone();
        async move {
            if let Err(e) = coordinator.listen().await {
                error!("Signal listener failed: {e}");
            }
        }
    });

    if let Some(run_for) = settings.runtime.run_for() {
        info!("⏰ Running for {:?}", run_for);
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(run_for).await;
            coordinator.trigger("run time elapsed");
        });
    }

    let pipeline = Pipeline::new(&settings, transport.clone())?;
    let metrics = pipeline.metrics();
    pipeline.run(shutdown).await;

    transport.disconnect().await;
    signal_listener.abort();

    metrics.print_summary();
    info!("👋 Encoder relay stopped");
    Ok(())
}
