//! Serve command implementation.

use anyhow::{Context, Result};

use parley_core::server::Server;

use super::ServeArgs;

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let global_config = super::load_config();
    global_config.validate()?;

    let mut config = global_config.server_config();
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let server = Server::bind(config.clone())
        .await
        .with_context(|| format!("Could not listen on {}:{}", config.bind_address, config.port))?;

    println!();
    println!("Parley v{}", parley_core::VERSION);
    println!("{}", "-".repeat(37));
    println!("  Relay listening on {}", server.local_addr());
    println!("  Press Ctrl+C to stop");
    println!();

    let stop = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, closing sessions");
        }
        stop.cancel();
    });

    server.run().await;
    println!("Relay stopped.");
    Ok(())
}
