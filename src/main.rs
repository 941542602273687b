use solivia_exporter::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    let (shutdown_tx, _) = broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Shutdown signal received, stopping components...");
        if let Err(e) = shutdown_tx_clone.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    });

    solivia_exporter::app(shutdown_tx, options).await
}
