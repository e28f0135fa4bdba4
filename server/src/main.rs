//! Sprechfunk Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Relay.

use anyhow::{Context, Result};
use sprechfunk_observability::logging_initialisieren;
use sprechfunk_server::{config::ServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("SPRECHFUNK_CONFIG").unwrap_or_else(|_| "sprechfunk.toml".into());

    let config = ServerConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, config.logging.format)
        .context("Logging konnte nicht initialisiert werden")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Sprechfunk Server wird initialisiert"
    );

    Server::neu(config).starten().await
}
