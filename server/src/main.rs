//! LinkDave Server – Einstiegspunkt
//!
//! Liest die Konfiguration aus der Umgebung, initialisiert das Logging
//! und startet den Node. Keine CLI-Flags; Signale steuern den Shutdown.

use anyhow::Result;
use linkdave_server::{config::ServerKonfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let konfig = ServerKonfig::aus_umgebung();

    logging_initialisieren(&konfig.log_level, &konfig.log_format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "LinkDave Node wird initialisiert"
    );

    let server = Server::neu(konfig);
    server.starten().await?;

    Ok(())
}

/// Initialisiert tracing-subscriber mit dem konfigurierten Level und Format
fn logging_initialisieren(level: &str, format: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}
