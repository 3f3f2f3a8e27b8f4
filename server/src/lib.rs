//! linkdave-server – Bibliotheks-Root
//!
//! Verdrahtet Quellen-Fabrik, Voice-Manager und Node-Server und fuehrt
//! den Lebenszyklus: starten, auf Signal warten, drainen, stoppen.

pub mod config;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use linkdave_audio::HttpQuellenFabrik;
use linkdave_node::{NodeKonfig, NodeState};
use linkdave_voice::{PlattformSocketFabrik, VoiceManager};

use config::ServerKonfig;

/// Drain-Frist beim Herunterfahren
const DRAIN_FRIST: Duration = Duration::from_secs(30);
/// Poll-Intervall waehrend des Drains
const DRAIN_POLL: Duration = Duration::from_millis(500);
/// Obergrenze fuer das Stoppen der HTTP-Listener
const LISTENER_STOP_FRIST: Duration = Duration::from_secs(5);

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub konfig: ServerKonfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(konfig: ServerKonfig) -> Self {
        Self { konfig }
    }

    /// Startet den Node und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Quellen-Fabrik und Voice-Manager aufbauen
    /// 2. WS- und HTTP-Listener starten
    /// 3. Auf SIGINT/SIGTERM warten
    /// 4. Drain (30 s): Controller migrieren ihre Player weg
    /// 5. Listener stoppen (5 s Obergrenze), Verbindungen schliessen
    pub async fn starten(self) -> Result<()> {
        let quellen = HttpQuellenFabrik::neu(self.konfig.quelle_http, self.konfig.quelle_https);
        let manager = VoiceManager::neu(Arc::new(PlattformSocketFabrik), Arc::new(quellen));

        let node_konfig = NodeKonfig {
            ws_bind: self.konfig.ws_bind_adresse(),
            http_bind: self.konfig.http_bind_adresse(),
            ..NodeKonfig::default()
        };
        let state = NodeState::neu(node_konfig, manager.clone());

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let listener = linkdave_node::listener_starten(state.clone(), shutdown_rx).await?;

        tracing::info!(
            ws = %self.konfig.ws_bind_adresse(),
            http = %self.konfig.http_bind_adresse(),
            "Node laeuft. Warte auf Shutdown-Signal"
        );
        signal_abwarten().await;
        tracing::info!("Shutdown-Signal empfangen, Drain beginnt");

        // Drain: Flag + Broadcast, dann auf die Migration der Player warten
        state.drain("shutdown", DRAIN_FRIST.as_millis() as u64);
        let frist = Instant::now() + DRAIN_FRIST;
        while state.player_anzahl() > 0 && Instant::now() < frist {
            tokio::time::sleep(DRAIN_POLL).await;
        }
        let verbleibend = state.player_anzahl();
        if verbleibend > 0 {
            tracing::warn!(verbleibend, "Drain-Frist abgelaufen, erzwungener Stopp");
        }

        let _ = shutdown_tx.send(true);
        let mut listener = listener;
        if tokio::time::timeout(LISTENER_STOP_FRIST, &mut listener).await.is_err() {
            tracing::warn!("Listener-Stopp ueber der Obergrenze, wird abgebrochen");
            listener.abort();
        }

        manager.schliessen().await;
        tracing::info!("Server beendet");
        Ok(())
    }
}

/// Wartet auf SIGINT oder SIGTERM
async fn signal_abwarten() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(fehler) => {
                tracing::error!(fehler = %fehler, "SIGTERM-Handler fehlgeschlagen");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
