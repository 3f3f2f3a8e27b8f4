//! linkdave-node – der Node-Server
//!
//! Ein Node nimmt WebSocket-Sessions von Controllern an (`GET /ws`),
//! fuehrt pro Session und Guild einen Player-Zustand und uebersetzt
//! Opcodes in Kommandos an den Voice-Manager. Ereignisse aus der
//! Voice-Schicht laufen ueber `sessions_pro_bot` an alle Sessions des
//! betroffenen Bots zurueck.
//!
//! `/health` und `/stats` liegen auf einem zweiten HTTP-Listener.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod http;
pub mod player;
pub mod server_state;
pub mod session;
pub mod stats;
pub mod ws;

pub use error::{NodeFehler, NodeResult};
pub use player::Player;
pub use server_state::{NodeKonfig, NodeState};
pub use session::Session;

use std::sync::Arc;

/// Startet beide Listener (WS + HTTP) und gibt deren Tasks zurueck
///
/// `shutdown` beendet beide Listener; laufende Sessions werden beim
/// Abbruch der Tasks abgeraeumt.
pub async fn listener_starten(
    state: Arc<NodeState>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> NodeResult<tokio::task::JoinHandle<()>> {
    let ws_listener = tokio::net::TcpListener::bind(&state.konfig.ws_bind)
        .await
        .map_err(|e| NodeFehler::Bind(state.konfig.ws_bind.clone(), e.to_string()))?;
    let http_listener = tokio::net::TcpListener::bind(&state.konfig.http_bind)
        .await
        .map_err(|e| NodeFehler::Bind(state.konfig.http_bind.clone(), e.to_string()))?;

    tracing::info!(
        ws = %state.konfig.ws_bind,
        http = %state.konfig.http_bind,
        "Node-Listener bereit"
    );

    let ws_router = ws::ws_router(state.clone());
    let http_router = http::http_router(state.clone());

    let stats_task = stats::stats_ticker_starten(state);

    let handle = tokio::spawn(async move {
        use std::future::IntoFuture;

        let mut ws_shutdown = shutdown.clone();
        let ws_serve = axum::serve(ws_listener, ws_router).with_graceful_shutdown(async move {
            let _ = ws_shutdown.wait_for(|stop| *stop).await;
        });
        let http_serve =
            axum::serve(http_listener, http_router).with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            });

        let (ws_ergebnis, http_ergebnis) =
            tokio::join!(ws_serve.into_future(), http_serve.into_future());
        if let Err(e) = ws_ergebnis {
            tracing::error!(fehler = %e, "WS-Listener beendet mit Fehler");
        }
        if let Err(e) = http_ergebnis {
            tracing::error!(fehler = %e, "HTTP-Listener beendet mit Fehler");
        }
        stats_task.abort();
    });

    Ok(handle)
}
