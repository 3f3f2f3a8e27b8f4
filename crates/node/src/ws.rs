//! WebSocket-Upgrade und Session-Pumpen
//!
//! Pro Session laufen zwei Tasks: die Lese-Pumpe (Frist `pong_wait`,
//! verlaengert durch jeden eingehenden Frame, 512-KB-Nachrichtenlimit)
//! und die Schreib-Pumpe (Queue mit 256 Eintraegen, WS-Ping alle
//! `pong_wait * 9/10`, 10 s Schreib-Frist pro Nachricht).
//!
//! Panics in Handlern werden an der Pump-Grenze gefangen; die Session
//! ueberlebt, nur die eine Nachricht geht verloren.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use linkdave_core::SessionId;
use linkdave_protocol::{ClientNachricht, ServerNachricht};
use tokio::sync::mpsc;

use crate::dispatcher;
use crate::server_state::{NodeKonfig, NodeState};
use crate::session::Session;

/// Axum-Router fuer den `/ws`-Endpunkt
///
/// Ein Origin-Check findet bewusst nicht statt – Auth zwischen Controller
/// und Node ist kein Ziel.
pub fn ws_router(state: Arc<NodeState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(
    State(state): State<Arc<NodeState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let client_name = headers
        .get("client-name")
        .and_then(|wert| wert.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    ws.on_upgrade(move |socket| session_betreuen(state, socket, client_name))
}

/// Lebenszyklus einer Session: Pumpen starten, auf das Lese-Ende warten,
/// dann Register und Player abraeumen
async fn session_betreuen(state: Arc<NodeState>, socket: WebSocket, client_name: String) {
    let (session, sende_rx) = Session::neu(client_name);
    tracing::info!(
        session = %session.id,
        client = %session.client_name,
        "Neue Controller-Session"
    );

    let (ws_tx, ws_rx) = socket.split();
    let schreib_task = tokio::spawn(schreib_pumpe(
        ws_tx,
        sende_rx,
        state.konfig.clone(),
        session.id,
    ));

    lese_pumpe(&state, &session, ws_rx).await;

    state.session_entfernen(&session).await;
    schreib_task.abort();
    tracing::info!(session = %session.id, "Session beendet");
}

/// Lese-Pumpe: Frames dekodieren und dispatchen bis zum Fehler/Timeout
async fn lese_pumpe(
    state: &Arc<NodeState>,
    session: &Arc<Session>,
    mut ws_rx: SplitStream<WebSocket>,
) {
    loop {
        let frame = match tokio::time::timeout(state.konfig.pong_wait, ws_rx.next()).await {
            Err(_) => {
                tracing::warn!(session = %session.id, "Lese-Frist abgelaufen");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(fehler))) => {
                tracing::warn!(session = %session.id, fehler = %fehler, "Lesefehler");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                if text.len() > state.konfig.max_nachricht_bytes {
                    tracing::warn!(
                        session = %session.id,
                        bytes = text.len(),
                        "Nachricht ueber dem Limit – Session wird getrennt"
                    );
                    break;
                }
                nachricht_verarbeiten(state, session, &text).await;
            }
            Message::Binary(daten) => {
                tracing::warn!(
                    session = %session.id,
                    bytes = daten.len(),
                    "Binaer-Frame ignoriert"
                );
            }
            // Pong verlaengert die Frist durch die Schleife von selbst;
            // Pings beantwortet der WS-Stack
            Message::Pong(_) | Message::Ping(_) => {}
            Message::Close(_) => break,
        }
    }
}

/// Dekodiert und dispatcht eine Text-Nachricht; Protokollfehler werden
/// geloggt und ignoriert, die Session ueberlebt
async fn nachricht_verarbeiten(state: &Arc<NodeState>, session: &Arc<Session>, text: &str) {
    let nachricht = match ClientNachricht::decode(text) {
        Ok(nachricht) => nachricht,
        Err(fehler) => {
            tracing::warn!(session = %session.id, fehler = %fehler, "Nachricht ignoriert");
            return;
        }
    };

    let op = nachricht.op();
    let ergebnis = std::panic::AssertUnwindSafe(dispatcher::verarbeiten(state, session, nachricht))
        .catch_unwind()
        .await;
    if ergebnis.is_err() {
        tracing::error!(session = %session.id, op, "Panic im Handler gefangen");
    }
}

/// Schreib-Pumpe: Queue abarbeiten und periodisch WS-Pings senden
async fn schreib_pumpe(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut sende_rx: mpsc::Receiver<ServerNachricht>,
    konfig: NodeKonfig,
    session_id: SessionId,
) {
    let mut ping_takt = tokio::time::interval(konfig.ping_intervall());
    ping_takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Der erste Tick eines Intervals feuert sofort
    ping_takt.tick().await;

    loop {
        tokio::select! {
            nachricht = sende_rx.recv() => {
                let Some(nachricht) = nachricht else { break };
                let text = match nachricht.encode() {
                    Ok(text) => text,
                    Err(fehler) => {
                        tracing::error!(session = %session_id, fehler = %fehler, "Encode fehlgeschlagen");
                        continue;
                    }
                };
                match tokio::time::timeout(konfig.schreib_frist, ws_tx.send(Message::Text(text))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(fehler)) => {
                        tracing::warn!(session = %session_id, fehler = %fehler, "Schreiben fehlgeschlagen");
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(session = %session_id, "Schreib-Frist abgelaufen");
                        break;
                    }
                }
            }
            _ = ping_takt.tick() => {
                match tokio::time::timeout(konfig.schreib_frist, ws_tx.send(Message::Ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        tracing::warn!(session = %session_id, "Ping fehlgeschlagen");
                        break;
                    }
                }
            }
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
}
