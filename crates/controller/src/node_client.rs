//! NodeClient – eine WebSocket-Verbindung zu einem Node
//!
//! Haelt Verbindungszustand, Session-ID (nach Ready) und den aus Stats
//! gepflegten Player-Zaehler fuer die Best-Node-Wahl. Reconnect laeuft
//! exponentiell (`basis * 2^versuche`) bis zur Versuchs-Obergrenze;
//! waehrend eines Drains wird nicht neu verbunden.
//!
//! Nicht parsebare Frames werden stillschweigend verworfen – Schutz gegen
//! Rauschen, die Verbindung bleibt bestehen.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use linkdave_core::BotId;
use linkdave_protocol::{ClientNachricht, IdentifyPayload, ServerNachricht};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ControllerFehler, ControllerResult};

/// Intervall des Client-seitigen Pings
const PING_INTERVALL: Duration = Duration::from_secs(30);

/// Optionen eines Node-Eintrags
#[derive(Debug, Clone)]
pub struct NodeOptionen {
    /// Eindeutiger Name im Node-Pool
    pub name: String,
    /// WebSocket-URL, z.B. `ws://localhost:8080/ws`
    pub url: String,
    /// Automatischer Reconnect nach Verbindungsverlust
    pub auto_reconnect: bool,
    /// Basis-Verzoegerung des Reconnects
    pub reconnect_verzoegerung: Duration,
    /// Obergrenze der Reconnect-Versuche
    pub max_reconnect_versuche: u32,
}

impl NodeOptionen {
    /// Standard-Optionen fuer Name und URL
    pub fn neu(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            auto_reconnect: true,
            reconnect_verzoegerung: Duration::from_secs(5),
            max_reconnect_versuche: 10,
        }
    }
}

/// Verbindungszustand eines Nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeZustand {
    Getrennt,
    Verbindet,
    Verbunden,
    Draining,
}

/// Ereignisse eines NodeClients an den Manager
#[derive(Debug)]
pub enum NodeEreignis {
    Verbunden,
    Getrennt { code: u16, grund: String },
    Nachricht(ServerNachricht),
}

/// WebSocket-Client zu einem Node
pub struct NodeClient {
    /// Optionen dieses Eintrags
    pub optionen: NodeOptionen,
    zustand: parking_lot::RwLock<NodeZustand>,
    session_id: parking_lot::RwLock<Option<String>>,
    player_count: AtomicI64,
    draining: AtomicBool,
    versuche: AtomicU32,
    sende_tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<ClientNachricht>>>,
    stopp_tx: watch::Sender<bool>,
    ereignis_tx: mpsc::UnboundedSender<(String, NodeEreignis)>,
    selbst: Weak<NodeClient>,
}

impl NodeClient {
    /// Erstellt den Client; `ereignis_tx` gehoert dem Manager
    pub fn neu(
        optionen: NodeOptionen,
        ereignis_tx: mpsc::UnboundedSender<(String, NodeEreignis)>,
    ) -> Arc<Self> {
        let (stopp_tx, _) = watch::channel(false);
        Arc::new_cyclic(|selbst| Self {
            optionen,
            zustand: parking_lot::RwLock::new(NodeZustand::Getrennt),
            session_id: parking_lot::RwLock::new(None),
            player_count: AtomicI64::new(0),
            draining: AtomicBool::new(false),
            versuche: AtomicU32::new(0),
            sende_tx: parking_lot::Mutex::new(None),
            stopp_tx,
            ereignis_tx,
            selbst: selbst.clone(),
        })
    }

    /// Oeffnet die Verbindung; aufgeloest sobald der Socket offen ist
    ///
    /// Schlaegt der allererste Aufbau fehl, kommt der Fehler direkt zurueck
    /// (kein Reconnect). Spaetere Verbindungsverluste behandelt der
    /// Reconnect-Mechanismus.
    pub async fn connect(&self, bot: BotId) -> ControllerResult<()> {
        let Some(selbst) = self.selbst.upgrade() else {
            return Err(ControllerFehler::Verbindung("Client abgebaut".into()));
        };
        self.zustand_setzen(NodeZustand::Verbindet);

        let (erste_tx, erste_rx) = oneshot::channel();
        tokio::spawn(selbst.verbindungs_schleife(bot, erste_tx));

        erste_rx
            .await
            .map_err(|_| ControllerFehler::Verbindung("Verbindungs-Task abgebrochen".into()))?
    }

    /// Trennt die Verbindung sauber (1000 "Client disconnect"), ohne Reconnect
    pub fn disconnect(&self) {
        let _ = self.stopp_tx.send(true);
        self.zustand_setzen(NodeZustand::Getrennt);
    }

    /// Reiht eine Nachricht zum Senden ein; Fehler wenn nicht verbunden
    pub fn senden(&self, nachricht: ClientNachricht) -> ControllerResult<()> {
        let wache = self.sende_tx.lock();
        match wache.as_ref() {
            Some(tx) if tx.send(nachricht).is_ok() => Ok(()),
            _ => Err(ControllerFehler::NichtVerbunden(self.optionen.name.clone())),
        }
    }

    /// Aktueller Verbindungszustand
    pub fn zustand(&self) -> NodeZustand {
        *self.zustand.read()
    }

    /// Ob der Node fuer neue Player in Frage kommt
    pub fn ist_verfuegbar(&self) -> bool {
        self.zustand() == NodeZustand::Verbunden && !self.ist_draining()
    }

    /// Session-ID nach dem Ready des Nodes
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Zuletzt bekannter Player-Zaehler (Stats plus lokale Anpassungen)
    pub fn player_count(&self) -> i64 {
        self.player_count.load(Ordering::Acquire)
    }

    /// Lokale Anpassung des Zaehlers (Player angelegt/migriert)
    pub fn player_count_anpassen(&self, delta: i64) {
        self.player_count.fetch_add(delta, Ordering::AcqRel);
    }

    /// Ob der Node draint
    pub fn ist_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Verbindungs-Task
    // -----------------------------------------------------------------------

    async fn verbindungs_schleife(
        self: Arc<Self>,
        bot: BotId,
        erste_tx: oneshot::Sender<ControllerResult<()>>,
    ) {
        let mut erste = Some(erste_tx);

        loop {
            match tokio_tungstenite::connect_async(self.optionen.url.as_str()).await {
                Ok((ws, _antwort)) => {
                    self.versuche.store(0, Ordering::Release);
                    self.zustand_setzen(NodeZustand::Verbunden);
                    if let Some(tx) = erste.take() {
                        let _ = tx.send(Ok(()));
                    }
                    self.ereignis(NodeEreignis::Verbunden);
                    tracing::info!(node = %self.optionen.name, "Mit Node verbunden");

                    let (code, grund) = self.session_fahren(ws, bot).await;

                    self.sende_tx.lock().take();
                    self.zustand_setzen(NodeZustand::Getrennt);
                    self.ereignis(NodeEreignis::Getrennt {
                        code,
                        grund: grund.clone(),
                    });
                    tracing::warn!(node = %self.optionen.name, code, grund = %grund, "Verbindung zum Node beendet");
                }
                Err(fehler) => {
                    if let Some(tx) = erste.take() {
                        // Fehler vor dem ersten Open: ablehnen, kein Retry
                        let _ = tx.send(Err(ControllerFehler::Verbindung(fehler.to_string())));
                        return;
                    }
                    tracing::warn!(node = %self.optionen.name, fehler = %fehler, "Reconnect fehlgeschlagen");
                }
            }

            if *self.stopp_tx.borrow()
                || !self.optionen.auto_reconnect
                || self.ist_draining()
            {
                return;
            }
            let versuch = self.versuche.fetch_add(1, Ordering::AcqRel);
            if versuch >= self.optionen.max_reconnect_versuche {
                tracing::error!(node = %self.optionen.name, "Reconnect-Versuche erschoepft");
                return;
            }
            let verzoegerung = self.optionen.reconnect_verzoegerung * 2u32.saturating_pow(versuch);
            tracing::info!(
                node = %self.optionen.name,
                versuch = versuch + 1,
                verzoegerung_ms = verzoegerung.as_millis() as u64,
                "Reconnect geplant"
            );
            self.zustand_setzen(NodeZustand::Verbindet);
            tokio::time::sleep(verzoegerung).await;
        }
    }

    /// Faehrt eine offene Verbindung bis zum Ende; gibt (Code, Grund) zurueck
    async fn session_fahren(
        &self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        bot: BotId,
    ) -> (u16, String) {
        let (mut ws_tx, mut ws_rx) = ws.split();
        let (sende_tx, mut sende_rx) = mpsc::unbounded_channel();
        *self.sende_tx.lock() = Some(sende_tx);

        // Identify ist der erste Frame nach dem Open
        let _ = self.senden(ClientNachricht::Identify(IdentifyPayload { bot_id: bot }));

        let mut ping_takt = tokio::time::interval(PING_INTERVALL);
        ping_takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_takt.tick().await;

        let mut stopp_rx = self.stopp_tx.subscribe();

        loop {
            tokio::select! {
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.nachricht_verarbeiten(&text),
                        Some(Ok(Message::Close(rahmen))) => {
                            let (code, grund) = rahmen
                                .map(|r| (u16::from(r.code), r.reason.into_owned()))
                                .unwrap_or((1005, String::new()));
                            return (code, grund);
                        }
                        Some(Ok(_)) => {} // Ping/Pong/Binary
                        Some(Err(fehler)) => return (1006, fehler.to_string()),
                        None => return (1006, "Stream beendet".into()),
                    }
                }
                nachricht = sende_rx.recv() => {
                    let Some(nachricht) = nachricht else { return (1006, "Sende-Queue zu".into()) };
                    let text = match nachricht.encode() {
                        Ok(text) => text,
                        Err(fehler) => {
                            tracing::error!(fehler = %fehler, "Encode fehlgeschlagen");
                            continue;
                        }
                    };
                    if let Err(fehler) = ws_tx.send(Message::Text(text)).await {
                        return (1006, fehler.to_string());
                    }
                }
                _ = ping_takt.tick() => {
                    if self.senden(ClientNachricht::Ping).is_err() {
                        return (1006, "Ping nicht einreihbar".into());
                    }
                }
                ergebnis = stopp_rx.changed() => {
                    if ergebnis.is_err() || *stopp_rx.borrow() {
                        let _ = ws_tx.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Client disconnect".into(),
                        }))).await;
                        return (1000, "Client disconnect".into());
                    }
                }
            }
        }
    }

    /// Dekodiert einen Frame; Parse-Fehler werden bewusst verschluckt
    fn nachricht_verarbeiten(&self, text: &str) {
        let nachricht = match ServerNachricht::decode(text) {
            Ok(nachricht) => nachricht,
            Err(fehler) => {
                tracing::trace!(node = %self.optionen.name, fehler = %fehler, "Frame verworfen");
                return;
            }
        };

        match &nachricht {
            ServerNachricht::Ready(p) => {
                *self.session_id.write() = Some(p.session_id.clone());
            }
            ServerNachricht::Stats(p) => {
                self.player_count.store(p.players as i64, Ordering::Release);
                self.draining.store(p.draining, Ordering::Release);
                if p.draining {
                    self.zustand_setzen(NodeZustand::Draining);
                }
            }
            ServerNachricht::NodeDraining(_) => {
                self.draining.store(true, Ordering::Release);
                self.zustand_setzen(NodeZustand::Draining);
            }
            _ => {}
        }

        self.ereignis(NodeEreignis::Nachricht(nachricht));
    }

    fn zustand_setzen(&self, zustand: NodeZustand) {
        *self.zustand.write() = zustand;
    }

    fn ereignis(&self, ereignis: NodeEreignis) {
        let _ = self.ereignis_tx.send((self.optionen.name.clone(), ereignis));
    }
}
