//! Voice-Socket – Schnittstelle zum Transport der Chat-Plattform
//!
//! Der eigentliche RTP-Weg zur Plattform ist externer Mitarbeiter; dieses
//! Modul definiert nur den Vertrag, den der Kern konsumiert, plus die
//! Standard-Implementierung `PlattformSocket`.
//!
//! ## Handshake
//! Ein Socket wird erst nutzbar wenn beide Zugangsdaten-Haelften eingespeist
//! sind (State-Update mit Session-ID, Server-Update mit Token und Endpoint).
//! `oeffnen()` blockiert bis dahin. Die Haelften muessen nebenlaeufig zum
//! Oeffnen eintreffen – der Aufrufer speist sie auf einem eigenen Task ein.
//!
//! ## Pull-Takt
//! Nach dem Oeffnen zieht der Socket alle 20 ms einen Opus-Frame vom
//! installierten Provider. Ohne Provider (Pause, kein Track) wird nichts
//! gesendet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use linkdave_core::{BotId, ChannelId, GuildId};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::error::{VoiceFehler, VoiceResult};

/// Frame-Abstand des Pull-Takts
pub const FRAME_TAKT: Duration = Duration::from_millis(20);

/// Liefert Opus-Frames auf Abruf des Socket-Takts
#[async_trait]
pub trait OpusFrameProvider: Send + Sync {
    /// Der naechste Frame, oder None wenn gerade nichts zu senden ist
    async fn naechster_frame(&self) -> Option<Bytes>;
}

/// Close-Handler eines Sockets; feuert hoechstens einmal
pub type CloseHandler = Box<dyn Fn() + Send + Sync>;

/// Der Voice-Transport-Vertrag
#[async_trait]
pub trait VoiceSocket: Send + Sync {
    /// Blockiert bis der Handshake abgeschlossen ist
    async fn oeffnen(&self) -> VoiceResult<()>;

    /// Speist die State-Haelfte der Zugangsdaten ein
    fn state_update(&self, session_id: &str);

    /// Speist die Server-Haelfte der Zugangsdaten ein
    fn server_update(&self, token: &str, endpoint: &str);

    /// Installiert oder entfernt den Frame-Provider
    fn provider_setzen(&self, provider: Option<Arc<dyn OpusFrameProvider>>);

    /// Bindet den Close-Handler (ersetzt einen frueheren)
    fn close_handler_setzen(&self, handler: CloseHandler);

    /// Schliesst den Socket; idempotent
    async fn schliessen(&self);
}

/// Fabrik fuer Voice-Sockets
pub trait SocketFabrik: Send + Sync {
    /// Erstellt einen ungeoeffneten Socket fuer (Bot, Guild, Channel)
    fn socket_erstellen(
        &self,
        bot: BotId,
        guild: GuildId,
        kanal: ChannelId,
    ) -> Arc<dyn VoiceSocket>;
}

// ---------------------------------------------------------------------------
// PlattformSocket
// ---------------------------------------------------------------------------

/// Standard-Implementierung des Voice-Sockets
///
/// Der Handshake gilt als abgeschlossen sobald beide Zugangsdaten-Haelften
/// vorliegen. Der Pull-Takt laeuft als eigener Task; gezogene Frames gehen
/// an eine optionale `FrameSenke` (Tests haengen hier einen Kanal ein, der
/// Plattform-Weg dahinter ist nicht Teil dieses Crates).
pub struct PlattformSocket {
    bot: BotId,
    guild: GuildId,
    kanal: ChannelId,
    selbst: Weak<PlattformSocket>,

    state_da: AtomicBool,
    server_da: AtomicBool,
    handshake_tx: watch::Sender<bool>,
    handshake_rx: watch::Receiver<bool>,

    provider: parking_lot::RwLock<Option<Arc<dyn OpusFrameProvider>>>,
    close_handler: parking_lot::Mutex<Option<CloseHandler>>,
    senke: parking_lot::Mutex<Option<mpsc::Sender<Bytes>>>,

    geoeffnet: AtomicBool,
    geschlossen: AtomicBool,
}

impl PlattformSocket {
    /// Erstellt einen ungeoeffneten Socket
    pub fn neu(bot: BotId, guild: GuildId, kanal: ChannelId) -> Arc<Self> {
        let (handshake_tx, handshake_rx) = watch::channel(false);
        Arc::new_cyclic(|selbst| Self {
            bot,
            guild,
            kanal,
            selbst: selbst.clone(),
            state_da: AtomicBool::new(false),
            server_da: AtomicBool::new(false),
            handshake_tx,
            handshake_rx,
            provider: parking_lot::RwLock::new(None),
            close_handler: parking_lot::Mutex::new(None),
            senke: parking_lot::Mutex::new(None),
            geoeffnet: AtomicBool::new(false),
            geschlossen: AtomicBool::new(false),
        })
    }

    /// Haengt eine Frame-Senke ein (Tests, Plattform-Anbindung)
    pub fn senke_setzen(&self, senke: mpsc::Sender<Bytes>) {
        *self.senke.lock() = Some(senke);
    }

    /// Der Voice-Channel dieses Sockets
    pub fn kanal(&self) -> ChannelId {
        self.kanal
    }

    fn handshake_pruefen(&self) {
        if self.state_da.load(Ordering::Acquire) && self.server_da.load(Ordering::Acquire) {
            let _ = self.handshake_tx.send(true);
        }
    }

    fn frame_weiterreichen(&self, frame: Bytes) {
        let senke = self.senke.lock().clone();
        match senke {
            Some(senke) => {
                if senke.try_send(frame).is_err() && senke.is_closed() {
                    // Gegenstelle weg – wie ein Remote-Close behandeln
                    tracing::debug!(
                        bot = %self.bot,
                        guild = %self.guild,
                        "Frame-Senke geschlossen, Socket wird abgebaut"
                    );
                    self.intern_schliessen();
                }
            }
            // Kein Plattform-Weg angebunden: Frame verwerfen
            None => {}
        }
    }

    fn intern_schliessen(&self) {
        if self.geschlossen.swap(true, Ordering::AcqRel) {
            return;
        }
        let handler = self.close_handler.lock().take();
        if let Some(handler) = handler {
            handler();
        }
        tracing::debug!(bot = %self.bot, guild = %self.guild, kanal = %self.kanal, "Voice-Socket geschlossen");
    }

    fn pull_takt_starten(&self) {
        let schwach = self.selbst.clone();
        tokio::spawn(async move {
            let mut takt = tokio::time::interval(FRAME_TAKT);
            takt.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                takt.tick().await;
                let Some(socket) = schwach.upgrade() else { break };
                if socket.geschlossen.load(Ordering::Acquire) {
                    break;
                }
                let provider = socket.provider.read().clone();
                if let Some(provider) = provider {
                    if let Some(frame) = provider.naechster_frame().await {
                        socket.frame_weiterreichen(frame);
                    }
                }
            }
        });
    }
}

#[async_trait]
impl VoiceSocket for PlattformSocket {
    async fn oeffnen(&self) -> VoiceResult<()> {
        if self.geschlossen.load(Ordering::Acquire) {
            return Err(VoiceFehler::SocketGeschlossen);
        }

        let mut rx = self.handshake_rx.clone();
        rx.wait_for(|fertig| *fertig)
            .await
            .map_err(|_| VoiceFehler::Handshake("Handshake-Kanal abgerissen".into()))?;

        if !self.geoeffnet.swap(true, Ordering::AcqRel) {
            self.pull_takt_starten();
            tracing::debug!(
                bot = %self.bot,
                guild = %self.guild,
                kanal = %self.kanal,
                "Voice-Socket geoeffnet"
            );
        }
        Ok(())
    }

    fn state_update(&self, session_id: &str) {
        tracing::trace!(guild = %self.guild, session_id, "State-Update eingespeist");
        self.state_da.store(true, Ordering::Release);
        self.handshake_pruefen();
    }

    fn server_update(&self, token: &str, endpoint: &str) {
        let _ = token;
        tracing::trace!(guild = %self.guild, endpoint, "Server-Update eingespeist");
        self.server_da.store(true, Ordering::Release);
        self.handshake_pruefen();
    }

    fn provider_setzen(&self, provider: Option<Arc<dyn OpusFrameProvider>>) {
        *self.provider.write() = provider;
    }

    fn close_handler_setzen(&self, handler: CloseHandler) {
        *self.close_handler.lock() = Some(handler);
    }

    async fn schliessen(&self) {
        self.intern_schliessen();
    }
}

/// Fabrik fuer `PlattformSocket`
pub struct PlattformSocketFabrik;

impl SocketFabrik for PlattformSocketFabrik {
    fn socket_erstellen(
        &self,
        bot: BotId,
        guild: GuildId,
        kanal: ChannelId,
    ) -> Arc<dyn VoiceSocket> {
        PlattformSocket::neu(bot, guild, kanal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_socket() -> Arc<PlattformSocket> {
        PlattformSocket::neu(BotId(1), GuildId(2), ChannelId(3))
    }

    struct EinFrameProvider;

    #[async_trait]
    impl OpusFrameProvider for EinFrameProvider {
        async fn naechster_frame(&self) -> Option<Bytes> {
            Some(Bytes::from_static(b"opus"))
        }
    }

    #[tokio::test]
    async fn oeffnen_wartet_auf_beide_haelften() {
        let socket = test_socket();

        let socket_clone = socket.clone();
        let offen = tokio::spawn(async move { socket_clone.oeffnen().await });

        // Nur eine Haelfte: Handshake darf nicht abschliessen
        socket.state_update("sess-1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!offen.is_finished());

        socket.server_update("token", "voice.example.com");
        offen.await.unwrap().expect("Handshake muss abschliessen");
    }

    #[tokio::test]
    async fn pull_takt_zieht_frames_in_die_senke() {
        let socket = test_socket();
        let (tx, mut rx) = mpsc::channel(16);
        socket.senke_setzen(tx);
        socket.provider_setzen(Some(Arc::new(EinFrameProvider)));

        socket.state_update("s");
        socket.server_update("t", "e");
        socket.oeffnen().await.unwrap();

        let frame = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("Takt muss innerhalb von 500 ms liefern")
            .expect("Senke offen");
        assert_eq!(frame.as_ref(), b"opus");
    }

    #[tokio::test]
    async fn close_handler_feuert_genau_einmal() {
        let socket = test_socket();
        let zaehler = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let z = zaehler.clone();
        socket.close_handler_setzen(Box::new(move || {
            z.fetch_add(1, Ordering::SeqCst);
        }));

        socket.schliessen().await;
        socket.schliessen().await;
        assert_eq!(zaehler.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oeffnen_nach_schliessen_schlaegt_fehl() {
        let socket = test_socket();
        socket.schliessen().await;
        assert!(matches!(
            socket.oeffnen().await,
            Err(VoiceFehler::SocketGeschlossen)
        ));
    }
}
