//! VoiceConnection – eine Voice-Verbindung pro (Bot, Guild)
//!
//! Besitzt den Voice-Socket, hoechstens eine aktive Quelle und die beiden
//! Callbacks (Track-Ende, Trennung). Kommandos werden durch den inneren
//! Mutex serialisiert; `pausiert` und `geschlossen` liegen als Atomics
//! daneben, damit die Frame-Produktion den Mutex nicht braucht.
//!
//! ## Exactly-once Track-Ende
//! Jede installierte Quelle erzeugt genau ein terminales Ereignis
//! (finished/stopped/replaced/error/cleanup). Das `ende_gefeuert`-Flag wird
//! von Quelle und Kommandos geteilt; wer es zuerst setzt, meldet das Ende.
//!
//! ## Rekonfiguration
//! Channel-Wechsel und Endpoint-Rotation bauen einen neuen Socket, oeffnen
//! ihn, tauschen atomar und schliessen den alten im Hintergrund (2 s Limit).
//! Der Close-Handler des alten Sockets wird per Identitaetsvergleich mit dem
//! aktuellen Socket unterdrueckt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use linkdave_audio::AudioQuelle;
use linkdave_core::{BotId, ChannelId, GuildId, TrackEndGrund};
use tokio::sync::Mutex;

use crate::error::{VoiceFehler, VoiceResult};
use crate::socket::{OpusFrameProvider, SocketFabrik, VoiceSocket};

/// Verzoegerung fuer das Einspeisen der Zugangsdaten-Haelften
///
/// Die Haelften duerfen nicht auf dem Task laufen der `oeffnen()` awaitet,
/// sonst verklemmt der Handshake synchroner Socket-Implementierungen.
const UPDATE_VERZOEGERUNG: Duration = Duration::from_millis(50);

/// Zeitlimit fuer das Hintergrund-Schliessen des alten Sockets
const ALTSOCKET_LIMIT: Duration = Duration::from_secs(2);

/// Zeitlimit fuer das Schliessen des Sockets in `schliessen()`
const SOCKET_SCHLIESS_LIMIT: Duration = Duration::from_secs(5);

/// Callback fuer das terminale Track-Ende (Quelle, Grund, optionaler Fehler)
pub type TrackEndeCallback =
    Arc<dyn Fn(Arc<dyn AudioQuelle>, TrackEndGrund, Option<String>) + Send + Sync>;

/// Callback wenn der aktuelle Socket unerwartet schliesst
pub type TrennungsCallback = Arc<dyn Fn(Arc<VoiceConnection>) + Send + Sync>;

/// Quelle samt geteiltem Exactly-once-Flag
struct AktiveQuelle {
    quelle: Arc<dyn AudioQuelle>,
    ende_gefeuert: Arc<AtomicBool>,
}

/// Socket und Quelle hinter dem Kommando-Mutex
struct Inneres {
    socket: Arc<dyn VoiceSocket>,
    aktive: Option<AktiveQuelle>,
    kanal: ChannelId,
}

/// Eine Voice-Verbindung fuer genau ein (Bot, Guild)-Paar
pub struct VoiceConnection {
    bot: BotId,
    guild: GuildId,
    fabrik: Arc<dyn SocketFabrik>,
    inneres: Mutex<Inneres>,
    pausiert: AtomicBool,
    geschlossen: AtomicBool,
    am_ende: TrackEndeCallback,
    bei_trennung: TrennungsCallback,
    selbst: Weak<VoiceConnection>,
}

impl VoiceConnection {
    /// Baut Socket und Verbindung auf; blockiert bis der Handshake steht
    ///
    /// `frist` ist die Obergrenze des Aufrufers (Node-Server: 30 s).
    #[allow(clippy::too_many_arguments)]
    pub async fn neu(
        fabrik: Arc<dyn SocketFabrik>,
        bot: BotId,
        guild: GuildId,
        kanal: ChannelId,
        session_id: &str,
        token: &str,
        endpoint: &str,
        frist: Duration,
        am_ende: TrackEndeCallback,
        bei_trennung: TrennungsCallback,
    ) -> VoiceResult<Arc<Self>> {
        let socket = fabrik.socket_erstellen(bot, guild, kanal);

        let verbindung = Arc::new_cyclic(|selbst| Self {
            bot,
            guild,
            fabrik: fabrik.clone(),
            inneres: Mutex::new(Inneres {
                socket: socket.clone(),
                aktive: None,
                kanal,
            }),
            pausiert: AtomicBool::new(false),
            geschlossen: AtomicBool::new(false),
            am_ende,
            bei_trennung,
            selbst: selbst.clone(),
        });

        verbindung.close_handler_binden(&socket);
        Self::updates_einspeisen(&socket, session_id, token, endpoint);

        match tokio::time::timeout(frist, socket.oeffnen()).await {
            Ok(Ok(())) => {
                tracing::info!(bot = %bot, guild = %guild, kanal = %kanal, "Voice-Verbindung steht");
                Ok(verbindung)
            }
            Ok(Err(fehler)) => {
                verbindung.geschlossen.store(true, Ordering::Release);
                socket.schliessen().await;
                Err(fehler)
            }
            Err(_) => {
                verbindung.geschlossen.store(true, Ordering::Release);
                socket.schliessen().await;
                Err(VoiceFehler::Zeitlimit)
            }
        }
    }

    /// Bot-ID dieser Verbindung
    pub fn bot(&self) -> BotId {
        self.bot
    }

    /// Guild-ID dieser Verbindung
    pub fn guild(&self) -> GuildId {
        self.guild
    }

    /// Aktueller Voice-Channel
    pub async fn kanal(&self) -> ChannelId {
        self.inneres.lock().await.kanal
    }

    /// Installiert eine neue Quelle; eine vorhandene wird geschlossen und
    /// mit Grund `replaced` beendet. Hebt eine Pause auf.
    pub async fn play(&self, quelle: Arc<dyn AudioQuelle>) -> VoiceResult<()> {
        if self.geschlossen.load(Ordering::Acquire) {
            return Err(VoiceFehler::SocketGeschlossen);
        }
        let mut inneres = self.inneres.lock().await;

        if let Some(alte) = inneres.aktive.take() {
            inneres.socket.provider_setzen(None);
            alte.quelle.schliessen().await;
            if !alte.ende_gefeuert.swap(true, Ordering::AcqRel) {
                (self.am_ende)(alte.quelle, TrackEndGrund::Replaced, None);
            }
        }

        let ende_gefeuert = Arc::new(AtomicBool::new(false));
        let provider = Arc::new(QuellenProvider {
            quelle: quelle.clone(),
            ende_gefeuert: ende_gefeuert.clone(),
            verbindung: self.selbst.clone(),
        });

        self.pausiert.store(false, Ordering::Release);
        inneres.socket.provider_setzen(Some(provider));
        inneres.aktive = Some(AktiveQuelle {
            quelle,
            ende_gefeuert,
        });
        Ok(())
    }

    /// Haelt die Wiedergabe an; die Quelle bleibt installiert
    pub async fn pause(&self) {
        let inneres = self.inneres.lock().await;
        self.pausiert.store(true, Ordering::Release);
        inneres.socket.provider_setzen(None);
    }

    /// Setzt eine pausierte Wiedergabe fort
    pub async fn resume(&self) {
        let inneres = self.inneres.lock().await;
        self.pausiert.store(false, Ordering::Release);
        if let Some(aktive) = &inneres.aktive {
            let provider = Arc::new(QuellenProvider {
                quelle: aktive.quelle.clone(),
                ende_gefeuert: aktive.ende_gefeuert.clone(),
                verbindung: self.selbst.clone(),
            });
            inneres.socket.provider_setzen(Some(provider));
        }
    }

    /// Beendet die Wiedergabe und schliesst die Quelle (Grund `stopped`)
    pub async fn stop(&self) {
        self.quelle_abbauen(TrackEndGrund::Stopped).await;
    }

    /// Springt in der aktiven Quelle; Fehler ohne Quelle oder ohne Seek-Support
    pub async fn seek(&self, ms: u64) -> VoiceResult<()> {
        let inneres = self.inneres.lock().await;
        match &inneres.aktive {
            Some(aktive) => Ok(aktive.quelle.seek(ms).await?),
            None => Err(VoiceFehler::KeineQuelle),
        }
    }

    /// Aktuelle Wiedergabe-Position in ms, 0 ohne aktive Quelle
    pub async fn position(&self) -> u64 {
        let inneres = self.inneres.lock().await;
        inneres
            .aktive
            .as_ref()
            .map(|a| a.quelle.position_ms())
            .unwrap_or(0)
    }

    /// Ob die Wiedergabe pausiert ist
    pub fn ist_pausiert(&self) -> bool {
        self.pausiert.load(Ordering::Acquire)
    }

    /// Rekonfiguration in-place: Channel-Wechsel oder Endpoint-Rotation
    ///
    /// Baut den neuen Socket zuerst vollstaendig auf, dann wird getauscht;
    /// eine installierte Quelle wandert auf den neuen Socket mit.
    pub async fn handle_voice_update(
        &self,
        kanal: ChannelId,
        session_id: &str,
        token: &str,
        endpoint: &str,
        frist: Duration,
    ) -> VoiceResult<()> {
        if self.geschlossen.load(Ordering::Acquire) {
            return Err(VoiceFehler::SocketGeschlossen);
        }

        let neuer = self.fabrik.socket_erstellen(self.bot, self.guild, kanal);
        self.close_handler_binden(&neuer);
        Self::updates_einspeisen(&neuer, session_id, token, endpoint);

        match tokio::time::timeout(frist, neuer.oeffnen()).await {
            Ok(Ok(())) => {}
            Ok(Err(fehler)) => {
                neuer.schliessen().await;
                return Err(fehler);
            }
            Err(_) => {
                neuer.schliessen().await;
                return Err(VoiceFehler::Zeitlimit);
            }
        }

        let alter = {
            let mut inneres = self.inneres.lock().await;
            let alter = std::mem::replace(&mut inneres.socket, neuer.clone());
            inneres.kanal = kanal;
            if let Some(aktive) = &inneres.aktive {
                if !self.pausiert.load(Ordering::Acquire) {
                    let provider = Arc::new(QuellenProvider {
                        quelle: aktive.quelle.clone(),
                        ende_gefeuert: aktive.ende_gefeuert.clone(),
                        verbindung: self.selbst.clone(),
                    });
                    neuer.provider_setzen(Some(provider));
                }
            }
            alter
        };

        tracing::info!(bot = %self.bot, guild = %self.guild, kanal = %kanal, "Voice-Socket rekonfiguriert");

        // Alter Socket: Close-Handler ist durch den Tausch bereits
        // unterdrueckt, Schliessen darf im Hintergrund nachlaufen
        tokio::spawn(async move {
            let _ = tokio::time::timeout(ALTSOCKET_LIMIT, alter.schliessen()).await;
        });

        Ok(())
    }

    /// Schliesst Quelle (Grund `stopped`) und Socket; idempotent
    pub async fn schliessen(&self) {
        self.schliessen_mit_grund(TrackEndGrund::Stopped).await;
    }

    /// Schliesst mit explizitem Track-Ende-Grund (`cleanup` beim Session-Abbau)
    pub async fn schliessen_mit_grund(&self, grund: TrackEndGrund) {
        if self.geschlossen.swap(true, Ordering::AcqRel) {
            return;
        }
        self.quelle_abbauen(grund).await;
        let socket = self.inneres.lock().await.socket.clone();
        let _ = tokio::time::timeout(SOCKET_SCHLIESS_LIMIT, socket.schliessen()).await;
        tracing::debug!(bot = %self.bot, guild = %self.guild, "Voice-Verbindung geschlossen");
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    /// Speist beide Zugangsdaten-Haelften verzoegert auf einem eigenen Task ein
    fn updates_einspeisen(
        socket: &Arc<dyn VoiceSocket>,
        session_id: &str,
        token: &str,
        endpoint: &str,
    ) {
        let socket = socket.clone();
        let session_id = session_id.to_string();
        let token = token.to_string();
        let endpoint = endpoint.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(UPDATE_VERZOEGERUNG).await;
            socket.state_update(&session_id);
            socket.server_update(&token, &endpoint);
        });
    }

    /// Bindet den Close-Handler; feuert `bei_trennung` nur wenn der Socket
    /// beim Feuern noch der aktuelle ist
    fn close_handler_binden(&self, socket: &Arc<dyn VoiceSocket>) {
        let verbindung_schwach = self.selbst.clone();
        let socket_schwach = Arc::downgrade(socket);
        socket.close_handler_setzen(Box::new(move || {
            let (Some(verbindung), Some(socket)) =
                (verbindung_schwach.upgrade(), socket_schwach.upgrade())
            else {
                return;
            };
            tokio::spawn(async move {
                verbindung.socket_getrennt(socket).await;
            });
        }));
    }

    async fn socket_getrennt(&self, socket: Arc<dyn VoiceSocket>) {
        if self.geschlossen.load(Ordering::Acquire) {
            return;
        }
        {
            let inneres = self.inneres.lock().await;
            if !Arc::ptr_eq(&inneres.socket, &socket) {
                // Alter Socket nach Rekonfiguration – unterdruecken
                return;
            }
        }
        let Some(selbst) = self.selbst.upgrade() else {
            return;
        };
        tracing::warn!(bot = %self.bot, guild = %self.guild, "Voice-Socket unerwartet geschlossen");
        (self.bei_trennung)(selbst);
    }

    async fn quelle_abbauen(&self, grund: TrackEndGrund) {
        let mut inneres = self.inneres.lock().await;
        inneres.socket.provider_setzen(None);
        if let Some(aktive) = inneres.aktive.take() {
            aktive.quelle.schliessen().await;
            if !aktive.ende_gefeuert.swap(true, Ordering::AcqRel) {
                (self.am_ende)(aktive.quelle, grund, None);
            }
        }
    }
}

/// Provider-Huelle um die aktive Quelle
///
/// Meldet EOF/Fehler genau einmal an die Verbindung, und nur solange die
/// Quelle noch die aktuelle ist.
struct QuellenProvider {
    quelle: Arc<dyn AudioQuelle>,
    ende_gefeuert: Arc<AtomicBool>,
    verbindung: Weak<VoiceConnection>,
}

#[async_trait]
impl OpusFrameProvider for QuellenProvider {
    async fn naechster_frame(&self) -> Option<Bytes> {
        if self.ende_gefeuert.load(Ordering::Acquire) {
            return None;
        }
        match self.quelle.next_opus_frame().await {
            Ok(Some(frame)) => Some(frame),
            Ok(None) => {
                self.ende_melden(TrackEndGrund::Finished, None).await;
                None
            }
            Err(fehler) => {
                self.ende_melden(TrackEndGrund::Error, Some(fehler.to_string()))
                    .await;
                None
            }
        }
    }
}

impl QuellenProvider {
    async fn ende_melden(&self, grund: TrackEndGrund, fehler: Option<String>) {
        if self.ende_gefeuert.swap(true, Ordering::AcqRel) {
            // play/stop waren schneller – deren Ereignis gilt
            return;
        }
        let Some(verbindung) = self.verbindung.upgrade() else {
            return;
        };
        {
            let mut inneres = verbindung.inneres.lock().await;
            if let Some(aktive) = &inneres.aktive {
                if Arc::ptr_eq(&aktive.quelle, &self.quelle) {
                    inneres.socket.provider_setzen(None);
                    inneres.aktive = None;
                }
            }
        }
        self.quelle.schliessen().await;
        (verbindung.am_ende)(self.quelle.clone(), grund, fehler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::PlattformSocketFabrik;
    use linkdave_audio::{AudioFehler, AudioResult};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    /// Skript-Quelle: liefert `frames` Frames, danach EOF (oder Fehler)
    struct SkriptQuelle {
        url: String,
        uebrig: AtomicUsize,
        fehler_am_ende: bool,
        geschlossen: AtomicBool,
        position: std::sync::atomic::AtomicU64,
    }

    impl SkriptQuelle {
        fn neu(frames: usize, fehler_am_ende: bool) -> Arc<Self> {
            Arc::new(Self {
                url: "http://host/test.mp3".into(),
                uebrig: AtomicUsize::new(frames),
                fehler_am_ende,
                geschlossen: AtomicBool::new(false),
                position: std::sync::atomic::AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl AudioQuelle for SkriptQuelle {
        async fn next_opus_frame(&self) -> AudioResult<Option<Bytes>> {
            if self.geschlossen.load(Ordering::Acquire) {
                return Ok(None);
            }
            let alt = self.uebrig.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                n.checked_sub(1)
            });
            match alt {
                Ok(_) => {
                    self.position.fetch_add(20, Ordering::AcqRel);
                    Ok(Some(Bytes::from_static(b"frame")))
                }
                Err(_) if self.fehler_am_ende => {
                    Err(AudioFehler::Gelesen("Verbindung abgerissen".into()))
                }
                Err(_) => Ok(None),
            }
        }

        async fn schliessen(&self) {
            self.geschlossen.store(true, Ordering::Release);
        }

        fn position_ms(&self) -> u64 {
            self.position.load(Ordering::Acquire)
        }

        async fn seek(&self, _ms: u64) -> AudioResult<()> {
            Err(AudioFehler::SeekNichtUnterstuetzt)
        }

        fn dauer_ms(&self) -> u64 {
            0
        }

        fn kann_seek(&self) -> bool {
            false
        }

        fn url(&self) -> &str {
            &self.url
        }
    }

    type EndeListe = Arc<StdMutex<Vec<(TrackEndGrund, Option<String>)>>>;

    async fn test_verbindung() -> (Arc<VoiceConnection>, EndeListe) {
        let enden: EndeListe = Arc::new(StdMutex::new(Vec::new()));
        let enden_clone = enden.clone();
        let am_ende: TrackEndeCallback = Arc::new(move |_quelle, grund, fehler| {
            enden_clone.lock().unwrap().push((grund, fehler));
        });
        let bei_trennung: TrennungsCallback = Arc::new(|_| {});

        let verbindung = VoiceConnection::neu(
            Arc::new(PlattformSocketFabrik),
            BotId(1),
            GuildId(2),
            ChannelId(3),
            "sess",
            "token",
            "voice.example.com",
            Duration::from_secs(5),
            am_ende,
            bei_trennung,
        )
        .await
        .expect("Verbindungsaufbau");
        (verbindung, enden)
    }

    async fn auf_enden_warten(enden: &EndeListe, erwartet: usize) {
        for _ in 0..100 {
            if enden.lock().unwrap().len() >= erwartet {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "Erwartete {erwartet} Track-Enden, bekam {}",
            enden.lock().unwrap().len()
        );
    }

    #[tokio::test]
    async fn eof_feuert_genau_einmal_finished() {
        let (verbindung, enden) = test_verbindung().await;
        let quelle = SkriptQuelle::neu(2, false);
        verbindung.play(quelle.clone()).await.unwrap();

        auf_enden_warten(&enden, 1).await;
        // Nach dem EOF darf kein weiteres Ereignis mehr kommen
        tokio::time::sleep(Duration::from_millis(100)).await;

        let liste = enden.lock().unwrap();
        assert_eq!(liste.len(), 1);
        assert_eq!(liste[0].0, TrackEndGrund::Finished);
        assert!(quelle.geschlossen.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn lesefehler_feuert_error_mit_meldung() {
        let (verbindung, enden) = test_verbindung().await;
        verbindung.play(SkriptQuelle::neu(1, true)).await.unwrap();

        auf_enden_warten(&enden, 1).await;
        let liste = enden.lock().unwrap();
        assert_eq!(liste[0].0, TrackEndGrund::Error);
        assert!(liste[0].1.as_deref().unwrap_or("").contains("abgerissen"));
    }

    #[tokio::test]
    async fn play_ersetzt_quelle_mit_replaced() {
        let (verbindung, enden) = test_verbindung().await;
        let erste = SkriptQuelle::neu(10_000, false);
        verbindung.play(erste.clone()).await.unwrap();
        verbindung.play(SkriptQuelle::neu(10_000, false)).await.unwrap();

        auf_enden_warten(&enden, 1).await;
        let liste = enden.lock().unwrap();
        assert_eq!(liste[0].0, TrackEndGrund::Replaced);
        assert!(erste.geschlossen.load(Ordering::Acquire), "Alte Quelle muss zu sein");
    }

    #[tokio::test]
    async fn stop_schliesst_quelle_mit_stopped() {
        let (verbindung, enden) = test_verbindung().await;
        let quelle = SkriptQuelle::neu(10_000, false);
        verbindung.play(quelle.clone()).await.unwrap();
        verbindung.stop().await;

        auf_enden_warten(&enden, 1).await;
        assert_eq!(enden.lock().unwrap()[0].0, TrackEndGrund::Stopped);
        assert!(quelle.geschlossen.load(Ordering::Acquire));
        assert_eq!(verbindung.position().await, 0, "Ohne Quelle ist die Position 0");
    }

    #[tokio::test]
    async fn pause_behaelt_quelle_resume_spielt_weiter() {
        let (verbindung, enden) = test_verbindung().await;
        let quelle = SkriptQuelle::neu(10_000, false);
        verbindung.play(quelle.clone()).await.unwrap();

        verbindung.pause().await;
        assert!(verbindung.ist_pausiert());
        assert!(
            !quelle.geschlossen.load(Ordering::Acquire),
            "Pause darf die Quelle nicht schliessen"
        );

        verbindung.resume().await;
        assert!(!verbindung.ist_pausiert());
        assert!(enden.lock().unwrap().is_empty(), "Pause/Resume ist kein Track-Ende");
    }

    #[tokio::test]
    async fn seek_ohne_quelle_ist_fehler() {
        let (verbindung, _enden) = test_verbindung().await;
        assert!(matches!(
            verbindung.seek(1000).await,
            Err(VoiceFehler::KeineQuelle)
        ));
    }

    #[tokio::test]
    async fn voice_update_wechselt_kanal() {
        let (verbindung, enden) = test_verbindung().await;
        verbindung.play(SkriptQuelle::neu(10_000, false)).await.unwrap();

        verbindung
            .handle_voice_update(
                ChannelId(99),
                "sess-2",
                "token-2",
                "voice2.example.com",
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(verbindung.kanal().await, ChannelId(99));
        // Der Tausch ist kein Track-Ende und keine Trennung
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(enden.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn schliessen_mit_cleanup_grund() {
        let (verbindung, enden) = test_verbindung().await;
        verbindung.play(SkriptQuelle::neu(10_000, false)).await.unwrap();
        verbindung.schliessen_mit_grund(TrackEndGrund::Cleanup).await;
        verbindung.schliessen().await; // idempotent

        auf_enden_warten(&enden, 1).await;
        let liste = enden.lock().unwrap();
        assert_eq!(liste.len(), 1);
        assert_eq!(liste[0].0, TrackEndGrund::Cleanup);
    }
}
