//! Voice-Manager – Index aller Verbindungen und Event-Fan-out
//!
//! Thread-sicherer Index `(BotId, GuildId) -> VoiceConnection`. Der
//! Node-Server registriert genau einen `EventHandler`; alle Ereignisse aus
//! Quellen und Sockets laufen hier zusammen und werden ausserhalb der
//! Map-Locks zugestellt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use linkdave_audio::{AudioQuelle, QuellenFabrik};
use linkdave_core::{BotId, ChannelId, GuildId, TrackEndGrund};

use crate::connection::{TrackEndeCallback, TrennungsCallback, VoiceConnection};
use crate::error::{VoiceFehler, VoiceResult};
use crate::socket::SocketFabrik;

/// Empfaenger aller Voice-Ereignisse (implementiert vom Node-Server)
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Terminales Track-Ende einer Quelle
    async fn on_track_end(
        &self,
        bot: BotId,
        guild: GuildId,
        quelle: Arc<dyn AudioQuelle>,
        grund: TrackEndGrund,
    );

    /// Zusaetzlich zu `on_track_end` wenn der Grund ein Fehler war
    async fn on_track_exception(
        &self,
        bot: BotId,
        guild: GuildId,
        quelle: Arc<dyn AudioQuelle>,
        fehler: String,
    );

    /// Der Voice-Socket einer noch aktuellen Verbindung ist weggebrochen
    async fn on_voice_disconnected(&self, bot: BotId, guild: GuildId);
}

/// Verwaltet alle Voice-Verbindungen eines Nodes
pub struct VoiceManager {
    verbindungen: DashMap<(BotId, GuildId), Arc<VoiceConnection>>,
    sockets: Arc<dyn SocketFabrik>,
    quellen: Arc<dyn QuellenFabrik>,
    handler: parking_lot::RwLock<Option<Arc<dyn EventHandler>>>,
}

impl VoiceManager {
    /// Erstellt einen Manager mit Socket- und Quellen-Fabrik
    pub fn neu(sockets: Arc<dyn SocketFabrik>, quellen: Arc<dyn QuellenFabrik>) -> Arc<Self> {
        Arc::new(Self {
            verbindungen: DashMap::new(),
            sockets,
            quellen,
            handler: parking_lot::RwLock::new(None),
        })
    }

    /// Registriert den einen Event-Handler (ersetzt einen frueheren)
    pub fn handler_registrieren(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Baut eine Verbindung auf oder rekonfiguriert die bestehende
    ///
    /// Eine bestehende Verbindung bleibt ueber Channel-Wechsel hinweg am
    /// Leben (`handle_voice_update`). Das Rennen zweier gleichzeitiger
    /// Connects wird nach dem Aufbau per Map-Eintrag aufgeloest.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        self: &Arc<Self>,
        frist: Duration,
        bot: BotId,
        guild: GuildId,
        kanal: ChannelId,
        session_id: &str,
        token: &str,
        endpoint: &str,
    ) -> VoiceResult<()> {
        let schluessel = (bot, guild);

        if let Some(bestehende) = self.verbindungen.get(&schluessel).map(|e| e.value().clone()) {
            return bestehende
                .handle_voice_update(kanal, session_id, token, endpoint, frist)
                .await;
        }

        let neue = VoiceConnection::neu(
            self.sockets.clone(),
            bot,
            guild,
            kanal,
            session_id,
            token,
            endpoint,
            frist,
            self.track_ende_callback(bot, guild),
            self.trennungs_callback(bot, guild),
        )
        .await?;

        // Doppelt pruefen: hat ein paralleler Connect gewonnen, gilt dessen
        // Verbindung und unsere wird wieder abgebaut
        match self.verbindungen.entry(schluessel) {
            dashmap::mapref::entry::Entry::Vacant(eintrag) => {
                eintrag.insert(neue);
                Ok(())
            }
            dashmap::mapref::entry::Entry::Occupied(eintrag) => {
                let bestehende = eintrag.get().clone();
                tokio::spawn(async move { neue.schliessen().await });
                bestehende
                    .handle_voice_update(kanal, session_id, token, endpoint, frist)
                    .await
            }
        }
    }

    /// Baut eine Quelle und installiert sie in der Verbindung
    ///
    /// Gibt die Quelle zurueck (der Aufrufer liest Position/URL daraus).
    /// Schlaegt die Installation fehl, wird die Quelle wieder geschlossen.
    pub async fn play(
        &self,
        bot: BotId,
        guild: GuildId,
        url: &str,
        start_ms: u64,
    ) -> VoiceResult<Arc<dyn AudioQuelle>> {
        let verbindung = self.verbindung(bot, guild)?;
        let quelle = self.quellen.quelle_erstellen(url, start_ms).await?;

        if let Err(fehler) = verbindung.play(quelle.clone()).await {
            quelle.schliessen().await;
            return Err(fehler);
        }
        Ok(quelle)
    }

    /// Haelt die Wiedergabe an
    pub async fn pause(&self, bot: BotId, guild: GuildId) -> VoiceResult<()> {
        self.verbindung(bot, guild)?.pause().await;
        Ok(())
    }

    /// Setzt die Wiedergabe fort
    pub async fn resume(&self, bot: BotId, guild: GuildId) -> VoiceResult<()> {
        self.verbindung(bot, guild)?.resume().await;
        Ok(())
    }

    /// Beendet die Wiedergabe
    pub async fn stop(&self, bot: BotId, guild: GuildId) -> VoiceResult<()> {
        self.verbindung(bot, guild)?.stop().await;
        Ok(())
    }

    /// Springt in der aktiven Quelle
    pub async fn seek(&self, bot: BotId, guild: GuildId, ms: u64) -> VoiceResult<()> {
        self.verbindung(bot, guild)?.seek(ms).await
    }

    /// Wiedergabe-Position in ms, 0 ohne Verbindung oder Quelle
    pub async fn position(&self, bot: BotId, guild: GuildId) -> u64 {
        match self.verbindung(bot, guild) {
            Ok(verbindung) => verbindung.position().await,
            Err(_) => 0,
        }
    }

    /// Entfernt die Verbindung aus dem Index und schliesst sie im Hintergrund
    pub fn disconnect(&self, bot: BotId, guild: GuildId) {
        if let Some((_, verbindung)) = self.verbindungen.remove(&(bot, guild)) {
            tokio::spawn(async move {
                verbindung
                    .schliessen_mit_grund(TrackEndGrund::Cleanup)
                    .await;
            });
        }
    }

    /// Schliesst alle Verbindungen
    pub async fn schliessen(&self) {
        let alle: Vec<_> = self
            .verbindungen
            .iter()
            .map(|e| e.value().clone())
            .collect();
        self.verbindungen.clear();
        for verbindung in alle {
            verbindung
                .schliessen_mit_grund(TrackEndGrund::Cleanup)
                .await;
        }
    }

    /// Anzahl aktiver Verbindungen
    pub fn verbindungs_anzahl(&self) -> usize {
        self.verbindungen.len()
    }

    /// Ob fuer (Bot, Guild) eine Verbindung existiert
    pub fn hat_verbindung(&self, bot: BotId, guild: GuildId) -> bool {
        self.verbindungen.contains_key(&(bot, guild))
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn verbindung(&self, bot: BotId, guild: GuildId) -> VoiceResult<Arc<VoiceConnection>> {
        self.verbindungen
            .get(&(bot, guild))
            .map(|e| e.value().clone())
            .ok_or_else(|| VoiceFehler::KeineVerbindung(guild.to_string()))
    }

    fn aktueller_handler(&self) -> Option<Arc<dyn EventHandler>> {
        self.handler.read().clone()
    }

    /// Callback fuer das Track-Ende: Fan-out an den Handler, ausserhalb
    /// jedes Locks (eigener Task)
    fn track_ende_callback(self: &Arc<Self>, bot: BotId, guild: GuildId) -> TrackEndeCallback {
        let manager = Arc::downgrade(self);
        Arc::new(move |quelle, grund, fehler| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                let Some(handler) = manager.aktueller_handler() else {
                    return;
                };
                handler
                    .on_track_end(bot, guild, quelle.clone(), grund)
                    .await;
                if grund == TrackEndGrund::Error {
                    let meldung = fehler.unwrap_or_else(|| "unbekannter Quellenfehler".into());
                    handler
                        .on_track_exception(bot, guild, quelle, meldung)
                        .await;
                }
            });
        })
    }

    /// Callback fuer den Socket-Verlust: Eintrag entfernen (nur wenn die
    /// Verbindung noch die aktuelle ist) und Handler informieren
    fn trennungs_callback(self: &Arc<Self>, bot: BotId, guild: GuildId) -> TrennungsCallback {
        let manager = Arc::downgrade(self);
        Arc::new(move |verbindung| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                let entfernt = manager
                    .verbindungen
                    .remove_if(&(bot, guild), |_, aktuelle| {
                        Arc::ptr_eq(aktuelle, &verbindung)
                    })
                    .is_some();
                if !entfernt {
                    return;
                }
                tracing::warn!(bot = %bot, guild = %guild, "Voice-Verbindung verloren");
                verbindung
                    .schliessen_mit_grund(TrackEndGrund::Cleanup)
                    .await;
                if let Some(handler) = manager.aktueller_handler() {
                    handler.on_voice_disconnected(bot, guild).await;
                }
            });
        })
    }
}
