//! LogicalPlayer – der logische Player einer Guild auf Controller-Seite
//!
//! Haelt den aktuellen Node, die gepufferten Zugangsdaten-Haelften und den
//! Cache des letzten vollstaendigen VoiceUpdate (fuer das Wiederanheften
//! nach einer Migration). Die Kommando-Methoden sind duenne Wrapper um die
//! passenden Opcodes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use linkdave_core::{ChannelId, GuildId};
use linkdave_protocol::{
    ClientNachricht, GuildPayload, PlayPayload, PlayerUpdatePayload, SeekPayload, TrackInfo,
    VoiceServerEvent, VoiceUpdatePayload, VolumePayload,
};

use crate::error::{ControllerFehler, ControllerResult};
use crate::gateway::{GatewaySender, VoiceServerDaten, VoiceStateDaten};
use crate::node_client::NodeClient;

/// Gepufferte Zugangsdaten-Haelften
///
/// State- und Server-Haelfte duerfen einzeln und in beliebiger Reihenfolge
/// eintreffen; erst der vollstaendige Satz loest das VoiceUpdate aus.
#[derive(Debug, Clone, Default)]
pub struct PendingVoice {
    pub kanal: Option<ChannelId>,
    pub session_id: Option<String>,
    pub token: Option<String>,
    pub endpoint: Option<String>,
}

impl PendingVoice {
    /// Ob alle vier Teile vorliegen
    pub fn vollstaendig(&self) -> bool {
        self.kanal.is_some()
            && self.session_id.is_some()
            && self.token.is_some()
            && self.endpoint.is_some()
    }
}

/// Der logische Player einer Guild
pub struct LogicalPlayer {
    /// Guild dieses Players
    pub guild: GuildId,
    node: parking_lot::RwLock<Arc<NodeClient>>,
    self_mute: AtomicBool,
    self_deaf: AtomicBool,
    letzter_update: parking_lot::Mutex<Option<PlayerUpdatePayload>>,
    track: parking_lot::Mutex<Option<TrackInfo>>,
    /// Letzter vollstaendiger Zugangsdaten-Satz
    voice_cache: parking_lot::Mutex<Option<VoiceUpdatePayload>>,
    pending: parking_lot::Mutex<PendingVoice>,
}

impl LogicalPlayer {
    /// Erstellt den Player gebunden an einen Node
    pub fn neu(guild: GuildId, node: Arc<NodeClient>) -> Arc<Self> {
        Arc::new(Self {
            guild,
            node: parking_lot::RwLock::new(node),
            self_mute: AtomicBool::new(false),
            self_deaf: AtomicBool::new(false),
            letzter_update: parking_lot::Mutex::new(None),
            track: parking_lot::Mutex::new(None),
            voice_cache: parking_lot::Mutex::new(None),
            pending: parking_lot::Mutex::new(PendingVoice::default()),
        })
    }

    /// Der Node an dem dieser Player haengt
    pub fn node(&self) -> Arc<NodeClient> {
        self.node.read().clone()
    }

    /// Haengt den Player an einen anderen Node (Migration)
    pub fn node_setzen(&self, node: Arc<NodeClient>) {
        *self.node.write() = node;
    }

    // -----------------------------------------------------------------------
    // Gateway-Seite
    // -----------------------------------------------------------------------

    /// Tritt einem Voice-Channel bei (Voice-State-Update ans Gateway)
    pub fn connect(
        &self,
        gateway: &dyn GatewaySender,
        kanal: ChannelId,
        self_mute: bool,
        self_deaf: bool,
    ) {
        self.self_mute.store(self_mute, Ordering::Release);
        self.self_deaf.store(self_deaf, Ordering::Release);
        gateway.voice_state_senden(self.guild, Some(kanal), self_mute, self_deaf);
    }

    /// Verlaesst den Voice-Channel und setzt den lokalen Zustand zurueck
    pub fn disconnect(&self, gateway: &dyn GatewaySender) {
        gateway.voice_state_senden(
            self.guild,
            None,
            self.self_mute.load(Ordering::Acquire),
            self.self_deaf.load(Ordering::Acquire),
        );
        let _ = self
            .node()
            .senden(ClientNachricht::Disconnect(GuildPayload {
                guild_id: self.guild,
            }));
        *self.pending.lock() = PendingVoice::default();
        *self.voice_cache.lock() = None;
        *self.letzter_update.lock() = None;
        *self.track.lock() = None;
    }

    /// Verarbeitet die State-Haelfte; `Ok(true)` wenn das VoiceUpdate rausging
    pub fn voice_state_update(&self, daten: &VoiceStateDaten) -> ControllerResult<bool> {
        {
            let mut pending = self.pending.lock();
            match daten.channel_id {
                Some(kanal) => {
                    pending.kanal = Some(kanal);
                    pending.session_id = Some(daten.session_id.clone());
                }
                None => {
                    // Der Bot hat den Channel verlassen – Puffer leeren
                    *pending = PendingVoice::default();
                    return Ok(false);
                }
            }
        }
        self.voice_update_versuchen()
    }

    /// Verarbeitet die Server-Haelfte; `Ok(true)` wenn das VoiceUpdate rausging
    ///
    /// Ein Null-Endpoint behaelt den vorherigen Endpoint bei (Puffer oder
    /// Cache); ohne vorherigen Endpoint schlaegt die Operation fehl.
    pub fn voice_server_update(&self, daten: &VoiceServerDaten) -> ControllerResult<bool> {
        {
            let mut pending = self.pending.lock();
            pending.token = Some(daten.token.clone());
            match &daten.endpoint {
                Some(endpoint) => pending.endpoint = Some(endpoint.clone()),
                None => {
                    if pending.endpoint.is_none() {
                        let vorheriger = self
                            .voice_cache
                            .lock()
                            .as_ref()
                            .and_then(|cache| cache.event.endpoint.clone());
                        match vorheriger {
                            Some(endpoint) => pending.endpoint = Some(endpoint),
                            None => {
                                return Err(ControllerFehler::ZugangsdatenUnvollstaendig(
                                    "Null-Endpoint ohne vorherigen Endpoint".into(),
                                ))
                            }
                        }
                    }
                }
            }
        }
        self.voice_update_versuchen()
    }

    /// Sendet das VoiceUpdate sobald alle vier Teile vorliegen
    fn voice_update_versuchen(&self) -> ControllerResult<bool> {
        let payload = {
            let mut pending = self.pending.lock();
            if !pending.vollstaendig() {
                return Ok(false);
            }
            let fertig = std::mem::take(&mut *pending);
            VoiceUpdatePayload {
                guild_id: self.guild,
                channel_id: fertig.kanal.unwrap_or(ChannelId(0)),
                session_id: fertig.session_id.unwrap_or_default(),
                event: VoiceServerEvent {
                    token: fertig.token.unwrap_or_default(),
                    guild_id: self.guild,
                    endpoint: fertig.endpoint,
                },
            }
        };

        self.node()
            .senden(ClientNachricht::VoiceUpdate(payload.clone()))?;
        *self.voice_cache.lock() = Some(payload);
        Ok(true)
    }

    /// Letzter vollstaendiger Zugangsdaten-Satz (fuer die Migration)
    pub fn voice_cache(&self) -> Option<VoiceUpdatePayload> {
        self.voice_cache.lock().clone()
    }

    // -----------------------------------------------------------------------
    // Node-Seite (Opcode-Wrapper)
    // -----------------------------------------------------------------------

    /// Spielt eine URL ab
    pub fn play(
        &self,
        url: &str,
        start_ms: Option<u64>,
        volume: Option<u16>,
    ) -> ControllerResult<()> {
        self.node().senden(ClientNachricht::Play(PlayPayload {
            guild_id: self.guild,
            url: url.to_string(),
            start_time: start_ms,
            volume,
        }))
    }

    /// Haelt die Wiedergabe an
    pub fn pause(&self) -> ControllerResult<()> {
        self.guild_kommando(ClientNachricht::Pause)
    }

    /// Setzt die Wiedergabe fort
    pub fn resume(&self) -> ControllerResult<()> {
        self.guild_kommando(ClientNachricht::Resume)
    }

    /// Beendet die Wiedergabe
    pub fn stop(&self) -> ControllerResult<()> {
        self.guild_kommando(ClientNachricht::Stop)
    }

    /// Springt an eine Position
    pub fn seek(&self, position_ms: u64) -> ControllerResult<()> {
        self.node().senden(ClientNachricht::Seek(SeekPayload {
            guild_id: self.guild,
            position: position_ms,
        }))
    }

    /// Setzt die Lautstaerke (0..=1000)
    pub fn volume(&self, volume: u16) -> ControllerResult<()> {
        self.node().senden(ClientNachricht::Volume(VolumePayload {
            guild_id: self.guild,
            volume,
        }))
    }

    fn guild_kommando(
        &self,
        bauen: fn(GuildPayload) -> ClientNachricht,
    ) -> ControllerResult<()> {
        self.node().senden(bauen(GuildPayload {
            guild_id: self.guild,
        }))
    }

    // -----------------------------------------------------------------------
    // Ereignis-Caches
    // -----------------------------------------------------------------------

    /// Merkt sich den letzten PlayerUpdate-Snapshot
    pub fn update_merken(&self, update: PlayerUpdatePayload) {
        *self.letzter_update.lock() = Some(update);
    }

    /// Letzter PlayerUpdate-Snapshot
    pub fn letzter_update(&self) -> Option<PlayerUpdatePayload> {
        self.letzter_update.lock().clone()
    }

    /// Merkt sich den laufenden Track (None beim Track-Ende)
    pub fn track_merken(&self, track: Option<TrackInfo>) {
        *self.track.lock() = track;
    }

    /// Aktueller Track, falls einer laeuft
    pub fn track(&self) -> Option<TrackInfo> {
        self.track.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkdave_core::BotId;
    use crate::node_client::NodeOptionen;
    use tokio::sync::mpsc;

    fn test_player() -> Arc<LogicalPlayer> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let node = NodeClient::neu(NodeOptionen::neu("main", "ws://localhost:1/ws"), tx);
        LogicalPlayer::neu(GuildId(42), node)
    }

    fn state_daten(kanal: Option<u64>) -> VoiceStateDaten {
        VoiceStateDaten {
            guild_id: GuildId(42),
            channel_id: kanal.map(ChannelId),
            user_id: BotId(1),
            session_id: "sess".into(),
        }
    }

    fn server_daten(endpoint: Option<&str>) -> VoiceServerDaten {
        VoiceServerDaten {
            guild_id: GuildId(42),
            token: "token".into(),
            endpoint: endpoint.map(String::from),
        }
    }

    #[tokio::test]
    async fn eine_haelfte_allein_sendet_nichts() {
        let player = test_player();
        // Nur die State-Haelfte: unvollstaendig, kein Sendeversuch
        let gesendet = player.voice_state_update(&state_daten(Some(123))).unwrap();
        assert!(!gesendet);
        assert!(player.voice_cache().is_none());
    }

    #[tokio::test]
    async fn null_kanal_leert_den_puffer() {
        let player = test_player();
        player.voice_state_update(&state_daten(Some(123))).unwrap();

        // Der Bot verlaesst den Channel: Puffer weg, die spaetere
        // Server-Haelfte allein reicht nicht mehr
        player.voice_state_update(&state_daten(None)).unwrap();
        let gesendet = player
            .voice_server_update(&server_daten(Some("voice.example.com")))
            .unwrap();
        assert!(!gesendet);
    }

    #[tokio::test]
    async fn null_endpoint_ohne_vorherigen_schlaegt_fehl() {
        let player = test_player();
        player.voice_state_update(&state_daten(Some(123))).unwrap();

        let fehler = player.voice_server_update(&server_daten(None)).unwrap_err();
        assert!(matches!(
            fehler,
            ControllerFehler::ZugangsdatenUnvollstaendig(_)
        ));
    }

    #[tokio::test]
    async fn vollstaendiger_satz_versucht_zu_senden() {
        let player = test_player();
        player.voice_state_update(&state_daten(Some(123))).unwrap();

        // Beide Haelften da – der Sendeversuch scheitert nur am
        // getrennten Node, nicht an den Daten
        let fehler = player
            .voice_server_update(&server_daten(Some("voice.example.com")))
            .unwrap_err();
        assert!(matches!(fehler, ControllerFehler::NichtVerbunden(_)));
    }
}
