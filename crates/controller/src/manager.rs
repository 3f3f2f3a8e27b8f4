//! ControllerManager – Node-Pool, Player-Zuordnung und Migration
//!
//! Der Manager haelt `nodes: Name -> NodeClient` und `players: Guild ->
//! LogicalPlayer`. Jede Guild haengt an genau einem Node; die Zuordnung
//! wechselt ausschliesslich ueber das Migrationsprotokoll.
//!
//! ## Best-Node-Wahl
//! Verbundener, nicht drainender Node mit dem kleinsten Player-Zaehler;
//! linearer Scan, bei Gleichstand gewinnt die Iterationsreihenfolge.
//!
//! ## Ereignis-Filter
//! Guild-bezogene Node-Ereignisse werden nur weitergereicht wenn die Guild
//! aktuell ueber genau diesen Node laeuft – Nachzuegler eines verlassenen
//! Nodes fallen weg.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use linkdave_core::{BotId, ChannelId, GuildId, PlayerZustand, TrackEndGrund};
use linkdave_protocol::{
    ClientNachricht, GuildPayload, MigrateReadyPayload, PlayPayload, ServerNachricht, TrackInfo,
    VoiceUpdatePayload,
};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ControllerFehler, ControllerResult};
use crate::gateway::{GatewaySender, RohPaket, VoiceServerDaten, VoiceStateDaten};
use crate::node_client::{NodeClient, NodeEreignis, NodeOptionen};
use crate::player::LogicalPlayer;

/// Frist fuer das MigrateReady des alten Nodes
const MIGRATE_FRIST: Duration = Duration::from_secs(10);

/// Ereignisse des Managers an den Host
#[derive(Debug)]
pub enum ControllerEreignis {
    NodeVerbunden { node: String },
    NodeGetrennt { node: String, code: u16, grund: String },
    NodeDraining { node: String, frist_ms: u64 },
    TrackStart { guild: GuildId, track: TrackInfo },
    TrackEnd { guild: GuildId, track: TrackInfo, grund: TrackEndGrund },
    TrackError { guild: GuildId, fehler: String },
    VoiceConnect { guild: GuildId, kanal: ChannelId },
    VoiceDisconnect { guild: GuildId, grund: Option<String> },
    PlayerUpdate { guild: GuildId, zustand: PlayerZustand, position: u64, volume: u16 },
    /// Migration ohne Ziel-Node: der Player wurde verworfen
    PlayerVerworfen { guild: GuildId },
}

/// Verwaltet Node-Pool und logische Player eines Bots
pub struct ControllerManager {
    bot: BotId,
    gateway: Arc<dyn GatewaySender>,
    nodes: DashMap<String, Arc<NodeClient>>,
    players: DashMap<GuildId, Arc<LogicalPlayer>>,
    /// Wartende Migrationen: Guild -> Empfaenger des MigrateReady
    migrationen: DashMap<GuildId, oneshot::Sender<MigrateReadyPayload>>,
    intern_tx: mpsc::UnboundedSender<(String, NodeEreignis)>,
    ereignis_tx: mpsc::UnboundedSender<ControllerEreignis>,
    selbst: Weak<ControllerManager>,
}

impl ControllerManager {
    /// Erstellt den Manager; der Host konsumiert die Ereignis-Seite
    pub fn neu(
        bot: BotId,
        gateway: Arc<dyn GatewaySender>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ControllerEreignis>) {
        let (intern_tx, intern_rx) = mpsc::unbounded_channel();
        let (ereignis_tx, ereignis_rx) = mpsc::unbounded_channel();

        let manager = Arc::new_cyclic(|selbst| Self {
            bot,
            gateway,
            nodes: DashMap::new(),
            players: DashMap::new(),
            migrationen: DashMap::new(),
            intern_tx,
            ereignis_tx,
            selbst: selbst.clone(),
        });

        tokio::spawn(manager.clone().ereignis_schleife(intern_rx));
        (manager, ereignis_rx)
    }

    /// Registriert einen Node und verbindet ihn
    pub async fn node_hinzufuegen(
        &self,
        optionen: NodeOptionen,
    ) -> ControllerResult<Arc<NodeClient>> {
        let name = optionen.name.clone();
        let client = NodeClient::neu(optionen, self.intern_tx.clone());
        client.connect(self.bot).await?;
        self.nodes.insert(name, client.clone());
        Ok(client)
    }

    /// Node nach Name
    pub fn node(&self, name: &str) -> Option<Arc<NodeClient>> {
        self.nodes.get(name).map(|e| e.value().clone())
    }

    /// Der verbundene, nicht drainende Node mit den wenigsten Playern
    pub fn bester_node(&self, ausser: Option<&str>) -> Option<Arc<NodeClient>> {
        let mut bester: Option<Arc<NodeClient>> = None;
        for eintrag in self.nodes.iter() {
            let kandidat = eintrag.value();
            if !kandidat.ist_verfuegbar() {
                continue;
            }
            if ausser == Some(kandidat.optionen.name.as_str()) {
                continue;
            }
            match &bester {
                Some(bisher) if bisher.player_count() <= kandidat.player_count() => {}
                _ => bester = Some(kandidat.clone()),
            }
        }
        bester
    }

    /// Holt den Player einer Guild oder bindet einen neuen an den besten Node
    pub fn get_player(&self, guild: GuildId) -> ControllerResult<Arc<LogicalPlayer>> {
        if let Some(player) = self.players.get(&guild) {
            return Ok(player.value().clone());
        }
        let node = self.bester_node(None).ok_or(ControllerFehler::KeinNode)?;
        let player = LogicalPlayer::neu(guild, node.clone());
        node.player_count_anpassen(1);
        self.players.insert(guild, player.clone());
        tracing::info!(guild = %guild, node = %node.optionen.name, "Player angelegt");
        Ok(player)
    }

    /// Player einer Guild, falls vorhanden
    pub fn player(&self, guild: GuildId) -> Option<Arc<LogicalPlayer>> {
        self.players.get(&guild).map(|e| e.value().clone())
    }

    /// Entfernt den Player einer Guild und verlaesst den Voice-Channel
    pub fn player_entfernen(&self, guild: GuildId) {
        if let Some((_, player)) = self.players.remove(&guild) {
            player.node().player_count_anpassen(-1);
            player.disconnect(self.gateway.as_ref());
        }
    }

    /// Die Sende-Seite des Gateways (fuer `LogicalPlayer::connect`)
    pub fn gateway(&self) -> &dyn GatewaySender {
        self.gateway.as_ref()
    }

    // -----------------------------------------------------------------------
    // Gateway-Durchleitung
    // -----------------------------------------------------------------------

    /// Verarbeitet ein rohes Gateway-Paket des Hosts
    ///
    /// Nur VOICE_STATE_UPDATE (eigener Bot) und VOICE_SERVER_UPDATE sind
    /// relevant; alles andere wird ignoriert.
    pub fn handle_raw(&self, paket: serde_json::Value) {
        let paket: RohPaket = match serde_json::from_value(paket) {
            Ok(paket) => paket,
            Err(_) => return,
        };

        match paket.t.as_deref() {
            Some("VOICE_STATE_UPDATE") => {
                let Ok(daten) = serde_json::from_value::<VoiceStateDaten>(paket.d) else {
                    return;
                };
                if daten.user_id != self.bot {
                    return;
                }
                let Some(player) = self.player(daten.guild_id) else {
                    return;
                };
                if let Err(fehler) = player.voice_state_update(&daten) {
                    tracing::warn!(guild = %daten.guild_id, fehler = %fehler, "State-Update verworfen");
                }
            }
            Some("VOICE_SERVER_UPDATE") => {
                let Ok(daten) = serde_json::from_value::<VoiceServerDaten>(paket.d) else {
                    return;
                };
                let Some(player) = self.player(daten.guild_id) else {
                    return;
                };
                if let Err(fehler) = player.voice_server_update(&daten) {
                    tracing::warn!(guild = %daten.guild_id, fehler = %fehler, "Server-Update verworfen");
                }
            }
            _ => {}
        }
    }

    // -----------------------------------------------------------------------
    // Migration
    // -----------------------------------------------------------------------

    /// Migriert einen Player auf einen anderen Node
    ///
    /// Ablauf: PlayerMigrate an den alten Node, MigrateReady abwarten,
    /// Zeiger und Zaehler tauschen, Zugangsdaten auf dem Ziel wieder
    /// anheften, bei laufender Wiedergabe Play mit Positions-Versatz.
    /// An den alten Node geht bewusst kein Disconnect – er haelt die
    /// Voice-Verbindung bis der neue Node spielt und baut dann selbst ab.
    pub async fn player_migrieren(
        &self,
        player: Arc<LogicalPlayer>,
        ziel: Arc<NodeClient>,
    ) -> ControllerResult<()> {
        let guild = player.guild;
        let alt = player.node();

        let (tx, rx) = oneshot::channel();
        self.migrationen.insert(guild, tx);
        if let Err(fehler) =
            alt.senden(ClientNachricht::PlayerMigrate(GuildPayload { guild_id: guild }))
        {
            self.migrationen.remove(&guild);
            return Err(fehler);
        }

        let snapshot = match tokio::time::timeout(MIGRATE_FRIST, rx).await {
            Ok(Ok(snapshot)) => snapshot,
            _ => {
                self.migrationen.remove(&guild);
                return Err(ControllerFehler::MigrationFehlgeschlagen(
                    "MigrateReady blieb aus".into(),
                ));
            }
        };

        player.node_setzen(ziel.clone());
        alt.player_count_anpassen(-1);
        ziel.player_count_anpassen(1);

        if let Some(voice) = player.voice_cache() {
            ziel.senden(ClientNachricht::VoiceUpdate(VoiceUpdatePayload {
                guild_id: guild,
                ..voice
            }))?;
        }

        if snapshot.state == PlayerZustand::Playing && !snapshot.url.is_empty() {
            ziel.senden(ClientNachricht::Play(PlayPayload {
                guild_id: guild,
                url: snapshot.url,
                start_time: Some(snapshot.position),
                volume: Some(snapshot.volume),
            }))?;
        }

        tracing::info!(
            guild = %guild,
            von = %alt.optionen.name,
            nach = %ziel.optionen.name,
            "Player migriert"
        );
        Ok(())
    }

    /// Reagiert auf den Drain eines Nodes: alle betroffenen Player wandern
    async fn node_drain_behandeln(self: Arc<Self>, name: String) {
        let betroffen: Vec<_> = self
            .players
            .iter()
            .filter(|e| e.value().node().optionen.name == name)
            .map(|e| e.value().clone())
            .collect();

        tracing::warn!(node = %name, player = betroffen.len(), "Node draint – Migration beginnt");

        for player in betroffen {
            let guild = player.guild;
            match self.bester_node(Some(&name)) {
                Some(ziel) => {
                    if let Err(fehler) = self.player_migrieren(player, ziel).await {
                        tracing::error!(guild = %guild, fehler = %fehler, "Migration fehlgeschlagen");
                        self.player_entfernen(guild);
                        self.ereignis(ControllerEreignis::PlayerVerworfen { guild });
                    }
                }
                None => {
                    tracing::error!(guild = %guild, "Kein Ziel-Node – Player wird verworfen");
                    self.player_entfernen(guild);
                    self.ereignis(ControllerEreignis::PlayerVerworfen { guild });
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Ereignis-Verarbeitung
    // -----------------------------------------------------------------------

    async fn ereignis_schleife(
        self: Arc<Self>,
        mut intern_rx: mpsc::UnboundedReceiver<(String, NodeEreignis)>,
    ) {
        while let Some((node, ereignis)) = intern_rx.recv().await {
            match ereignis {
                NodeEreignis::Verbunden => {
                    self.ereignis(ControllerEreignis::NodeVerbunden { node });
                }
                NodeEreignis::Getrennt { code, grund } => {
                    self.ereignis(ControllerEreignis::NodeGetrennt { node, code, grund });
                }
                NodeEreignis::Nachricht(nachricht) => {
                    self.nachricht_behandeln(node, nachricht);
                }
            }
        }
    }

    fn nachricht_behandeln(self: &Arc<Self>, node: String, nachricht: ServerNachricht) {
        match nachricht {
            ServerNachricht::MigrateReady(p) => {
                if let Some((_, tx)) = self.migrationen.remove(&p.guild_id) {
                    let _ = tx.send(p);
                }
            }
            ServerNachricht::NodeDraining(p) => {
                self.ereignis(ControllerEreignis::NodeDraining {
                    node: node.clone(),
                    frist_ms: p.deadline_ms,
                });
                tokio::spawn(self.clone().node_drain_behandeln(node));
            }
            ServerNachricht::PlayerUpdate(p) => {
                let Some(player) = self.gefilterter_player(p.guild_id, &node) else {
                    return;
                };
                player.update_merken(p.clone());
                self.ereignis(ControllerEreignis::PlayerUpdate {
                    guild: p.guild_id,
                    zustand: p.state,
                    position: p.position,
                    volume: p.volume,
                });
            }
            ServerNachricht::TrackStart(p) => {
                let Some(player) = self.gefilterter_player(p.guild_id, &node) else {
                    return;
                };
                player.track_merken(Some(p.track.clone()));
                self.ereignis(ControllerEreignis::TrackStart {
                    guild: p.guild_id,
                    track: p.track,
                });
            }
            ServerNachricht::TrackEnd(p) => {
                let Some(player) = self.gefilterter_player(p.guild_id, &node) else {
                    return;
                };
                player.track_merken(None);
                self.ereignis(ControllerEreignis::TrackEnd {
                    guild: p.guild_id,
                    track: p.track,
                    grund: p.reason,
                });
            }
            ServerNachricht::TrackError(p) => {
                if self.gefilterter_player(p.guild_id, &node).is_none() {
                    return;
                }
                self.ereignis(ControllerEreignis::TrackError {
                    guild: p.guild_id,
                    fehler: p.error,
                });
            }
            ServerNachricht::VoiceConnect(p) => {
                if self.gefilterter_player(p.guild_id, &node).is_none() {
                    return;
                }
                self.ereignis(ControllerEreignis::VoiceConnect {
                    guild: p.guild_id,
                    kanal: p.channel_id,
                });
            }
            ServerNachricht::VoiceDisconnect(p) => {
                if self.gefilterter_player(p.guild_id, &node).is_none() {
                    return;
                }
                self.ereignis(ControllerEreignis::VoiceDisconnect {
                    guild: p.guild_id,
                    grund: p.reason,
                });
            }
            // Ready/Stats verarbeitet der NodeClient selbst, Pong ist Takt
            ServerNachricht::Ready(_) | ServerNachricht::Stats(_) | ServerNachricht::Pong => {}
        }
    }

    /// Player der Guild, aber nur wenn sie aktuell ueber `node` laeuft
    fn gefilterter_player(&self, guild: GuildId, node: &str) -> Option<Arc<LogicalPlayer>> {
        let player = self.player(guild)?;
        if player.node().optionen.name != node {
            tracing::debug!(guild = %guild, node, "Ereignis eines fremden Nodes verworfen");
            return None;
        }
        Some(player)
    }

    fn ereignis(&self, ereignis: ControllerEreignis) {
        let _ = self.ereignis_tx.send(ereignis);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StummesGateway;

    impl GatewaySender for StummesGateway {
        fn voice_state_senden(
            &self,
            _guild: GuildId,
            _kanal: Option<ChannelId>,
            _self_mute: bool,
            _self_deaf: bool,
        ) {
        }
    }

    #[tokio::test]
    async fn get_player_ohne_nodes_ist_fehler() {
        let (manager, _ereignisse) = ControllerManager::neu(BotId(1), Arc::new(StummesGateway));
        assert!(matches!(
            manager.get_player(GuildId(1)),
            Err(ControllerFehler::KeinNode)
        ));
    }

    #[tokio::test]
    async fn handle_raw_ignoriert_fremde_pakete() {
        let (manager, _ereignisse) = ControllerManager::neu(BotId(1), Arc::new(StummesGateway));
        // Kein Panic, kein Effekt
        manager.handle_raw(serde_json::json!({"t": "MESSAGE_CREATE", "d": {}}));
        manager.handle_raw(serde_json::json!({"nicht": "gateway"}));
        manager.handle_raw(serde_json::json!({
            "t": "VOICE_STATE_UPDATE",
            "d": {"guild_id": "1", "channel_id": "2", "user_id": "999", "session_id": "s"}
        }));
        assert!(manager.player(GuildId(1)).is_none());
    }

    #[tokio::test]
    async fn bester_node_ohne_verbundene_nodes() {
        let (manager, _ereignisse) = ControllerManager::neu(BotId(1), Arc::new(StummesGateway));
        assert!(manager.bester_node(None).is_none());
    }
}
