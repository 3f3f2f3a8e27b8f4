//! Integrationstests der Controller-Seite gegen echte Nodes
//!
//! Zwei Node-Server laufen auf ephemeren Ports; der Controller verbindet
//! beide, spielt ueber den besten Node und migriert beim Drain.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use linkdave_audio::{AudioFehler, AudioQuelle, AudioResult, QuellenFabrik};
use linkdave_controller::{
    ControllerEreignis, ControllerManager, GatewaySender, NodeOptionen,
};
use linkdave_core::{BotId, ChannelId, GuildId};
use linkdave_node::{ws, NodeKonfig, NodeState};
use linkdave_voice::{PlattformSocketFabrik, VoiceManager};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Skript-Quelle und Gateway-Attrappe
// ---------------------------------------------------------------------------

struct EndlosQuelle {
    url: String,
    position: AtomicU64,
    geschlossen: AtomicBool,
}

#[async_trait]
impl AudioQuelle for EndlosQuelle {
    async fn next_opus_frame(&self) -> AudioResult<Option<Bytes>> {
        if self.geschlossen.load(Ordering::Acquire) {
            return Ok(None);
        }
        self.position.fetch_add(20, Ordering::AcqRel);
        Ok(Some(Bytes::from_static(b"frame")))
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

struct EndlosFabrik;

#[async_trait]
impl QuellenFabrik for EndlosFabrik {
    async fn quelle_erstellen(
        &self,
        url: &str,
        start_ms: u64,
    ) -> AudioResult<Arc<dyn AudioQuelle>> {
        Ok(Arc::new(EndlosQuelle {
            url: url.to_string(),
            position: AtomicU64::new(start_ms),
            geschlossen: AtomicBool::new(false),
        }))
    }
}

/// Gateway-Attrappe: zeichnet Voice-State-Sendungen auf
struct TestGateway {
    sendungen: mpsc::UnboundedSender<(GuildId, Option<ChannelId>)>,
}

impl GatewaySender for TestGateway {
    fn voice_state_senden(
        &self,
        guild: GuildId,
        kanal: Option<ChannelId>,
        _self_mute: bool,
        _self_deaf: bool,
    ) {
        let _ = self.sendungen.send((guild, kanal));
    }
}

// ---------------------------------------------------------------------------
// Aufbau-Helfer
// ---------------------------------------------------------------------------

async fn node_starten() -> (Arc<NodeState>, String) {
    let manager = VoiceManager::neu(Arc::new(PlattformSocketFabrik), Arc::new(EndlosFabrik));
    let state = NodeState::neu(NodeKonfig::default(), manager);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();
    let router = ws::ws_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (state, format!("ws://{adresse}/ws"))
}

/// Simuliert die Chat-Plattform: beide Zugangsdaten-Haelften durchreichen
fn zugangsdaten_liefern(manager: &ControllerManager, bot: BotId, guild: GuildId, kanal: ChannelId) {
    manager.handle_raw(serde_json::json!({
        "t": "VOICE_STATE_UPDATE",
        "d": {
            "guild_id": guild.inner().to_string(),
            "channel_id": kanal.inner().to_string(),
            "user_id": bot.inner().to_string(),
            "session_id": "plattform-sess"
        }
    }));
    manager.handle_raw(serde_json::json!({
        "t": "VOICE_SERVER_UPDATE",
        "d": {
            "guild_id": guild.inner().to_string(),
            "token": "token",
            "endpoint": "voice.example.com"
        }
    }));
}

async fn ereignis_erwarten<F>(
    ereignisse: &mut mpsc::UnboundedReceiver<ControllerEreignis>,
    beschreibung: &str,
    mut passt: F,
) -> ControllerEreignis
where
    F: FnMut(&ControllerEreignis) -> bool,
{
    let frist = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let rest = frist.saturating_duration_since(tokio::time::Instant::now());
        let ereignis = tokio::time::timeout(rest, ereignisse.recv())
            .await
            .unwrap_or_else(|_| panic!("Frist abgelaufen: {beschreibung}"))
            .expect("Ereignis-Kanal offen");
        if passt(&ereignis) {
            return ereignis;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn player_verteilen_sich_auf_die_nodes() {
    let bot = BotId(1);
    let (tx, _rx) = mpsc::unbounded_channel();
    let (manager, _ereignisse) =
        ControllerManager::neu(bot, Arc::new(TestGateway { sendungen: tx }));

    let (_state_a, url_a) = node_starten().await;
    let (_state_b, url_b) = node_starten().await;
    manager.node_hinzufuegen(NodeOptionen::neu("a", url_a)).await.unwrap();
    manager.node_hinzufuegen(NodeOptionen::neu("b", url_b)).await.unwrap();

    let erster = manager.get_player(GuildId(1)).unwrap();
    let zweiter = manager.get_player(GuildId(2)).unwrap();

    // Der zweite Player muss auf dem jeweils anderen Node landen
    assert_ne!(
        erster.node().optionen.name,
        zweiter.node().optionen.name,
        "Best-Node-Wahl muss den kleineren Zaehler nehmen"
    );
    assert_eq!(manager.node("a").unwrap().player_count(), 1);
    assert_eq!(manager.node("b").unwrap().player_count(), 1);

    // get_player ist idempotent
    let nochmal = manager.get_player(GuildId(1)).unwrap();
    assert!(Arc::ptr_eq(&erster, &nochmal));
}

#[tokio::test]
async fn voice_aufbau_und_wiedergabe_ueber_den_node() {
    let bot = BotId(1116414956972290119);
    let guild = GuildId(42);
    let (gateway_tx, mut gateway_rx) = mpsc::unbounded_channel();
    let (manager, mut ereignisse) =
        ControllerManager::neu(bot, Arc::new(TestGateway { sendungen: gateway_tx }));

    let (_state, url) = node_starten().await;
    manager.node_hinzufuegen(NodeOptionen::neu("main", url)).await.unwrap();

    let player = manager.get_player(guild).unwrap();
    player.connect(manager.gateway(), ChannelId(123), false, false);

    // Der Beitritt ging ans Gateway
    assert_eq!(gateway_rx.recv().await, Some((guild, Some(ChannelId(123)))));

    // Die Plattform antwortet mit den Zugangsdaten
    zugangsdaten_liefern(&manager, bot, guild, ChannelId(123));

    ereignis_erwarten(&mut ereignisse, "VoiceConnect", |e| {
        matches!(e, ControllerEreignis::VoiceConnect { guild: g, kanal }
            if *g == guild && *kanal == ChannelId(123))
    })
    .await;

    player.play("http://host/a.mp3", None, Some(75)).unwrap();
    ereignis_erwarten(&mut ereignisse, "TrackStart", |e| {
        matches!(e, ControllerEreignis::TrackStart { guild: g, track }
            if *g == guild && track.url == "http://host/a.mp3")
    })
    .await;
    ereignis_erwarten(&mut ereignisse, "PlayerUpdate(playing)", |e| {
        matches!(e, ControllerEreignis::PlayerUpdate { guild: g, zustand, volume, .. }
            if *g == guild
                && *zustand == linkdave_core::PlayerZustand::Playing
                && *volume == 75)
    })
    .await;
}

#[tokio::test]
async fn drain_migriert_den_player_auf_den_zweiten_node() {
    let bot = BotId(1);
    let guild = GuildId(42);
    let (gateway_tx, _gateway_rx) = mpsc::unbounded_channel();
    let (manager, mut ereignisse) =
        ControllerManager::neu(bot, Arc::new(TestGateway { sendungen: gateway_tx }));

    let (state_a, url_a) = node_starten().await;
    let (state_b, url_b) = node_starten().await;
    manager.node_hinzufuegen(NodeOptionen::neu("a", url_a)).await.unwrap();
    manager.node_hinzufuegen(NodeOptionen::neu("b", url_b)).await.unwrap();

    let player = manager.get_player(guild).unwrap();
    let alter_name = player.node().optionen.name.clone();
    let (alter_state, neuer_name) = if alter_name == "a" {
        (state_a.clone(), "b")
    } else {
        (state_b.clone(), "a")
    };

    zugangsdaten_liefern(&manager, bot, guild, ChannelId(123));
    ereignis_erwarten(&mut ereignisse, "VoiceConnect", |e| {
        matches!(e, ControllerEreignis::VoiceConnect { .. })
    })
    .await;

    player.play("http://host/a.mp3", None, None).unwrap();
    ereignis_erwarten(&mut ereignisse, "TrackStart auf dem alten Node", |e| {
        matches!(e, ControllerEreignis::TrackStart { .. })
    })
    .await;

    let alter_count_vorher = manager.node(&alter_name).unwrap().player_count();
    let neuer_count_vorher = manager.node(neuer_name).unwrap().player_count();

    // Der alte Node draint
    alter_state.drain("wartung", 30_000);

    ereignis_erwarten(&mut ereignisse, "NodeDraining", |e| {
        matches!(e, ControllerEreignis::NodeDraining { node, .. } if *node == alter_name)
    })
    .await;

    // Nach der Migration: VoiceConnect und TrackStart kommen vom neuen Node
    ereignis_erwarten(&mut ereignisse, "VoiceConnect nach Migration", |e| {
        matches!(e, ControllerEreignis::VoiceConnect { guild: g, .. } if *g == guild)
    })
    .await;
    ereignis_erwarten(&mut ereignisse, "TrackStart nach Migration", |e| {
        matches!(e, ControllerEreignis::TrackStart { guild: g, .. } if *g == guild)
    })
    .await;

    assert_eq!(
        player.node().optionen.name,
        neuer_name,
        "Player muss am neuen Node haengen"
    );
    assert_eq!(
        manager.node(&alter_name).unwrap().player_count(),
        alter_count_vorher - 1
    );
    assert_eq!(
        manager.node(neuer_name).unwrap().player_count(),
        neuer_count_vorher + 1
    );
}
