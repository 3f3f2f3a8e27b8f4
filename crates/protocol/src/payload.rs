//! Payload-Definitionen des Wire-Protokolls
//!
//! Alle Nachrichten-Inhalte die im `d`-Feld eines Frames stehen.
//! Guild-bezogene Kommandos ohne weitere Felder (Pause, Resume, Stop,
//! Disconnect, PlayerMigrate) teilen sich `GuildPayload`.

use linkdave_core::{BotId, ChannelId, GuildId, PlayerZustand, TrackEndGrund};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Identify – erster Frame nach dem Verbindungsaufbau
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub bot_id: BotId,
}

/// Voice-Server-Haelfte der Zugangsdaten (von der Chat-Plattform ausgestellt)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceServerEvent {
    pub token: String,
    pub guild_id: GuildId,
    /// Null wenn die Plattform den Endpoint noch rotiert
    pub endpoint: Option<String>,
}

/// VoiceUpdate – vollstaendiger Zugangsdaten-Satz fuer einen Channel-Beitritt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceUpdatePayload {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub session_id: String,
    pub event: VoiceServerEvent,
}

/// Play – Track-URL abspielen, optional mit Startversatz und Lautstaerke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayPayload {
    pub guild_id: GuildId,
    pub url: String,
    /// Startversatz in Millisekunden
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    /// Lautstaerke 0..=1000 (0 = nicht gesetzt)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
}

/// Kommandos die nur eine Guild referenzieren
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuildPayload {
    pub guild_id: GuildId,
}

/// Seek – Position in Millisekunden
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeekPayload {
    pub guild_id: GuildId,
    pub position: u64,
}

/// Volume – Lautstaerke 0..=1000
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumePayload {
    pub guild_id: GuildId,
    pub volume: u16,
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// Ready – Antwort auf Identify
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub session_id: String,
    pub resumed: bool,
}

/// PlayerUpdate – Zustands-Snapshot eines Players
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerUpdatePayload {
    pub guild_id: GuildId,
    pub state: PlayerZustand,
    pub position: u64,
    pub volume: u16,
}

/// Track-Metadaten
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Spieldauer in ms, 0/None wenn unbekannt (HTTP-Streams)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl TrackInfo {
    /// Track-Info nur aus einer URL (Streams ohne Metadaten)
    pub fn aus_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            duration: None,
        }
    }
}

/// TrackStart – Wiedergabe hat begonnen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackStartPayload {
    pub guild_id: GuildId,
    pub track: TrackInfo,
}

/// TrackEnd – terminales Ereignis einer Quelle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEndPayload {
    pub guild_id: GuildId,
    pub track: TrackInfo,
    pub reason: TrackEndGrund,
}

/// TrackError – Fehler beim Aufbau oder mitten in der Wiedergabe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackErrorPayload {
    pub guild_id: GuildId,
    pub track: TrackInfo,
    pub error: String,
}

/// VoiceConnect – Voice-Socket steht
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceConnectPayload {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

/// VoiceDisconnect – Voice-Socket abgebaut
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceDisconnectPayload {
    pub guild_id: GuildId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Stats – periodischer Node-Zustand fuer die Best-Node-Wahl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatsData {
    /// Anzahl registrierter Player ueber alle Sessions
    pub players: u64,
    /// Player im Zustand playing
    pub playing_tracks: u64,
    /// Uptime in Millisekunden
    pub uptime: u64,
    /// Belegter Prozess-Speicher in Bytes
    pub memory_used: u64,
    /// Virtuell reservierter Speicher in Bytes
    pub memory_alloc: u64,
    /// CPU-Auslastung des Prozesses in Prozent
    pub cpu_usage: f64,
    /// Node nimmt keine neuen Player mehr an
    pub draining: bool,
}

/// NodeDraining – Aufforderung an Controller, Player zu migrieren
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDrainingPayload {
    pub reason: String,
    pub deadline_ms: u64,
}

/// MigrateReady – Snapshot fuer die Uebernahme durch einen anderen Node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrateReadyPayload {
    pub guild_id: GuildId,
    pub url: String,
    pub position: u64,
    pub volume: u16,
    pub state: PlayerZustand,
}
