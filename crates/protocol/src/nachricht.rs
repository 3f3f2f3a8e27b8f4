//! Frame-Rahmen und Opcode-Dispatch
//!
//! Der Rahmen ist `{"op": <u8>, "d": <objekt|null>}`. Client→Server und
//! Server→Client belegen getrennte Opcode-Raeume 0..=10.
//!
//! ## Opcodes Client → Server
//! 0 Identify, 1 VoiceUpdate, 2 Play, 3 Pause, 4 Resume, 5 Stop,
//! 6 Seek, 7 Disconnect, 8 Ping, 9 Volume, 10 PlayerMigrate
//!
//! ## Opcodes Server → Client
//! 0 Ready, 1 PlayerUpdate, 2 TrackStart, 3 TrackEnd, 4 TrackError,
//! 5 VoiceConnect, 6 VoiceDisconnect, 7 Pong, 8 Stats, 9 NodeDraining,
//! 10 MigrateReady

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::payload::*;

/// Fehler beim Kodieren/Dekodieren eines Frames
#[derive(Debug, Error)]
pub enum ProtokollFehler {
    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unbekannter Opcode: {0}")]
    UnbekannterOpcode(u8),
}

/// Roh-Rahmen wie er auf dem Draht liegt
#[derive(Debug, Serialize, Deserialize)]
struct Rahmen {
    op: u8,
    #[serde(default)]
    d: Value,
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Alle Nachrichten die ein Controller an einen Node sendet
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNachricht {
    Identify(IdentifyPayload),
    VoiceUpdate(VoiceUpdatePayload),
    Play(PlayPayload),
    Pause(GuildPayload),
    Resume(GuildPayload),
    Stop(GuildPayload),
    Seek(SeekPayload),
    Disconnect(GuildPayload),
    Ping,
    Volume(VolumePayload),
    PlayerMigrate(GuildPayload),
}

impl ClientNachricht {
    /// Gibt den Opcode dieser Nachricht zurueck
    pub fn op(&self) -> u8 {
        match self {
            Self::Identify(_) => 0,
            Self::VoiceUpdate(_) => 1,
            Self::Play(_) => 2,
            Self::Pause(_) => 3,
            Self::Resume(_) => 4,
            Self::Stop(_) => 5,
            Self::Seek(_) => 6,
            Self::Disconnect(_) => 7,
            Self::Ping => 8,
            Self::Volume(_) => 9,
            Self::PlayerMigrate(_) => 10,
        }
    }

    /// Serialisiert die Nachricht als Text-Frame
    pub fn encode(&self) -> Result<String, ProtokollFehler> {
        let d = match self {
            Self::Identify(p) => serde_json::to_value(p)?,
            Self::VoiceUpdate(p) => serde_json::to_value(p)?,
            Self::Play(p) => serde_json::to_value(p)?,
            Self::Pause(p)
            | Self::Resume(p)
            | Self::Stop(p)
            | Self::Disconnect(p)
            | Self::PlayerMigrate(p) => serde_json::to_value(p)?,
            Self::Seek(p) => serde_json::to_value(p)?,
            Self::Volume(p) => serde_json::to_value(p)?,
            Self::Ping => Value::Null,
        };
        Ok(serde_json::to_string(&Rahmen { op: self.op(), d })?)
    }

    /// Dekodiert einen Text-Frame
    pub fn decode(text: &str) -> Result<Self, ProtokollFehler> {
        let rahmen: Rahmen = serde_json::from_str(text)?;
        let nachricht = match rahmen.op {
            0 => Self::Identify(serde_json::from_value(rahmen.d)?),
            1 => Self::VoiceUpdate(serde_json::from_value(rahmen.d)?),
            2 => Self::Play(serde_json::from_value(rahmen.d)?),
            3 => Self::Pause(serde_json::from_value(rahmen.d)?),
            4 => Self::Resume(serde_json::from_value(rahmen.d)?),
            5 => Self::Stop(serde_json::from_value(rahmen.d)?),
            6 => Self::Seek(serde_json::from_value(rahmen.d)?),
            7 => Self::Disconnect(serde_json::from_value(rahmen.d)?),
            8 => Self::Ping,
            9 => Self::Volume(serde_json::from_value(rahmen.d)?),
            10 => Self::PlayerMigrate(serde_json::from_value(rahmen.d)?),
            op => return Err(ProtokollFehler::UnbekannterOpcode(op)),
        };
        Ok(nachricht)
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// Alle Nachrichten die ein Node an einen Controller sendet
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNachricht {
    Ready(ReadyPayload),
    PlayerUpdate(PlayerUpdatePayload),
    TrackStart(TrackStartPayload),
    TrackEnd(TrackEndPayload),
    TrackError(TrackErrorPayload),
    VoiceConnect(VoiceConnectPayload),
    VoiceDisconnect(VoiceDisconnectPayload),
    Pong,
    Stats(StatsData),
    NodeDraining(NodeDrainingPayload),
    MigrateReady(MigrateReadyPayload),
}

impl ServerNachricht {
    /// Gibt den Opcode dieser Nachricht zurueck
    pub fn op(&self) -> u8 {
        match self {
            Self::Ready(_) => 0,
            Self::PlayerUpdate(_) => 1,
            Self::TrackStart(_) => 2,
            Self::TrackEnd(_) => 3,
            Self::TrackError(_) => 4,
            Self::VoiceConnect(_) => 5,
            Self::VoiceDisconnect(_) => 6,
            Self::Pong => 7,
            Self::Stats(_) => 8,
            Self::NodeDraining(_) => 9,
            Self::MigrateReady(_) => 10,
        }
    }

    /// Serialisiert die Nachricht als Text-Frame
    pub fn encode(&self) -> Result<String, ProtokollFehler> {
        let d = match self {
            Self::Ready(p) => serde_json::to_value(p)?,
            Self::PlayerUpdate(p) => serde_json::to_value(p)?,
            Self::TrackStart(p) => serde_json::to_value(p)?,
            Self::TrackEnd(p) => serde_json::to_value(p)?,
            Self::TrackError(p) => serde_json::to_value(p)?,
            Self::VoiceConnect(p) => serde_json::to_value(p)?,
            Self::VoiceDisconnect(p) => serde_json::to_value(p)?,
            Self::Pong => Value::Null,
            Self::Stats(p) => serde_json::to_value(p)?,
            Self::NodeDraining(p) => serde_json::to_value(p)?,
            Self::MigrateReady(p) => serde_json::to_value(p)?,
        };
        Ok(serde_json::to_string(&Rahmen { op: self.op(), d })?)
    }

    /// Dekodiert einen Text-Frame
    pub fn decode(text: &str) -> Result<Self, ProtokollFehler> {
        let rahmen: Rahmen = serde_json::from_str(text)?;
        let nachricht = match rahmen.op {
            0 => Self::Ready(serde_json::from_value(rahmen.d)?),
            1 => Self::PlayerUpdate(serde_json::from_value(rahmen.d)?),
            2 => Self::TrackStart(serde_json::from_value(rahmen.d)?),
            3 => Self::TrackEnd(serde_json::from_value(rahmen.d)?),
            4 => Self::TrackError(serde_json::from_value(rahmen.d)?),
            5 => Self::VoiceConnect(serde_json::from_value(rahmen.d)?),
            6 => Self::VoiceDisconnect(serde_json::from_value(rahmen.d)?),
            7 => Self::Pong,
            8 => Self::Stats(serde_json::from_value(rahmen.d)?),
            9 => Self::NodeDraining(serde_json::from_value(rahmen.d)?),
            10 => Self::MigrateReady(serde_json::from_value(rahmen.d)?),
            op => return Err(ProtokollFehler::UnbekannterOpcode(op)),
        };
        Ok(nachricht)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkdave_core::{BotId, ChannelId, GuildId, PlayerZustand, TrackEndGrund};

    #[test]
    fn identify_encode() {
        let n = ClientNachricht::Identify(IdentifyPayload {
            bot_id: BotId(1116414956972290119),
        });
        let text = n.encode().unwrap();
        assert_eq!(
            text,
            r#"{"op":0,"d":{"bot_id":"1116414956972290119"}}"#
        );
    }

    #[test]
    fn ping_hat_null_daten() {
        let text = ClientNachricht::Ping.encode().unwrap();
        assert_eq!(text, r#"{"op":8,"d":null}"#);
        assert_eq!(ClientNachricht::decode(&text).unwrap(), ClientNachricht::Ping);
    }

    #[test]
    fn ready_roundtrip() {
        let n = ServerNachricht::Ready(ReadyPayload {
            session_id: "3c1f7a6e-0000-0000-0000-000000000000".into(),
            resumed: false,
        });
        let text = n.encode().unwrap();
        assert!(text.starts_with(r#"{"op":0,"#));
        assert_eq!(ServerNachricht::decode(&text).unwrap(), n);
    }

    #[test]
    fn alle_client_opcodes_eindeutig() {
        let guild = GuildPayload { guild_id: GuildId(1) };
        let nachrichten = vec![
            ClientNachricht::Identify(IdentifyPayload { bot_id: BotId(1) }),
            ClientNachricht::VoiceUpdate(VoiceUpdatePayload {
                guild_id: GuildId(1),
                channel_id: ChannelId(2),
                session_id: "s".into(),
                event: VoiceServerEvent {
                    token: "t".into(),
                    guild_id: GuildId(1),
                    endpoint: Some("voice.example.com".into()),
                },
            }),
            ClientNachricht::Play(PlayPayload {
                guild_id: GuildId(1),
                url: "http://host/a.mp3".into(),
                start_time: Some(1000),
                volume: Some(75),
            }),
            ClientNachricht::Pause(guild),
            ClientNachricht::Resume(guild),
            ClientNachricht::Stop(guild),
            ClientNachricht::Seek(SeekPayload {
                guild_id: GuildId(1),
                position: 5000,
            }),
            ClientNachricht::Disconnect(guild),
            ClientNachricht::Ping,
            ClientNachricht::Volume(VolumePayload {
                guild_id: GuildId(1),
                volume: 100,
            }),
            ClientNachricht::PlayerMigrate(guild),
        ];

        for (erwartet, nachricht) in nachrichten.into_iter().enumerate() {
            assert_eq!(nachricht.op() as usize, erwartet);
            let text = nachricht.encode().unwrap();
            let zurueck = ClientNachricht::decode(&text).unwrap();
            assert_eq!(zurueck, nachricht, "Opcode {erwartet} muss roundtrippen");
        }
    }

    #[test]
    fn server_nachrichten_roundtrip() {
        let track = TrackInfo::aus_url("http://host/a.mp3");
        let nachrichten = vec![
            ServerNachricht::PlayerUpdate(PlayerUpdatePayload {
                guild_id: GuildId(1),
                state: PlayerZustand::Playing,
                position: 40,
                volume: 100,
            }),
            ServerNachricht::TrackStart(TrackStartPayload {
                guild_id: GuildId(1),
                track: track.clone(),
            }),
            ServerNachricht::TrackEnd(TrackEndPayload {
                guild_id: GuildId(1),
                track: track.clone(),
                reason: TrackEndGrund::Stopped,
            }),
            ServerNachricht::TrackError(TrackErrorPayload {
                guild_id: GuildId(1),
                track,
                error: "HTTP 404".into(),
            }),
            ServerNachricht::VoiceConnect(VoiceConnectPayload {
                guild_id: GuildId(1),
                channel_id: ChannelId(123),
            }),
            ServerNachricht::VoiceDisconnect(VoiceDisconnectPayload {
                guild_id: GuildId(1),
                reason: Some("requested".into()),
            }),
            ServerNachricht::Pong,
            ServerNachricht::Stats(StatsData::default()),
            ServerNachricht::NodeDraining(NodeDrainingPayload {
                reason: "shutdown".into(),
                deadline_ms: 30_000,
            }),
            ServerNachricht::MigrateReady(MigrateReadyPayload {
                guild_id: GuildId(1),
                url: "http://host/a.mp3".into(),
                position: 12_340,
                volume: 75,
                state: PlayerZustand::Playing,
            }),
        ];

        for nachricht in nachrichten {
            let text = nachricht.encode().unwrap();
            assert_eq!(ServerNachricht::decode(&text).unwrap(), nachricht);
        }
    }

    #[test]
    fn unbekannter_opcode() {
        let fehler = ClientNachricht::decode(r#"{"op":99,"d":null}"#).unwrap_err();
        assert!(matches!(fehler, ProtokollFehler::UnbekannterOpcode(99)));
    }

    #[test]
    fn kaputtes_json_ist_fehler() {
        assert!(ClientNachricht::decode("{op:").is_err());
        assert!(ServerNachricht::decode("nicht json").is_err());
    }

    #[test]
    fn fehlendes_d_feld_wird_null() {
        // Rahmen ohne "d" – fuer Ping/Pong zulaessig
        assert_eq!(
            ClientNachricht::decode(r#"{"op":8}"#).unwrap(),
            ClientNachricht::Ping
        );
    }
}
