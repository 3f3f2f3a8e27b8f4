//! linkdave-protocol – Wire-Protokoll zwischen Controller und Node
//!
//! Jeder WebSocket-Frame ist ein Text-JSON-Objekt `{"op": <u8>, "d": <objekt|null>}`.
//! Client→Server und Server→Client verwenden getrennte Opcode-Namensraeume.
//!
//! ## Design
//! - Payload-Structs mit serde, IDs als Dezimal-Strings (linkdave-core)
//! - Enums `ClientNachricht` / `ServerNachricht` mit encode/decode
//! - Unbekannte Opcodes und kaputtes JSON liefern `ProtokollFehler`,
//!   der Aufrufer entscheidet ueber warn-und-ignorieren

pub mod nachricht;
pub mod payload;

pub use nachricht::{ClientNachricht, ProtokollFehler, ServerNachricht};
pub use payload::{
    GuildPayload, IdentifyPayload, MigrateReadyPayload, NodeDrainingPayload, PlayPayload,
    PlayerUpdatePayload, ReadyPayload, SeekPayload, StatsData, TrackEndPayload, TrackErrorPayload,
    TrackInfo, TrackStartPayload, VoiceConnectPayload, VoiceDisconnectPayload, VoiceServerEvent,
    VoiceUpdatePayload, VolumePayload,
};
