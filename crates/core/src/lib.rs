//! linkdave-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen LinkDave-Crates gemeinsam genutzt werden: ID-Newtypes mit
//! Wire-Serialisierung, Player-Zustaende und der zentrale Fehler-Enum.

pub mod error;
pub mod player;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{LinkDaveError, Result};
pub use player::{PlayerZustand, TrackEndGrund};
pub use types::{BotId, ChannelId, GuildId, SessionId};
