//! linkdave-voice – Voice-Verbindungen und Frame-Transport
//!
//! Drei Schichten:
//! - `socket`: die Schnittstelle zum Voice-Transport der Chat-Plattform
//!   (Handshake aus zwei Zugangsdaten-Haelften, 20-ms-Pull-Takt)
//! - `connection`: eine Verbindung pro (Bot, Guild) mit Quelle, Pause-Flag
//!   und dem Exactly-once-Vertrag fuer das terminale Track-End-Ereignis
//! - `manager`: der Index ueber alle Verbindungen plus Event-Fan-out an den
//!   registrierten Handler

pub mod connection;
pub mod error;
pub mod manager;
pub mod socket;

pub use connection::VoiceConnection;
pub use error::{VoiceFehler, VoiceResult};
pub use manager::{EventHandler, VoiceManager};
pub use socket::{
    OpusFrameProvider, PlattformSocket, PlattformSocketFabrik, SocketFabrik, VoiceSocket,
};
