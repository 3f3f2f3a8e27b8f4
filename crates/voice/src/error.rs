//! Fehlertypen der Voice-Schicht

use thiserror::Error;

/// Result-Alias fuer Voice-Operationen
pub type VoiceResult<T> = std::result::Result<T, VoiceFehler>;

/// Fehler rund um Voice-Sockets und Verbindungen
#[derive(Debug, Error)]
pub enum VoiceFehler {
    #[error("Voice-Handshake fehlgeschlagen: {0}")]
    Handshake(String),

    #[error("Zeitlimit beim Voice-Verbindungsaufbau")]
    Zeitlimit,

    #[error("Keine Voice-Verbindung fuer Guild {0}")]
    KeineVerbindung(String),

    #[error("Keine aktive Quelle")]
    KeineQuelle,

    #[error("Voice-Socket ist geschlossen")]
    SocketGeschlossen,

    #[error(transparent)]
    Audio(#[from] linkdave_audio::AudioFehler),
}

impl From<VoiceFehler> for linkdave_core::LinkDaveError {
    fn from(fehler: VoiceFehler) -> Self {
        match fehler {
            VoiceFehler::Zeitlimit => Self::Zeitlimit("Voice-Verbindungsaufbau".into()),
            VoiceFehler::KeineVerbindung(guild) => Self::KeineVerbindung(guild),
            andere => Self::Verbindung(andere.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = VoiceFehler::KeineQuelle;
        assert_eq!(e.to_string(), "Keine aktive Quelle");
    }

    #[test]
    fn audio_fehler_transparent() {
        let e: VoiceFehler = linkdave_audio::AudioFehler::HttpStatus(403).into();
        assert!(e.to_string().contains("403"));
    }
}
