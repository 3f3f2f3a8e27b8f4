//! Fehlertypen der Controller-Bibliothek

use thiserror::Error;

/// Result-Alias fuer Controller-Operationen
pub type ControllerResult<T> = std::result::Result<T, ControllerFehler>;

/// Fehler auf der Controller-Seite
#[derive(Debug, Error)]
pub enum ControllerFehler {
    #[error("Node {0} ist nicht verbunden")]
    NichtVerbunden(String),

    #[error("Kein verfuegbarer Node")]
    KeinNode,

    #[error("WebSocket-Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Migration fehlgeschlagen: {0}")]
    MigrationFehlgeschlagen(String),

    #[error("Voice-Zugangsdaten unvollstaendig: {0}")]
    ZugangsdatenUnvollstaendig(String),

    #[error(transparent)]
    Protokoll(#[from] linkdave_protocol::ProtokollFehler),
}

impl From<ControllerFehler> for linkdave_core::LinkDaveError {
    fn from(fehler: ControllerFehler) -> Self {
        match fehler {
            ControllerFehler::KeinNode => Self::KeinNode,
            andere => Self::Verbindung(andere.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = ControllerFehler::NichtVerbunden("main".into());
        assert_eq!(e.to_string(), "Node main ist nicht verbunden");
    }
}
