//! Fehlertypen des Node-Servers

use thiserror::Error;

/// Result-Alias fuer Node-Operationen
pub type NodeResult<T> = std::result::Result<T, NodeFehler>;

/// Fehler beim Betrieb des Node-Servers
#[derive(Debug, Error)]
pub enum NodeFehler {
    #[error("Bind auf {0} fehlgeschlagen: {1}")]
    Bind(String, String),

    #[error("Session nicht identifiziert")]
    NichtIdentifiziert,

    #[error(transparent)]
    Voice(#[from] linkdave_voice::VoiceFehler),

    #[error(transparent)]
    Protokoll(#[from] linkdave_protocol::ProtokollFehler),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_fehler_nennt_adresse() {
        let e = NodeFehler::Bind(":8080".into(), "belegt".into());
        assert!(e.to_string().contains(":8080"));
    }
}
