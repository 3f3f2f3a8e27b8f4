//! Fehlertypen fuer LinkDave
//!
//! Zentraler Fehler-Enum der alle Fehlerzustaende abdeckt, die ueber
//! Crate-Grenzen wandern. Untermodule definieren eigene Fehler und
//! konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer LinkDave
pub type Result<T> = std::result::Result<T, LinkDaveError>;

/// Alle crate-uebergreifenden Fehler im LinkDave-System
#[derive(Debug, Error)]
pub enum LinkDaveError {
    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    #[error("Unbekannter Opcode: {0}")]
    UnbekannterOpcode(u8),

    // --- Ressourcen ---
    #[error("Keine Voice-Verbindung fuer Guild {0}")]
    KeineVerbindung(String),

    #[error("Kein verfuegbarer Node")]
    KeinNode,

    // --- Audio ---
    #[error("Audiofehler: {0}")]
    Audio(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl LinkDaveError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Zeitlimit(_) | Self::Verbindung(_) | Self::Getrennt(_)
        )
    }
}
