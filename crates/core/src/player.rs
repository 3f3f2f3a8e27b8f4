//! Player-Zustaende und Track-End-Gruende
//!
//! Beide Enums wandern ueber den Draht (Klein-Schreibung) und werden von
//! Node und Controller gemeinsam genutzt.

use serde::{Deserialize, Serialize};

/// Logischer Zustand eines Players
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayerZustand {
    /// Kein Track installiert
    #[default]
    Idle,
    /// Quelle installiert und nicht pausiert
    Playing,
    /// Quelle installiert, Wiedergabe angehalten
    Paused,
}

impl std::fmt::Display for PlayerZustand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Paused => "paused",
        };
        write!(f, "{s}")
    }
}

/// Grund fuer das terminale TrackEnd-Ereignis einer Quelle
///
/// Jede installierte Quelle erzeugt genau ein terminales Ereignis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackEndGrund {
    /// Quelle lieferte EOF
    Finished,
    /// Stop-Kommando des Controllers
    Stopped,
    /// Play-Kommando hat die Quelle ersetzt
    Replaced,
    /// Lese-/Decode-/Encode-Fehler mitten in der Wiedergabe
    Error,
    /// Session-Abbau mit noch installierter Quelle
    Cleanup,
}

impl std::fmt::Display for TrackEndGrund {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Finished => "finished",
            Self::Stopped => "stopped",
            Self::Replaced => "replaced",
            Self::Error => "error",
            Self::Cleanup => "cleanup",
        };
        write!(f, "{s}")
    }
}
