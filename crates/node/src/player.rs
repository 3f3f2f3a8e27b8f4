//! Node-seitiger Player-Zustand
//!
//! Reine Daten hinter einem Mutex, ein Datensatz pro (Session, Guild).
//! Drei zusammengesetzte Uebergaenge (`set_playing`, `set_paused`,
//! `set_idle`) plus der Migrations-Snapshot. Die Lautstaerke klemmt
//! beim Setzen auf 0..=1000.

use std::time::Instant;

use linkdave_core::{ChannelId, PlayerZustand};
use parking_lot::Mutex;

/// Obergrenze der Lautstaerke
pub const VOLUME_MAX: u16 = 1000;
/// Standard-Lautstaerke
pub const VOLUME_STANDARD: u16 = 100;

struct PlayerDaten {
    zustand: PlayerZustand,
    url: String,
    position_ms: u64,
    volume: u16,
    /// Beginn des aktuellen Playing-Intervalls
    gestartet: Instant,
    kanal: Option<ChannelId>,
}

/// Logischer Player-Zustand einer Guild innerhalb einer Session
pub struct Player {
    daten: Mutex<PlayerDaten>,
}

impl Player {
    /// Erstellt einen Player im Idle-Zustand mit Standard-Lautstaerke
    pub fn neu() -> Self {
        Self {
            daten: Mutex::new(PlayerDaten {
                zustand: PlayerZustand::Idle,
                url: String::new(),
                position_ms: 0,
                volume: VOLUME_STANDARD,
                gestartet: Instant::now(),
                kanal: None,
            }),
        }
    }

    /// Uebergang nach playing: URL, Position und Startzeitpunkt setzen
    pub fn set_playing(&self, url: &str, position_ms: u64) {
        let mut daten = self.daten.lock();
        daten.zustand = PlayerZustand::Playing;
        daten.url = url.to_string();
        daten.position_ms = position_ms;
        daten.gestartet = Instant::now();
    }

    /// Uebergang nach paused mit eingefrorener Position
    pub fn set_paused(&self, position_ms: u64) {
        let mut daten = self.daten.lock();
        daten.zustand = PlayerZustand::Paused;
        daten.position_ms = position_ms;
    }

    /// Uebergang nach idle; URL und Position werden geleert
    pub fn set_idle(&self) {
        let mut daten = self.daten.lock();
        daten.zustand = PlayerZustand::Idle;
        daten.url.clear();
        daten.position_ms = 0;
    }

    /// Setzt die Lautstaerke, geklemmt auf 0..=1000
    pub fn volume_setzen(&self, volume: u16) {
        self.daten.lock().volume = volume.min(VOLUME_MAX);
    }

    /// Aktuelle Lautstaerke
    pub fn volume(&self) -> u16 {
        self.daten.lock().volume
    }

    /// Aktueller Zustand
    pub fn zustand(&self) -> PlayerZustand {
        self.daten.lock().zustand
    }

    /// Aktuelle Track-URL (leer im Idle-Zustand)
    pub fn url(&self) -> String {
        self.daten.lock().url.clone()
    }

    /// Zuletzt bekannte Position in ms
    pub fn position_ms(&self) -> u64 {
        self.daten.lock().position_ms
    }

    /// Setzt die zuletzt bekannte Position
    pub fn position_setzen(&self, position_ms: u64) {
        self.daten.lock().position_ms = position_ms;
    }

    /// Merkt sich den aktuellen Voice-Channel
    pub fn kanal_setzen(&self, kanal: ChannelId) {
        self.daten.lock().kanal = Some(kanal);
    }

    /// Aktueller Voice-Channel, falls verbunden
    pub fn kanal(&self) -> Option<ChannelId> {
        self.daten.lock().kanal
    }

    /// Snapshot fuer die Migration: (URL, Position, Lautstaerke, Zustand)
    ///
    /// Die Position laeuft nur im Playing-Zustand live weiter
    /// (`position + (jetzt - gestartet)`); pausiert bleibt sie eingefroren.
    pub fn migrate_snapshot(&self) -> (String, u64, u16, PlayerZustand) {
        let daten = self.daten.lock();
        let position = match daten.zustand {
            PlayerZustand::Playing => {
                daten.position_ms + daten.gestartet.elapsed().as_millis() as u64
            }
            _ => daten.position_ms,
        };
        (daten.url.clone(), position, daten.volume, daten.zustand)
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::neu()
    }
}
