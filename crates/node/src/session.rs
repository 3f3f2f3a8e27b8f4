//! Session – eine WebSocket-Verbindung eines Controllers
//!
//! Jede Session haelt ihre begrenzte Sende-Queue und ihre Player-Datensaetze
//! pro Guild. Die Queue wird nicht-blockierend befuellt: ist sie voll, wird
//! die Nachricht verworfen und gewarnt – der Produzent blockiert nie.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use linkdave_core::{BotId, GuildId, PlayerZustand, SessionId};
use linkdave_protocol::ServerNachricht;
use tokio::sync::mpsc;

use crate::player::Player;

/// Groesse der Sende-Queue pro Session (Nachrichten)
pub const SENDE_QUEUE_GROESSE: usize = 256;

/// Eine Controller-Session auf diesem Node
pub struct Session {
    /// Vom Node beim Upgrade vergebene ID
    pub id: SessionId,
    /// Inhalt des Client-Name-Headers beim Upgrade
    pub client_name: String,
    bot: parking_lot::RwLock<Option<BotId>>,
    sende_tx: mpsc::Sender<ServerNachricht>,
    players: DashMap<GuildId, Arc<Player>>,
    geschlossen: AtomicBool,
}

impl Session {
    /// Erstellt die Session samt Empfangsseite fuer die Schreib-Pumpe
    pub fn neu(client_name: String) -> (Arc<Self>, mpsc::Receiver<ServerNachricht>) {
        let (sende_tx, sende_rx) = mpsc::channel(SENDE_QUEUE_GROESSE);
        let session = Arc::new(Self {
            id: SessionId::new(),
            client_name,
            bot: parking_lot::RwLock::new(None),
            sende_tx,
            players: DashMap::new(),
            geschlossen: AtomicBool::new(false),
        });
        (session, sende_rx)
    }

    /// Reiht eine Nachricht nicht-blockierend ein
    ///
    /// Bei voller Queue wird verworfen und gewarnt; der Aufrufer blockiert
    /// nie. Gibt `true` zurueck wenn die Nachricht eingereiht wurde.
    pub fn senden(&self, nachricht: ServerNachricht) -> bool {
        match self.sende_tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session = %self.id, "Sende-Queue voll – Nachricht verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(session = %self.id, "Sende-Queue geschlossen (Session getrennt)");
                false
            }
        }
    }

    /// Setzt die Bot-ID (Identify)
    pub fn bot_setzen(&self, bot: BotId) {
        *self.bot.write() = Some(bot);
    }

    /// Bot-ID falls identifiziert
    pub fn bot(&self) -> Option<BotId> {
        *self.bot.read()
    }

    /// Holt den Player einer Guild oder legt ihn an
    pub fn player_holen_oder_erstellen(&self, guild: GuildId) -> Arc<Player> {
        self.players
            .entry(guild)
            .or_insert_with(|| Arc::new(Player::neu()))
            .clone()
    }

    /// Player einer Guild, falls vorhanden
    pub fn player(&self, guild: GuildId) -> Option<Arc<Player>> {
        self.players.get(&guild).map(|e| e.value().clone())
    }

    /// Entfernt den Player einer Guild
    pub fn player_entfernen(&self, guild: GuildId) {
        self.players.remove(&guild);
    }

    /// Alle Guild-IDs mit Player-Datensatz
    pub fn player_guilds(&self) -> Vec<GuildId> {
        self.players.iter().map(|e| *e.key()).collect()
    }

    /// Anzahl der Player dieser Session
    pub fn player_anzahl(&self) -> usize {
        self.players.len()
    }

    /// Anzahl der Player im Zustand playing
    pub fn spielende_anzahl(&self) -> usize {
        self.players
            .iter()
            .filter(|e| e.value().zustand() == PlayerZustand::Playing)
            .count()
    }

    /// Markiert die Session als geschlossen; idempotent
    pub fn schliessen(&self) -> bool {
        !self.geschlossen.swap(true, Ordering::AcqRel)
    }

    /// Ob die Session geschlossen wurde
    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volle_queue_verwirft_statt_zu_blockieren() {
        let (session, mut rx) = Session::neu("test".into());

        // Queue bis zum Rand fuellen
        for _ in 0..SENDE_QUEUE_GROESSE {
            assert!(session.senden(ServerNachricht::Pong));
        }
        // Die naechste Nachricht wird verworfen, der Aufruf kehrt sofort zurueck
        assert!(!session.senden(ServerNachricht::Pong));

        // Queue leeren: genau SENDE_QUEUE_GROESSE Nachrichten angekommen
        let mut anzahl = 0;
        while rx.try_recv().is_ok() {
            anzahl += 1;
        }
        assert_eq!(anzahl, SENDE_QUEUE_GROESSE);
    }

    #[test]
    fn player_wird_lazy_angelegt() {
        let (session, _rx) = Session::neu("test".into());
        let guild = GuildId(7);

        assert!(session.player(guild).is_none());
        let player = session.player_holen_oder_erstellen(guild);
        let nochmal = session.player_holen_oder_erstellen(guild);
        assert!(Arc::ptr_eq(&player, &nochmal), "Gleiche Guild, gleicher Player");
        assert_eq!(session.player_anzahl(), 1);

        session.player_entfernen(guild);
        assert!(session.player(guild).is_none());
    }

    #[test]
    fn spielende_anzahl_zaehlt_nur_playing() {
        let (session, _rx) = Session::neu("test".into());
        session
            .player_holen_oder_erstellen(GuildId(1))
            .set_playing("http://host/a.mp3", 0);
        session.player_holen_oder_erstellen(GuildId(2)).set_paused(100);

        assert_eq!(session.player_anzahl(), 2);
        assert_eq!(session.spielende_anzahl(), 1);
    }

    #[test]
    fn schliessen_ist_idempotent() {
        let (session, _rx) = Session::neu("test".into());
        assert!(session.schliessen());
        assert!(!session.schliessen());
        assert!(session.ist_geschlossen());
    }
}
