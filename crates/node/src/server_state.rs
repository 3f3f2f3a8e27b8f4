//! Gemeinsamer Zustand des Node-Servers
//!
//! Haelt Konfiguration, Voice-Manager und die beiden Session-Register
//! (`sessions` nach ID, `sessions_pro_bot` fuer den Event-Fan-out) als
//! Arc-geteilte Struktur. Registriert wird eine Session erst mit dem
//! Identify; der Upgrade-Handler haelt sie bis dahin selbst.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use linkdave_core::{BotId, SessionId};
use linkdave_protocol::{NodeDrainingPayload, ServerNachricht, StatsData};
use linkdave_voice::VoiceManager;

use crate::events::NodeEventHandler;
use crate::session::Session;
use crate::stats::StatsSammler;

/// Konfiguration des Node-Servers
#[derive(Debug, Clone)]
pub struct NodeKonfig {
    /// Bind-Adresse des WebSocket-Listeners
    pub ws_bind: String,
    /// Bind-Adresse des HTTP-Listeners (/health, /stats)
    pub http_bind: String,
    /// Lese-Frist einer Session; wird durch Pongs verlaengert
    pub pong_wait: Duration,
    /// Obergrenze eingehender Nachrichten in Bytes
    pub max_nachricht_bytes: usize,
    /// Schreib-Frist pro ausgehender Nachricht
    pub schreib_frist: Duration,
    /// Intervall des Stats-Broadcasts
    pub stats_intervall: Duration,
    /// Obergrenze fuer den Voice-Verbindungsaufbau
    pub connect_frist: Duration,
}

impl Default for NodeKonfig {
    fn default() -> Self {
        Self {
            ws_bind: "0.0.0.0:8080".into(),
            http_bind: "0.0.0.0:8081".into(),
            pong_wait: Duration::from_secs(60),
            max_nachricht_bytes: 512 * 1024,
            schreib_frist: Duration::from_secs(10),
            stats_intervall: Duration::from_secs(5),
            connect_frist: Duration::from_secs(30),
        }
    }
}

impl NodeKonfig {
    /// Intervall der WS-Pings: `pong_wait * 9 / 10`
    pub fn ping_intervall(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct NodeState {
    /// Server-Konfiguration
    pub konfig: NodeKonfig,
    /// Voice-Verbindungen dieses Nodes
    pub manager: Arc<VoiceManager>,
    /// Sessions nach ID, registriert ab Identify
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Sessions nach Bot-ID fuer den Event-Fan-out
    sessions_pro_bot: DashMap<BotId, Vec<SessionId>>,
    draining: AtomicBool,
    gestartet: Instant,
    stats: StatsSammler,
}

impl NodeState {
    /// Erstellt den Zustand und registriert den Event-Handler am Manager
    pub fn neu(konfig: NodeKonfig, manager: Arc<VoiceManager>) -> Arc<Self> {
        let state = Arc::new(Self {
            konfig,
            manager: manager.clone(),
            sessions: DashMap::new(),
            sessions_pro_bot: DashMap::new(),
            draining: AtomicBool::new(false),
            gestartet: Instant::now(),
            stats: StatsSammler::neu(),
        });
        manager.handler_registrieren(Arc::new(NodeEventHandler::neu(&state)));
        state
    }

    // -----------------------------------------------------------------------
    // Session-Register
    // -----------------------------------------------------------------------

    /// Registriert eine identifizierte Session in beiden Registern
    pub fn session_registrieren(&self, session: &Arc<Session>, bot: BotId) {
        session.bot_setzen(bot);
        self.sessions.insert(session.id, session.clone());
        let mut eintrag = self.sessions_pro_bot.entry(bot).or_default();
        if !eintrag.contains(&session.id) {
            eintrag.push(session.id);
        }
        drop(eintrag);
        tracing::info!(
            session = %session.id,
            bot = %bot,
            client = %session.client_name,
            "Session registriert"
        );
    }

    /// Entfernt eine Session und raeumt ihre Player ab
    ///
    /// Voice-Verbindungen werden nur abgebaut wenn keine andere Session
    /// desselben Bots die Guild noch fuehrt.
    pub async fn session_entfernen(&self, session: &Arc<Session>) {
        if !session.schliessen() {
            return;
        }
        self.sessions.remove(&session.id);

        let Some(bot) = session.bot() else {
            return;
        };

        if let Some(mut eintrag) = self.sessions_pro_bot.get_mut(&bot) {
            eintrag.retain(|id| *id != session.id);
        }
        self.sessions_pro_bot.retain(|_, ids| !ids.is_empty());

        for guild in session.player_guilds() {
            let anderweitig_gefuehrt = self
                .sessions_von_bot(bot)
                .iter()
                .any(|s| s.player(guild).is_some());
            if !anderweitig_gefuehrt {
                self.manager.disconnect(bot, guild);
            }
        }

        tracing::info!(session = %session.id, bot = %bot, "Session entfernt");
    }

    /// Alle registrierten Sessions eines Bots
    pub fn sessions_von_bot(&self, bot: BotId) -> Vec<Arc<Session>> {
        let ids = match self.sessions_pro_bot.get(&bot) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };
        ids.iter()
            .filter_map(|id| self.sessions.get(id).map(|e| e.value().clone()))
            .collect()
    }

    /// Sendet an alle Sessions eines Bots
    pub fn an_bot_senden(&self, bot: BotId, nachricht: ServerNachricht) {
        for session in self.sessions_von_bot(bot) {
            session.senden(nachricht.clone());
        }
    }

    /// Sendet an alle registrierten Sessions
    pub fn an_alle_senden(&self, nachricht: ServerNachricht) -> usize {
        let mut gesendet = 0;
        for eintrag in self.sessions.iter() {
            if eintrag.value().senden(nachricht.clone()) {
                gesendet += 1;
            }
        }
        gesendet
    }

    /// Anzahl registrierter Sessions
    pub fn session_anzahl(&self) -> usize {
        self.sessions.len()
    }

    // -----------------------------------------------------------------------
    // Stats & Drain
    // -----------------------------------------------------------------------

    /// Anzahl der Player ueber alle Sessions
    pub fn player_anzahl(&self) -> usize {
        self.sessions.iter().map(|e| e.value().player_anzahl()).sum()
    }

    /// Anzahl der Player im Zustand playing
    pub fn spielende_tracks(&self) -> usize {
        self.sessions
            .iter()
            .map(|e| e.value().spielende_anzahl())
            .sum()
    }

    /// Uptime des Nodes in Millisekunden
    pub fn uptime_ms(&self) -> u64 {
        self.gestartet.elapsed().as_millis() as u64
    }

    /// Stellt die aktuellen Stats zusammen
    pub fn stats_daten(&self) -> StatsData {
        let (memory_used, memory_alloc, cpu_usage) = self.stats.erfassen();
        StatsData {
            players: self.player_anzahl() as u64,
            playing_tracks: self.spielende_tracks() as u64,
            uptime: self.uptime_ms(),
            memory_used,
            memory_alloc,
            cpu_usage,
            draining: self.ist_draining(),
        }
    }

    /// Ob der Node gerade draint
    pub fn ist_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Startet den Drain: Flag setzen und alle Sessions informieren
    ///
    /// Der aeussere Prozess pollt danach `player_anzahl()` und stoppt die
    /// Listener wenn alle Player migriert sind oder die Frist ablaeuft.
    pub fn drain(&self, grund: &str, frist_ms: u64) {
        if self.draining.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(grund, frist_ms, "Node draint – Controller werden informiert");
        self.an_alle_senden(ServerNachricht::NodeDraining(NodeDrainingPayload {
            reason: grund.to_string(),
            deadline_ms: frist_ms,
        }));
    }
}
