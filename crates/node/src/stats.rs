//! Stats-Erfassung und 5-Sekunden-Broadcast
//!
//! Speicher- und CPU-Werte kommen aus sysinfo (eigener Prozess); der
//! Ticker verteilt den zusammengestellten `StatsData` an alle Sessions.

use std::sync::Arc;

use linkdave_protocol::ServerNachricht;
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, System};

use crate::server_state::NodeState;

/// Sammelt Prozess-Statistiken ueber sysinfo
pub struct StatsSammler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl StatsSammler {
    /// Erstellt den Sammler fuer den eigenen Prozess
    pub fn neu() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Liefert (memory_used, memory_alloc, cpu_usage)
    ///
    /// Bytes fuer beide Speicherwerte, CPU in Prozent. Ohne lesbare
    /// Prozessdaten (z.B. eingeschraenkte Container) bleiben alle Werte 0.
    pub fn erfassen(&self) -> (u64, u64, f64) {
        let Some(pid) = self.pid else {
            return (0, 0, 0.0);
        };
        let mut system = self.system.lock();
        system.refresh_process_specifics(pid, ProcessRefreshKind::new().with_memory().with_cpu());
        match system.process(pid) {
            Some(prozess) => (
                prozess.memory(),
                prozess.virtual_memory(),
                prozess.cpu_usage() as f64,
            ),
            None => (0, 0, 0.0),
        }
    }
}

/// Startet den periodischen Stats-Broadcast
pub fn stats_ticker_starten(state: Arc<NodeState>) -> tokio::task::JoinHandle<()> {
    let intervall = state.konfig.stats_intervall;
    tokio::spawn(async move {
        let mut takt = tokio::time::interval(intervall);
        takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            takt.tick().await;
            let stats = state.stats_daten();
            let empfaenger = state.an_alle_senden(ServerNachricht::Stats(stats));
            tracing::trace!(empfaenger, "Stats verteilt");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erfassen_liefert_prozesswerte() {
        let sammler = StatsSammler::neu();
        let (memory_used, _memory_alloc, cpu) = sammler.erfassen();
        // Der eigene Prozess belegt Speicher; CPU kann direkt nach dem
        // ersten Refresh noch 0 sein
        assert!(memory_used > 0, "Eigener Prozess muss Speicher belegen");
        assert!(cpu >= 0.0);
    }
}
