//! Event-Handler des Node-Servers
//!
//! Uebersetzt Voice-Ereignisse in Wire-Nachrichten und verteilt sie an
//! alle Sessions des betroffenen Bots. Controller mit geshardetem Gateway
//! duerfen mehrere Sessions pro Bot halten; der Fan-out ist Absicht.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use linkdave_audio::AudioQuelle;
use linkdave_core::{BotId, GuildId, TrackEndGrund};
use linkdave_protocol::{
    ServerNachricht, TrackEndPayload, TrackErrorPayload, TrackInfo, VoiceDisconnectPayload,
};
use linkdave_voice::EventHandler;

use crate::server_state::NodeState;

/// Fan-out-Handler, vom `NodeState` am Voice-Manager registriert
pub struct NodeEventHandler {
    state: Weak<NodeState>,
}

impl NodeEventHandler {
    pub fn neu(state: &Arc<NodeState>) -> Self {
        Self {
            state: Arc::downgrade(state),
        }
    }

    fn track_info(quelle: &Arc<dyn AudioQuelle>) -> TrackInfo {
        let dauer = quelle.dauer_ms();
        TrackInfo {
            url: quelle.url().to_string(),
            title: None,
            duration: (dauer > 0).then_some(dauer),
        }
    }
}

#[async_trait]
impl EventHandler for NodeEventHandler {
    async fn on_track_end(
        &self,
        bot: BotId,
        guild: GuildId,
        quelle: Arc<dyn AudioQuelle>,
        grund: TrackEndGrund,
    ) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let track = Self::track_info(&quelle);

        for session in state.sessions_von_bot(bot) {
            let Some(player) = session.player(guild) else {
                continue;
            };
            // replaced/stopped haben ihren Zustand schon im Kommando-Handler
            // gesetzt; alle anderen Gruende setzen den Player auf idle
            if !matches!(grund, TrackEndGrund::Replaced | TrackEndGrund::Stopped) {
                player.set_idle();
            }
            session.senden(ServerNachricht::TrackEnd(TrackEndPayload {
                guild_id: guild,
                track: track.clone(),
                reason: grund,
            }));
        }
    }

    async fn on_track_exception(
        &self,
        bot: BotId,
        guild: GuildId,
        quelle: Arc<dyn AudioQuelle>,
        fehler: String,
    ) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let track = Self::track_info(&quelle);

        for session in state.sessions_von_bot(bot) {
            if session.player(guild).is_none() {
                continue;
            }
            session.senden(ServerNachricht::TrackError(TrackErrorPayload {
                guild_id: guild,
                track: track.clone(),
                error: fehler.clone(),
            }));
        }
    }

    async fn on_voice_disconnected(&self, bot: BotId, guild: GuildId) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        for session in state.sessions_von_bot(bot) {
            session.player_entfernen(guild);
            session.senden(ServerNachricht::VoiceDisconnect(VoiceDisconnectPayload {
                guild_id: guild,
                reason: Some("connection_lost".into()),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::{NodeKonfig, NodeState};
    use crate::session::Session;
    use bytes::Bytes;
    use linkdave_audio::{AudioFehler, AudioResult, HttpQuellenFabrik};
    use linkdave_voice::{PlattformSocketFabrik, VoiceManager};

    #[derive(Debug)]
    struct LeereQuelle;

    #[async_trait]
    impl AudioQuelle for LeereQuelle {
        async fn next_opus_frame(&self) -> AudioResult<Option<Bytes>> {
            Ok(None)
        }
        async fn schliessen(&self) {}
        fn position_ms(&self) -> u64 {
            4000
        }
        async fn seek(&self, _ms: u64) -> AudioResult<()> {
            Err(AudioFehler::SeekNichtUnterstuetzt)
        }
        fn dauer_ms(&self) -> u64 {
            0
        }
        fn kann_seek(&self) -> bool {
            false
        }
        fn url(&self) -> &str {
            "http://host/a.mp3"
        }
    }

    fn test_state() -> Arc<NodeState> {
        let manager = VoiceManager::neu(
            Arc::new(PlattformSocketFabrik),
            Arc::new(HttpQuellenFabrik::neu(true, true)),
        );
        NodeState::neu(NodeKonfig::default(), manager)
    }

    #[tokio::test]
    async fn track_end_fan_out_an_beide_sessions() {
        let state = test_state();
        let bot = BotId(1);
        let guild = GuildId(2);

        let (a, mut rx_a) = Session::neu("a".into());
        let (b, mut rx_b) = Session::neu("b".into());
        state.session_registrieren(&a, bot);
        state.session_registrieren(&b, bot);
        a.player_holen_oder_erstellen(guild)
            .set_playing("http://host/a.mp3", 0);
        b.player_holen_oder_erstellen(guild)
            .set_playing("http://host/a.mp3", 0);

        let handler = NodeEventHandler::neu(&state);
        let quelle: Arc<dyn AudioQuelle> = Arc::new(LeereQuelle);
        handler
            .on_track_end(bot, guild, quelle, TrackEndGrund::Finished)
            .await;

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                ServerNachricht::TrackEnd(p) => {
                    assert_eq!(p.reason, TrackEndGrund::Finished);
                    assert_eq!(p.track.url, "http://host/a.mp3");
                }
                andere => panic!("TrackEnd erwartet, bekam {andere:?}"),
            }
        }
        // finished setzt beide Player auf idle
        assert_eq!(
            a.player(guild).unwrap().zustand(),
            linkdave_core::PlayerZustand::Idle
        );
    }

    #[tokio::test]
    async fn stopped_laesst_player_zustand_unveraendert() {
        let state = test_state();
        let bot = BotId(1);
        let guild = GuildId(2);

        let (session, mut rx) = Session::neu("a".into());
        state.session_registrieren(&session, bot);
        let player = session.player_holen_oder_erstellen(guild);
        player.set_idle();

        let handler = NodeEventHandler::neu(&state);
        handler
            .on_track_end(bot, guild, Arc::new(LeereQuelle), TrackEndGrund::Stopped)
            .await;

        assert!(rx.try_recv().is_ok());
        // Der Kommando-Handler hat idle bereits gesetzt; stopped fasst den
        // Zustand hier nicht mehr an
        assert_eq!(player.zustand(), linkdave_core::PlayerZustand::Idle);
    }

    #[tokio::test]
    async fn voice_disconnect_entfernt_player_ueberall() {
        let state = test_state();
        let bot = BotId(1);
        let guild = GuildId(2);

        let (a, mut rx_a) = Session::neu("a".into());
        state.session_registrieren(&a, bot);
        a.player_holen_oder_erstellen(guild);

        let handler = NodeEventHandler::neu(&state);
        handler.on_voice_disconnected(bot, guild).await;

        assert!(a.player(guild).is_none());
        match rx_a.try_recv().unwrap() {
            ServerNachricht::VoiceDisconnect(p) => {
                assert_eq!(p.reason.as_deref(), Some("connection_lost"));
            }
            andere => panic!("VoiceDisconnect erwartet, bekam {andere:?}"),
        }
    }

    #[tokio::test]
    async fn session_ohne_player_bekommt_keine_track_events() {
        let state = test_state();
        let bot = BotId(1);

        let (session, mut rx) = Session::neu("a".into());
        state.session_registrieren(&session, bot);

        let handler = NodeEventHandler::neu(&state);
        handler
            .on_track_end(bot, GuildId(9), Arc::new(LeereQuelle), TrackEndGrund::Finished)
            .await;
        handler
            .on_track_exception(bot, GuildId(9), Arc::new(LeereQuelle), "kaputt".into())
            .await;

        assert!(rx.try_recv().is_err());
    }
}
