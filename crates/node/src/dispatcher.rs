//! Opcode-Dispatcher – uebersetzt Client-Nachrichten in Kommandos
//!
//! Jeder Handler antwortet ueber die Sende-Queue der Session. Kommandos
//! auf fehlende Verbindungen werden fuer Pause/Resume/Stop/Seek/Volume
//! stillschweigend uebersprungen; Disconnect ist dann ein No-op.
//! Play laeuft als abgehaengter Task – sein Fehler kommt als TrackError
//! ueber die Queue zurueck und reisst nie die Pumpe.

use std::sync::Arc;

use linkdave_core::{BotId, GuildId};
use linkdave_protocol::{
    ClientNachricht, MigrateReadyPayload, PlayPayload, PlayerUpdatePayload, ReadyPayload,
    ServerNachricht, TrackErrorPayload, TrackInfo, TrackStartPayload, VoiceConnectPayload,
    VoiceDisconnectPayload, VoiceUpdatePayload,
};
use linkdave_voice::VoiceFehler;

use crate::player::Player;
use crate::server_state::NodeState;
use crate::session::Session;

/// Verarbeitet eine dekodierte Client-Nachricht
pub async fn verarbeiten(state: &Arc<NodeState>, session: &Arc<Session>, nachricht: ClientNachricht) {
    match nachricht {
        ClientNachricht::Identify(p) => {
            state.session_registrieren(session, p.bot_id);
            session.senden(ServerNachricht::Ready(ReadyPayload {
                session_id: session.id.to_string(),
                resumed: false,
            }));
        }
        ClientNachricht::Ping => {
            session.senden(ServerNachricht::Pong);
        }
        andere => {
            let Some(bot) = session.bot() else {
                tracing::warn!(
                    session = %session.id,
                    op = andere.op(),
                    "Kommando vor Identify ignoriert"
                );
                return;
            };
            match andere {
                ClientNachricht::VoiceUpdate(p) => voice_update(state, session, bot, p).await,
                ClientNachricht::Play(p) => play(state, session, bot, p),
                ClientNachricht::Pause(p) => pause(state, session, bot, p.guild_id).await,
                ClientNachricht::Resume(p) => resume(state, session, bot, p.guild_id).await,
                ClientNachricht::Stop(p) => stop(state, session, bot, p.guild_id).await,
                ClientNachricht::Seek(p) => seek(state, session, bot, p.guild_id, p.position).await,
                ClientNachricht::Volume(p) => {
                    volume(state, session, bot, p.guild_id, p.volume).await
                }
                ClientNachricht::Disconnect(p) => disconnect(state, session, bot, p.guild_id),
                ClientNachricht::PlayerMigrate(p) => player_migrate(session, p.guild_id),
                // Oben bereits behandelt
                ClientNachricht::Identify(_) | ClientNachricht::Ping => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Einzelne Handler
// ---------------------------------------------------------------------------

async fn voice_update(
    state: &Arc<NodeState>,
    session: &Arc<Session>,
    bot: BotId,
    p: VoiceUpdatePayload,
) {
    let guild = p.guild_id;

    // Drain: neue Player werden abgewiesen, bestehende duerfen weiter
    if state.ist_draining() && session.player(guild).is_none() {
        track_error(session, guild, "", "Node draint – keine neuen Player");
        return;
    }

    let Some(endpoint) = p.event.endpoint.filter(|e| !e.is_empty()) else {
        track_error(session, guild, "", "Voice-Endpoint fehlt");
        return;
    };

    let player = session.player_holen_oder_erstellen(guild);
    let ergebnis = state
        .manager
        .connect(
            state.konfig.connect_frist,
            bot,
            guild,
            p.channel_id,
            &p.session_id,
            &p.event.token,
            &endpoint,
        )
        .await;

    match ergebnis {
        Ok(()) => {
            player.kanal_setzen(p.channel_id);
            session.senden(ServerNachricht::VoiceConnect(VoiceConnectPayload {
                guild_id: guild,
                channel_id: p.channel_id,
            }));
        }
        Err(fehler) => {
            tracing::warn!(guild = %guild, fehler = %fehler, "Voice-Aufbau fehlgeschlagen");
            track_error(session, guild, &player.url(), &fehler.to_string());
        }
    }
}

/// Play laeuft abgehaengt: der Aufbau der Quelle kann Sekunden dauern
/// (HTTP-Roundtrip) und darf die Lese-Pumpe nicht aufhalten
fn play(state: &Arc<NodeState>, session: &Arc<Session>, bot: BotId, p: PlayPayload) {
    let guild = p.guild_id;
    let player = session.player_holen_oder_erstellen(guild);
    if let Some(volume) = p.volume.filter(|v| *v > 0) {
        player.volume_setzen(volume);
    }
    let start_ms = p.start_time.unwrap_or(0);

    let state = state.clone();
    let session = session.clone();
    tokio::spawn(async move {
        match state.manager.play(bot, guild, &p.url, start_ms).await {
            Ok(quelle) => {
                let position = quelle.position_ms();
                player.set_playing(&p.url, position);
                session.senden(ServerNachricht::TrackStart(TrackStartPayload {
                    guild_id: guild,
                    track: TrackInfo::aus_url(&p.url),
                }));
                session.senden(player_update(guild, &player, position));
            }
            Err(fehler) => {
                tracing::warn!(guild = %guild, url = %p.url, fehler = %fehler, "Play fehlgeschlagen");
                track_error(&session, guild, &p.url, &fehler.to_string());
            }
        }
    });
}

async fn pause(state: &Arc<NodeState>, session: &Arc<Session>, bot: BotId, guild: GuildId) {
    if state.manager.pause(bot, guild).await.is_err() {
        return;
    }
    let Some(player) = session.player(guild) else {
        return;
    };
    let position = state.manager.position(bot, guild).await;
    player.set_paused(position);
    session.senden(player_update(guild, &player, position));
}

async fn resume(state: &Arc<NodeState>, session: &Arc<Session>, bot: BotId, guild: GuildId) {
    if state.manager.resume(bot, guild).await.is_err() {
        return;
    }
    let Some(player) = session.player(guild) else {
        return;
    };
    let position = state.manager.position(bot, guild).await;
    player.set_playing(&player.url(), position);
    session.senden(player_update(guild, &player, position));
}

async fn stop(state: &Arc<NodeState>, session: &Arc<Session>, bot: BotId, guild: GuildId) {
    let _ = state.manager.stop(bot, guild).await;
    let Some(player) = session.player(guild) else {
        return;
    };
    player.set_idle();
    session.senden(player_update(guild, &player, 0));
}

async fn seek(
    state: &Arc<NodeState>,
    session: &Arc<Session>,
    bot: BotId,
    guild: GuildId,
    position: u64,
) {
    match state.manager.seek(bot, guild, position).await {
        Ok(()) => {
            let Some(player) = session.player(guild) else {
                return;
            };
            let position = state.manager.position(bot, guild).await;
            player.position_setzen(position);
            session.senden(player_update(guild, &player, position));
        }
        Err(VoiceFehler::KeineVerbindung(_)) => {}
        Err(fehler) => {
            track_error(session, guild, "", &fehler.to_string());
        }
    }
}

async fn volume(
    state: &Arc<NodeState>,
    session: &Arc<Session>,
    bot: BotId,
    guild: GuildId,
    volume: u16,
) {
    let Some(player) = session.player(guild) else {
        return;
    };
    player.volume_setzen(volume);
    let position = state.manager.position(bot, guild).await;
    session.senden(player_update(guild, &player, position));
}

fn disconnect(state: &Arc<NodeState>, session: &Arc<Session>, bot: BotId, guild: GuildId) {
    state.manager.disconnect(bot, guild);
    session.player_entfernen(guild);
    session.senden(ServerNachricht::VoiceDisconnect(VoiceDisconnectPayload {
        guild_id: guild,
        reason: Some("requested".into()),
    }));
}

fn player_migrate(session: &Arc<Session>, guild: GuildId) {
    let Some(player) = session.player(guild) else {
        tracing::warn!(session = %session.id, guild = %guild, "Migrate ohne Player ignoriert");
        return;
    };
    let (url, position, volume, zustand) = player.migrate_snapshot();
    session.senden(ServerNachricht::MigrateReady(MigrateReadyPayload {
        guild_id: guild,
        url,
        position,
        volume,
        state: zustand,
    }));
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

fn player_update(guild: GuildId, player: &Player, position: u64) -> ServerNachricht {
    ServerNachricht::PlayerUpdate(PlayerUpdatePayload {
        guild_id: guild,
        state: player.zustand(),
        position,
        volume: player.volume(),
    })
}

fn track_error(session: &Arc<Session>, guild: GuildId, url: &str, fehler: &str) {
    session.senden(ServerNachricht::TrackError(TrackErrorPayload {
        guild_id: guild,
        track: TrackInfo::aus_url(url),
        error: fehler.to_string(),
    }));
}
