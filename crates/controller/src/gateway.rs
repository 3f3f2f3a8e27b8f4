//! Gateway-Anbindung der Chat-Plattform
//!
//! Das Gateway selbst gehoert dem Host (der Bot-Bibliothek); der Controller
//! konsumiert nur zwei Pakettypen daraus und sendet Voice-State-Updates
//! ueber den `GatewaySender` des Hosts zurueck.

use linkdave_core::{ChannelId, GuildId};
use serde::Deserialize;

/// Sende-Seite des Chat-Gateways, vom Host implementiert
pub trait GatewaySender: Send + Sync {
    /// Sendet ein Voice-State-Update (Beitritt mit `Some`, Austritt mit `None`)
    fn voice_state_senden(
        &self,
        guild: GuildId,
        kanal: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    );
}

/// Rohes Gateway-Paket wie es der Host via `handle_raw` durchreicht
#[derive(Debug, Clone, Deserialize)]
pub struct RohPaket {
    /// Pakettyp, z.B. "VOICE_STATE_UPDATE"
    pub t: Option<String>,
    #[serde(default)]
    pub d: serde_json::Value,
}

/// VOICE_STATE_UPDATE-Daten (eigener Bot im Voice-Channel)
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceStateDaten {
    pub guild_id: GuildId,
    /// Null wenn der Bot den Channel verlassen hat
    pub channel_id: Option<ChannelId>,
    pub user_id: linkdave_core::BotId,
    pub session_id: String,
}

/// VOICE_SERVER_UPDATE-Daten
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceServerDaten {
    pub guild_id: GuildId,
    pub token: String,
    /// Null waehrend die Plattform den Endpoint rotiert
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_state_paket_parsen() {
        let json = r#"{
            "t": "VOICE_STATE_UPDATE",
            "d": {
                "guild_id": "42",
                "channel_id": "123",
                "user_id": "1116414956972290119",
                "session_id": "abc"
            }
        }"#;
        let paket: RohPaket = serde_json::from_str(json).unwrap();
        assert_eq!(paket.t.as_deref(), Some("VOICE_STATE_UPDATE"));
        let daten: VoiceStateDaten = serde_json::from_value(paket.d).unwrap();
        assert_eq!(daten.guild_id, GuildId(42));
        assert_eq!(daten.channel_id, Some(ChannelId(123)));
    }

    #[test]
    fn voice_server_paket_mit_null_endpoint() {
        let json = r#"{"guild_id":"42","token":"t","endpoint":null}"#;
        let daten: VoiceServerDaten = serde_json::from_str(json).unwrap();
        assert!(daten.endpoint.is_none());
    }

    #[test]
    fn fremde_pakete_haben_keinen_bekannten_typ() {
        let json = r#"{"t":"MESSAGE_CREATE","d":{}}"#;
        let paket: RohPaket = serde_json::from_str(json).unwrap();
        assert_eq!(paket.t.as_deref(), Some("MESSAGE_CREATE"));
    }
}
