//! Gemeinsame Identifikationstypen fuer LinkDave
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.
//!
//! ## Wire-Format
//! Bot-, Guild- und Channel-IDs sind 64-Bit-Snowflakes der Chat-Plattform.
//! Auf dem Draht werden sie als Dezimal-Strings uebertragen (JavaScript-
//! Controller koennen 64-Bit-Integer nicht verlustfrei darstellen), intern
//! als `u64` gehalten.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Serialisiert eine u64-ID als Dezimal-String
fn id_serialisieren<S: Serializer>(wert: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&wert.to_string())
}

/// Deserialisiert eine ID aus einem Dezimal-String oder einer Zahl
fn id_deserialisieren<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOderZahl {
        Text(String),
        Zahl(u64),
    }

    match StringOderZahl::deserialize(deserializer)? {
        StringOderZahl::Text(s) => s.parse::<u64>().map_err(serde::de::Error::custom),
        StringOderZahl::Zahl(n) => Ok(n),
    }
}

macro_rules! snowflake_id {
    ($(#[$doc:meta])* $name:ident, $praefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(
            #[serde(
                serialize_with = "id_serialisieren",
                deserialize_with = "id_deserialisieren"
            )]
            pub u64,
        );

        impl $name {
            /// Gibt den inneren Snowflake-Wert zurueck
            pub fn inner(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($praefix, ":{}"), self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl From<u64> for $name {
            fn from(wert: u64) -> Self {
                Self(wert)
            }
        }
    };
}

snowflake_id!(
    /// Eindeutige Bot-ID (Chat-Plattform-Identitaet des Controllers)
    BotId,
    "bot"
);

snowflake_id!(
    /// Eindeutige Guild-ID (Mandant der Chat-Plattform, Einheit des Player-Zustands)
    GuildId,
    "guild"
);

snowflake_id!(
    /// Eindeutige Voice-Channel-ID innerhalb einer Guild
    ChannelId,
    "channel"
);

/// Eindeutige Session-ID, vom Node beim Verbindungsaufbau vergeben
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Erstellt eine neue zufaellige SessionId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_eindeutig() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b, "Zwei neue SessionIds muessen verschieden sein");
    }

    #[test]
    fn bot_id_display() {
        let id = BotId(1116414956972290119);
        assert_eq!(id.to_string(), "bot:1116414956972290119");
    }

    #[test]
    fn guild_id_als_dezimal_string_serialisiert() {
        let id = GuildId(81384788765712384);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"81384788765712384\"");
    }

    #[test]
    fn id_aus_string_und_zahl_deserialisierbar() {
        let aus_string: ChannelId = serde_json::from_str("\"123\"").unwrap();
        let aus_zahl: ChannelId = serde_json::from_str("123").unwrap();
        assert_eq!(aus_string, ChannelId(123));
        assert_eq!(aus_zahl, ChannelId(123));
    }

    #[test]
    fn id_roundtrip() {
        let id = BotId(u64::MAX);
        let json = serde_json::to_string(&id).unwrap();
        let zurueck: BotId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, zurueck, "u64::MAX muss den String-Umweg ueberleben");
    }

    #[test]
    fn ungueltiger_id_string_schlaegt_fehl() {
        let ergebnis: Result<GuildId, _> = serde_json::from_str("\"kein-snowflake\"");
        assert!(ergebnis.is_err());
    }
}
