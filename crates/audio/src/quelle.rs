//! Quellen-Schnittstelle und Fabrik
//!
//! `AudioQuelle` ist der Vertrag zwischen Audio-Schicht und Voice-Transport:
//! ein Frame pro Aufruf, `Ok(None)` als EOF, Position in Millisekunden.
//! Die `QuellenFabrik` entkoppelt den Voice-Manager von der konkreten
//! Quellen-Implementierung (Tests haengen hier Skript-Quellen ein).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{AudioFehler, AudioResult};
use crate::http_mp3::HttpMp3Quelle;

/// Eine abspielbare Audio-Quelle
///
/// Hoechstens eine VoiceConnection besitzt eine Quelle zur gleichen Zeit.
/// Frame-Produktion ist intern durch einen Mutex serialisiert; `schliessen`
/// ist idempotent und darf nebenlaeufig zu `next_opus_frame` laufen.
#[async_trait]
pub trait AudioQuelle: Send + Sync + std::fmt::Debug {
    /// Liefert den naechsten 20-ms-Opus-Frame, `Ok(None)` bei EOF
    async fn next_opus_frame(&self) -> AudioResult<Option<Bytes>>;

    /// Schliesst die Quelle; nachfolgende Frame-Aufrufe liefern sofort EOF
    async fn schliessen(&self);

    /// Aktuelle Wiedergabe-Position in Millisekunden
    fn position_ms(&self) -> u64;

    /// Springt an eine Position; schlaegt fehl wenn `kann_seek()` false ist
    async fn seek(&self, ms: u64) -> AudioResult<()>;

    /// Spieldauer in Millisekunden, 0 wenn unbekannt
    fn dauer_ms(&self) -> u64;

    /// Ob diese Quelle Seeks unterstuetzt
    fn kann_seek(&self) -> bool;

    /// Die Quell-URL
    fn url(&self) -> &str;
}

/// Fabrik fuer Audio-Quellen
#[async_trait]
pub trait QuellenFabrik: Send + Sync {
    /// Baut eine Quelle fuer die URL, optional mit Startversatz in ms
    async fn quelle_erstellen(
        &self,
        url: &str,
        start_ms: u64,
    ) -> AudioResult<Arc<dyn AudioQuelle>>;
}

/// Produktive Fabrik: MP3 ueber HTTP(S)
///
/// Welche Schemata erlaubt sind steuert die Node-Konfiguration
/// (`LINKDAVE_SOURCE_HTTP_ENABLED` / `LINKDAVE_SOURCE_HTTPS_ENABLED`).
pub struct HttpQuellenFabrik {
    client: reqwest::Client,
    http_erlaubt: bool,
    https_erlaubt: bool,
}

impl HttpQuellenFabrik {
    /// Erstellt die Fabrik mit einem wiederverwendeten HTTP-Client
    pub fn neu(http_erlaubt: bool, https_erlaubt: bool) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "linkdave/{} (+https://github.com/7blacky7/linkdave)",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .unwrap_or_default();

        Self {
            client,
            http_erlaubt,
            https_erlaubt,
        }
    }

    fn schema_pruefen(&self, url: &str) -> AudioResult<()> {
        if url.starts_with("https://") {
            if self.https_erlaubt {
                return Ok(());
            }
            return Err(AudioFehler::SchemaNichtErlaubt("https".into()));
        }
        if url.starts_with("http://") {
            if self.http_erlaubt {
                return Ok(());
            }
            return Err(AudioFehler::SchemaNichtErlaubt("http".into()));
        }
        Err(AudioFehler::UngueltigeUrl(url.into()))
    }
}

#[async_trait]
impl QuellenFabrik for HttpQuellenFabrik {
    async fn quelle_erstellen(
        &self,
        url: &str,
        start_ms: u64,
    ) -> AudioResult<Arc<dyn AudioQuelle>> {
        self.schema_pruefen(url)?;
        let quelle = HttpMp3Quelle::neu(&self.client, url, start_ms).await?;
        Ok(Arc::new(quelle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn https_standard_erlaubt_http_nicht() {
        let fabrik = HttpQuellenFabrik::neu(false, true);

        let fehler = fabrik
            .quelle_erstellen("http://host/a.mp3", 0)
            .await
            .unwrap_err();
        assert!(matches!(fehler, AudioFehler::SchemaNichtErlaubt(_)));
    }

    #[tokio::test]
    async fn unbekanntes_schema_ist_ungueltige_url() {
        let fabrik = HttpQuellenFabrik::neu(true, true);

        let fehler = fabrik
            .quelle_erstellen("ftp://host/a.mp3", 0)
            .await
            .unwrap_err();
        assert!(matches!(fehler, AudioFehler::UngueltigeUrl(_)));
    }
}
