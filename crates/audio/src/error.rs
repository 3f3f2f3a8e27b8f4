//! Fehlertypen der Audio-Schicht

use thiserror::Error;

/// Result-Alias fuer Audio-Operationen
pub type AudioResult<T> = std::result::Result<T, AudioFehler>;

/// Alle Fehlerzustaende rund um Quellen und Codec
#[derive(Debug, Error)]
pub enum AudioFehler {
    #[error("URL-Schema nicht erlaubt: {0}")]
    SchemaNichtErlaubt(String),

    #[error("Ungueltige URL: {0}")]
    UngueltigeUrl(String),

    #[error("HTTP-Anfrage fehlgeschlagen: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unerwarteter HTTP-Status: {0}")]
    HttpStatus(u16),

    #[error("Dekoder-Initialisierung fehlgeschlagen: {0}")]
    DecoderInit(String),

    #[error("Lesefehler im Audio-Stream: {0}")]
    Gelesen(String),

    #[error("Opus-Encoder-Fehler: {0}")]
    Encoder(String),

    #[error("Seek wird von dieser Quelle nicht unterstuetzt")]
    SeekNichtUnterstuetzt,

    #[error("Quelle ist geschlossen")]
    Geschlossen,
}

impl From<AudioFehler> for linkdave_core::LinkDaveError {
    fn from(fehler: AudioFehler) -> Self {
        Self::Audio(fehler.to_string())
    }
}
