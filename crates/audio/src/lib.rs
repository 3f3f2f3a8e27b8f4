//! linkdave-audio – Audio-Quellen fuer die Opus-Wiedergabe
//!
//! Eine Quelle liefert auf Abruf 20-ms-Opus-Frames fuer 48 kHz Stereo.
//! Die einzige produktive Implementierung streamt MP3 ueber HTTP(S):
//! GET → minimp3-Dekoder → lineares Resampling → audiopus-Encoder.
//!
//! Der Takt kommt von aussen: der Voice-Transport zieht Frames auf seiner
//! eigenen Uhr, die Quelle produziert strikt einen Frame pro Aufruf.

pub mod codec;
pub mod error;
pub mod http_mp3;
pub mod quelle;
pub mod resample;

pub use codec::OpusEncoder;
pub use error::{AudioFehler, AudioResult};
pub use http_mp3::HttpMp3Quelle;
pub use quelle::{AudioQuelle, HttpQuellenFabrik, QuellenFabrik};

/// Ziel-Abtastrate der Opus-Frames
pub const ZIEL_RATE: u32 = 48_000;
/// Kanalzahl der Opus-Frames
pub const KANAELE: usize = 2;
/// Samples pro Kanal in einem 20-ms-Frame bei 48 kHz
pub const FRAME_SAMPLES: usize = 960;
/// Frame-Dauer in Millisekunden
pub const FRAME_MS: u64 = 20;
/// PCM-Bytes eines Ziel-Frames (960 Samples x 2 Kanaele x 2 Bytes)
pub const PCM_FRAME_BYTES: usize = FRAME_SAMPLES * KANAELE * 2;
/// Groesse des wiederverwendeten Opus-Ausgabepuffers
pub const OPUS_SCRATCH_BYTES: usize = 4096;
