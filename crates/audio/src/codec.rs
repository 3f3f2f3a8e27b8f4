//! Opus-Encoder-Wrapper
//!
//! Kapselt audiopus fuer den einen Anwendungsfall dieser Schicht:
//! 20-ms-Frames, 48 kHz, Stereo, `Application::Audio`. Der Ausgabepuffer
//! wird beim Erstellen einmal reserviert und pro Aufruf wiederverwendet;
//! zurueckgegeben wird eine eigenstaendige Kopie des geschriebenen Prefix.

use audiopus::{coder::Encoder, Application, Channels, SampleRate};
use bytes::Bytes;

use crate::error::{AudioFehler, AudioResult};
use crate::{FRAME_SAMPLES, KANAELE, OPUS_SCRATCH_BYTES};

/// Opus-Encoder: kodiert interleaved s16-PCM zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    scratch: Vec<u8>,
}

impl OpusEncoder {
    /// Erstellt einen Encoder fuer 48 kHz Stereo im Audio-Profil
    pub fn neu() -> AudioResult<Self> {
        let encoder = Encoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Audio)
            .map_err(|e| AudioFehler::Encoder(e.to_string()))?;

        Ok(Self {
            encoder,
            scratch: vec![0u8; OPUS_SCRATCH_BYTES],
        })
    }

    /// Kodiert genau einen 20-ms-Frame (960 Samples x 2 Kanaele)
    ///
    /// Die Eingabe muss exakt `FRAME_SAMPLES * KANAELE` Samples lang sein.
    pub fn encode(&mut self, pcm: &[i16]) -> AudioResult<Bytes> {
        debug_assert_eq!(pcm.len(), FRAME_SAMPLES * KANAELE);

        let geschrieben = self
            .encoder
            .encode(pcm, &mut self.scratch)
            .map_err(|e| AudioFehler::Encoder(e.to_string()))?;

        Ok(Bytes::copy_from_slice(&self.scratch[..geschrieben]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_erstellt_und_kodiert_stille() {
        let mut encoder = OpusEncoder::neu().expect("Encoder muss sich erstellen lassen");
        let stille = vec![0i16; FRAME_SAMPLES * KANAELE];

        let frame = encoder.encode(&stille).expect("Stille muss kodierbar sein");
        assert!(!frame.is_empty());
        assert!(frame.len() <= OPUS_SCRATCH_BYTES);
    }

    #[test]
    fn aufeinanderfolgende_frames_sind_unabhaengig() {
        let mut encoder = OpusEncoder::neu().unwrap();
        let stille = vec![0i16; FRAME_SAMPLES * KANAELE];
        let mut ton = vec![0i16; FRAME_SAMPLES * KANAELE];
        for (i, sample) in ton.iter_mut().enumerate() {
            *sample = (((i / KANAELE) as f64 * 0.05).sin() * 8000.0) as i16;
        }

        let a = encoder.encode(&stille).unwrap();
        let b = encoder.encode(&ton).unwrap();
        // Der erste Frame darf nach dem zweiten Aufruf nicht veraendert sein
        // (der Scratch wird wiederverwendet, die Rueckgabe ist eine Kopie)
        let a2 = a.clone();
        assert_eq!(a, a2);
        assert_ne!(a, b, "Stille und Ton ergeben verschiedene Frames");
    }
}
