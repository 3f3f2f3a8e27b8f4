//! HTTP-MP3-Quelle – streamendes Dekodieren ohne Zwischendatei
//!
//! Ein GET mit identifizierendem User-Agent, Status 200 oder 206. Der
//! minimp3-Dekoder ist synchron und laeuft auf einem Blocking-Task; der
//! Antwort-Body wird ihm ueber eine Sync-Bruecke gereicht, das dekodierte
//! PCM kommt ueber einen begrenzten Kanal zurueck (Backpressure statt
//! unbegrenztem Puffern). Mono wird auf Stereo verbreitert, geliefert wird
//! s16le bei Quellrate.
//!
//! Pro Frame-Aufruf wird exakt `eingabe_frame_bytes(quell_rate)` PCM
//! gelesen, linear auf 48 kHz resampelt und als ein Opus-Frame kodiert.
//! Kurze Lese-Reste am Stream-Ende werden mit Null aufgefuellt und noch als
//! letzter Frame geliefert; der Folgeaufruf meldet EOF.
//!
//! HTTP-Streams koennen nicht neu positioniert werden: `dauer_ms() == 0`,
//! `kann_seek() == false`, `seek` schlaegt definiert fehl.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::TryStreamExt;
use minimp3::Decoder;
use tokio::sync::{mpsc, Mutex};
use tokio_util::io::{StreamReader, SyncIoBridge};

use crate::codec::OpusEncoder;
use crate::error::{AudioFehler, AudioResult};
use crate::quelle::AudioQuelle;
use crate::resample::{eingabe_frame_bytes, linear_resample};
use crate::{FRAME_MS, FRAME_SAMPLES, KANAELE, ZIEL_RATE};

/// Tiefe des PCM-Kanals zwischen Dekoder-Task und Frame-Produktion
const PCM_KANAL_TIEFE: usize = 8;

/// Veraenderlicher Kern der Quelle, durch einen Mutex serialisiert
#[derive(Debug)]
struct Inneres {
    /// Dekodierte PCM-Stuecke vom Blocking-Task; Kanal zu = Stream-Ende
    pcm_rx: mpsc::Receiver<Result<Vec<u8>, String>>,
    /// Noch nicht konsumierte Stereo-PCM-Bytes (s16le, Quellrate)
    pcm_rest: VecDeque<u8>,
    /// Lesemenge pro Ziel-Frame
    eingabe_bytes: usize,
    /// 48000 / Quellrate
    verhaeltnis: f64,
    /// Wiederverwendete Puffer, beim Erstellen dimensioniert
    eingabe_puffer: Vec<u8>,
    eingabe_samples: Vec<i16>,
    ausgabe_samples: Vec<i16>,
    encoder: OpusEncoder,
    /// Dekoder-Task ist fertig
    ende_erreicht: bool,
}

/// Streamende MP3-Quelle ueber HTTP(S)
#[derive(Debug)]
pub struct HttpMp3Quelle {
    url: String,
    inneres: Mutex<Option<Inneres>>,
    position: AtomicU64,
    geschlossen: AtomicBool,
}

impl HttpMp3Quelle {
    /// Oeffnet die URL und liest den ersten MP3-Frame (bestimmt die Quellrate)
    pub async fn neu(client: &reqwest::Client, url: &str, start_ms: u64) -> AudioResult<Self> {
        let antwort = client.get(url).send().await?;
        let status = antwort.status().as_u16();
        if status != 200 && status != 206 {
            return Err(AudioFehler::HttpStatus(status));
        }

        let stream = antwort
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let leser = SyncIoBridge::new(StreamReader::new(stream));

        // Erster Frame auf einem Blocking-Task: legt Quellrate und
        // Kanalzahl fest, bevor die Quelle nutzbar wird
        let (mut decoder, erster) = tokio::task::spawn_blocking(move || {
            let mut decoder = Decoder::new(leser);
            loop {
                match decoder.next_frame() {
                    Ok(frame) if frame.sample_rate > 0 && frame.channels > 0 => {
                        return Ok((decoder, frame))
                    }
                    Ok(_) | Err(minimp3::Error::SkippedData) => continue,
                    Err(minimp3::Error::Eof) | Err(minimp3::Error::InsufficientData) => {
                        return Err(AudioFehler::DecoderInit(
                            "Stream enthaelt keine MP3-Frames".into(),
                        ))
                    }
                    Err(minimp3::Error::Io(e)) => {
                        return Err(AudioFehler::DecoderInit(e.to_string()))
                    }
                }
            }
        })
        .await
        .map_err(|e| AudioFehler::DecoderInit(e.to_string()))??;

        let quell_rate = erster.sample_rate as u32;
        let mut pcm_rest = VecDeque::new();
        stereo_verbreitern(&erster.data, erster.channels, &mut pcm_rest);

        // Dekoder-Schleife: blockierend weiterlesen bis EOF oder Abnehmer weg
        let (pcm_tx, pcm_rx) = mpsc::channel(PCM_KANAL_TIEFE);
        tokio::task::spawn_blocking(move || dekodier_schleife(&mut decoder, &pcm_tx));

        let eingabe_bytes = eingabe_frame_bytes(quell_rate);
        let mut inneres = Inneres {
            pcm_rx,
            pcm_rest,
            eingabe_bytes,
            verhaeltnis: ZIEL_RATE as f64 / quell_rate as f64,
            eingabe_puffer: vec![0u8; eingabe_bytes],
            eingabe_samples: vec![0i16; eingabe_bytes / 2],
            ausgabe_samples: vec![0i16; FRAME_SAMPLES * KANAELE],
            encoder: OpusEncoder::neu()?,
            ende_erreicht: false,
        };

        // Startversatz: Eingabe-PCM verwerfen bis der Versatz erreicht ist
        let mut verworfen_ms = 0u64;
        while verworfen_ms + FRAME_MS <= start_ms && !inneres.ende_erreicht {
            let mut wegwerf = std::mem::take(&mut inneres.eingabe_puffer);
            let n = pcm_lesen(&mut inneres, &mut wegwerf).await?;
            inneres.eingabe_puffer = wegwerf;
            if n == 0 {
                break;
            }
            verworfen_ms += FRAME_MS;
        }

        tracing::debug!(
            url = url,
            quell_rate,
            eingabe_bytes,
            start_ms,
            "MP3-Quelle geoeffnet"
        );

        Ok(Self {
            url: url.to_string(),
            inneres: Mutex::new(Some(inneres)),
            position: AtomicU64::new(start_ms),
            geschlossen: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl AudioQuelle for HttpMp3Quelle {
    async fn next_opus_frame(&self) -> AudioResult<Option<Bytes>> {
        if self.geschlossen.load(Ordering::Acquire) {
            return Ok(None);
        }

        let mut wache = self.inneres.lock().await;
        let inneres = match wache.as_mut() {
            Some(inneres) => inneres,
            // Nebenlaeufig geschlossen waehrend wir auf den Lock warteten
            None => return Ok(None),
        };

        let mut eingabe = std::mem::take(&mut inneres.eingabe_puffer);
        let gelesen = pcm_lesen(inneres, &mut eingabe).await;
        let n = match gelesen {
            Ok(n) => n,
            Err(fehler) => {
                inneres.eingabe_puffer = eingabe;
                return Err(fehler);
            }
        };
        if n == 0 {
            inneres.eingabe_puffer = eingabe;
            return Ok(None);
        }
        // Kurzer Rest am Stream-Ende: mit Null auffuellen, Frame noch liefern
        eingabe[n..].fill(0);

        for (i, sample) in inneres.eingabe_samples.iter_mut().enumerate() {
            *sample = i16::from_le_bytes([eingabe[i * 2], eingabe[i * 2 + 1]]);
        }
        inneres.eingabe_puffer = eingabe;

        let verhaeltnis = inneres.verhaeltnis;
        let mut ausgabe = std::mem::take(&mut inneres.ausgabe_samples);
        linear_resample(&inneres.eingabe_samples, KANAELE, verhaeltnis, &mut ausgabe);
        let frame = inneres.encoder.encode(&ausgabe);
        inneres.ausgabe_samples = ausgabe;
        let frame = frame?;

        self.position.fetch_add(FRAME_MS, Ordering::AcqRel);
        Ok(Some(frame))
    }

    async fn schliessen(&self) {
        if self.geschlossen.swap(true, Ordering::AcqRel) {
            return;
        }
        // PCM-Kanal fallen lassen – der Dekoder-Task beendet sich beim
        // naechsten Sendeversuch, der HTTP-Stream wird freigegeben
        let mut wache = self.inneres.lock().await;
        wache.take();
        tracing::debug!(url = %self.url, "Quelle geschlossen");
    }

    fn position_ms(&self) -> u64 {
        self.position.load(Ordering::Acquire)
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
        &self.url
    }
}

/// Blockierende Dekoder-Schleife; endet bei EOF, Fehler oder wenn der
/// Abnehmer (die Quelle) geschlossen wurde
fn dekodier_schleife<R: Read>(
    decoder: &mut Decoder<R>,
    pcm_tx: &mpsc::Sender<Result<Vec<u8>, String>>,
) {
    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                let mut stueck = VecDeque::with_capacity(frame.data.len() * 2);
                stereo_verbreitern(&frame.data, frame.channels, &mut stueck);
                if pcm_tx.blocking_send(Ok(stueck.into())).is_err() {
                    return;
                }
            }
            Err(minimp3::Error::SkippedData) => continue,
            Err(minimp3::Error::Eof) | Err(minimp3::Error::InsufficientData) => return,
            Err(minimp3::Error::Io(e)) => {
                let _ = pcm_tx.blocking_send(Err(e.to_string()));
                return;
            }
        }
    }
}

/// Fuellt `ziel` aus dem PCM-Rest, holt bei Bedarf vom Dekoder-Task nach
///
/// Gibt die Anzahl tatsaechlich gelesener Bytes zurueck; weniger als
/// `ziel.len()` nur am Stream-Ende. Lesefehler ausser EOF sind fatal.
async fn pcm_lesen(inneres: &mut Inneres, ziel: &mut [u8]) -> AudioResult<usize> {
    while inneres.pcm_rest.len() < ziel.len() && !inneres.ende_erreicht {
        match inneres.pcm_rx.recv().await {
            Some(Ok(stueck)) => inneres.pcm_rest.extend(stueck),
            Some(Err(fehler)) => {
                inneres.ende_erreicht = true;
                return Err(AudioFehler::Gelesen(fehler));
            }
            None => inneres.ende_erreicht = true,
        }
    }

    let n = inneres.pcm_rest.len().min(ziel.len());
    for byte in ziel.iter_mut().take(n) {
        // VecDeque ist nie leer solange n nicht erreicht ist
        *byte = inneres.pcm_rest.pop_front().unwrap_or(0);
    }
    Ok(n)
}

/// Haengt einen dekodierten Frame als s16le-Stereo-Bytes an den Puffer
///
/// Mono wird durch Verdoppeln der Samples verbreitert; mehr als zwei
/// Kanaele liefert MP3 nicht.
fn stereo_verbreitern(daten: &[i16], kanaele: usize, ziel: &mut VecDeque<u8>) {
    match kanaele {
        1 => {
            for &sample in daten {
                let b = sample.to_le_bytes();
                ziel.extend(b);
                ziel.extend(b);
            }
        }
        _ => {
            for &sample in daten {
                ziel.extend(sample.to_le_bytes());
            }
        }
    }
}
