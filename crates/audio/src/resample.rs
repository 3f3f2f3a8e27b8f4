//! Lineares Resampling auf die Ziel-Abtastrate
//!
//! Pro Kanal unabhaengige lineare Interpolation. Fuer jeden Ausgabe-Index
//! `i` gilt `quell_pos = i / verhaeltnis` mit `verhaeltnis = 48000 / quell_rate`;
//! interpoliert wird zwischen `floor(quell_pos)` und dem Folge-Sample, der
//! letzte Quell-Index wird geklemmt. Bei identischer Rate werden die Samples
//! unveraendert durchgereicht.

use crate::{PCM_FRAME_BYTES, ZIEL_RATE};

/// Anzahl der PCM-Bytes die pro Ziel-Frame aus dem Dekoder gelesen werden
///
/// `aufrunden_auf_4(3840 / (48000 / quell_rate))` – das Aufrunden auf ein
/// Vielfaches von 4 haelt die Lesemenge auf ganzen Stereo-Sample-Paaren.
pub fn eingabe_frame_bytes(quell_rate: u32) -> usize {
    let roh = (PCM_FRAME_BYTES as u64 * quell_rate as u64) / ZIEL_RATE as u64;
    (((roh + 3) / 4) * 4) as usize
}

/// Resampelt interleaved PCM linear auf die Laenge des Ausgabepuffers
///
/// `verhaeltnis` ist `ziel_rate / quell_rate`. Bei `verhaeltnis == 1.0`
/// werden die Samples bitidentisch kopiert.
pub fn linear_resample(eingabe: &[i16], kanaele: usize, verhaeltnis: f64, ausgabe: &mut [i16]) {
    debug_assert!(kanaele > 0);
    debug_assert_eq!(eingabe.len() % kanaele, 0);
    debug_assert_eq!(ausgabe.len() % kanaele, 0);

    let eingabe_pro_kanal = eingabe.len() / kanaele;
    let ausgabe_pro_kanal = ausgabe.len() / kanaele;

    if eingabe_pro_kanal == 0 {
        ausgabe.fill(0);
        return;
    }

    if verhaeltnis == 1.0 {
        let n = eingabe.len().min(ausgabe.len());
        ausgabe[..n].copy_from_slice(&eingabe[..n]);
        ausgabe[n..].fill(0);
        return;
    }

    for kanal in 0..kanaele {
        for i in 0..ausgabe_pro_kanal {
            let quell_pos = i as f64 / verhaeltnis;
            let basis = (quell_pos.floor() as usize).min(eingabe_pro_kanal - 1);
            // Letztes Sample klemmen statt hinter den Puffer zu lesen
            let folge = (basis + 1).min(eingabe_pro_kanal - 1);
            let anteil = quell_pos - quell_pos.floor();

            let a = eingabe[basis * kanaele + kanal] as f64;
            let b = eingabe[folge * kanaele + kanal] as f64;
            ausgabe[i * kanaele + kanal] = (a + (b - a) * anteil).round() as i16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FRAME_SAMPLES, KANAELE};

    #[test]
    fn eingabe_bytes_bekannte_raten() {
        assert_eq!(eingabe_frame_bytes(48_000), 3840);
        assert_eq!(eingabe_frame_bytes(44_100), 3528);
        assert_eq!(eingabe_frame_bytes(32_000), 2560);
        assert_eq!(eingabe_frame_bytes(22_050), 1764);
    }

    #[test]
    fn eingabe_bytes_immer_vielfaches_von_4() {
        for rate in [8_000u32, 11_025, 12_000, 16_000, 22_050, 24_000, 32_000, 44_100, 48_000] {
            assert_eq!(eingabe_frame_bytes(rate) % 4, 0, "Rate {rate}");
        }
    }

    #[test]
    fn identitaet_bei_verhaeltnis_eins() {
        // 48-kHz-Mono-Signal muss den Resampler bitidentisch passieren
        let eingabe: Vec<i16> = (0..FRAME_SAMPLES as i16).map(|i| i.wrapping_mul(37)).collect();
        let mut ausgabe = vec![0i16; FRAME_SAMPLES];
        linear_resample(&eingabe, 1, 1.0, &mut ausgabe);
        assert_eq!(eingabe, ausgabe);
    }

    #[test]
    fn sinus_44100_nach_48000_behaelt_frequenz() {
        // 1-kHz-Sinus bei 44,1 kHz; nach dem Resampling muss der dominante
        // Zyklus weiterhin ~1 kHz entsprechen (Nulldurchgaenge zaehlen).
        let quell_rate = 44_100u32;
        let eingabe_samples = eingabe_frame_bytes(quell_rate) / (KANAELE * 2);
        let frequenz = 1000.0;

        let mut eingabe = vec![0i16; eingabe_samples * KANAELE];
        for i in 0..eingabe_samples {
            let t = i as f64 / quell_rate as f64;
            let wert = ((2.0 * std::f64::consts::PI * frequenz * t).sin() * 16000.0) as i16;
            eingabe[i * KANAELE] = wert;
            eingabe[i * KANAELE + 1] = wert;
        }

        let mut ausgabe = vec![0i16; FRAME_SAMPLES * KANAELE];
        let verhaeltnis = 48_000.0 / quell_rate as f64;
        linear_resample(&eingabe, KANAELE, verhaeltnis, &mut ausgabe);

        let mut nulldurchgaenge = 0usize;
        for i in 1..FRAME_SAMPLES {
            let a = ausgabe[(i - 1) * KANAELE];
            let b = ausgabe[i * KANAELE];
            if (a < 0) != (b < 0) {
                nulldurchgaenge += 1;
            }
        }
        // 20 ms bei 1 kHz: 20 Zyklen, also ~40 Nulldurchgaenge (+/-1 Bin)
        assert!(
            (38..=42).contains(&nulldurchgaenge),
            "Nulldurchgaenge: {nulldurchgaenge}"
        );
    }

    #[test]
    fn letztes_sample_wird_geklemmt() {
        let eingabe = vec![100i16; 10];
        let mut ausgabe = vec![0i16; 20];
        // Hochsampeln ueber das Eingabe-Ende hinaus darf nicht panicken
        linear_resample(&eingabe, 1, 2.0, &mut ausgabe);
        assert_eq!(ausgabe[19], 100);
    }

    #[test]
    fn leere_eingabe_ergibt_stille() {
        let eingabe: Vec<i16> = vec![];
        let mut ausgabe = vec![7i16; 8];
        linear_resample(&eingabe, 2, 1.0, &mut ausgabe);
        assert!(ausgabe.iter().all(|&s| s == 0));
    }
}
