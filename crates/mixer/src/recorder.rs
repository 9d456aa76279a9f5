//! Diagnose-Aufnahme der Ausgabe eines Teilnehmers
//!
//! Nur zur Fehlersuche gedacht: schreibt Stream 0 jedes versendeten Frames in
//! eine WAV-Datei (32-bit float, mono). Die Datei ist erst nach `finalize`
//! (bzw. beim Verlassen der Session) vollstaendig.

use crate::error::{MixerError, MixerResult};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

/// Schnittstelle einer Diagnose-Aufnahme
pub trait DiagnosticRecorder: Send {
    fn write_header(&mut self, sample_rate: u32, kanaele: u16) -> MixerResult<()>;
    fn write_samples(&mut self, samples: &[f32]) -> MixerResult<()>;
    fn finalize(&mut self) -> MixerResult<()>;
}

/// WAV-Datei-Aufnahme via hound
pub struct WavRecorder {
    pfad: PathBuf,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    geschrieben: u64,
}

impl WavRecorder {
    pub fn neu(pfad: impl Into<PathBuf>) -> Self {
        Self {
            pfad: pfad.into(),
            writer: None,
            geschrieben: 0,
        }
    }

    /// Anzahl bisher geschriebener Samples
    pub fn geschrieben(&self) -> u64 {
        self.geschrieben
    }
}

impl DiagnosticRecorder for WavRecorder {
    fn write_header(&mut self, sample_rate: u32, kanaele: u16) -> MixerResult<()> {
        let spec = hound::WavSpec {
            channels: kanaele.max(1),
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        self.writer = Some(hound::WavWriter::create(&self.pfad, spec)?);
        tracing::warn!(
            pfad = %self.pfad.display(),
            "Alle Ausgabe-Samples werden als WAV-Datei aufgezeichnet"
        );
        Ok(())
    }

    fn write_samples(&mut self, samples: &[f32]) -> MixerResult<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            MixerError::Konfiguration(format!(
                "WAV-Header fuer '{}' wurde nicht geschrieben",
                self.pfad.display()
            ))
        })?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        self.geschrieben += samples.len() as u64;
        Ok(())
    }

    fn finalize(&mut self) -> MixerResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            tracing::info!(
                pfad = %self.pfad.display(),
                samples = self.geschrieben,
                "WAV-Aufnahme abgeschlossen"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pfad(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{name}_{}.wav", uuid_suffix()))
    }

    fn uuid_suffix() -> String {
        raumklang_core::ParticipantId::new().kurz()
    }

    #[test]
    fn aufnahme_schreibt_lesbare_wav() {
        let pfad = temp_pfad("raumklang_test");
        let mut rec = WavRecorder::neu(&pfad);

        rec.write_header(48_000, 1).unwrap();
        rec.write_samples(&[0.0, 0.5, -0.5, 0.25]).unwrap();
        rec.finalize().unwrap();
        assert_eq!(rec.geschrieben(), 4);

        let mut reader = hound::WavReader::open(&pfad).unwrap();
        assert_eq!(reader.spec().sample_rate, 48_000);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0.0, 0.5, -0.5, 0.25]);

        std::fs::remove_file(&pfad).ok();
    }

    #[test]
    fn samples_ohne_header_schlagen_fehl() {
        let mut rec = WavRecorder::neu(temp_pfad("raumklang_ohne_header"));
        assert!(matches!(
            rec.write_samples(&[0.1]),
            Err(MixerError::Konfiguration(_))
        ));
    }

    #[test]
    fn finalize_ohne_header_ist_noop() {
        let mut rec = WavRecorder::neu(temp_pfad("raumklang_noop"));
        assert!(rec.finalize().is_ok());
    }
}
