//! Fehlertypen des Mixers

use raumklang_core::{ParticipantId, RaumklangError};
use thiserror::Error;

/// Alle moeglichen Fehler des Audio-Routers
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("Teilnehmer nicht angemeldet: {0}")]
    UnbekannterTeilnehmer(ParticipantId),

    #[error("Teilnehmer bereits angemeldet: {0}")]
    TeilnehmerExistiert(ParticipantId),

    #[error(
        "Frame passt nicht zum Master-Format: erwartet {erwartet_samples} Samples @ {erwartet_rate} Hz, \
         erhalten {erhalten_samples} Samples @ {erhalten_rate} Hz"
    )]
    FrameAbweichung {
        erwartet_rate: u32,
        erhalten_rate: u32,
        erwartet_samples: u16,
        erhalten_samples: u16,
    },

    #[error("Frame ohne Audiodaten: {streams} Streams, {kanaele} Kanaele")]
    LeererFrame { streams: u16, kanaele: u16 },

    #[error("Frame-Kapazitaet reicht nicht: {benoetigt} Samples benoetigt, {kapazitaet} vorhanden")]
    StreamKapazitaet { benoetigt: usize, kapazitaet: usize },

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Aufnahme-Fehler: {0}")]
    Aufnahme(#[from] hound::Error),
}

pub type MixerResult<T> = Result<T, MixerError>;

impl From<MixerError> for RaumklangError {
    fn from(err: MixerError) -> Self {
        match err {
            MixerError::UnbekannterTeilnehmer(id) => {
                RaumklangError::TeilnehmerNichtGefunden(id.to_string())
            }
            MixerError::Konfiguration(grund) => RaumklangError::Konfiguration(grund),
            andere => RaumklangError::audio(andere),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abweichung_anzeige() {
        let e = MixerError::FrameAbweichung {
            erwartet_rate: 48000,
            erhalten_rate: 44100,
            erwartet_samples: 960,
            erhalten_samples: 882,
        };
        let text = e.to_string();
        assert!(text.contains("960 Samples @ 48000 Hz"));
        assert!(text.contains("882 Samples @ 44100 Hz"));
    }

    #[test]
    fn konvertierung_in_raumklang_fehler() {
        let id = ParticipantId::new();
        let e: RaumklangError = MixerError::UnbekannterTeilnehmer(id).into();
        assert!(matches!(e, RaumklangError::TeilnehmerNichtGefunden(_)));

        let e: RaumklangError = MixerError::Konfiguration("x".into()).into();
        assert!(matches!(e, RaumklangError::Konfiguration(_)));
    }
}
