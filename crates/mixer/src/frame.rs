//! Audio-Frame – Sample-Container eines Pakets
//!
//! Ein Frame besteht aus geordneten *Streams*: Stream 0 ist beim Eingang das
//! Umgebungs-Audio bzw. beim Ausgang der Mix-Minus-Self, Streams 1..N sind
//! einzelne raeumliche (HRTF) Streams. Jeder Stream hat `channel_count`
//! Kanaele mit je `sample_count` Samples im Bereich [-1, 1].
//!
//! ## Speicherlayout
//! Alle Samples liegen zusammenhaengend in einem Vec, dessen Kapazitaet beim
//! Erzeugen im Pool festgelegt wird (`max_samples`). `add_stream` waechst nur
//! innerhalb dieser Kapazitaet – im Hot Path wird nicht alloziert.
//!
//! ```text
//! [ s0/k0 | s0/k1 | ... | s1/k0 | s1/k1 | ... ]   je sample_count Samples
//! ```

use crate::error::{MixerError, MixerResult};
use raumklang_core::SourceId;

/// Raeumliche Metadaten eines Streams (Avatar-Quelle, Position, Blickrichtung)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpatialTag {
    pub source_id: SourceId,
    pub position: [f32; 3],
    pub orientation: [f32; 3],
}

impl SpatialTag {
    pub fn neu(source_id: SourceId, position: [f32; 3], orientation: [f32; 3]) -> Self {
        Self {
            source_id,
            position,
            orientation,
        }
    }
}

/// Audio-Frame mit fester Sample-Kapazitaet
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Vec<f32>,
    max_samples: usize,
    stream_count: u16,
    channel_count: u16,
    sample_count: u16,
    sample_rate: u32,
    is_muted: bool,
    sequence: u32,
    time_received: u64,
    spatial: Vec<Option<SpatialTag>>,
}

impl AudioFrame {
    /// Erstellt einen leeren Frame mit Platz fuer `max_samples` Samples
    pub fn neu(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
            stream_count: 0,
            channel_count: 1,
            sample_count: 0,
            sample_rate: 0,
            is_muted: false,
            sequence: 0,
            time_received: 0,
            spatial: Vec::new(),
        }
    }

    /// Initialisiert den Frame neu (alle Samples 0, keine Metadaten)
    ///
    /// Schlaegt fehl, wenn `stream_count * channel_count * sample_count` die
    /// Kapazitaet uebersteigt.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        time_received: u64,
        stream_count: u16,
        channel_count: u16,
        sample_count: u16,
        sample_rate: u32,
        is_muted: bool,
        sequence: u32,
    ) -> MixerResult<()> {
        let benoetigt = stream_count as usize * channel_count as usize * sample_count as usize;
        if benoetigt > self.max_samples {
            return Err(MixerError::StreamKapazitaet {
                benoetigt,
                kapazitaet: self.max_samples,
            });
        }

        self.time_received = time_received;
        self.stream_count = stream_count;
        self.channel_count = channel_count.max(1);
        self.sample_count = sample_count;
        self.sample_rate = sample_rate;
        self.is_muted = is_muted;
        self.sequence = sequence;

        self.samples.clear();
        self.samples.resize(benoetigt, 0.0);
        self.spatial.clear();
        self.spatial.resize(stream_count as usize, None);
        Ok(())
    }

    /// Haengt einen stillen Stream an; `false` wenn die Kapazitaet erschoepft ist
    pub fn add_stream(&mut self) -> bool {
        let neu = self.samples.len() + self.stream_len();
        if neu > self.max_samples {
            return false;
        }
        self.samples.resize(neu, 0.0);
        self.spatial.push(None);
        self.stream_count += 1;
        true
    }

    /// Setzt den Frame fuer die Rueckgabe an den Pool zurueck (Zustand wie nach `neu`)
    pub fn zuruecksetzen(&mut self) {
        self.samples.clear();
        self.spatial.clear();
        self.stream_count = 0;
        self.channel_count = 1;
        self.sample_count = 0;
        self.sample_rate = 0;
        self.is_muted = false;
        self.sequence = 0;
        self.time_received = 0;
    }

    pub fn stream_count(&self) -> u16 {
        self.stream_count
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    pub fn sample_count(&self) -> u16 {
        self.sample_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.is_muted = muted;
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn time_received(&self) -> u64 {
        self.time_received
    }

    pub fn set_time_received(&mut self, zeit_us: u64) {
        self.time_received = zeit_us;
    }

    /// Kapazitaet in Samples (ueber alle Streams und Kanaele)
    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Samples eines Kanals eines Streams
    ///
    /// # Panics
    /// Bei ungueltigem Stream- oder Kanal-Index.
    pub fn samples(&self, stream: u16, kanal: u16) -> &[f32] {
        let range = self.bereich(stream, kanal);
        &self.samples[range]
    }

    /// Veraenderbare Samples eines Kanals eines Streams
    ///
    /// # Panics
    /// Bei ungueltigem Stream- oder Kanal-Index.
    pub fn samples_mut(&mut self, stream: u16, kanal: u16) -> &mut [f32] {
        let range = self.bereich(stream, kanal);
        &mut self.samples[range]
    }

    /// Durchschnittlicher Betrag aller Samples eines Streams (0.0 fuer leere Streams)
    pub fn avg_amplitude(&self, stream: u16) -> f32 {
        if stream >= self.stream_count || self.stream_len() == 0 {
            return 0.0;
        }
        let start = stream as usize * self.stream_len();
        let stream_samples = &self.samples[start..start + self.stream_len()];
        let summe: f32 = stream_samples.iter().map(|s| s.abs()).sum();
        summe / stream_samples.len() as f32
    }

    pub fn spatial_tag(&self, stream: u16) -> Option<SpatialTag> {
        self.spatial.get(stream as usize).copied().flatten()
    }

    pub fn set_spatial_tag(&mut self, stream: u16, tag: Option<SpatialTag>) {
        if let Some(slot) = self.spatial.get_mut(stream as usize) {
            *slot = tag;
        }
    }

    /// Traegt der Stream raeumliche Metadaten?
    pub fn has_spatial(&self, stream: u16) -> bool {
        self.spatial_tag(stream).is_some()
    }

    fn stream_len(&self) -> usize {
        self.channel_count as usize * self.sample_count as usize
    }

    fn bereich(&self, stream: u16, kanal: u16) -> std::ops::Range<usize> {
        assert!(
            stream < self.stream_count && kanal < self.channel_count,
            "Stream {stream}/Kanal {kanal} ausserhalb von {}x{}",
            self.stream_count,
            self.channel_count
        );
        let start = (stream as usize * self.channel_count as usize + kanal as usize)
            * self.sample_count as usize;
        start..start + self.sample_count as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_setzt_layout() {
        let mut frame = AudioFrame::neu(4 * 480);
        frame.init(1234, 2, 2, 480, 48_000, true, 7).unwrap();

        assert_eq!(frame.stream_count(), 2);
        assert_eq!(frame.samples(1, 1).len(), 480);
        assert!(frame.is_muted());
        assert_eq!(frame.sequence(), 7);
        assert_eq!(frame.time_received(), 1234);
        assert!(frame.samples(0, 0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn init_ueber_kapazitaet_schlaegt_fehl() {
        let mut frame = AudioFrame::neu(100);
        let ergebnis = frame.init(0, 2, 1, 960, 48_000, false, 0);
        assert!(matches!(
            ergebnis,
            Err(MixerError::StreamKapazitaet {
                benoetigt: 1920,
                kapazitaet: 100
            })
        ));
    }

    #[test]
    fn add_stream_respektiert_kapazitaet() {
        let mut frame = AudioFrame::neu(2 * 960);
        frame.init(0, 0, 1, 960, 48_000, false, 0).unwrap();

        assert!(frame.add_stream());
        assert!(frame.add_stream());
        assert!(!frame.add_stream(), "Dritter Stream passt nicht mehr");
        assert_eq!(frame.stream_count(), 2);
    }

    #[test]
    fn streams_sind_getrennt() {
        let mut frame = AudioFrame::neu(3 * 4);
        frame.init(0, 3, 1, 4, 48_000, false, 0).unwrap();
        frame.samples_mut(1, 0).fill(0.5);

        assert!(frame.samples(0, 0).iter().all(|&s| s == 0.0));
        assert!(frame.samples(1, 0).iter().all(|&s| s == 0.5));
        assert!(frame.samples(2, 0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn durchschnittsamplitude_nutzt_betrag() {
        let mut frame = AudioFrame::neu(4);
        frame.init(0, 1, 1, 4, 48_000, false, 0).unwrap();
        frame
            .samples_mut(0, 0)
            .copy_from_slice(&[0.5, -0.5, 0.25, -0.25]);

        assert!((frame.avg_amplitude(0) - 0.375).abs() < 1e-6);
        assert_eq!(frame.avg_amplitude(3), 0.0, "Unbekannter Stream ist still");
    }

    #[test]
    fn spatial_tag_pro_stream() {
        let mut frame = AudioFrame::neu(2 * 10);
        frame.init(0, 2, 1, 10, 48_000, false, 0).unwrap();
        let tag = SpatialTag::neu(42, [1.0, 0.0, 2.0], [0.0, 1.0, 0.0]);

        frame.set_spatial_tag(1, Some(tag));
        assert!(!frame.has_spatial(0));
        assert_eq!(frame.spatial_tag(1), Some(tag));

        // Ungueltiger Index wird ignoriert
        frame.set_spatial_tag(5, Some(tag));
        assert_eq!(frame.spatial_tag(5), None);
    }

    #[test]
    fn zuruecksetzen_leert_frame() {
        let mut frame = AudioFrame::neu(10);
        frame.init(99, 1, 1, 10, 48_000, true, 3).unwrap();
        frame.zuruecksetzen();

        assert_eq!(frame.stream_count(), 0);
        assert_eq!(frame.sample_count(), 0);
        assert_eq!(frame.sample_rate(), 0);
        assert_eq!(frame.channel_count(), 1);
        assert_eq!(frame.sequence(), 0);
        assert!(!frame.is_muted());
        assert_eq!(frame.max_samples(), 10);
    }
}
