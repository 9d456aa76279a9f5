//! Teilnehmer-Puffer – Jitter Buffer und Zustandsmaschine pro Teilnehmer
//!
//! Jeder angemeldete Teilnehmer besitzt genau einen `ParticipantBuffer`. Er
//! haelt die FIFO-Queue empfangener Frames, den Verspaetungszustand, die
//! Sprach-Erkennung und die Frames der laufenden Runde (Eingang/Ausgang).
//!
//! ## Zustandsmaschine
//! ```text
//! StartingUp --push--> FirstPacket --push--> Normal
//! Normal --(max_consecutive_late verpasste Runden)--> HopelesslyLate
//! jeder Zustand --push--> Normal   (ausser StartingUp -> FirstPacket)
//! ```
//! Es gibt keinen Endzustand; die Lebensdauer endet nur durch `verlassen`.
//!
//! Die Runden-Frames sind nur zwischen `runde_vorbereiten` und
//! `frames_zurueckgeben` gueltig. Der Puffer ist nicht thread-safe.

use crate::channel::ParticipantChannel;
use crate::config::MixerConfig;
use crate::error::MixerResult;
use crate::frame::{AudioFrame, SpatialTag};
use crate::pool::FramePool;
use crate::recorder::DiagnosticRecorder;
use crate::speech::SpeechDetector;
use crate::telemetry::TeilnehmerSnapshot;
use raumklang_core::ParticipantId;
use std::collections::VecDeque;

/// Verspaetungszustand eines Teilnehmers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantState {
    /// Noch kein Frame empfangen – auf diesen Teilnehmer wird nie gewartet
    StartingUp,
    /// Erster Frame empfangen – wird ggf. eine Runde zurueckgehalten
    FirstPacket,
    /// Frames treffen rechtzeitig ein
    Normal,
    /// Zu viele verpasste Runden – blockiert die anderen nicht mehr
    HopelesslyLate,
}

/// Jitter Buffer eines Teilnehmers
pub struct ParticipantBuffer {
    id: ParticipantId,
    kanal: Box<dyn ParticipantChannel>,
    state: ParticipantState,
    queue: VecDeque<AudioFrame>,

    sample_rate: u32,
    samples_per_packet: u16,
    max_consecutive_late: u32,
    new_participant_packets: u32,
    late_compensation_limit: u32,

    /// Verpasste Runden seit dem letzten entnommenen Frame
    verspaetet_in_folge: u32,
    /// Verpasste Runden, die der Queue-Ausgleich noch wettmachen darf
    ausgleich_offen: u32,
    letzter_frame_stumm: bool,
    is_prominent: bool,
    is_sending_spatial: bool,
    speech: SpeechDetector,

    // Rundendaten
    eingang: Option<AudioFrame>,
    ausgang: Option<AudioFrame>,
    eingang_amplitude: f32,

    // Statistik
    pakete_gesamt: u64,
    verspaetet_gesamt: u64,
    erster_empfang_us: u64,
    letzter_empfang_us: u64,
    max_abstand_us: u64,

    aufnahme: Option<Box<dyn DiagnosticRecorder>>,
}

impl ParticipantBuffer {
    /// Erstellt den Puffer fuer einen neu beigetretenen Teilnehmer
    pub fn neu(kanal: Box<dyn ParticipantChannel>, config: &MixerConfig) -> Self {
        Self {
            id: kanal.id(),
            kanal,
            state: ParticipantState::StartingUp,
            queue: VecDeque::new(),
            sample_rate: config.sample_rate,
            samples_per_packet: config.samples_per_packet,
            max_consecutive_late: config.max_consecutive_late.max(1),
            new_participant_packets: config.new_participant_packets,
            late_compensation_limit: config.late_compensation_limit,
            verspaetet_in_folge: 0,
            ausgleich_offen: 0,
            letzter_frame_stumm: false,
            is_prominent: false,
            is_sending_spatial: false,
            speech: SpeechDetector::neu(
                config.speech_amplitude_threshold,
                config.speech_packet_threshold,
                config.silence_packet_threshold,
            ),
            eingang: None,
            ausgang: None,
            eingang_amplitude: 0.0,
            pakete_gesamt: 0,
            verspaetet_gesamt: 0,
            erster_empfang_us: 0,
            letzter_empfang_us: 0,
            max_abstand_us: 0,
            aufnahme: None,
        }
    }

    /// Startet eine Diagnose-Aufnahme der Ausgabe; Fehler deaktivieren sie nur
    pub fn aufnahme_starten(&mut self, mut aufnahme: Box<dyn DiagnosticRecorder>) {
        match aufnahme.write_header(self.sample_rate, 1) {
            Ok(()) => self.aufnahme = Some(aufnahme),
            Err(e) => {
                tracing::warn!(teilnehmer = %self.id, fehler = %e, "Aufnahme konnte nicht gestartet werden");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    /// Fuegt einen empfangenen Frame hinten an und aktualisiert den Zustand
    pub fn push(&mut self, jetzt_us: u64, mut frame: AudioFrame) {
        frame.set_time_received(jetzt_us);

        if self.letzter_empfang_us != 0 {
            let abstand = jetzt_us.saturating_sub(self.letzter_empfang_us).max(1);
            if abstand > self.max_abstand_us {
                self.max_abstand_us = abstand;
            }
        }
        self.letzter_empfang_us = jetzt_us;
        self.pakete_gesamt += 1;

        // Eingehende Frames tragen nur einen Stream
        self.is_sending_spatial = frame.has_spatial(0) && self.kanal.supports_spatial();
        self.queue.push_back(frame);

        let vorher = self.state;
        self.state = match self.state {
            ParticipantState::StartingUp => {
                self.erster_empfang_us = jetzt_us;
                ParticipantState::FirstPacket
            }
            ParticipantState::FirstPacket
            | ParticipantState::Normal
            | ParticipantState::HopelesslyLate => ParticipantState::Normal,
        };
        if vorher == ParticipantState::HopelesslyLate {
            tracing::debug!(teilnehmer = %self.id, "Teilnehmer wieder im Takt");
        }
    }

    /// Aeltester wartender Frame
    pub fn peek(&self) -> Option<&AudioFrame> {
        self.queue.front()
    }

    /// Entnimmt den aeltesten Frame
    pub fn pop(&mut self) -> Option<AudioFrame> {
        let frame = self.queue.pop_front()?;
        self.letzter_frame_stumm = frame.is_muted();
        self.verspaetet_in_folge = 0;
        Some(frame)
    }

    pub fn queue_laenge(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    // -----------------------------------------------------------------------
    // Zustand
    // -----------------------------------------------------------------------

    pub fn id(&self) -> ParticipantId {
        self.id
    }

    pub fn state(&self) -> ParticipantState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.kanal.is_connected()
    }

    /// Neue Teilnehmer haben noch nicht genug Frames fuer stabile Statistik
    pub fn is_new(&self) -> bool {
        self.pakete_gesamt < self.new_participant_packets as u64
    }

    /// Letzter Frame stumm oder Mikrofon stummgeschaltet
    pub fn has_been_muted(&self) -> bool {
        self.letzter_frame_stumm || self.kanal.is_muted()
    }

    /// Lohnt es sich, auf den naechsten Frame dieses Teilnehmers zu warten?
    pub fn is_wait_candidate(&self) -> bool {
        self.state == ParticipantState::Normal
            && self.is_empty()
            && !self.is_new()
            && !self.has_been_muted()
    }

    pub fn is_hopelessly_late(&self) -> bool {
        self.state == ParticipantState::HopelesslyLate
    }

    pub fn is_sending_spatial(&self) -> bool {
        self.is_sending_spatial
    }

    pub fn is_prominent(&self) -> bool {
        self.is_prominent
    }

    pub fn set_prominent(&mut self, prominent: bool) {
        self.is_prominent = prominent;
    }

    pub fn spricht(&self) -> bool {
        self.speech.spricht()
    }

    pub fn ausgleich_offen(&self) -> u32 {
        self.ausgleich_offen
    }

    pub fn verspaetet_in_folge(&self) -> u32 {
        self.verspaetet_in_folge
    }

    /// Markiert eine verpasste Runde (leere Queue, Runde laeuft ohne ihn)
    pub fn mark_late(&mut self) {
        self.verspaetet_gesamt += 1;
        if self.ausgleich_offen < self.late_compensation_limit {
            self.ausgleich_offen += 1;
        }
        self.verspaetet_in_folge = self.verspaetet_in_folge.saturating_add(1);

        if self.verspaetet_in_folge >= self.max_consecutive_late
            && self.state != ParticipantState::HopelesslyLate
        {
            self.state = ParticipantState::HopelesslyLate;
            tracing::debug!(
                teilnehmer = %self.id,
                verpasst = self.verspaetet_in_folge,
                "Teilnehmer hoffnungslos verspaetet"
            );
        }
    }

    /// Sprach-Erkennung fuer die aktuelle Runde; nur im Zustand Normal aktiv
    pub fn speech_erkennen(&mut self) -> bool {
        if self.state == ParticipantState::Normal {
            self.speech.verarbeiten(self.eingang_amplitude);
        }
        self.speech.spricht()
    }

    // -----------------------------------------------------------------------
    // Runde
    // -----------------------------------------------------------------------

    /// Entnimmt den Eingangs-Frame der Runde (falls vorhanden) und holt einen
    /// Ausgabe-Frame fuer `stream_count` Streams aus dem Pool
    pub fn runde_vorbereiten(&mut self, pool: &dyn FramePool, stream_count: u16) -> MixerResult<()> {
        let (zeit, sequenz) = match self.pop() {
            Some(frame) => {
                self.eingang_amplitude = frame.avg_amplitude(0);
                let werte = (frame.time_received(), frame.sequence());
                self.eingang = Some(frame);
                werte
            }
            None => {
                self.eingang_amplitude = 0.0;
                self.eingang = None;
                (0, 0)
            }
        };

        let kanaele = 1u16;
        let gesamt = stream_count.max(1) as usize * kanaele as usize * self.samples_per_packet as usize;
        let mut ausgang = pool.acquire(gesamt);
        let ergebnis = ausgang.init(
            zeit,
            0,
            kanaele,
            self.samples_per_packet,
            self.sample_rate,
            false,
            sequenz,
        );
        self.ausgang = Some(ausgang);
        ergebnis
    }

    pub fn eingang(&self) -> Option<&AudioFrame> {
        self.eingang.as_ref()
    }

    pub fn ausgang(&self) -> Option<&AudioFrame> {
        self.ausgang.as_ref()
    }

    /// Durchschnittsamplitude des Eingangs-Frames dieser Runde
    pub fn eingang_amplitude(&self) -> f32 {
        self.eingang_amplitude
    }

    /// Hoerbare Amplitude des Eingangs (0 bei stummem Frame)
    pub fn hoerbare_amplitude(&self) -> f32 {
        match &self.eingang {
            Some(frame) if !frame.is_muted() => self.eingang_amplitude,
            _ => 0.0,
        }
    }

    pub(crate) fn eingang_nehmen(&mut self) -> Option<AudioFrame> {
        self.eingang.take()
    }

    pub(crate) fn eingang_zuruecklegen(&mut self, frame: Option<AudioFrame>) {
        self.eingang = frame;
    }

    /// Haengt den Umgebungs-Mix als Stream an, ggf. ohne den eigenen Beitrag
    pub fn mix_minus_self_hinzufuegen(
        &mut self,
        mix: &[f32],
        tag: Option<SpatialTag>,
        eigenen_entfernen: bool,
    ) {
        let Some(ausgang) = self.ausgang.as_mut() else {
            return;
        };
        let stream = ausgang.stream_count();
        if !ausgang.add_stream() {
            tracing::trace!(teilnehmer = %self.id, "Kein Platz fuer Umgebungs-Stream");
            return;
        }
        ausgang.set_spatial_tag(stream, tag);
        let ziel = ausgang.samples_mut(stream, 0);

        match &self.eingang {
            Some(eingang) if eigenen_entfernen && !eingang.is_muted() => {
                let eigen = eingang.samples(0, 0);
                for ((z, &m), &e) in ziel.iter_mut().zip(mix).zip(eigen) {
                    *z = (m - e).clamp(-1.0, 1.0);
                }
            }
            _ => {
                for (z, &m) in ziel.iter_mut().zip(mix) {
                    *z = m.clamp(-1.0, 1.0);
                }
            }
        }
    }

    /// Haengt den Stream eines prominenten Teilnehmers als raeumlichen Stream an
    pub fn hrtf_stream_hinzufuegen(&mut self, quelle: &AudioFrame) {
        let Some(ausgang) = self.ausgang.as_mut() else {
            return;
        };
        let stream = ausgang.stream_count();
        if !ausgang.add_stream() {
            tracing::trace!(teilnehmer = %self.id, "Kein Platz fuer HRTF-Stream");
            return;
        }
        ausgang.set_spatial_tag(stream, quelle.spatial_tag(0));

        // Stumme Quelle -> Stream bleibt still (add_stream liefert Nullen)
        if !quelle.is_muted() {
            let ziel = ausgang.samples_mut(stream, 0);
            for (z, &q) in ziel.iter_mut().zip(quelle.samples(0, 0)) {
                *z = q.clamp(-1.0, 1.0);
            }
        }
    }

    /// Verspaetete Teilnehmer erhalten den reinen Umgebungs-Mix
    pub fn spaeten_frame_vorbereiten(&mut self, mix: &[f32], tag: Option<SpatialTag>) {
        self.mix_minus_self_hinzufuegen(mix, tag, false);
    }

    /// Versendet den Ausgabe-Frame der Runde
    pub fn senden(&mut self) {
        let Some(ausgang) = self.ausgang.as_mut() else {
            return;
        };
        if ausgang.stream_count() == 0 {
            ausgang.add_stream();
        }

        if let Some(aufnahme) = self.aufnahme.as_mut() {
            if let Err(e) = aufnahme.write_samples(ausgang.samples(0, 0)) {
                tracing::warn!(teilnehmer = %self.id, fehler = %e, "Aufnahme deaktiviert");
                self.aufnahme = None;
            }
        }

        self.kanal.send(ausgang);
    }

    /// Gibt Eingangs- und Ausgabe-Frame der Runde an den Pool zurueck
    pub fn frames_zurueckgeben(&mut self, pool: &dyn FramePool) {
        if let Some(frame) = self.eingang.take() {
            pool.release(frame);
        }
        if let Some(frame) = self.ausgang.take() {
            pool.release(frame);
        }
    }

    // -----------------------------------------------------------------------
    // Queue-Ausgleich
    // -----------------------------------------------------------------------

    /// Kuerzt die Queue Richtung `ziel` und gibt die Anzahl verworfener Frames zurueck
    ///
    /// Der aelteste Frame wird verworfen, wenn er vor `aeltester_erlaubt_us`
    /// empfangen wurde, oder wenn er leiser als `amplituden_schwelle` ist und
    /// noch Verspaetung auszugleichen ist (bzw. der Teilnehmer neu ist).
    /// Sobald beides nicht zutrifft, endet der Ausgleich – das Ziel wird dann
    /// bewusst nicht erreicht.
    pub fn queue_ausgleichen(
        &mut self,
        ziel: usize,
        aeltester_erlaubt_us: u64,
        amplituden_schwelle: f32,
        pool: &dyn FramePool,
    ) -> usize {
        let mut verworfen = 0;

        while self.queue.len() > ziel {
            let Some(vorne) = self.queue.front() else {
                break;
            };

            let verwerfen = if vorne.time_received() < aeltester_erlaubt_us {
                tracing::debug!(teilnehmer = %self.id, "Queue-Ausgleich: Frame zu alt");
                true
            } else if (self.ausgleich_offen > 0 || self.is_new())
                && vorne.avg_amplitude(0) < amplituden_schwelle
            {
                if !self.is_new() && self.ausgleich_offen > 0 {
                    self.ausgleich_offen -= 1;
                }
                tracing::debug!(teilnehmer = %self.id, "Queue-Ausgleich: stiller Frame");
                true
            } else {
                false
            };

            if !verwerfen {
                break;
            }
            if let Some(frame) = self.queue.pop_front() {
                pool.release(frame);
                verworfen += 1;
            }
        }

        verworfen
    }

    // -----------------------------------------------------------------------
    // Lebensende und Statistik
    // -----------------------------------------------------------------------

    /// Gibt alle gehaltenen Frames zurueck und schliesst die Aufnahme ab
    pub fn leeren(&mut self, pool: &dyn FramePool) {
        self.frames_zurueckgeben(pool);
        for frame in self.queue.drain(..) {
            pool.release(frame);
        }
        if let Some(mut aufnahme) = self.aufnahme.take() {
            if let Err(e) = aufnahme.finalize() {
                tracing::warn!(teilnehmer = %self.id, fehler = %e, "Aufnahme nicht abgeschlossen");
            }
        }
    }

    /// Setzt den maximalen Paketabstand nach einer Statistik-Ausgabe zurueck
    pub fn max_abstand_zuruecksetzen(&mut self) {
        self.max_abstand_us = 0;
    }

    pub fn snapshot(&self) -> TeilnehmerSnapshot {
        TeilnehmerSnapshot {
            id: self.id,
            verbunden: self.is_connected(),
            zustand: self.state,
            queue_laenge: self.queue.len(),
            max_abstand_ms: self.max_abstand_us as f32 / 1000.0,
            ausgleich_offen: self.ausgleich_offen,
            spricht: self.spricht(),
            prominent: self.is_prominent,
            sendet_spatial: self.is_sending_spatial,
            pakete_gesamt: self.pakete_gesamt,
            verspaetet_gesamt: self.verspaetet_gesamt,
            erster_empfang_us: self.erster_empfang_us,
            letzter_empfang_us: self.letzter_empfang_us,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pool::SharedFramePool;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    pub(crate) const SPP: u16 = 4;

    /// Kanal-Attrappe, die versendete Frames sammelt
    #[derive(Clone)]
    pub(crate) struct TestKanal {
        pub id: ParticipantId,
        pub verbunden: Arc<AtomicBool>,
        pub stumm: Arc<AtomicBool>,
        pub spatial: bool,
        pub gesendet: Arc<Mutex<Vec<AudioFrame>>>,
    }

    impl TestKanal {
        pub fn neu(spatial: bool) -> Self {
            Self {
                id: ParticipantId::new(),
                verbunden: Arc::new(AtomicBool::new(true)),
                stumm: Arc::new(AtomicBool::new(false)),
                spatial,
                gesendet: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ParticipantChannel for TestKanal {
        fn id(&self) -> ParticipantId {
            self.id
        }
        fn is_connected(&self) -> bool {
            self.verbunden.load(Ordering::Relaxed)
        }
        fn is_muted(&self) -> bool {
            self.stumm.load(Ordering::Relaxed)
        }
        fn supports_spatial(&self) -> bool {
            self.spatial
        }
        fn send(&self, frame: &AudioFrame) {
            self.gesendet.lock().push(frame.clone());
        }
    }

    pub(crate) fn test_config() -> MixerConfig {
        MixerConfig {
            samples_per_packet: SPP,
            speech_packet_threshold: 2,
            silence_packet_threshold: 2,
            new_participant_packets: 3,
            ..MixerConfig::default()
        }
    }

    pub(crate) fn konstanter_frame(wert: f32, tag: Option<SpatialTag>) -> AudioFrame {
        let mut frame = AudioFrame::neu(SPP as usize);
        frame.init(0, 1, 1, SPP, 48_000, false, 0).unwrap();
        frame.samples_mut(0, 0).fill(wert);
        frame.set_spatial_tag(0, tag);
        frame
    }

    fn puffer(spatial: bool) -> (ParticipantBuffer, TestKanal) {
        let kanal = TestKanal::neu(spatial);
        (ParticipantBuffer::neu(Box::new(kanal.clone()), &test_config()), kanal)
    }

    #[test]
    fn zustandsmaschine_beim_push() {
        let (mut p, _) = puffer(false);
        assert_eq!(p.state(), ParticipantState::StartingUp);

        p.push(100, konstanter_frame(0.0, None));
        assert_eq!(p.state(), ParticipantState::FirstPacket);
        assert_eq!(p.snapshot().erster_empfang_us, 100);

        p.push(200, konstanter_frame(0.0, None));
        assert_eq!(p.state(), ParticipantState::Normal);
    }

    #[test]
    fn hoffnungslos_verspaetet_und_zurueck() {
        let (mut p, _) = puffer(false);
        p.push(1, konstanter_frame(0.0, None));
        p.push(2, konstanter_frame(0.0, None));
        p.pop();
        p.pop();

        for runde in 1..10 {
            p.mark_late();
            assert_eq!(p.state(), ParticipantState::Normal, "Runde {runde}");
        }
        p.mark_late();
        assert!(p.is_hopelessly_late());

        p.push(3, konstanter_frame(0.0, None));
        assert_eq!(p.state(), ParticipantState::Normal);
    }

    #[test]
    fn pop_setzt_verspaetungsfolge_zurueck() {
        let (mut p, _) = puffer(false);
        p.push(1, konstanter_frame(0.0, None));
        p.mark_late();
        p.mark_late();
        assert_eq!(p.verspaetet_in_folge(), 2);
        p.pop();
        assert_eq!(p.verspaetet_in_folge(), 0);
        assert_eq!(p.ausgleich_offen(), 2, "Ausgleich bleibt offen");
    }

    #[test]
    fn warte_kandidat_bedingungen() {
        let (mut p, kanal) = puffer(false);
        for t in 1..=3 {
            p.push(t, konstanter_frame(0.1, None));
        }
        assert!(!p.is_wait_candidate(), "Volle Queue ist kein Kandidat");

        while p.pop().is_some() {}
        assert!(p.is_wait_candidate());

        kanal.stumm.store(true, Ordering::Relaxed);
        assert!(!p.is_wait_candidate(), "Stummgeschaltete werden nicht abgewartet");
    }

    #[test]
    fn neuer_teilnehmer_ist_kein_kandidat() {
        let (mut p, _) = puffer(false);
        p.push(1, konstanter_frame(0.1, None));
        p.push(2, konstanter_frame(0.1, None));
        while p.pop().is_some() {}
        assert_eq!(p.state(), ParticipantState::Normal);
        assert!(p.is_new());
        assert!(!p.is_wait_candidate());
    }

    #[test]
    fn spatial_nur_mit_tag_und_unterstuetzung() {
        let tag = SpatialTag::neu(7, [0.0; 3], [0.0; 3]);

        let (mut p, _) = puffer(true);
        p.push(1, konstanter_frame(0.1, Some(tag)));
        assert!(p.is_sending_spatial());
        p.push(2, konstanter_frame(0.1, None));
        assert!(!p.is_sending_spatial(), "Abgeleitet vom letzten Frame");

        let (mut p, _) = puffer(false);
        p.push(1, konstanter_frame(0.1, Some(tag)));
        assert!(!p.is_sending_spatial());
    }

    #[test]
    fn maximaler_paketabstand() {
        let (mut p, _) = puffer(false);
        p.push(1_000, konstanter_frame(0.0, None));
        p.push(21_000, konstanter_frame(0.0, None));
        p.push(61_000, konstanter_frame(0.0, None));
        p.push(61_000, konstanter_frame(0.0, None));

        let snap = p.snapshot();
        assert!((snap.max_abstand_ms - 40.0).abs() < 1e-3);
        assert_eq!(snap.pakete_gesamt, 4);

        p.max_abstand_zuruecksetzen();
        assert_eq!(p.snapshot().max_abstand_ms, 0.0);
    }

    #[test]
    fn mix_minus_self_entfernt_eigenen_beitrag() {
        let pool = SharedFramePool::neu(SPP as usize);
        let (mut p, _) = puffer(false);
        p.push(1, konstanter_frame(0.25, None));
        p.runde_vorbereiten(&pool, 1).unwrap();

        let mix = vec![0.75; SPP as usize];
        p.mix_minus_self_hinzufuegen(&mix, None, true);

        let ausgang = p.ausgang().unwrap();
        assert_eq!(ausgang.stream_count(), 1);
        assert!(ausgang.samples(0, 0).iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn mix_minus_self_clampt_und_ignoriert_stumme() {
        let pool = SharedFramePool::neu(SPP as usize);
        let (mut p, _) = puffer(false);
        let mut frame = konstanter_frame(0.5, None);
        frame.set_muted(true);
        p.push(1, frame);
        p.runde_vorbereiten(&pool, 1).unwrap();

        let mix = vec![1.5; SPP as usize];
        p.mix_minus_self_hinzufuegen(&mix, None, true);
        let ausgang = p.ausgang().unwrap();
        assert!(ausgang.samples(0, 0).iter().all(|&s| s == 1.0));
    }

    #[test]
    fn hrtf_stream_kopiert_quelle_mit_tag() {
        let pool = SharedFramePool::neu(SPP as usize);
        let (mut p, _) = puffer(true);
        p.push(1, konstanter_frame(0.0, None));
        p.runde_vorbereiten(&pool, 2).unwrap();
        p.mix_minus_self_hinzufuegen(&[0.0; SPP as usize], None, true);

        let tag = SpatialTag::neu(9, [1.0, 2.0, 3.0], [0.0; 3]);
        let quelle = konstanter_frame(-2.0, Some(tag));
        p.hrtf_stream_hinzufuegen(&quelle);

        let ausgang = p.ausgang().unwrap();
        assert_eq!(ausgang.stream_count(), 2);
        assert_eq!(ausgang.spatial_tag(1), Some(tag));
        assert!(ausgang.samples(1, 0).iter().all(|&s| s == -1.0));

        // Kein Platz fuer einen dritten Stream
        p.hrtf_stream_hinzufuegen(&quelle);
        assert_eq!(p.ausgang().unwrap().stream_count(), 2);
    }

    #[test]
    fn stumme_hrtf_quelle_bleibt_still() {
        let pool = SharedFramePool::neu(SPP as usize);
        let (mut p, _) = puffer(true);
        p.runde_vorbereiten(&pool, 1).unwrap();

        let mut quelle = konstanter_frame(0.5, None);
        quelle.set_muted(true);
        p.hrtf_stream_hinzufuegen(&quelle);
        assert!(p.ausgang().unwrap().samples(0, 0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn senden_und_zurueckgeben() {
        let pool = SharedFramePool::neu(SPP as usize);
        let (mut p, kanal) = puffer(false);
        p.push(1, pool.acquire(SPP as usize));
        p.runde_vorbereiten(&pool, 1).unwrap();

        // Ohne Streams wird beim Senden ein stiller Stream ergaenzt
        p.senden();
        p.frames_zurueckgeben(&pool);

        let gesendet = kanal.gesendet.lock();
        assert_eq!(gesendet.len(), 1);
        assert_eq!(gesendet[0].stream_count(), 1);
        assert!(p.eingang().is_none() && p.ausgang().is_none());
    }

    #[test]
    fn ausgleich_verwirft_alte_frames() {
        let pool = SharedFramePool::neu(SPP as usize);
        let (mut p, _) = puffer(false);
        for t in [100, 200, 300, 400, 500] {
            p.push(t, konstanter_frame(0.9, None));
        }

        // Frames vor t=250 sind zu alt, laute juengere bleiben
        let verworfen = p.queue_ausgleichen(2, 250, 0.05, &pool);
        assert_eq!(verworfen, 2);
        assert_eq!(p.queue_laenge(), 3);
    }

    #[test]
    fn ausgleich_verwirft_nur_leise_frames() {
        let pool = SharedFramePool::neu(SPP as usize);
        let config = MixerConfig {
            new_participant_packets: 20,
            ..test_config()
        };
        let mut p = ParticipantBuffer::neu(Box::new(TestKanal::neu(false)), &config);
        // Teilnehmer ist neu -> leise Frames duerfen ohne offene Verspaetung weg
        p.push(10, konstanter_frame(0.01, None));
        p.push(20, konstanter_frame(0.9, None));
        p.push(30, konstanter_frame(0.01, None));
        p.push(40, konstanter_frame(0.01, None));

        let verworfen = p.queue_ausgleichen(2, 0, 0.05, &pool);
        assert_eq!(verworfen, 1, "Stoppt am lauten Frame");
        assert_eq!(p.queue_laenge(), 3);
        assert!(p.peek().unwrap().avg_amplitude(0) > 0.5);
    }

    #[test]
    fn ausgleich_braucht_offene_verspaetung() {
        let pool = SharedFramePool::neu(SPP as usize);
        let (mut p, _) = puffer(false);
        for t in 1..=6 {
            p.push(t, konstanter_frame(0.0, None));
        }
        assert!(!p.is_new());

        // Keine Verspaetung offen -> nichts zu kompensieren
        assert_eq!(p.queue_ausgleichen(2, 0, 0.05, &pool), 0);

        p.mark_late();
        assert_eq!(p.queue_ausgleichen(2, 0, 0.05, &pool), 1);
        assert_eq!(p.ausgleich_offen(), 0);
        assert_eq!(p.queue_laenge(), 5);
    }

    #[test]
    fn ausgleich_zaehler_ist_begrenzt() {
        let config = MixerConfig {
            late_compensation_limit: 3,
            ..test_config()
        };
        let mut p = ParticipantBuffer::neu(Box::new(TestKanal::neu(false)), &config);
        for _ in 0..10 {
            p.mark_late();
        }
        assert_eq!(p.ausgleich_offen(), 3);
    }

    #[test]
    fn leeren_gibt_alles_an_den_pool() {
        let pool = SharedFramePool::neu(SPP as usize);
        let (mut p, _) = puffer(false);
        for t in 1..=3 {
            p.push(t, pool.acquire(SPP as usize));
        }
        p.runde_vorbereiten(&pool, 1).unwrap();
        assert_eq!(pool.statistik().ausgeliehen, 4);

        p.leeren(&pool);
        assert_eq!(pool.statistik().ausgeliehen, 0);
        assert!(p.is_empty());
    }

    #[test]
    fn sprach_erkennung_nur_im_normalzustand() {
        let pool = SharedFramePool::neu(SPP as usize);
        let (mut p, _) = puffer(false);

        // FirstPacket: Erkennung laeuft nicht
        p.push(1, konstanter_frame(0.5, None));
        p.runde_vorbereiten(&pool, 1).unwrap();
        assert!(!p.speech_erkennen());
        p.frames_zurueckgeben(&pool);

        for t in 2..=3 {
            p.push(t, konstanter_frame(0.5, None));
            p.runde_vorbereiten(&pool, 1).unwrap();
            p.speech_erkennen();
            p.frames_zurueckgeben(&pool);
        }
        assert!(p.spricht(), "Zwei laute Normal-Runden (Schwelle 2)");
    }
}
