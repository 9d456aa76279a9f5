//! RouterMixer – Rundenschleife des Audio-Routers
//!
//! Jeder eintreffende Frame landet in der Queue seines Teilnehmers und loest
//! danach so viele Runden aus, wie die Bereitschaftspruefung zulaesst
//! (begrenzt durch `max_runden_pro_frame`). Eine Runde:
//!
//! 1. Bereitschaft pruefen, verspaetete Teilnehmer markieren
//! 2. Stream-Anzahl festlegen
//! 3. Eingangs-Frames entnehmen, Ausgabe-Frames aus dem Pool holen
//! 4. Prominente Teilnehmer bestimmen (kleine Session: alle)
//! 5. Repraesentanten fuer den Umgebungs-Mix waehlen
//! 6. Umgebungs-Mix summieren
//! 7. Mix-Minus-Self als Stream 0 fuer jeden bereiten Teilnehmer
//! 8. Prominente Streams an alle anderen durchreichen
//! 9. Verspaetete erhalten den reinen Umgebungs-Mix
//! 10. Runden-Amplitude erfassen
//! 11. Versenden, Frames an den Pool zurueckgeben
//! 12. Queues ausgleichen, Statistik ausgeben
//!
//! Teilnehmer liegen in Beitrittsreihenfolge in einem Vec; alle Runden-Mengen
//! sind Index-Listen in diese Reihenfolge. Der Mixer ist nicht thread-safe,
//! Beitritt/Austritt muessen mit `frame_empfangen` serialisiert werden.

use crate::admission::{self, Bereitschaft};
use crate::balancer::QueueBalancer;
use crate::channel::ParticipantChannel;
use crate::clock::{Clock, SystemClock};
use crate::config::MixerConfig;
use crate::error::{MixerError, MixerResult};
use crate::frame::{AudioFrame, SpatialTag};
use crate::participant::{ParticipantBuffer, ParticipantState};
use crate::pool::FramePool;
use crate::recorder::{DiagnosticRecorder, WavRecorder};
use crate::telemetry::{self, MixerSnapshot, RundenStatistik};
use raumklang_core::ParticipantId;
use std::sync::Arc;

pub struct RouterMixer {
    config: MixerConfig,
    pool: Arc<dyn FramePool>,
    uhr: Arc<dyn Clock>,
    teilnehmer: Vec<ParticipantBuffer>,
    balancer: QueueBalancer,
    statistik: RundenStatistik,
    mix_puffer: Vec<f32>,
    repraesentant: Option<SpatialTag>,
}

impl RouterMixer {
    /// Erstellt einen Mixer mit Standardkonfiguration und Systemuhr
    pub fn neu(
        pool: Arc<dyn FramePool>,
        sample_rate: u32,
        samples_per_packet: u16,
        prominent_cap: u16,
    ) -> MixerResult<Self> {
        Self::mit_config(
            pool,
            MixerConfig::mit_format(sample_rate, samples_per_packet, prominent_cap),
            Arc::new(SystemClock),
        )
    }

    pub fn mit_config(
        pool: Arc<dyn FramePool>,
        config: MixerConfig,
        uhr: Arc<dyn Clock>,
    ) -> MixerResult<Self> {
        config.validieren()?;

        tracing::info!(
            sample_rate = config.sample_rate,
            samples_per_packet = config.samples_per_packet,
            prominent_cap = config.prominent_cap,
            "Audio-Router gestartet"
        );

        Ok(Self {
            balancer: QueueBalancer::neu(&config),
            mix_puffer: vec![0.0; config.samples_per_packet as usize],
            config,
            pool,
            uhr,
            teilnehmer: Vec::new(),
            statistik: RundenStatistik::default(),
            repraesentant: None,
        })
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Teilnehmerverwaltung
    // -----------------------------------------------------------------------

    /// Meldet einen Teilnehmer an (mit WAV-Aufnahme, falls konfiguriert)
    pub fn beitreten(&mut self, kanal: Box<dyn ParticipantChannel>) -> MixerResult<()> {
        let aufnahme = self.config.aufnahme_verzeichnis.as_ref().map(|verzeichnis| {
            let pfad = verzeichnis.join(format!("raumklang_{}.wav", kanal.id().kurz()));
            Box::new(WavRecorder::neu(pfad)) as Box<dyn DiagnosticRecorder>
        });
        self.beitreten_intern(kanal, aufnahme)
    }

    /// Meldet einen Teilnehmer mit eigener Diagnose-Aufnahme an
    pub fn beitreten_mit_aufnahme(
        &mut self,
        kanal: Box<dyn ParticipantChannel>,
        aufnahme: Box<dyn DiagnosticRecorder>,
    ) -> MixerResult<()> {
        self.beitreten_intern(kanal, Some(aufnahme))
    }

    fn beitreten_intern(
        &mut self,
        kanal: Box<dyn ParticipantChannel>,
        aufnahme: Option<Box<dyn DiagnosticRecorder>>,
    ) -> MixerResult<()> {
        let id = kanal.id();
        if self.index_von(&id).is_some() {
            return Err(MixerError::TeilnehmerExistiert(id));
        }

        let mut puffer = ParticipantBuffer::neu(kanal, &self.config);
        if let Some(aufnahme) = aufnahme {
            puffer.aufnahme_starten(aufnahme);
        }
        self.teilnehmer.push(puffer);

        tracing::info!(teilnehmer = %id, anzahl = self.teilnehmer.len(), "Teilnehmer beigetreten");
        Ok(())
    }

    /// Entfernt einen Teilnehmer; gehaltene Frames gehen an den Pool zurueck
    pub fn verlassen(&mut self, id: &ParticipantId) -> MixerResult<()> {
        let idx = self
            .index_von(id)
            .ok_or(MixerError::UnbekannterTeilnehmer(*id))?;

        let mut puffer = self.teilnehmer.remove(idx);
        puffer.leeren(self.pool.as_ref());

        tracing::info!(teilnehmer = %id, anzahl = self.teilnehmer.len(), "Teilnehmer hat die Session verlassen");
        Ok(())
    }

    pub fn teilnehmer_anzahl(&self) -> usize {
        self.teilnehmer.len()
    }

    pub fn teilnehmer(&self, id: &ParticipantId) -> Option<&ParticipantBuffer> {
        self.index_von(id).map(|idx| &self.teilnehmer[idx])
    }

    fn index_von(&self, id: &ParticipantId) -> Option<usize> {
        self.teilnehmer.iter().position(|p| p.id() == *id)
    }

    // -----------------------------------------------------------------------
    // Frame-Eingang
    // -----------------------------------------------------------------------

    /// Nimmt einen Frame entgegen und verarbeitet alle dadurch moeglichen Runden
    ///
    /// Gibt die Anzahl ausgefuehrter Runden zurueck. Frames mit abweichendem
    /// Format, ohne Stream oder von unbekannten Teilnehmern werden abgelehnt
    /// und an den Pool zurueckgegeben.
    pub fn frame_empfangen(&mut self, id: &ParticipantId, frame: AudioFrame) -> MixerResult<usize> {
        let jetzt = self.uhr.jetzt_us();
        self.frame_empfangen_um(id, frame, jetzt)
    }

    pub fn frame_empfangen_um(
        &mut self,
        id: &ParticipantId,
        frame: AudioFrame,
        jetzt_us: u64,
    ) -> MixerResult<usize> {
        if frame.sample_rate() != self.config.sample_rate
            || frame.sample_count() != self.config.samples_per_packet
        {
            let fehler = MixerError::FrameAbweichung {
                erwartet_rate: self.config.sample_rate,
                erhalten_rate: frame.sample_rate(),
                erwartet_samples: self.config.samples_per_packet,
                erhalten_samples: frame.sample_count(),
            };
            tracing::warn!(teilnehmer = %id, fehler = %fehler, "Frame abgelehnt");
            self.pool.release(frame);
            self.statistik.abgelehnt_gesamt += 1;
            return Err(fehler);
        }

        if frame.stream_count() == 0 || frame.channel_count() == 0 {
            let fehler = MixerError::LeererFrame {
                streams: frame.stream_count(),
                kanaele: frame.channel_count(),
            };
            tracing::warn!(teilnehmer = %id, fehler = %fehler, "Frame abgelehnt");
            self.pool.release(frame);
            self.statistik.abgelehnt_gesamt += 1;
            return Err(fehler);
        }

        let Some(idx) = self.index_von(id) else {
            self.pool.release(frame);
            self.statistik.abgelehnt_gesamt += 1;
            return Err(MixerError::UnbekannterTeilnehmer(*id));
        };

        self.teilnehmer[idx].push(jetzt_us, frame);
        Ok(self.runden_verarbeiten(jetzt_us))
    }

    /// Bereitschaft zum aktuellen Zeitpunkt (ohne Seiteneffekte)
    pub fn bereitschaft(&self) -> Bereitschaft {
        admission::bereitschaft_pruefen(&self.teilnehmer, self.config.max_wait_us(), self.uhr.jetzt_us())
    }

    fn runden_verarbeiten(&mut self, jetzt_us: u64) -> usize {
        let limit = self.config.max_runden_pro_frame as usize;
        let mut runden = 0;

        while runden < limit {
            let bereitschaft = admission::bereitschaft_pruefen(
                &self.teilnehmer,
                self.config.max_wait_us(),
                jetzt_us,
            );
            if !bereitschaft.ist_bereit() {
                break;
            }
            self.runde_ausfuehren(&bereitschaft, jetzt_us);
            runden += 1;
        }

        if runden == limit
            && admission::bereitschaft_pruefen(&self.teilnehmer, self.config.max_wait_us(), jetzt_us)
                .ist_bereit()
        {
            tracing::warn!(runden, "Rundenlimit pro Frame erreicht – Rest folgt beim naechsten Frame");
        }
        runden
    }

    // -----------------------------------------------------------------------
    // Runde
    // -----------------------------------------------------------------------

    fn runde_ausfuehren(&mut self, b: &Bereitschaft, jetzt_us: u64) {
        for &idx in &b.verspaetet {
            self.teilnehmer[idx].mark_late();
        }

        let stream_count = self.stream_anzahl(&b.bereit);
        for &idx in b.bereit.iter().chain(&b.verspaetet) {
            let p = &mut self.teilnehmer[idx];
            if let Err(e) = p.runde_vorbereiten(self.pool.as_ref(), stream_count) {
                tracing::error!(teilnehmer = %p.id(), fehler = %e, "Ausgabe-Frame konnte nicht vorbereitet werden");
            }
        }

        let (prominent, gemischt) = self.prominenz_bestimmen(&b.bereit);
        self.repraesentant_waehlen(&gemischt);
        self.mischen(&gemischt);

        let eigenen_entfernen = self.config.remove_self_from_mix;
        for &idx in &b.bereit {
            let p = &mut self.teilnehmer[idx];
            // Prominente sind nicht im Mix
            let entfernen = eigenen_entfernen && !p.is_prominent();
            p.mix_minus_self_hinzufuegen(&self.mix_puffer, self.repraesentant, entfernen);
        }

        self.prominente_durchreichen(&prominent, &b.bereit);

        for &idx in &b.verspaetet {
            self.teilnehmer[idx].spaeten_frame_vorbereiten(&self.mix_puffer, self.repraesentant);
        }

        let amplitude = telemetry::runden_amplitude(
            &self.mix_puffer,
            prominent.iter().map(|&idx| self.teilnehmer[idx].hoerbare_amplitude()),
        );

        for &idx in b.bereit.iter().chain(&b.verspaetet) {
            self.teilnehmer[idx].senden();
        }
        for &idx in b.bereit.iter().chain(&b.verspaetet) {
            self.teilnehmer[idx].frames_zurueckgeben(self.pool.as_ref());
        }

        let verworfen = if self.balancer.ausloesen(&b.tiefen) {
            self.balancer
                .ausgleichen(&mut self.teilnehmer, &b.bereit, &b.tiefen, jetzt_us, self.pool.as_ref())
        } else {
            0
        };

        tracing::trace!(
            bereit = b.bereit.len(),
            verspaetet = b.verspaetet.len(),
            prominent = prominent.len(),
            streams = stream_count,
            amplitude,
            "Runde gemischt"
        );

        self.statistik.runde_erfassen(
            amplitude,
            prominent.len(),
            b.verspaetet.len(),
            verworfen,
            b.tiefen.max,
        );
        let intervall = self.config.statistik_intervall_us();
        self.statistik
            .zusammenfassung_pruefen(jetzt_us, intervall, &mut self.teilnehmer);
    }

    /// 1 Umgebungs-Stream plus ein Slot je raeumlichem Sender, hoechstens `prominent_cap`
    fn stream_anzahl(&self, bereit: &[usize]) -> u16 {
        let cap = self.config.prominent_cap as usize;
        if cap == 0 {
            return 1;
        }
        let sender = self
            .teilnehmer
            .iter()
            .enumerate()
            .filter(|(idx, p)| {
                p.is_sending_spatial()
                    && (p.state() == ParticipantState::Normal || bereit.contains(idx))
            })
            .count();
        1 + sender.min(cap) as u16
    }

    /// Teilt die bereiten Teilnehmer in prominente und gemischte auf
    fn prominenz_bestimmen(&mut self, bereit: &[usize]) -> (Vec<usize>, Vec<usize>) {
        for p in &mut self.teilnehmer {
            p.set_prominent(false);
        }

        let cap = self.config.prominent_cap as usize;
        let mut prominent: Vec<usize> = if cap > 0 && self.teilnehmer.len() <= cap + 1 {
            // Kleine Session: jeder raeumliche Sender wird 1:1 durchgereicht
            bereit
                .iter()
                .copied()
                .filter(|&idx| self.teilnehmer[idx].is_sending_spatial())
                .collect()
        } else {
            let mut sprecher: Vec<(usize, f32)> = Vec::new();
            for &idx in bereit {
                let p = &mut self.teilnehmer[idx];
                if p.speech_erkennen() && p.is_sending_spatial() {
                    sprecher.push((idx, p.eingang_amplitude()));
                }
            }
            // Lauteste zuerst, bei Gleichstand Beitrittsreihenfolge
            sprecher.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            sprecher.truncate(cap);
            sprecher.into_iter().map(|(idx, _)| idx).collect()
        };
        prominent.sort_unstable();

        for &idx in &prominent {
            self.teilnehmer[idx].set_prominent(true);
        }
        let gemischt = bereit
            .iter()
            .copied()
            .filter(|idx| prominent.binary_search(idx).is_err())
            .collect();

        (prominent, gemischt)
    }

    /// Waehlt den raeumlichen Tag des Umgebungs-Mix (mit Hysterese)
    fn repraesentant_waehlen(&mut self, gemischt: &[usize]) {
        let aktuell = self.repraesentant.map(|tag| tag.source_id);
        let mut bester: Option<(f32, SpatialTag)> = None;

        for &idx in gemischt {
            let p = &self.teilnehmer[idx];
            if !p.spricht() {
                continue;
            }
            let Some(tag) = p.eingang().and_then(|f| f.spatial_tag(0)) else {
                continue;
            };
            if Some(tag.source_id) == aktuell {
                // Bisheriger Repraesentant spricht weiter; Position aktualisieren
                self.repraesentant = Some(tag);
                return;
            }
            let amplitude = p.eingang_amplitude();
            if bester.map_or(true, |(a, _)| amplitude > a) {
                bester = Some((amplitude, tag));
            }
        }

        self.repraesentant = bester.map(|(_, tag)| tag);
    }

    /// Summiert Stream 0 aller nicht stummen gemischten Teilnehmer
    fn mischen(&mut self, gemischt: &[usize]) {
        self.mix_puffer.fill(0.0);
        for &idx in gemischt {
            let Some(eingang) = self.teilnehmer[idx].eingang() else {
                continue;
            };
            if eingang.is_muted() {
                continue;
            }
            for (m, &s) in self.mix_puffer.iter_mut().zip(eingang.samples(0, 0)) {
                *m += s;
            }
        }
    }

    /// Reicht jeden prominenten Stream an alle anderen bereiten Teilnehmer durch
    fn prominente_durchreichen(&mut self, prominent: &[usize], bereit: &[usize]) {
        let cap = self.config.prominent_cap as usize;
        let selbst_einschliessen = !self.config.remove_self_from_mix && prominent.len() <= cap;

        for &quelle_idx in prominent {
            let quelle = self.teilnehmer[quelle_idx].eingang_nehmen();
            if let Some(frame) = quelle.as_ref() {
                for &ziel_idx in bereit {
                    if ziel_idx != quelle_idx || selbst_einschliessen {
                        self.teilnehmer[ziel_idx].hrtf_stream_hinzufuegen(frame);
                    }
                }
            }
            self.teilnehmer[quelle_idx].eingang_zuruecklegen(quelle);
        }
    }

    // -----------------------------------------------------------------------
    // Statistik
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> MixerSnapshot {
        MixerSnapshot {
            teilnehmer: self.teilnehmer.iter().map(|p| p.snapshot()).collect(),
            runden_gesamt: self.statistik.runden_gesamt,
            verspaetet_gesamt: self.statistik.verspaetet_gesamt,
            ausgleich_verworfen: self.statistik.ausgleich_verworfen,
            abgelehnt_gesamt: self.statistik.abgelehnt_gesamt,
            letzte_amplitude: self.statistik.letzte_amplitude,
            prominente_streams: self.statistik.prominente_streams,
            max_warteschlange: self.statistik.max_warteschlange,
        }
    }

    /// Repraesentant des Umgebungs-Mix der letzten Runde
    pub fn repraesentant(&self) -> Option<SpatialTag> {
        self.repraesentant
    }
}

impl Drop for RouterMixer {
    fn drop(&mut self) {
        for p in &mut self.teilnehmer {
            p.leeren(self.pool.as_ref());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
