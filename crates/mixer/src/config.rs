//! Mixer-Konfiguration
//!
//! Alle Parameter haben die Standardwerte des Session-Servers, sodass der
//! Mixer ohne Konfigurationsdatei lauffaehig ist. In der Server-Konfiguration
//! entspricht das dem Abschnitt `[mixer]`.

use crate::error::{MixerError, MixerResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Vollstaendige Konfiguration des Audio-Routers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Master-Samplerate aller empfangenen und erzeugten Frames
    pub sample_rate: u32,
    /// Samples pro Frame (pro Kanal)
    pub samples_per_packet: u16,
    /// Maximale Anzahl prominenter (eigenstaendig raeumlicher) Streams
    pub prominent_cap: u16,
    /// Wie lange auf einen verspaeteten Teilnehmer gewartet wird (ms)
    pub max_wait_ms: u64,
    /// Verpasste Runden in Folge, ab denen ein Teilnehmer als hoffnungslos verspaetet gilt
    pub max_consecutive_late: u32,
    /// Differenz max/min Queue-Tiefe, ab der ausgeglichen wird
    pub balance_delta_threshold: u32,
    /// Frames aelter als dieser Wert (ms) werden beim Ausgleich immer verworfen
    pub max_age_before_balance_ms: u64,
    /// Nur Frames leiser als diese Amplitude werden beim Ausgleich verworfen
    pub balance_amplitude_threshold: f32,
    /// Durchschnittsamplitude, ab der ein Frame als Sprache zaehlt
    pub speech_amplitude_threshold: f32,
    /// Sprach-Frames in Folge bis `spricht = true`
    pub speech_packet_threshold: u32,
    /// Stille-Frames in Folge bis `spricht = false`
    pub silence_packet_threshold: u32,
    /// Teilnehmer mit weniger empfangenen Frames gelten als neu
    pub new_participant_packets: u32,
    /// Obergrenze des Verspaetungs-Ausgleichszaehlers
    pub late_compensation_limit: u32,
    /// Eigenen Beitrag aus dem Mix entfernen (false nur zur Diagnose)
    pub remove_self_from_mix: bool,
    /// Intervall der periodischen Statistik-Ausgabe (ms Verarbeitungszeit)
    pub statistik_intervall_ms: u64,
    /// Obergrenze nachgeholter Runden pro eintreffendem Frame
    pub max_runden_pro_frame: u32,
    /// Verzeichnis fuer WAV-Diagnoseaufnahmen (None = keine Aufnahme)
    pub aufnahme_verzeichnis: Option<PathBuf>,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            samples_per_packet: 960, // 20ms bei 48kHz
            prominent_cap: 2,
            max_wait_ms: 250,
            max_consecutive_late: 10,
            balance_delta_threshold: 2,
            max_age_before_balance_ms: 200,
            balance_amplitude_threshold: 0.05,
            speech_amplitude_threshold: 0.0015,
            speech_packet_threshold: 20,
            silence_packet_threshold: 50,
            new_participant_packets: 20,
            late_compensation_limit: 100,
            remove_self_from_mix: true,
            statistik_intervall_ms: 1000,
            max_runden_pro_frame: 64,
            aufnahme_verzeichnis: None,
        }
    }
}

impl MixerConfig {
    /// Standardkonfiguration mit abweichendem Master-Format
    pub fn mit_format(sample_rate: u32, samples_per_packet: u16, prominent_cap: u16) -> Self {
        Self {
            sample_rate,
            samples_per_packet,
            prominent_cap,
            ..Self::default()
        }
    }

    /// Prueft die Konfiguration auf unbrauchbare Werte
    pub fn validieren(&self) -> MixerResult<()> {
        if self.sample_rate == 0 {
            return Err(MixerError::Konfiguration("sample_rate darf nicht 0 sein".into()));
        }
        if self.samples_per_packet == 0 {
            return Err(MixerError::Konfiguration(
                "samples_per_packet darf nicht 0 sein".into(),
            ));
        }
        if self.max_runden_pro_frame == 0 {
            return Err(MixerError::Konfiguration(
                "max_runden_pro_frame darf nicht 0 sein".into(),
            ));
        }
        if self.max_consecutive_late == 0 {
            return Err(MixerError::Konfiguration(
                "max_consecutive_late darf nicht 0 sein".into(),
            ));
        }
        Ok(())
    }

    /// Wartezeit auf verspaetete Teilnehmer in Mikrosekunden
    pub fn max_wait_us(&self) -> u64 {
        self.max_wait_ms.saturating_mul(1000)
    }

    /// Maximales Frame-Alter vor dem Ausgleich in Mikrosekunden
    pub fn max_age_before_balance_us(&self) -> u64 {
        self.max_age_before_balance_ms.saturating_mul(1000)
    }

    /// Statistik-Intervall in Mikrosekunden
    pub fn statistik_intervall_us(&self) -> u64 {
        self.statistik_intervall_ms.saturating_mul(1000)
    }
}
