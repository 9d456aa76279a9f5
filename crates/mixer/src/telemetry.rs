//! Runden-Statistik und Snapshots
//!
//! Der Mixer fuehrt Zaehler ueber alle Runden und gibt in festen Abstaenden
//! (gemessen in Verarbeitungszeit) eine Zusammenfassung ueber `tracing` aus.
//! Snapshots sind reine Werte und koennen an Metrik-Exporter weitergereicht
//! werden.

use crate::participant::{ParticipantBuffer, ParticipantState};
use raumklang_core::ParticipantId;
use serde::Serialize;
use std::fmt::Write as _;

/// Zustand eines Teilnehmers zum Zeitpunkt des Snapshots
#[derive(Debug, Clone, Serialize)]
pub struct TeilnehmerSnapshot {
    pub id: ParticipantId,
    pub verbunden: bool,
    #[serde(serialize_with = "zustand_serialisieren")]
    pub zustand: ParticipantState,
    pub queue_laenge: usize,
    pub max_abstand_ms: f32,
    pub ausgleich_offen: u32,
    pub spricht: bool,
    pub prominent: bool,
    pub sendet_spatial: bool,
    pub pakete_gesamt: u64,
    pub verspaetet_gesamt: u64,
    pub erster_empfang_us: u64,
    pub letzter_empfang_us: u64,
}

fn zustand_serialisieren<S: serde::Serializer>(
    zustand: &ParticipantState,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_str(zustand_name(*zustand))
}

fn zustand_name(zustand: ParticipantState) -> &'static str {
    match zustand {
        ParticipantState::StartingUp => "starting_up",
        ParticipantState::FirstPacket => "first_packet",
        ParticipantState::Normal => "normal",
        ParticipantState::HopelesslyLate => "hopelessly_late",
    }
}

/// Gesamtzustand des Mixers
#[derive(Debug, Clone, Default, Serialize)]
pub struct MixerSnapshot {
    pub teilnehmer: Vec<TeilnehmerSnapshot>,
    pub runden_gesamt: u64,
    pub verspaetet_gesamt: u64,
    pub ausgleich_verworfen: u64,
    pub abgelehnt_gesamt: u64,
    /// Runden-Amplitude der letzten Runde
    pub letzte_amplitude: f32,
    /// Prominente Streams der letzten Runde
    pub prominente_streams: usize,
    /// Groesste Queue-Tiefe der letzten Runde
    pub max_warteschlange: u32,
}

impl MixerSnapshot {
    /// Einzeilige Zusammenfassung fuer Logs
    pub fn zusammenfassung(&self) -> String {
        let mut zeile = String::new();
        for t in &self.teilnehmer {
            let _ = write!(
                zeile,
                "{}: {} queue={} gap={:.1}ms late={} pakete={} {}{}; ",
                t.id.kurz(),
                if t.verbunden { "verbunden" } else { "getrennt" },
                t.queue_laenge,
                t.max_abstand_ms,
                t.ausgleich_offen,
                t.pakete_gesamt,
                zustand_name(t.zustand),
                if t.spricht { " spricht" } else { "" },
            );
        }
        zeile
    }
}

/// Runden-Amplitude: (mittlerer Betrag des Mix + Summe der prominenten
/// Eingangsamplituden) / (Anzahl prominenter + 1)
pub fn runden_amplitude(mix: &[f32], prominente: impl IntoIterator<Item = f32>) -> f32 {
    let mix_amplitude = if mix.is_empty() {
        0.0
    } else {
        mix.iter().map(|s| s.abs()).sum::<f32>() / mix.len() as f32
    };

    let (summe, anzahl) = prominente
        .into_iter()
        .fold((0.0f32, 0usize), |(s, n), a| (s + a, n + 1));

    (mix_amplitude + summe) / (anzahl + 1) as f32
}

/// Zaehler ueber alle Runden (nur vom Mixer-Thread benutzt)
#[derive(Debug, Default)]
pub(crate) struct RundenStatistik {
    pub runden_gesamt: u64,
    pub verspaetet_gesamt: u64,
    pub ausgleich_verworfen: u64,
    pub abgelehnt_gesamt: u64,
    pub letzte_amplitude: f32,
    pub prominente_streams: usize,
    pub max_warteschlange: u32,
    amplitude_summe: f64,
    amplitude_runden: u64,
    max_tiefe_intervall: u32,
    letzte_ausgabe_us: Option<u64>,
}

impl RundenStatistik {
    pub fn runde_erfassen(
        &mut self,
        amplitude: f32,
        prominente: usize,
        verspaetet: usize,
        verworfen: usize,
        max_tiefe: u32,
    ) {
        self.runden_gesamt += 1;
        self.verspaetet_gesamt += verspaetet as u64;
        self.ausgleich_verworfen += verworfen as u64;
        self.letzte_amplitude = amplitude;
        self.prominente_streams = prominente;
        self.max_warteschlange = max_tiefe;
        self.amplitude_summe += amplitude as f64;
        self.amplitude_runden += 1;
        self.max_tiefe_intervall = self.max_tiefe_intervall.max(max_tiefe);
    }

    /// Gibt die periodische Zusammenfassung aus, wenn das Intervall abgelaufen ist
    pub fn zusammenfassung_pruefen(
        &mut self,
        jetzt_us: u64,
        intervall_us: u64,
        teilnehmer: &mut [ParticipantBuffer],
    ) -> bool {
        let Some(letzte) = self.letzte_ausgabe_us else {
            self.letzte_ausgabe_us = Some(jetzt_us);
            return false;
        };
        if intervall_us == 0 || jetzt_us.saturating_sub(letzte) < intervall_us {
            return false;
        }

        let mittel = if self.amplitude_runden > 0 {
            self.amplitude_summe / self.amplitude_runden as f64
        } else {
            0.0
        };
        let snapshot = MixerSnapshot {
            teilnehmer: teilnehmer.iter().map(|p| p.snapshot()).collect(),
            ..MixerSnapshot::default()
        };

        tracing::info!(
            runden = self.runden_gesamt,
            teilnehmer = teilnehmer.len(),
            amplitude = mittel,
            max_warteschlange = self.max_tiefe_intervall,
            verspaetet = self.verspaetet_gesamt,
            verworfen = self.ausgleich_verworfen,
            "Mixer-Statistik: {}",
            snapshot.zusammenfassung()
        );

        for p in teilnehmer.iter_mut() {
            p.max_abstand_zuruecksetzen();
        }
        self.amplitude_summe = 0.0;
        self.amplitude_runden = 0;
        self.max_tiefe_intervall = 0;
        self.letzte_ausgabe_us = Some(jetzt_us);
        true
    }
}
