//! Queue-Ausgleich zwischen Teilnehmern
//!
//! Laufen die Queue-Tiefen zu weit auseinander, wird die Latenz der tieferen
//! Queues reduziert: zu alte Frames werden immer verworfen, leise Frames nur
//! solange noch Verspaetung auszugleichen ist.

use crate::admission::QueueTiefen;
use crate::config::MixerConfig;
use crate::participant::ParticipantBuffer;
use crate::pool::FramePool;

/// Mindestgroesse, auf die eine Queue gekuerzt wird
const MIN_ZIELGROESSE: usize = 2;

#[derive(Debug, Clone)]
pub struct QueueBalancer {
    delta_schwelle: u32,
    max_alter_us: u64,
    amplituden_schwelle: f32,
}

impl QueueBalancer {
    pub fn neu(config: &MixerConfig) -> Self {
        Self {
            delta_schwelle: config.balance_delta_threshold,
            max_alter_us: config.max_age_before_balance_us(),
            amplituden_schwelle: config.balance_amplitude_threshold,
        }
    }

    /// Ausgleich noetig, wenn max - min die Schwelle erreicht
    pub fn ausloesen(&self, tiefen: &QueueTiefen) -> bool {
        tiefen.max.saturating_sub(tiefen.min) >= self.delta_schwelle
    }

    /// Zielgroesse: zweitgroesste Tiefe minus den in dieser Runde entnommenen Frame
    pub fn zielgroesse(&self, tiefen: &QueueTiefen) -> usize {
        (tiefen.zweit_max.saturating_sub(1) as usize).max(MIN_ZIELGROESSE)
    }

    /// Gleicht die Queues der angegebenen Teilnehmer aus; liefert die Anzahl verworfener Frames
    pub fn ausgleichen(
        &self,
        teilnehmer: &mut [ParticipantBuffer],
        indizes: &[usize],
        tiefen: &QueueTiefen,
        jetzt_us: u64,
        pool: &dyn FramePool,
    ) -> usize {
        let ziel = self.zielgroesse(tiefen);
        let aeltester_erlaubt = jetzt_us.saturating_sub(self.max_alter_us);

        let mut verworfen = 0;
        for &idx in indizes {
            if let Some(p) = teilnehmer.get_mut(idx) {
                verworfen += p.queue_ausgleichen(ziel, aeltester_erlaubt, self.amplituden_schwelle, pool);
            }
        }

        if verworfen > 0 {
            tracing::debug!(verworfen, ziel, max = tiefen.max, min = tiefen.min, "Queues ausgeglichen");
        }
        verworfen
    }
}
