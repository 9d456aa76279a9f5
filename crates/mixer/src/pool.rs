//! Frame-Pool – Wiederverwendung von Audio-Frames
//!
//! Der Pool ist die einzige Ressource, die der Mixer mit der Umgebung teilt
//! (Transport erwirbt Eingangs-Frames, der Mixer gibt sie nach der Runde
//! zurueck). Deshalb ist er thread-safe; alles andere im Mixer nicht.

use crate::frame::AudioFrame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Schnittstelle eines Frame-Pools
pub trait FramePool: Send + Sync {
    /// Liefert einen leeren Frame mit mindestens `max_samples` Kapazitaet.
    /// Die Eigentuemerschaft geht an den Aufrufer ueber.
    fn acquire(&self, max_samples: usize) -> AudioFrame;

    /// Gibt einen Frame an den Pool zurueck
    fn release(&self, frame: AudioFrame);

    /// Standard-Kapazitaet fuer Eingangs-Frames
    fn default_max_samples(&self) -> usize;
}

/// Zaehlerstand des Pools (Snapshot)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatistik {
    /// Insgesamt neu allozierte Frames
    pub erzeugt: u64,
    /// Aktuell ausgeliehene Frames
    pub ausgeliehen: u64,
    /// Frames in der Freiliste
    pub frei: usize,
}

/// Thread-safe Frame-Pool mit Freiliste
pub struct SharedFramePool {
    frei: Mutex<Vec<AudioFrame>>,
    default_max_samples: usize,
    max_frei: usize,
    erzeugt: AtomicU64,
    ausgeliehen: AtomicU64,
}

impl SharedFramePool {
    /// Erstellt einen Pool; `default_max_samples` gilt fuer Eingangs-Frames
    pub fn neu(default_max_samples: usize) -> Self {
        Self::mit_limit(default_max_samples, 1024)
    }

    /// Wie [`SharedFramePool::neu`], haelt aber hoechstens `max_frei` Frames vor
    pub fn mit_limit(default_max_samples: usize, max_frei: usize) -> Self {
        Self {
            frei: Mutex::new(Vec::new()),
            default_max_samples,
            max_frei,
            erzeugt: AtomicU64::new(0),
            ausgeliehen: AtomicU64::new(0),
        }
    }

    pub fn statistik(&self) -> PoolStatistik {
        PoolStatistik {
            erzeugt: self.erzeugt.load(Ordering::Relaxed),
            ausgeliehen: self.ausgeliehen.load(Ordering::Relaxed),
            frei: self.frei.lock().len(),
        }
    }
}

impl FramePool for SharedFramePool {
    fn acquire(&self, max_samples: usize) -> AudioFrame {
        self.ausgeliehen.fetch_add(1, Ordering::Relaxed);

        let wiederverwendet = {
            let mut frei = self.frei.lock();
            frei.iter()
                .position(|f| f.max_samples() >= max_samples)
                .map(|idx| frei.swap_remove(idx))
        };

        match wiederverwendet {
            Some(frame) => frame,
            None => {
                self.erzeugt.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(max_samples, "Neuer Frame alloziert");
                AudioFrame::neu(max_samples)
            }
        }
    }

    fn release(&self, mut frame: AudioFrame) {
        // Saettigend, damit fremde Frames den Zaehler nicht unterlaufen lassen
        let _ = self
            .ausgeliehen
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });

        frame.zuruecksetzen();
        let mut frei = self.frei.lock();
        if frei.len() < self.max_frei {
            frei.push(frame);
        }
    }

    fn default_max_samples(&self) -> usize {
        self.default_max_samples
    }
}
