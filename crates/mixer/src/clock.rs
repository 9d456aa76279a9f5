//! Zeitquelle des Mixers (Mikrosekunden seit Epoche)
//!
//! Der Mixer liest die Zeit genau einmal pro eintreffendem Frame. Fuer Tests
//! und Simulationen laesst sich die Zeit mit [`ManualClock`] steuern.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Liefert die aktuelle Zeit in Mikrosekunden
pub trait Clock: Send + Sync {
    fn jetzt_us(&self) -> u64;
}

/// Systemuhr (Wanduhrzeit)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn jetzt_us(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

/// Manuell gesteuerte Uhr; Klone teilen dieselbe Zeit
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    jetzt: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn neu(start_us: u64) -> Self {
        Self {
            jetzt: Arc::new(AtomicU64::new(start_us)),
        }
    }

    pub fn setzen(&self, zeit_us: u64) {
        self.jetzt.store(zeit_us, Ordering::SeqCst);
    }

    /// Stellt die Uhr um `delta_us` vor und gibt die neue Zeit zurueck
    pub fn vorstellen(&self, delta_us: u64) -> u64 {
        self.jetzt.fetch_add(delta_us, Ordering::SeqCst) + delta_us
    }
}

impl Clock for ManualClock {
    fn jetzt_us(&self) -> u64 {
        self.jetzt.load(Ordering::SeqCst)
    }
}
