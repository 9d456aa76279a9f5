//! Sprach-Erkennung fuer die Prominenz-Auswahl
//!
//! Rein amplitudenbasiert mit entprellter Hysterese: `spricht` wird erst nach
//! `sprach_schwelle` lauten Runden in Folge wahr und erst nach
//! `stille_schwelle` leisen Runden in Folge wieder falsch. Ein einzelner
//! Ausreisser aendert den Zustand nie.

/// Sprach-Detektor eines Teilnehmers
#[derive(Debug, Clone)]
pub struct SpeechDetector {
    amplituden_schwelle: f32,
    sprach_schwelle: u32,
    stille_schwelle: u32,
    sprach_folge: u32,
    stille_folge: u32,
    spricht: bool,
}

impl SpeechDetector {
    pub fn neu(amplituden_schwelle: f32, sprach_schwelle: u32, stille_schwelle: u32) -> Self {
        Self {
            amplituden_schwelle,
            sprach_schwelle: sprach_schwelle.max(1),
            stille_schwelle: stille_schwelle.max(1),
            sprach_folge: 0,
            stille_folge: 0,
            spricht: false,
        }
    }

    /// Verarbeitet die Durchschnittsamplitude einer Runde und gibt `spricht` zurueck
    pub fn verarbeiten(&mut self, amplitude: f32) -> bool {
        if amplitude > self.amplituden_schwelle {
            self.sprach_folge = self.sprach_folge.saturating_add(1);
            self.stille_folge = 0;
            if self.sprach_folge >= self.sprach_schwelle {
                self.spricht = true;
            }
        } else {
            self.stille_folge = self.stille_folge.saturating_add(1);
            self.sprach_folge = 0;
            if self.stille_folge >= self.stille_schwelle {
                self.spricht = false;
            }
        }
        self.spricht
    }

    pub fn spricht(&self) -> bool {
        self.spricht
    }
}
