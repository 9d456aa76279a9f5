//! Bereitschaftspruefung – darf die naechste Mix-Runde laufen?
//!
//! Die Pruefung ist eine reine Funktion ueber den Teilnehmer-Puffern: sie
//! veraendert nichts und liefert bei unveraendertem Zustand immer dasselbe
//! Ergebnis. Die Verspaetungs-Markierungen wendet erst der Router an, wenn
//! die Runde tatsaechlich startet.
//!
//! Ablauf:
//! 1. Queue-Tiefen (min/max/zweitgroesstes max) ueber alle verbundenen Teilnehmer
//! 2. Warte-Kandidaten zaehlen und aeltesten wartenden Frame bestimmen
//! 3. Keine Frames -> nicht bereit; Kandidaten und aeltester Frame juenger als
//!    `max_wait` -> nicht bereit (noch warten)
//! 4. Sonst: Teilnehmer mit Frames sind bereit (ausser ein FirstPacket-Teilnehmer,
//!    dessen Frame juenger als der aelteste ist), Teilnehmer ohne Frame im
//!    Zustand Normal/HopelesslyLate sind verspaetet

use crate::participant::{ParticipantBuffer, ParticipantState};

/// Queue-Tiefen ueber alle verbundenen Teilnehmer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueTiefen {
    pub min: u32,
    pub max: u32,
    pub zweit_max: u32,
}

impl QueueTiefen {
    fn erfassen(&mut self, tiefe: u32, erster: bool) {
        if erster || tiefe < self.min {
            self.min = tiefe;
        }
        if self.max < tiefe {
            self.zweit_max = self.max;
            self.max = tiefe;
        } else if self.zweit_max < tiefe {
            self.zweit_max = tiefe;
        }
    }
}

/// Ergebnis einer Bereitschaftspruefung
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bereitschaft {
    /// Indizes der Teilnehmer, die in dieser Runde einen Frame beitragen
    pub bereit: Vec<usize>,
    /// Indizes der Teilnehmer, die als verspaetet markiert werden
    pub verspaetet: Vec<usize>,
    pub tiefen: QueueTiefen,
    pub warte_kandidaten: usize,
    /// Empfangszeit des aeltesten wartenden Frames
    pub aeltester_us: Option<u64>,
    /// Summe aller wartenden Frames
    pub frames_gesamt: usize,
}

impl Bereitschaft {
    /// Die Runde laeuft nur mit mindestens einem bereiten Teilnehmer
    pub fn ist_bereit(&self) -> bool {
        !self.bereit.is_empty()
    }
}

/// Prueft, ob eine Runde laufen darf (ohne Seiteneffekte)
///
/// `teilnehmer` liegt in Beitrittsreihenfolge vor; die Index-Listen im
/// Ergebnis behalten diese Reihenfolge bei.
pub fn bereitschaft_pruefen(
    teilnehmer: &[ParticipantBuffer],
    max_wait_us: u64,
    jetzt_us: u64,
) -> Bereitschaft {
    let mut ergebnis = Bereitschaft::default();
    let mut erster = true;

    for p in teilnehmer.iter().filter(|p| p.is_connected()) {
        let tiefe = p.queue_laenge() as u32;
        ergebnis.tiefen.erfassen(tiefe, erster);
        erster = false;
        ergebnis.frames_gesamt += tiefe as usize;

        if p.is_wait_candidate() {
            ergebnis.warte_kandidaten += 1;
        } else if let Some(frame) = p.peek() {
            let zeit = frame.time_received();
            if ergebnis.aeltester_us.map_or(true, |a| zeit < a) {
                ergebnis.aeltester_us = Some(zeit);
            }
        }
    }

    if ergebnis.frames_gesamt == 0 {
        return ergebnis;
    }

    let aeltester = ergebnis.aeltester_us.unwrap_or(0);
    if ergebnis.warte_kandidaten > 0 && aeltester > jetzt_us.saturating_sub(max_wait_us) {
        return ergebnis;
    }

    for (idx, p) in teilnehmer.iter().enumerate() {
        if !p.is_connected() {
            continue;
        }
        match p.peek() {
            Some(frame) => {
                // Erster Frame eines Nachzuegglers wartet, bis er der aelteste ist
                let zurueckhalten = p.state() == ParticipantState::FirstPacket
                    && frame.time_received() > aeltester;
                if !zurueckhalten {
                    ergebnis.bereit.push(idx);
                }
            }
            None if matches!(
                p.state(),
                ParticipantState::Normal | ParticipantState::HopelesslyLate
            ) =>
            {
                ergebnis.verspaetet.push(idx)
            }
            None => {}
        }
    }

    ergebnis
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
