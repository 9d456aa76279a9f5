//! Ausgangskanal pro Teilnehmer
//!
//! Der Mixer kennt den Transport nur ueber [`ParticipantChannel`]. Die
//! mitgelieferte Implementierung [`QueueChannel`] legt Ausgabe-Frames in eine
//! begrenzte tokio-mpsc-Queue, aus der ein Sender-Task liest.
//!
//! ## Design-Entscheidungen
//! - Nicht-blockierend: bei voller Queue wird verworfen (UDP-Semantik)
//! - Geschlossene Queue markiert den Kanal als getrennt; der Mixer schliesst
//!   ihn dann aus der Bereitschaftspruefung aus, entfernt ihn aber nicht

use crate::frame::AudioFrame;
use raumklang_core::ParticipantId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Groesse der Send-Queue pro Teilnehmer (Frames)
pub const SEND_QUEUE_GROESSE: usize = 128;

/// Transport-Schnittstelle eines Teilnehmers
pub trait ParticipantChannel: Send {
    fn id(&self) -> ParticipantId;

    /// Ist die Transportverbindung aktuell verbunden?
    fn is_connected(&self) -> bool;

    /// Hat der Teilnehmer sein Mikrofon stummgeschaltet?
    fn is_muted(&self) -> bool;

    /// Kann der Teilnehmer raeumliche Streams wiedergeben und senden?
    fn supports_spatial(&self) -> bool;

    /// Versendet einen Ausgabe-Frame. Der Frame gehoert weiter dem Mixer und
    /// wird nach dem Aufruf an den Pool zurueckgegeben.
    fn send(&self, frame: &AudioFrame);
}

/// Steuerungs-Handle fuer Verbindungs- und Mute-Zustand eines [`QueueChannel`]
#[derive(Debug, Clone)]
pub struct KanalSteuerung {
    verbunden: Arc<AtomicBool>,
    stumm: Arc<AtomicBool>,
}

impl KanalSteuerung {
    pub fn set_verbunden(&self, verbunden: bool) {
        self.verbunden.store(verbunden, Ordering::Relaxed);
    }

    pub fn set_stumm(&self, stumm: bool) {
        self.stumm.store(stumm, Ordering::Relaxed);
    }

    pub fn ist_verbunden(&self) -> bool {
        self.verbunden.load(Ordering::Relaxed)
    }
}

/// Teilnehmer-Kanal auf Basis einer tokio-mpsc-Queue
pub struct QueueChannel {
    id: ParticipantId,
    send_tx: mpsc::Sender<AudioFrame>,
    steuerung: KanalSteuerung,
    spatial: bool,
}

impl QueueChannel {
    /// Erstellt einen Kanal und gibt die Empfangs-Queue und das Steuerungs-Handle zurueck
    pub fn neu(
        id: ParticipantId,
        spatial: bool,
    ) -> (Self, mpsc::Receiver<AudioFrame>, KanalSteuerung) {
        Self::mit_kapazitaet(id, spatial, SEND_QUEUE_GROESSE)
    }

    pub fn mit_kapazitaet(
        id: ParticipantId,
        spatial: bool,
        kapazitaet: usize,
    ) -> (Self, mpsc::Receiver<AudioFrame>, KanalSteuerung) {
        let (tx, rx) = mpsc::channel(kapazitaet.max(1));
        let steuerung = KanalSteuerung {
            verbunden: Arc::new(AtomicBool::new(true)),
            stumm: Arc::new(AtomicBool::new(false)),
        };
        let kanal = Self {
            id,
            send_tx: tx,
            steuerung: steuerung.clone(),
            spatial,
        };
        (kanal, rx, steuerung)
    }
}

impl ParticipantChannel for QueueChannel {
    fn id(&self) -> ParticipantId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.steuerung.ist_verbunden()
    }

    fn is_muted(&self) -> bool {
        self.steuerung.stumm.load(Ordering::Relaxed)
    }

    fn supports_spatial(&self) -> bool {
        self.spatial
    }

    fn send(&self, frame: &AudioFrame) {
        // Kopie in die Queue; das Original geht nach der Runde zurueck in den Pool
        match self.send_tx.try_send(frame.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    teilnehmer = %self.id,
                    sequenz = frame.sequence(),
                    "Send-Queue voll – Frame verworfen"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(teilnehmer = %self.id, "Send-Queue geschlossen (Teilnehmer getrennt)");
                self.steuerung.set_verbunden(false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(seq: u32) -> AudioFrame {
        let mut frame = AudioFrame::neu(4);
        frame.init(0, 1, 1, 4, 48_000, false, seq).unwrap();
        frame
    }

    #[tokio::test]
    async fn frames_kommen_in_der_queue_an() {
        let id = ParticipantId::new();
        let (kanal, mut rx, _steuerung) = QueueChannel::neu(id, true);

        kanal.send(&test_frame(1));
        kanal.send(&test_frame(2));

        assert_eq!(rx.recv().await.unwrap().sequence(), 1);
        assert_eq!(rx.recv().await.unwrap().sequence(), 2);
        assert_eq!(kanal.id(), id);
        assert!(kanal.supports_spatial());
    }

    #[tokio::test]
    async fn volle_queue_verwirft() {
        let (kanal, mut rx, steuerung) = QueueChannel::mit_kapazitaet(ParticipantId::new(), false, 1);

        kanal.send(&test_frame(1));
        kanal.send(&test_frame(2)); // verworfen

        assert_eq!(rx.recv().await.unwrap().sequence(), 1);
        assert!(rx.try_recv().is_err());
        assert!(steuerung.ist_verbunden(), "Volle Queue trennt nicht");
    }

    #[tokio::test]
    async fn geschlossene_queue_trennt_kanal() {
        let (kanal, rx, _steuerung) = QueueChannel::neu(ParticipantId::new(), false);
        drop(rx);

        assert!(kanal.is_connected());
        kanal.send(&test_frame(1));
        assert!(!kanal.is_connected());
    }

    #[test]
    fn steuerung_schaltet_stumm() {
        let (kanal, _rx, steuerung) = QueueChannel::neu(ParticipantId::new(), false);
        assert!(!kanal.is_muted());
        steuerung.set_stumm(true);
        assert!(kanal.is_muted());
        steuerung.set_verbunden(false);
        assert!(!kanal.is_connected());
    }
}
