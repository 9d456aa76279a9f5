//! Mixer-Task
//!
//! Genau ein Task besitzt den [`RouterMixer`]. Beitritte, Frames und
//! Austritte kommen ueber eine begrenzte mpsc-Queue und werden strikt
//! nacheinander verarbeitet, damit Teilnehmerverwaltung und Rundenschleife
//! nie gleichzeitig laufen.

use raumklang_core::{ParticipantId, RaumklangError};
use raumklang_mixer::{AudioFrame, FramePool, MixerSnapshot, ParticipantChannel, RouterMixer};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Nachricht an den Mixer-Task
pub enum Eingang {
    Beitritt(Box<dyn ParticipantChannel>),
    Frame { id: ParticipantId, frame: AudioFrame },
    Austritt(ParticipantId),
    Snapshot(oneshot::Sender<MixerSnapshot>),
}

/// Sende-Handle zum Mixer-Task
///
/// Der Task endet, sobald alle Handles gedroppt sind.
#[derive(Clone)]
pub struct MixerHandle {
    tx: mpsc::Sender<Eingang>,
    pool: Arc<dyn FramePool>,
}

impl MixerHandle {
    /// Pool, aus dem Eingangs-Frames erworben werden
    pub fn pool(&self) -> &Arc<dyn FramePool> {
        &self.pool
    }

    pub async fn beitreten(&self, kanal: Box<dyn ParticipantChannel>) -> Result<(), RaumklangError> {
        self.tx
            .send(Eingang::Beitritt(kanal))
            .await
            .map_err(|_| RaumklangError::SessionBeendet)
    }

    pub async fn verlassen(&self, id: ParticipantId) -> Result<(), RaumklangError> {
        self.tx
            .send(Eingang::Austritt(id))
            .await
            .map_err(|_| RaumklangError::SessionBeendet)
    }

    /// Reicht einen Frame nicht-blockierend weiter
    ///
    /// Bei voller Queue wird der Frame verworfen und an den Pool
    /// zurueckgegeben. Gibt `false` zurueck, wenn der Mixer-Task beendet ist.
    pub fn frame_senden(&self, id: ParticipantId, frame: AudioFrame) -> bool {
        match self.tx.try_send(Eingang::Frame { id, frame }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(eingang)) => {
                tracing::warn!(teilnehmer = %id, "Eingangs-Queue voll – Frame verworfen");
                self.frame_freigeben(eingang);
                true
            }
            Err(mpsc::error::TrySendError::Closed(eingang)) => {
                self.frame_freigeben(eingang);
                false
            }
        }
    }

    pub async fn snapshot(&self) -> Result<MixerSnapshot, RaumklangError> {
        let (antwort_tx, antwort_rx) = oneshot::channel();
        self.tx
            .send(Eingang::Snapshot(antwort_tx))
            .await
            .map_err(|_| RaumklangError::SessionBeendet)?;
        antwort_rx.await.map_err(|_| RaumklangError::SessionBeendet)
    }

    fn frame_freigeben(&self, eingang: Eingang) {
        if let Eingang::Frame { frame, .. } = eingang {
            self.pool.release(frame);
        }
    }
}

/// Startet den Mixer-Task
///
/// Das JoinHandle liefert den letzten Snapshot, nachdem alle Handles
/// gedroppt wurden.
pub fn mixer_task_starten(
    mixer: RouterMixer,
    pool: Arc<dyn FramePool>,
    queue_groesse: usize,
) -> (MixerHandle, JoinHandle<MixerSnapshot>) {
    let (tx, rx) = mpsc::channel(queue_groesse.max(1));
    let task = tokio::spawn(eingaenge_verarbeiten(mixer, rx));
    (MixerHandle { tx, pool }, task)
}

async fn eingaenge_verarbeiten(mut mixer: RouterMixer, mut rx: mpsc::Receiver<Eingang>) -> MixerSnapshot {
    while let Some(eingang) = rx.recv().await {
        match eingang {
            Eingang::Beitritt(kanal) => {
                let id = kanal.id();
                if let Err(e) = mixer.beitreten(kanal) {
                    tracing::warn!(teilnehmer = %id, fehler = %e, "Beitritt abgelehnt");
                }
            }
            Eingang::Frame { id, frame } => {
                if let Err(e) = mixer.frame_empfangen(&id, frame) {
                    tracing::debug!(teilnehmer = %id, fehler = %e, "Frame nicht verarbeitet");
                }
            }
            Eingang::Austritt(id) => {
                if let Err(e) = mixer.verlassen(&id) {
                    tracing::warn!(teilnehmer = %id, fehler = %e, "Austritt fehlgeschlagen");
                }
            }
            Eingang::Snapshot(antwort) => {
                // Empfaenger darf inzwischen weg sein
                let _ = antwort.send(mixer.snapshot());
            }
        }
    }

    let snapshot = mixer.snapshot();
    tracing::info!(
        runden = snapshot.runden_gesamt,
        verspaetet = snapshot.verspaetet_gesamt,
        "Mixer-Task beendet"
    );
    snapshot
}
