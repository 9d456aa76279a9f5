//! Simulierte Session
//!
//! Jeder simulierte Teilnehmer ist ein eigener Task, der im Frame-Takt
//! synthetische Audio-Frames erzeugt. Der Sendezeitpunkt wird deterministisch
//! verschoben (Jitter), einzelne Frames koennen ausfallen. Die Ausgaben des
//! Mixers laufen ueber [`QueueChannel`] in einen Zaehl-Task pro Teilnehmer.

use crate::config::ServerConfig;
use crate::mixer_task::{mixer_task_starten, MixerHandle};
use anyhow::Result;
use raumklang_core::ParticipantId;
use raumklang_mixer::{
    AudioFrame, FramePool, MixerSnapshot, QueueChannel, RouterMixer, SharedFramePool, SpatialTag,
    SystemClock,
};
use raumklang_observability::MixerMetrics;
use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Amplitude der Sprecher (Sinuston)
const SPRECHER_AMPLITUDE: f32 = 0.3;
/// Spitzenwert des Grundrauschens stiller Teilnehmer
const RAUSCH_AMPLITUDE: f32 = 0.0005;

/// Ergebnis einer abgeschlossenen Session
#[derive(Debug)]
pub struct SitzungsBericht {
    /// Empfangene Ausgabe-Frames pro Teilnehmer (in Startreihenfolge)
    pub empfangen: Vec<u64>,
    /// Letzter Stand des Mixers
    pub snapshot: MixerSnapshot,
}

/// Zusaetzlicher Sendeversatz eines Frames
///
/// Deterministisch aus Teilnehmer und Sequenz abgeleitet, damit Laeufe
/// reproduzierbar bleiben.
pub fn jitter_versatz(teilnehmer: u32, sequenz: u32, jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return Duration::ZERO;
    }
    let mischung =
        (teilnehmer as u64 + 1).wrapping_mul(7_919) ^ (sequenz as u64).wrapping_mul(104_729);
    Duration::from_millis(mischung % (jitter_ms + 1))
}

/// Geht dieser Frame verloren?
pub fn frame_verloren(teilnehmer: u32, sequenz: u32, verlust_alle: u32) -> bool {
    verlust_alle > 0 && sequenz.wrapping_add(teilnehmer) % verlust_alle == verlust_alle - 1
}

/// Fuellt einen Kanal mit Sinuston (Sprecher) oder leisem Rauschen
pub fn samples_erzeugen(
    ziel: &mut [f32],
    teilnehmer: u32,
    sequenz: u32,
    sprecher: bool,
    sample_rate: u32,
) {
    let laenge = ziel.len() as u64;
    if sprecher {
        let frequenz = 220.0 + 55.0 * teilnehmer as f32;
        for (i, sample) in ziel.iter_mut().enumerate() {
            let n = (sequenz as u64 * laenge + i as u64) % sample_rate.max(1) as u64;
            let t = n as f32 / sample_rate.max(1) as f32;
            *sample = SPRECHER_AMPLITUDE * (TAU * frequenz * t).sin();
        }
    } else {
        for (i, sample) in ziel.iter_mut().enumerate() {
            let h = (i as u32)
                .wrapping_mul(31)
                .wrapping_add(sequenz.wrapping_mul(17))
                .wrapping_add(teilnehmer.wrapping_mul(13))
                % 101;
            *sample = (h as f32 / 50.0 - 1.0) * RAUSCH_AMPLITUDE;
        }
    }
}

/// Position auf einem Kreis um den Hoerer
fn position(teilnehmer: u32, anzahl: u32) -> [f32; 3] {
    let winkel = TAU * teilnehmer as f32 / anzahl.max(1) as f32;
    [2.0 * winkel.cos(), 0.0, 2.0 * winkel.sin()]
}

/// Fuehrt eine Session aus, bis `stop` signalisiert wird
pub async fn sitzung_ausfuehren(
    config: &ServerConfig,
    metriken: MixerMetrics,
    stop: watch::Receiver<bool>,
) -> Result<SitzungsBericht> {
    let sim = &config.simulation;
    let pool: Arc<dyn FramePool> =
        Arc::new(SharedFramePool::neu(config.mixer.samples_per_packet as usize));
    let mixer = RouterMixer::mit_config(pool.clone(), config.mixer.clone(), Arc::new(SystemClock))?;
    let (handle, mixer_task) = mixer_task_starten(mixer, pool, sim.eingangs_queue);

    tracing::info!(
        teilnehmer = sim.teilnehmer,
        sprecher = sim.sprecher,
        jitter_ms = sim.jitter_ms,
        "Simulierte Session startet"
    );

    let metrik_task = tokio::spawn(metriken_sammeln(
        handle.clone(),
        metriken.clone(),
        Duration::from_millis(sim.snapshot_intervall_ms.max(1)),
        stop.clone(),
    ));

    let parameter = Arc::new(TeilnehmerParameter {
        anzahl: sim.teilnehmer,
        sprecher: sim.sprecher,
        jitter_ms: sim.jitter_ms,
        verlust_alle: sim.verlust_alle,
        spatial: sim.spatial,
        sample_rate: config.mixer.sample_rate,
        samples_per_packet: config.mixer.samples_per_packet,
        periode: config.frame_dauer(),
    });
    let teilnehmer_tasks: Vec<_> = (0..sim.teilnehmer)
        .map(|nr| {
            tokio::spawn(teilnehmer_ausfuehren(
                nr,
                parameter.clone(),
                handle.clone(),
                stop.clone(),
            ))
        })
        .collect();
    drop(handle);

    let mut empfangen = Vec::with_capacity(teilnehmer_tasks.len());
    for task in teilnehmer_tasks {
        empfangen.push(task.await??);
    }
    metrik_task.await?;

    let snapshot = mixer_task.await?;
    metriken.aktualisieren(&snapshot);

    Ok(SitzungsBericht {
        empfangen,
        snapshot,
    })
}

struct TeilnehmerParameter {
    anzahl: u32,
    sprecher: u32,
    jitter_ms: u64,
    verlust_alle: u32,
    spatial: bool,
    sample_rate: u32,
    samples_per_packet: u16,
    periode: Duration,
}

impl TeilnehmerParameter {
    fn frame_erzeugen(&self, pool: &dyn FramePool, nr: u32, sequenz: u32) -> Result<AudioFrame> {
        let mut frame = pool.acquire(self.samples_per_packet as usize);
        if let Err(e) = frame.init(
            0,
            1,
            1,
            self.samples_per_packet,
            self.sample_rate,
            false,
            sequenz,
        ) {
            pool.release(frame);
            return Err(e.into());
        }
        samples_erzeugen(
            frame.samples_mut(0, 0),
            nr,
            sequenz,
            nr < self.sprecher,
            self.sample_rate,
        );
        if self.spatial {
            let tag = SpatialTag::neu(nr + 1, position(nr, self.anzahl), [0.0; 3]);
            frame.set_spatial_tag(0, Some(tag));
        }
        Ok(frame)
    }
}

/// Ein simulierter Teilnehmer: beitreten, im Takt senden, austreten
///
/// Gibt die Anzahl empfangener Ausgabe-Frames zurueck.
async fn teilnehmer_ausfuehren(
    nr: u32,
    parameter: Arc<TeilnehmerParameter>,
    handle: MixerHandle,
    mut stop: watch::Receiver<bool>,
) -> Result<u64> {
    let id = ParticipantId::new();
    let (kanal, rx, _steuerung) = QueueChannel::neu(id, parameter.spatial);
    handle.beitreten(Box::new(kanal)).await?;
    let zaehler = tokio::spawn(ausgaben_zaehlen(rx));

    tracing::debug!(teilnehmer = %id, nr, sprecher = (nr < parameter.sprecher), "Teilnehmer beigetreten");

    let start = Instant::now();
    let mut sequenz: u32 = 0;
    loop {
        let soll = start
            + parameter.periode * sequenz
            + jitter_versatz(nr, sequenz, parameter.jitter_ms);

        tokio::select! {
            _ = tokio::time::sleep_until(soll) => {}
            _ = stop.changed() => break,
        }

        if !frame_verloren(nr, sequenz, parameter.verlust_alle) {
            let frame = parameter.frame_erzeugen(handle.pool().as_ref(), nr, sequenz)?;
            if !handle.frame_senden(id, frame) {
                break;
            }
        }
        sequenz = sequenz.wrapping_add(1);
    }

    // Der Mixer droppt den Kanal beim Austritt, danach endet der Zaehler
    handle.verlassen(id).await?;
    drop(handle);
    let empfangen = zaehler.await?;

    tracing::debug!(teilnehmer = %id, gesendet = sequenz, empfangen, "Teilnehmer ausgetreten");
    Ok(empfangen)
}

async fn ausgaben_zaehlen(mut rx: mpsc::Receiver<AudioFrame>) -> u64 {
    let mut anzahl = 0;
    while rx.recv().await.is_some() {
        anzahl += 1;
    }
    anzahl
}

/// Uebertraegt periodisch Mixer-Snapshots in die Prometheus-Metriken
async fn metriken_sammeln(
    handle: MixerHandle,
    metriken: MixerMetrics,
    intervall: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(intervall);
    ticker.tick().await; // Erster Tick sofort – ueberspringen

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match handle.snapshot().await {
                    Ok(snapshot) => {
                        metriken.aktualisieren(&snapshot);
                        tracing::debug!(
                            zusammenfassung = %snapshot.zusammenfassung(),
                            "Mixer-Snapshot"
                        );
                    }
                    Err(_) => break,
                }
            }
            _ = stop.changed() => break,
        }
    }
}
