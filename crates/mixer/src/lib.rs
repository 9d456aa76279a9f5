//! raumklang-mixer – Audio-Router mit Mixer
//!
//! Nimmt unregelmaessig eintreffende Audio-Frames aller Teilnehmer einer
//! Session entgegen, gleicht den Netzwerk-Jitter aus und erzeugt pro Runde
//! fuer jeden Teilnehmer einen persoenlichen Ausgabe-Frame.
//!
//! Es gibt keinen Timer: jede Verarbeitung wird durch ein eintreffendes
//! Paket ausgeloest ([`RouterMixer::frame_empfangen`]).
//!
//! ## Module
//! - [`frame`] – Audio-Frame mit Streams und raeumlichen Metadaten
//! - [`pool`] – Frame-Pool (Wiederverwendung von Sample-Speicher)
//! - [`channel`] – Ausgangskanal pro Teilnehmer (Transport-Schnittstelle)
//! - [`clock`] – Zeitquelle in Mikrosekunden
//! - [`recorder`] – Diagnose-Aufnahme als WAV
//! - [`speech`] – Sprach-Erkennung mit Hysterese
//! - [`participant`] – Jitter Buffer und Zustandsmaschine pro Teilnehmer
//! - [`admission`] – Bereitschaftspruefung einer Runde
//! - [`balancer`] – Queue-Ausgleich zur Latenzbegrenzung
//! - [`telemetry`] – Runden-Statistik und periodische Zusammenfassung
//! - [`router`] – Rundenschleife, Mix, Prominenz-Auswahl, Versand

pub mod admission;
pub mod balancer;
pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod participant;
pub mod pool;
pub mod recorder;
pub mod router;
pub mod speech;
pub mod telemetry;

pub use channel::{KanalSteuerung, ParticipantChannel, QueueChannel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MixerConfig;
pub use error::{MixerError, MixerResult};
pub use frame::{AudioFrame, SpatialTag};
pub use participant::{ParticipantBuffer, ParticipantState};
pub use pool::{FramePool, PoolStatistik, SharedFramePool};
pub use recorder::{DiagnosticRecorder, WavRecorder};
pub use router::RouterMixer;
pub use telemetry::{MixerSnapshot, TeilnehmerSnapshot};
