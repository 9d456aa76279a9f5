//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use raumklang_core::RaumklangError;
use raumklang_mixer::MixerConfig;
use raumklang_observability::logging::{log_format_gueltig, log_level_gueltig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Audio-Router/Mixer
    pub mixer: MixerConfig,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Simulierte Session
    pub simulation: SimulationEinstellungen,
    /// Observability-Einstellungen (Metriken)
    pub observability: ObservabilityEinstellungen,
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Simulierte Session: synthetische Teilnehmer mit Netzwerk-Jitter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationEinstellungen {
    /// Anzahl simulierter Teilnehmer
    pub teilnehmer: u32,
    /// Davon sprechend (Sinuston statt leisem Rauschen)
    pub sprecher: u32,
    /// Laufzeit in Sekunden (0 = bis Ctrl-C)
    pub dauer_s: u64,
    /// Maximaler zusaetzlicher Versatz pro Frame in ms
    pub jitter_ms: u64,
    /// Jeder n-te Frame eines Teilnehmers geht verloren (0 = kein Verlust)
    pub verlust_alle: u32,
    /// Teilnehmer senden raeumliche Metadaten
    pub spatial: bool,
    /// Groesse der Eingangs-Queue des Mixer-Tasks
    pub eingangs_queue: usize,
    /// Intervall fuer Metrik-Snapshots in ms
    pub snapshot_intervall_ms: u64,
}

impl Default for SimulationEinstellungen {
    fn default() -> Self {
        Self {
            teilnehmer: 6,
            sprecher: 2,
            dauer_s: 10,
            jitter_ms: 8,
            verlust_alle: 0,
            spatial: true,
            eingangs_queue: 1024,
            snapshot_intervall_ms: 1000,
        }
    }
}

impl SimulationEinstellungen {
    /// Laufzeit der Simulation (`None` = unbegrenzt)
    pub fn dauer(&self) -> Option<Duration> {
        (self.dauer_s > 0).then(|| Duration::from_secs(self.dauer_s))
    }
}

/// Observability-Einstellungen (Metriken)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Metrik-Server
    pub aktiviert: bool,
    /// Bind-Adresse des Metrik-Servers
    pub bind_adresse: String,
    /// Port fuer Metriken (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: false,
            bind_adresse: "0.0.0.0".into(),
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str::<Self>(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.validieren()?;
        Ok(config)
    }

    /// Prueft Wertebereiche, die serde nicht abdeckt
    pub fn validieren(&self) -> anyhow::Result<()> {
        self.mixer.validieren()?;

        if !log_level_gueltig(&self.logging.level) {
            return Err(konfigurationsfehler(format!(
                "Ungueltiges Log-Level '{}'",
                self.logging.level
            )));
        }
        if !log_format_gueltig(&self.logging.format) {
            return Err(konfigurationsfehler(format!(
                "Ungueltiges Log-Format '{}'",
                self.logging.format
            )));
        }
        if self.simulation.sprecher > self.simulation.teilnehmer {
            return Err(konfigurationsfehler(format!(
                "Mehr Sprecher ({}) als Teilnehmer ({})",
                self.simulation.sprecher,
                self.simulation.teilnehmer
            )));
        }
        if self.observability.aktiviert {
            self.observability_bind_adresse()?;
        }
        if self.simulation.eingangs_queue == 0 {
            return Err(konfigurationsfehler("eingangs_queue darf nicht 0 sein"));
        }
        Ok(())
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let adresse = format!(
            "{}:{}",
            self.observability.bind_adresse, self.observability.port
        );
        adresse
            .parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Bind-Adresse '{adresse}': {e}"))
    }

    /// Dauer eines Frames bei Master-Samplerate
    pub fn frame_dauer(&self) -> Duration {
        let rate = self.mixer.sample_rate.max(1) as u64;
        Duration::from_micros(self.mixer.samples_per_packet as u64 * 1_000_000 / rate)
    }
}

fn konfigurationsfehler(meldung: impl Into<String>) -> anyhow::Error {
    RaumklangError::Konfiguration(meldung.into()).into()
}
