//! raumklang-server – Bibliotheks-Root
//!
//! Deklariert alle Server-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;
pub mod mixer_task;
pub mod simulation;

use anyhow::Result;
use config::ServerConfig;
use raumklang_observability::{observability_server_starten, MixerMetrics};
use simulation::SitzungsBericht;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    metriken: MixerMetrics,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Result<Self> {
        Ok(Self {
            config,
            metriken: MixerMetrics::neu()?,
        })
    }

    pub fn metriken(&self) -> &MixerMetrics {
        &self.metriken
    }

    /// Startet alle Server-Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Metrik-Server starten (falls aktiviert)
    /// 2. Simulierte Session starten
    /// 3. Auf Ablauf der Laufzeit oder Ctrl-C warten
    /// 4. Session beenden, Abschlussbericht loggen
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            sample_rate = self.config.mixer.sample_rate,
            samples_per_packet = self.config.mixer.samples_per_packet,
            prominent_cap = self.config.mixer.prominent_cap,
            "Server startet"
        );

        if self.config.observability.aktiviert {
            let adresse = self.config.observability_bind_adresse()?;
            let metriken = self.metriken.clone();
            tokio::spawn(async move {
                if let Err(e) = observability_server_starten(adresse, metriken).await {
                    tracing::error!(adresse = %adresse, fehler = %e, "Metrik-Server beendet");
                }
            });
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let config = self.config.clone();
        let metriken = self.metriken.clone();
        let mut sitzung =
            tokio::spawn(async move { simulation::sitzung_ausfuehren(&config, metriken, stop_rx).await });

        let laufzeit = async {
            match self.config.simulation.dauer() {
                Some(dauer) => tokio::time::sleep(dauer).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = laufzeit => {
                tracing::info!("Laufzeit abgelaufen, Session wird beendet");
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Shutdown-Signal empfangen, Session wird beendet");
            }
            ergebnis = &mut sitzung => {
                // Session endet nur vorzeitig bei einem Fehler
                let bericht = ergebnis??;
                bericht_loggen(&bericht);
                return Ok(());
            }
        }

        // Empfaenger koennen bereits weg sein
        let _ = stop_tx.send(true);
        let bericht = sitzung.await??;
        bericht_loggen(&bericht);

        Ok(())
    }
}

fn bericht_loggen(bericht: &SitzungsBericht) {
    let snapshot = &bericht.snapshot;
    tracing::info!(
        runden = snapshot.runden_gesamt,
        verspaetet = snapshot.verspaetet_gesamt,
        ausgleich_verworfen = snapshot.ausgleich_verworfen,
        abgelehnt = snapshot.abgelehnt_gesamt,
        empfangen = ?bericht.empfangen,
        "Session beendet"
    );
    match serde_json::to_string(snapshot) {
        Ok(json) => tracing::debug!(snapshot = %json, "Abschluss-Snapshot"),
        Err(e) => tracing::warn!(fehler = %e, "Snapshot nicht serialisierbar"),
    }
}
