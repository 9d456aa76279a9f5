//! Prometheus-kompatible Metriken des Audio-Mixers
//!
//! Registrierte Metriken:
//! - `raumklang_runden_total` – Counter: Gemischte Runden
//! - `raumklang_verspaetet_total` – Counter: Verpasste Runden (verspaetete Teilnehmer)
//! - `raumklang_ausgleich_verworfen_total` – Counter: Beim Queue-Ausgleich verworfene Frames
//! - `raumklang_abgelehnt_total` – Counter: Abgelehnte Frames (Format, unbekannter Teilnehmer)
//! - `raumklang_teilnehmer` – Gauge: Angemeldete Teilnehmer
//! - `raumklang_prominente_streams` – Gauge: Prominente Streams der letzten Runde
//! - `raumklang_runden_amplitude` – Gauge: Runden-Amplitude der letzten Runde
//! - `raumklang_max_warteschlange` – Gauge: Groesste Queue-Tiefe der letzten Runde
//! - `raumklang_teilnehmer_abstand_seconds` – Histogram: Maximaler Paketabstand pro Teilnehmer

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use raumklang_mixer::MixerSnapshot;
use std::sync::Arc;

/// Alle Raumklang-Prometheus-Metriken
#[derive(Clone)]
pub struct MixerMetrics {
    pub registry: Arc<Registry>,

    pub runden_total: IntCounter,
    pub verspaetet_total: IntCounter,
    pub ausgleich_verworfen_total: IntCounter,
    pub abgelehnt_total: IntCounter,

    pub teilnehmer: IntGauge,
    pub prominente_streams: IntGauge,
    pub runden_amplitude: Gauge,
    pub max_warteschlange: IntGauge,

    pub teilnehmer_abstand_seconds: Histogram,
}

fn zaehler(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let zaehler = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(zaehler.clone()))?;
    Ok(zaehler)
}

fn messwert(registry: &Registry, name: &str, hilfe: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl MixerMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Zaehler ---
        let runden_total = zaehler(&registry, "raumklang_runden_total", "Anzahl gemischter Runden")?;
        let verspaetet_total = zaehler(
            &registry,
            "raumklang_verspaetet_total",
            "Anzahl verpasster Runden verspaeteter Teilnehmer",
        )?;
        let ausgleich_verworfen_total = zaehler(
            &registry,
            "raumklang_ausgleich_verworfen_total",
            "Beim Queue-Ausgleich verworfene Frames",
        )?;
        let abgelehnt_total = zaehler(
            &registry,
            "raumklang_abgelehnt_total",
            "Abgelehnte Frames (Formatabweichung oder unbekannter Teilnehmer)",
        )?;

        // --- Momentanwerte ---
        let teilnehmer = messwert(&registry, "raumklang_teilnehmer", "Angemeldete Teilnehmer")?;
        let prominente_streams = messwert(
            &registry,
            "raumklang_prominente_streams",
            "Prominente Streams der letzten Runde",
        )?;
        let max_warteschlange = messwert(
            &registry,
            "raumklang_max_warteschlange",
            "Groesste Queue-Tiefe der letzten Runde",
        )?;

        let runden_amplitude = Gauge::with_opts(Opts::new(
            "raumklang_runden_amplitude",
            "Durchschnittsamplitude der letzten Runde",
        ))?;
        registry.register(Box::new(runden_amplitude.clone()))?;

        let teilnehmer_abstand_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "raumklang_teilnehmer_abstand_seconds",
                "Maximaler Abstand zwischen zwei Frames eines Teilnehmers",
            )
            .buckets(vec![0.005, 0.01, 0.02, 0.04, 0.08, 0.16, 0.32, 0.64]),
        )?;
        registry.register(Box::new(teilnehmer_abstand_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            runden_total,
            verspaetet_total,
            ausgleich_verworfen_total,
            abgelehnt_total,
            teilnehmer,
            prominente_streams,
            runden_amplitude,
            max_warteschlange,
            teilnehmer_abstand_seconds,
        })
    }

    /// Uebernimmt einen Mixer-Snapshot
    ///
    /// Zaehler werden um die Differenz zum letzten Stand erhoeht und bleiben
    /// damit monoton, auch wenn Snapshots unregelmaessig eintreffen.
    pub fn aktualisieren(&self, snapshot: &MixerSnapshot) {
        nachziehen(&self.runden_total, snapshot.runden_gesamt);
        nachziehen(&self.verspaetet_total, snapshot.verspaetet_gesamt);
        nachziehen(&self.ausgleich_verworfen_total, snapshot.ausgleich_verworfen);
        nachziehen(&self.abgelehnt_total, snapshot.abgelehnt_gesamt);

        self.teilnehmer.set(snapshot.teilnehmer.len() as i64);
        self.prominente_streams.set(snapshot.prominente_streams as i64);
        self.runden_amplitude.set(snapshot.letzte_amplitude as f64);
        self.max_warteschlange.set(snapshot.max_warteschlange as i64);

        for t in snapshot.teilnehmer.iter().filter(|t| t.max_abstand_ms > 0.0) {
            self.teilnehmer_abstand_seconds
                .observe(t.max_abstand_ms as f64 / 1000.0);
        }
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn nachziehen(zaehler: &IntCounter, stand: u64) {
    let bisher = zaehler.get();
    if stand > bisher {
        zaehler.inc_by(stand - bisher);
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: MixerMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<MixerMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raumklang_mixer::{ParticipantState, TeilnehmerSnapshot};

    fn snapshot(runden: u64, verspaetet: u64) -> MixerSnapshot {
        MixerSnapshot {
            runden_gesamt: runden,
            verspaetet_gesamt: verspaetet,
            prominente_streams: 2,
            letzte_amplitude: 0.25,
            max_warteschlange: 3,
            ..MixerSnapshot::default()
        }
    }

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = MixerMetrics::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn zaehler_folgen_dem_snapshot() {
        let metriken = MixerMetrics::neu().unwrap();
        metriken.aktualisieren(&snapshot(10, 2));
        metriken.aktualisieren(&snapshot(25, 3));

        assert_eq!(metriken.runden_total.get(), 25);
        assert_eq!(metriken.verspaetet_total.get(), 3);
        assert_eq!(metriken.prominente_streams.get(), 2);
        assert_eq!(metriken.max_warteschlange.get(), 3);
        assert!((metriken.runden_amplitude.get() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn zaehler_laufen_nie_rueckwaerts() {
        let metriken = MixerMetrics::neu().unwrap();
        metriken.aktualisieren(&snapshot(10, 0));
        // z.B. neuer Mixer nach Neustart
        metriken.aktualisieren(&snapshot(4, 0));
        assert_eq!(metriken.runden_total.get(), 10);
    }

    #[test]
    fn teilnehmer_abstand_wird_beobachtet() {
        let metriken = MixerMetrics::neu().unwrap();
        let teilnehmer = TeilnehmerSnapshot {
            id: raumklang_core::ParticipantId::new(),
            verbunden: true,
            zustand: ParticipantState::Normal,
            queue_laenge: 1,
            max_abstand_ms: 40.0,
            ausgleich_offen: 0,
            spricht: false,
            prominent: false,
            sendet_spatial: false,
            pakete_gesamt: 50,
            verspaetet_gesamt: 0,
            erster_empfang_us: 1,
            letzter_empfang_us: 2,
        };
        let snap = MixerSnapshot {
            teilnehmer: vec![teilnehmer],
            ..MixerSnapshot::default()
        };
        metriken.aktualisieren(&snap);

        assert_eq!(metriken.teilnehmer.get(), 1);
        assert_eq!(metriken.teilnehmer_abstand_seconds.get_sample_count(), 1);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = MixerMetrics::neu().unwrap();
        metriken.aktualisieren(&snapshot(7, 1));

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("raumklang_runden_total 7"));
        assert!(output.contains("raumklang_verspaetet_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn alle_metriken_in_registry_registriert() {
        let metriken = MixerMetrics::neu().unwrap();
        let families = metriken.registry.gather();
        let namen: Vec<&str> = families.iter().map(|f| f.get_name()).collect();

        for name in [
            "raumklang_runden_total",
            "raumklang_verspaetet_total",
            "raumklang_ausgleich_verworfen_total",
            "raumklang_abgelehnt_total",
            "raumklang_teilnehmer",
            "raumklang_prominente_streams",
            "raumklang_runden_amplitude",
            "raumklang_max_warteschlange",
            "raumklang_teilnehmer_abstand_seconds",
        ] {
            assert!(namen.contains(&name), "{name} fehlt");
        }
    }
}
