//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable:
//! - `RK_LOG_LEVEL`: Log-Level oder vollstaendige Filter-Direktive, Standard: info
//! - `RK_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Fremd-Crates (axum, hyper) werden auf `warn` begrenzt, damit die
//! Mixer-Statistik im Log lesbar bleibt.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

const ENV_LEVEL: &str = "RK_LOG_LEVEL";
const ENV_FORMAT: &str = "RK_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// Umgebungsvariablen haben Vorrang vor den uebergebenen Werten. Schlaegt
/// fehl, wenn bereits ein globaler Subscriber gesetzt ist.
pub fn logging_initialisieren(level: &str, format: &str) -> Result<()> {
    let level = std::env::var(ENV_LEVEL).unwrap_or_else(|_| level.to_string());
    let format = std::env::var(ENV_FORMAT).unwrap_or_else(|_| format.to_string());

    let filter = EnvFilter::try_new(filter_direktive(&level))
        .unwrap_or_else(|_| EnvFilter::new(filter_direktive("info")));

    let ergebnis = match format.as_str() {
        "json" => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        _ => fmt().with_env_filter(filter).with_target(true).try_init(),
    };

    ergebnis.map_err(|e| anyhow!("Logging bereits initialisiert: {e}"))
}

/// Baut die Filter-Direktive: einfache Level gelten fuer die Raumklang-Crates,
/// alles andere wird unveraendert uebernommen (z.B. `raumklang_mixer=trace`).
pub fn filter_direktive(level: &str) -> String {
    if log_level_gueltig(level) {
        format!("warn,raumklang_mixer={level},raumklang_server={level},raumklang_observability={level}")
    } else {
        level.to_string()
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
