//! Fehlertypen fuer Raumklang
//!
//! Zentraler Fehler-Enum fuer die Server-Ebene. Der Mixer definiert eigene
//! Fehler (`MixerError`), die hier via `Audio` eingebettet werden.

use thiserror::Error;

/// Globaler Result-Alias fuer Raumklang
pub type Result<T> = std::result::Result<T, RaumklangError>;

/// Fehler auf Session-Server-Ebene
#[derive(Debug, Error)]
pub enum RaumklangError {
    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Audio ---
    #[error("Audiofehler: {0}")]
    Audio(String),

    // --- Teilnehmer / Session ---
    #[error("Teilnehmer nicht gefunden: {0}")]
    TeilnehmerNichtGefunden(String),

    #[error("Session beendet")]
    SessionBeendet,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl RaumklangError {
    /// Erstellt einen Audiofehler aus einem beliebigen anzeigbaren Fehler
    pub fn audio(err: impl std::fmt::Display) -> Self {
        Self::Audio(err.to_string())
    }
}
