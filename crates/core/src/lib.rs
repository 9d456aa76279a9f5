//! raumklang-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die vom Mixer, der
//! Observability und dem Server gemeinsam genutzt werden.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{RaumklangError, Result};
pub use types::{ParticipantId, SourceId};
