//! Gemeinsame Identifikationstypen fuer Raumklang
//!
//! IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige Teilnehmer-ID (eine Audio-Verbindung in der Session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Erstellt eine neue zufaellige ParticipantId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }

    /// Kurzform fuer Dateinamen und Log-Zeilen (erste 8 Hex-Stellen)
    pub fn kurz(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "participant:{}", self.0)
    }
}

/// Quell-ID einer raeumlichen Audioquelle (Avatar) in den HRTF-Metadaten
pub type SourceId = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_id_eindeutig() {
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        assert_ne!(a, b, "Zwei neue ParticipantIds muessen verschieden sein");
    }

    #[test]
    fn participant_id_display() {
        let id = ParticipantId(Uuid::nil());
        assert!(id.to_string().starts_with("participant:"));
        assert_eq!(id.kurz(), "00000000");
    }

    #[test]
    fn ids_sind_serde_kompatibel() {
        let id = ParticipantId::new();
        let json = serde_json::to_string(&id).unwrap();
        let id2: ParticipantId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, id2);
    }
}
