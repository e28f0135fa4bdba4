//! Fehlertypen fuer Sprechfunk
//!
//! Zentraler Fehler-Enum fuer alle Crates. Untermodule definieren eigene
//! Fehler und konvertieren via `#[from]`.
//!
//! Invarianten-Verletzungen ("moegliche Fehler") tragen immer eine feste
//! Diagnose-ID, damit eine Log-Zeile eindeutig einer Stelle im Code
//! zugeordnet werden kann.

use thiserror::Error;
use uuid::Uuid;

/// Globaler Result-Alias fuer Sprechfunk
pub type Result<T> = std::result::Result<T, SprechfunkError>;

/// Alle moeglichen Fehler im Sprechfunk-System
#[derive(Debug, Error)]
pub enum SprechfunkError {
    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {nachricht} (Support-Referenz: {ticket_id})")]
    Konfiguration { nachricht: String, ticket_id: Uuid },

    // --- Invarianten ---
    #[error("Moeglicher Fehler: {nachricht} (Diagnose-ID: {diagnose_id})")]
    MoeglicherFehler { nachricht: String, diagnose_id: Uuid },

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    // --- Transport ---
    #[error("Transportfehler: {0}")]
    Transport(String),

    // --- Audio ---
    #[error("Audiofehler: {0}")]
    Audio(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl SprechfunkError {
    /// Erstellt einen Fehler fuer eine verletzte Invariante
    pub fn moeglicher_fehler(nachricht: impl Into<String>, diagnose_id: Uuid) -> Self {
        Self::MoeglicherFehler {
            nachricht: nachricht.into(),
            diagnose_id,
        }
    }

    /// Erstellt einen Konfigurationsfehler mit Support-Referenz
    pub fn konfiguration(nachricht: impl Into<String>) -> Self {
        Self::Konfiguration {
            nachricht: nachricht.into(),
            ticket_id: diagnose::KONFIGURATION_UNGUELTIG,
        }
    }

    /// Gibt die Diagnose-ID zurueck, falls vorhanden
    pub fn diagnose_id(&self) -> Option<Uuid> {
        match self {
            Self::MoeglicherFehler { diagnose_id, .. } => Some(*diagnose_id),
            Self::Konfiguration { ticket_id, .. } => Some(*ticket_id),
            _ => None,
        }
    }

    /// Gibt true zurueck wenn der Fehler wiederholbar sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Feste Diagnose-IDs fuer Invarianten-Verletzungen
pub mod diagnose {
    use uuid::Uuid;

    pub const KONFIGURATION_UNGUELTIG: Uuid = Uuid::from_u128(0x5c1f_0a2e_7d44_4b8e_9a61_0f3c_2e7b_9d10);

    pub const KANAL_BEREITS_SCHLIESSEND: Uuid = Uuid::from_u128(0x1b8d_33f0_6a2c_4e57_8c0d_5e94_71a2_c6e3);
    pub const KANAL_NICHT_SCHLIESSEND: Uuid = Uuid::from_u128(0x8e02_f7c1_3d95_4a06_b4e8_2c17_9f5d_0a48);

    pub const CAPTURE_BEREITS_ABONNIERT: Uuid = Uuid::from_u128(0x2f6a_91d4_c08b_4f73_a5e2_6b3d_18c9_e047);
    pub const CAPTURE_NICHT_ABONNIERT: Uuid = Uuid::from_u128(0xa94c_5e17_2b60_4d8f_9e31_c7f0_4a2b_6d95);
    pub const FORMAT_FEHLANPASSUNG: Uuid = Uuid::from_u128(0x0d73_e8a9_4f12_4c6b_8b05_91e6_3da7_f2c4);

    pub const VERARBEITUNG_ABGESTUERZT: Uuid = Uuid::from_u128(0x6e49_0b2d_a7f3_4185_bc96_3f08_d1e5_7a2b);
    pub const PIPELINE_BEREITS_GESTARTET: Uuid = Uuid::from_u128(0xc3b1_72e6_5d08_4a9f_a214_8e5c_0b7d_39f1);

    pub const WIEDERGABE_BEREITS_AKTIV: Uuid = Uuid::from_u128(0x47e5_d90a_1c36_4b72_9f8d_a02e_6c41_b583);

    pub const CLIENT_NACHRICHT_AM_SERVER: Uuid = Uuid::from_u128(0x9a20_4c6f_e815_4d3b_a7c9_51f2_8e06_d4b7);
    pub const SERVER_NACHRICHT_AM_CLIENT: Uuid = Uuid::from_u128(0x3d5e_a81b_7c02_4f69_b1d4_e6a3_05f8_9c27);
}
