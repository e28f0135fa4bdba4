//! Fehlertypen fuer die Empfangs- und Sitzungsseite

use sprechfunk_audio::AudioError;
use sprechfunk_core::SprechfunkError;
use sprechfunk_protocol::ProtokollFehler;
use thiserror::Error;
use uuid::Uuid;

/// Alle Fehler des Voice-Crates
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error(transparent)]
    Kern(#[from] SprechfunkError),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtokollFehler),

    #[error("Unbekannter Spieler: {0}")]
    UnbekannterSpieler(String),

    #[error("Keine Verbindung zum Server")]
    NichtVerbunden,
}

impl VoiceError {
    /// Diagnose-ID falls es sich um einen moeglichen Programmfehler handelt
    pub fn diagnose_id(&self) -> Option<Uuid> {
        match self {
            Self::Kern(e) => e.diagnose_id(),
            Self::Audio(AudioError::Kern(e)) => e.diagnose_id(),
            _ => None,
        }
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;
