//! Fehlertypen fuer die Audio-Seite

use sprechfunk_core::SprechfunkError;
use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Pipelines
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Kein Standard-Eingabegeraet verfuegbar")]
    KeinStandardEingabegeraet,

    #[error("Kein Standard-Ausgabegeraet verfuegbar")]
    KeinStandardAusgabegeraet,

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),

    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Resampler-Fehler: {0}")]
    Resampler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Thread-Fehler: {0}")]
    Thread(String),

    #[error(transparent)]
    Kern(#[from] SprechfunkError),
}

pub type AudioResult<T> = Result<T, AudioError>;
