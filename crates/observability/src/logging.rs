//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable, die Vorrang vor der Datei hat:
//! - `SF_LOG_LEVEL`: Filter-Direktive (z.B. `info` oder `sprechfunk_voice=trace`)
//! - `SF_LOG_FORMAT`: `text` oder `json`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{fmt as subscriber_fmt, EnvFilter};

pub const ENV_LEVEL: &str = "SF_LOG_LEVEL";
pub const ENV_FORMAT: &str = "SF_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum LoggingFehler {
    #[error("Ungueltiges Log-Format '{0}' (erlaubt: text, json)")]
    UngueltigesFormat(String),

    #[error("Logging bereits initialisiert: {0}")]
    BereitsInitialisiert(String),
}

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingFehler;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            andere => Err(LoggingFehler::UngueltigesFormat(andere.to_owned())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// `[logging]`-Abschnitt der Konfiguration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter-Direktive, z.B. "info" oder "sprechfunk_voice=debug,info"
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

/// Initialisiert das Logging-System.
///
/// `SF_LOG_LEVEL` und `SF_LOG_FORMAT` ueberschreiben die uebergebenen
/// Werte. Ein ungueltiges Level faellt auf `info` zurueck, ein ungueltiges
/// Format ist ein Fehler.
pub fn logging_initialisieren(level: &str, format: LogFormat) -> Result<(), LoggingFehler> {
    let filter = filter_bauen(std::env::var(ENV_LEVEL).ok().as_deref(), level);
    let format = match std::env::var(ENV_FORMAT) {
        Ok(wert) => wert.parse()?,
        Err(_) => format,
    };

    let ergebnis = match format {
        LogFormat::Json => subscriber_fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => subscriber_fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_names(true)
            .try_init(),
    };
    ergebnis.map_err(|e| LoggingFehler::BereitsInitialisiert(e.to_string()))
}

/// Umgebung vor Konfiguration vor `info`
fn filter_bauen(aus_env: Option<&str>, level: &str) -> EnvFilter {
    aus_env
        .and_then(|d| EnvFilter::try_new(d).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
