//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sprechfunk_core::VoiceConfig;
use sprechfunk_observability::LoggingConfig;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingConfig,
    /// Sprach-Einstellungen (fuer den Relay nur informativ)
    pub voice: VoiceConfig,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    pub bind_adresse: String,
    /// UDP-Port fuer alle Nachrichten
    pub port: u16,
    /// Groesster angenommener Datagramm
    pub max_datagramm: usize,
    /// Ohne Pakete gilt ein Client nach dieser Zeit als getrennt (s)
    pub client_timeout_s: u64,
    /// Abstand der Verkehrs-Statistik im Log (s), 0 = aus
    pub statistik_intervall_s: u64,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 9987,
            max_datagramm: 1500,
            client_timeout_s: 10,
            statistik_intervall_s: 60,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.voice.validieren()?;
        Ok(config)
    }

    pub fn aus_toml(inhalt: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(inhalt)?)
    }

    /// Vollstaendige Bind-Adresse des UDP-Sockets
    pub fn udp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.netzwerk.client_timeout_s.max(1))
    }

    /// `None` wenn die Statistik abgeschaltet ist
    pub fn statistik_intervall(&self) -> Option<Duration> {
        match self.netzwerk.statistik_intervall_s {
            0 => None,
            s => Some(Duration::from_secs(s)),
        }
    }
}
