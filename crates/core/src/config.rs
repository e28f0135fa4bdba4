//! Sprach-Konfiguration
//!
//! Wird beim Start explizit an alle Pipelines uebergeben. Einstellungen
//! die zur Laufzeit veraenderbar sind (z.B. Rauschunterdrueckung) werden
//! ueber eigene Update-Aufrufe der Komponenten gesetzt, nicht ueber diese
//! Struktur.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SprechfunkError};

/// Zulaessige Opus-Frame-Dauern in Millisekunden
pub const ERLAUBTE_FRAME_DAUERN_MS: [u32; 4] = [10, 20, 40, 60];

/// Vollstaendige Sprach-Konfiguration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Dauer eines kodierten Frames in ms
    pub frame_dauer_ms: u32,
    /// Ziel-Bitrate des Encoders in kbit/s
    pub bitrate_kbps: u32,
    /// Encoder-Komplexitaet (0..=10)
    pub komplexitaet: u8,
    /// Schwelle der Rauschunterdrueckung (RMS, 0.0 = aus)
    pub rauschunterdrueckung: f32,
    /// Energie-Schwelle der Sprachaktivitaetserkennung
    pub vad_schwelle: f32,
    /// Ab dieser Anzahl gepufferter Pakete warnt der Jitter-Buffer
    pub jitter_warn_schwelle: usize,
    /// Inaktivitaet nach der ein Sprecher als verstummt gilt (ms)
    pub empfangs_timeout_ms: u64,
    /// Totzone der Desync-Korrektur (ms)
    pub desync_totzone_ms: f64,
    /// Desync bei dem die maximale Geschwindigkeitskorrektur erreicht ist (ms)
    pub desync_max_ms: f64,
    /// Ab diesem Desync werden Samples hart uebersprungen (ms)
    pub hard_skip_ms: f64,
    /// Maximale Abweichung der Wiedergabegeschwindigkeit (0.1 = +-10%)
    pub max_geschwindigkeits_abweichung: f32,
    /// Kapazitaet der Sende-Puffer des Clients (Pakete)
    pub sende_puffer: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            frame_dauer_ms: 20,
            bitrate_kbps: 24,
            komplexitaet: 10,
            rauschunterdrueckung: 0.005,
            vad_schwelle: 0.001,
            jitter_warn_schwelle: 30,
            empfangs_timeout_ms: 600,
            desync_totzone_ms: 29.0,
            desync_max_ms: 500.0,
            hard_skip_ms: 500.0,
            max_geschwindigkeits_abweichung: 0.1,
            sende_puffer: 16,
        }
    }
}

impl VoiceConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(pfad, "Keine Sprach-Konfiguration gefunden, verwende Standardwerte");
                Self::default()
            }
            Err(e) => {
                return Err(SprechfunkError::konfiguration(format!(
                    "'{pfad}' nicht lesbar: {e}"
                )))
            }
        };
        config.validieren()?;
        Ok(config)
    }

    /// Parst die Konfiguration aus einem TOML-String
    pub fn aus_toml(inhalt: &str) -> Result<Self> {
        toml::from_str(inhalt).map_err(|e| SprechfunkError::konfiguration(e.to_string()))
    }

    /// Prueft alle Werte auf Plausibilitaet
    pub fn validieren(&self) -> Result<()> {
        if !ERLAUBTE_FRAME_DAUERN_MS.contains(&self.frame_dauer_ms) {
            return Err(SprechfunkError::konfiguration(format!(
                "frame_dauer_ms muss eines von {:?} sein, war {}",
                ERLAUBTE_FRAME_DAUERN_MS, self.frame_dauer_ms
            )));
        }
        if !(6..=510).contains(&self.bitrate_kbps) {
            return Err(SprechfunkError::konfiguration(format!(
                "bitrate_kbps muss zwischen 6 und 510 liegen, war {}",
                self.bitrate_kbps
            )));
        }
        if self.komplexitaet > 10 {
            return Err(SprechfunkError::konfiguration(format!(
                "komplexitaet muss <= 10 sein, war {}",
                self.komplexitaet
            )));
        }
        if !(0.0..=1.0).contains(&self.rauschunterdrueckung) {
            return Err(SprechfunkError::konfiguration(
                "rauschunterdrueckung muss zwischen 0.0 und 1.0 liegen",
            ));
        }
        if self.desync_totzone_ms < 0.0 || self.desync_max_ms <= self.desync_totzone_ms {
            return Err(SprechfunkError::konfiguration(
                "desync_max_ms muss groesser als desync_totzone_ms sein",
            ));
        }
        if self.hard_skip_ms <= 0.0 {
            return Err(SprechfunkError::konfiguration("hard_skip_ms muss positiv sein"));
        }
        if !(0.0..1.0).contains(&self.max_geschwindigkeits_abweichung) {
            return Err(SprechfunkError::konfiguration(
                "max_geschwindigkeits_abweichung muss in [0.0, 1.0) liegen",
            ));
        }
        if self.sende_puffer == 0 {
            return Err(SprechfunkError::konfiguration("sende_puffer darf nicht 0 sein"));
        }
        Ok(())
    }

    /// Frame-Dauer als `Duration`
    pub fn frame_dauer(&self) -> Duration {
        Duration::from_millis(u64::from(self.frame_dauer_ms))
    }

    /// Empfangs-Timeout als `Duration`
    pub fn empfangs_timeout(&self) -> Duration {
        Duration::from_millis(self.empfangs_timeout_ms)
    }
}
