//! Sample-Format

use std::time::Duration;

/// Abtastrate, mit der intern verarbeitet wird
pub const INTERNE_ABTASTRATE: u32 = 48_000;

/// Format eines Sample-Stroms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaveFormat {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl (Sprechfunk verarbeitet nur Mono)
    pub channels: u16,
}

impl WaveFormat {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// Anzahl Samples fuer die gegebene Dauer
    pub fn samples_fuer(&self, dauer: Duration) -> usize {
        (dauer.as_secs_f64() * f64::from(self.sample_rate)).round() as usize * self.channels as usize
    }

    /// Dauer einer gegebenen Sample-Anzahl
    pub fn dauer_von(&self, samples: usize) -> Duration {
        let frames = samples / self.channels.max(1) as usize;
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

impl std::fmt::Display for WaveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Hz {}ch", self.sample_rate, self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zwanzig_ms_bei_48k() {
        let f = WaveFormat::mono(48_000);
        assert_eq!(f.samples_fuer(Duration::from_millis(20)), 960);
        assert!((f.dauer_von(480).as_secs_f64() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn anzeige() {
        assert_eq!(WaveFormat::mono(16_000).to_string(), "16000Hz 1ch");
    }
}
