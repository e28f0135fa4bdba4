//! Noise Gate mit Hysterese
//!
//! Bewertet pro Frame den RMS-Pegel und blendet den Gain mit
//! Attack/Release-Zeiten ueber. Unterhalb der Schliess-Schwelle wird das
//! Signal ausgeblendet.

use super::vad::rms_energy;

/// Konfiguration fuer das Noise Gate
#[derive(Debug, Clone)]
pub struct NoiseGateConfig {
    /// Oeffnungs-Schwelle (linearer RMS-Pegel, 0.0..1.0)
    pub schwelle: f32,
    /// Schliess-Schwelle relativ zur Oeffnungs-Schwelle
    pub hysterese: f32,
    /// Attack-Zeit in Sekunden
    pub attack_secs: f32,
    /// Release-Zeit in Sekunden
    pub release_secs: f32,
    /// Abtastrate in Hz
    pub sample_rate: f32,
}

impl Default for NoiseGateConfig {
    fn default() -> Self {
        Self {
            schwelle: 0.005,
            hysterese: 0.7,
            attack_secs: 0.002,
            release_secs: 0.05,
            sample_rate: 48_000.0,
        }
    }
}

/// Noise Gate Prozessor
pub struct NoiseGate {
    config: NoiseGateConfig,
    offen: bool,
    gain: f32,
    attack_coeff: f32,
    release_coeff: f32,
}

impl NoiseGate {
    pub fn neu(config: NoiseGateConfig) -> Self {
        let attack_coeff = time_to_coeff(config.attack_secs, config.sample_rate);
        let release_coeff = time_to_coeff(config.release_secs, config.sample_rate);
        Self {
            config,
            offen: false,
            gain: 0.0,
            attack_coeff,
            release_coeff,
        }
    }

    /// Setzt die Oeffnungs-Schwelle zur Laufzeit
    pub fn set_schwelle(&mut self, schwelle: f32) {
        self.config.schwelle = schwelle.clamp(0.0, 1.0);
    }

    pub fn schwelle(&self) -> f32 {
        self.config.schwelle
    }

    /// Aktueller Gain (0.0 = geschlossen, 1.0 = offen)
    pub fn current_gain(&self) -> f32 {
        self.gain
    }

    pub fn is_open(&self) -> bool {
        self.offen
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        let pegel = rms_energy(samples);
        if self.offen {
            if pegel < self.config.schwelle * self.config.hysterese {
                self.offen = false;
            }
        } else if pegel >= self.config.schwelle {
            self.offen = true;
        }

        let ziel = if self.offen { 1.0f32 } else { 0.0 };
        let coeff = if ziel > self.gain {
            self.attack_coeff
        } else {
            self.release_coeff
        };

        for sample in samples.iter_mut() {
            self.gain = coeff * self.gain + (1.0 - coeff) * ziel;
            *sample *= self.gain;
        }
    }

    pub fn reset(&mut self) {
        self.offen = false;
        self.gain = 0.0;
    }
}

fn time_to_coeff(time_secs: f32, sample_rate: f32) -> f32 {
    if time_secs <= 0.0 {
        return 0.0;
    }
    (-1.0 / (time_secs * sample_rate)).exp()
}
