//! Voice Activity Detection (VAD)
//!
//! Vergleicht die geglaettete Frame-Energie mit einer Schwelle, die dem
//! gemessenen Rauschboden folgt. Zu viele Nulldurchgaenge sprechen fuer
//! Rauschen statt Sprache. Nach der letzten Aktivitaet bleibt die VAD noch
//! `hangover_frames` lang aktiv, damit Silbenpausen nicht abgeschnitten werden.
//!
//! Die VAD veraendert keine Samples.

/// Konfiguration fuer die VAD
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Untergrenze der Energieschwelle (RMS, 0.0..1.0)
    pub energy_threshold: f32,
    /// Die Schwelle liegt mindestens so weit ueber dem Rauschboden
    pub rauschabstand: f32,
    /// Nulldurchgaenge pro Sample, oberhalb gilt das Signal als Rauschen
    pub zcr_threshold: f32,
    pub hangover_frames: u32,
    /// Glaettungsfaktor fuer Energie (0.0 = keine Glaettung)
    pub smoothing: f32,
    /// Anpassungsrate des Rauschbodens in inaktiven Frames
    pub boden_rate: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.001,
            rauschabstand: 3.0,
            zcr_threshold: 0.3,
            hangover_frames: 8,
            smoothing: 0.9,
            boden_rate: 0.05,
        }
    }
}

/// Voice Activity Detector
pub struct Vad {
    config: VadConfig,
    energie: f32,
    rauschboden: f32,
    nachlauf: u32,
    aktiv: bool,
}

impl Vad {
    pub fn neu(config: VadConfig) -> Self {
        Self {
            config,
            energie: 0.0,
            rauschboden: 0.0,
            nachlauf: 0,
            aktiv: false,
        }
    }

    pub fn is_voice_active(&self) -> bool {
        self.aktiv
    }

    /// Aktuell wirksame Energieschwelle
    pub fn schwelle(&self) -> f32 {
        (self.rauschboden * self.config.rauschabstand).max(self.config.energy_threshold)
    }

    /// Bewertet einen Frame. Ein leerer Frame aendert den Zustand nicht.
    pub fn detect(&mut self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return self.aktiv;
        }

        let a = self.config.smoothing.clamp(0.0, 1.0);
        self.energie = a * self.energie + (1.0 - a) * rms_energy(samples);

        let sprache =
            self.energie > self.schwelle() && zero_crossing_rate(samples) < self.config.zcr_threshold;

        if sprache {
            self.nachlauf = self.config.hangover_frames;
            self.aktiv = true;
            return true;
        }

        // Rauschboden nur ausserhalb von Sprache nachfuehren
        let r = self.config.boden_rate.clamp(0.0, 1.0);
        self.rauschboden += r * (self.energie - self.rauschboden);

        self.aktiv = match self.nachlauf {
            0 => false,
            n => {
                self.nachlauf = n - 1;
                true
            }
        };
        self.aktiv
    }

    pub fn set_energy_threshold(&mut self, threshold: f32) {
        self.config.energy_threshold = threshold;
    }

    pub fn smoothed_energy(&self) -> f32 {
        self.energie
    }

    pub fn rauschboden(&self) -> f32 {
        self.rauschboden
    }

    pub fn reset(&mut self) {
        self.energie = 0.0;
        self.rauschboden = 0.0;
        self.nachlauf = 0;
        self.aktiv = false;
    }
}

/// RMS-Energie eines Frames
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let summe: f32 = samples.iter().map(|s| s * s).sum();
    (summe / samples.len() as f32).sqrt()
}

/// Anteil der Sample-Paare mit Vorzeichenwechsel
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let wechsel = samples
        .windows(2)
        .filter(|w| w[0].is_sign_negative() != w[1].is_sign_negative())
        .count();
    wechsel as f32 / (samples.len() - 1) as f32
}
