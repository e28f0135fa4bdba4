//! Frame-Verarbeitung fuer die Vorverarbeitungs-Pipeline
//!
//! Die Pipeline kennt nur das `FrameProcessor`-Trait. Welche Bibliothek
//! dahinter Rauschen unterdrueckt und Sprache erkennt, bleibt ihr
//! verborgen; eine native Bibliothek wird hinter einem eigenen Typ mit
//! diesem Trait gekapselt.

pub mod arv;
pub mod noise_gate;
pub mod vad;

use crate::error::AudioResult;

pub use arv::ArvMeter;
pub use noise_gate::{NoiseGate, NoiseGateConfig};
pub use vad::{Vad, VadConfig};

/// Verarbeitet Frames fester Groesse in-place
pub trait FrameProcessor: Send {
    /// Rauschunterdrueckung und VAD auf einem Frame
    fn process(&mut self, frame: &mut [f32]) -> AudioResult<()>;

    /// Setzt den internen Zustand zurueck (Filter-Historie, VAD)
    fn reset(&mut self);

    /// Wurde im zuletzt verarbeiteten Frame Sprache erkannt?
    fn is_speech_detected(&self) -> bool;

    /// Live-Einstellung der Unterdrueckungsstaerke (0.0..=1.0)
    fn set_unterdrueckung(&mut self, _stufe: f32) {}
}

// ---------------------------------------------------------------------------
// StandardProzessor
// ---------------------------------------------------------------------------

/// Energie-VAD plus Noise Gate
///
/// Die VAD bewertet das unbearbeitete Signal, danach schliesst das Gate
/// alles unterhalb der Rauschschwelle.
pub struct StandardProzessor {
    gate: NoiseGate,
    vad: Vad,
}

impl StandardProzessor {
    pub fn neu(gate: NoiseGateConfig, vad: VadConfig) -> Self {
        Self {
            gate: NoiseGate::neu(gate),
            vad: Vad::neu(vad),
        }
    }

    /// Schwellen aus der Voice-Konfiguration
    pub fn aus_config(config: &sprechfunk_core::VoiceConfig) -> Self {
        Self::neu(
            NoiseGateConfig {
                schwelle: config.rauschunterdrueckung,
                ..NoiseGateConfig::default()
            },
            VadConfig {
                energy_threshold: config.vad_schwelle,
                ..VadConfig::default()
            },
        )
    }

    pub fn gate(&self) -> &NoiseGate {
        &self.gate
    }
}

impl FrameProcessor for StandardProzessor {
    fn process(&mut self, frame: &mut [f32]) -> AudioResult<()> {
        self.vad.detect(frame);
        self.gate.process(frame);
        Ok(())
    }

    fn reset(&mut self) {
        self.gate.reset();
        self.vad.reset();
    }

    fn is_speech_detected(&self) -> bool {
        self.vad.is_voice_active()
    }

    fn set_unterdrueckung(&mut self, stufe: f32) {
        self.gate.set_schwelle(stufe);
    }
}
