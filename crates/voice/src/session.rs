//! Sprech-Sessions und Jitter-Schaetzung
//!
//! Eine `SpeechSession` bindet eine Decoder-Pipeline an ihren
//! Erstellungszeitpunkt. Die Wiedergabe beginnt erst zur
//! Aktivierungszeit: Erstellung plus eine Pufferverzoegerung, die aus dem
//! gemessenen Netzwerk-Jitter und dessen Konfidenz folgt.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sprechfunk_audio::WaveFormat;
use sprechfunk_core::ChannelPriority;

use crate::decoder::{DecoderPipeline, SessionSignal};
use crate::error::VoiceResult;

/// Untergrenze der Pufferverzoegerung in Sekunden
pub const MINDEST_VERZOEGERUNG: f32 = 0.05;

/// Verzoegerung solange noch keine Jitter-Messung vorliegt
pub const START_VERZOEGERUNG: f32 = 0.1;

/// Gewicht der Jitter-Messung
const JITTER_FAKTOR: f32 = 2.5;

// ---------------------------------------------------------------------------
// Jitter-Schaetzung
// ---------------------------------------------------------------------------

/// Schaetzt den Netzwerk-Jitter aus Paketverspaetungen
pub trait JitterEstimator: Send + Sync {
    /// Neue Verspaetung in Sekunden
    fn update(&self, verspaetung: f32);

    /// Jitter in Sekunden
    fn jitter(&self) -> f32;

    /// Vertrauen in die Schaetzung (0..=1)
    fn confidence(&self) -> f32;
}

struct Fenster {
    werte: VecDeque<f64>,
    summe: f64,
    quadratsumme: f64,
}

/// Standardabweichung der Verspaetung ueber ein gleitendes Fenster.
///
/// Die Konfidenz waechst linear mit der Fuellung des Fensters.
pub struct FensterJitterSchaetzer {
    groesse: usize,
    fenster: Mutex<Fenster>,
}

impl FensterJitterSchaetzer {
    pub const STANDARD_FENSTER: usize = 64;

    pub fn neu(groesse: usize) -> Self {
        let groesse = groesse.max(2);
        Self {
            groesse,
            fenster: Mutex::new(Fenster {
                werte: VecDeque::with_capacity(groesse),
                summe: 0.0,
                quadratsumme: 0.0,
            }),
        }
    }

    pub fn anzahl(&self) -> usize {
        self.fenster.lock().werte.len()
    }
}

impl Default for FensterJitterSchaetzer {
    fn default() -> Self {
        Self::neu(Self::STANDARD_FENSTER)
    }
}

impl JitterEstimator for FensterJitterSchaetzer {
    fn update(&self, verspaetung: f32) {
        let wert = f64::from(verspaetung);
        let mut f = self.fenster.lock();
        if f.werte.len() == self.groesse {
            if let Some(alt) = f.werte.pop_front() {
                f.summe -= alt;
                f.quadratsumme -= alt * alt;
            }
        }
        f.werte.push_back(wert);
        f.summe += wert;
        f.quadratsumme += wert * wert;
    }

    fn jitter(&self) -> f32 {
        let f = self.fenster.lock();
        let n = f.werte.len();
        if n < 2 {
            return 0.0;
        }
        let mittel = f.summe / n as f64;
        let varianz = (f.quadratsumme / n as f64 - mittel * mittel).max(0.0);
        varianz.sqrt() as f32
    }

    fn confidence(&self) -> f32 {
        self.anzahl() as f32 / self.groesse as f32
    }
}

/// Pufferverzoegerung fuer den aktuellen Stand der Schaetzung
pub fn verzoegerung(schaetzer: &dyn JitterEstimator) -> Duration {
    let konfidenz = schaetzer.confidence().clamp(0.0, 1.0);
    let jitter_anteil = schaetzer.jitter() * JITTER_FAKTOR * konfidenz;
    let start_anteil = START_VERZOEGERUNG * (1.0 - konfidenz);
    Duration::from_secs_f32((jitter_anteil + start_anteil).max(MINDEST_VERZOEGERUNG))
}

// ---------------------------------------------------------------------------
// SpeechSession
// ---------------------------------------------------------------------------

/// Identifiziert eine Session eindeutig pro Spieler
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionContext {
    pub spieler: String,
    pub id: u32,
}

impl SessionContext {
    pub fn neu(spieler: impl Into<String>, id: u32) -> Self {
        Self {
            spieler: spieler.into(),
            id,
        }
    }
}

impl std::fmt::Display for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.spieler, self.id)
    }
}

/// Eine zusammenhaengende Sprachaeusserung eines Spielers
pub struct SpeechSession {
    context: SessionContext,
    pipeline: DecoderPipeline,
    erstellt: Instant,
    jitter: Arc<dyn JitterEstimator>,
}

impl SpeechSession {
    pub fn neu(
        context: SessionContext,
        pipeline: DecoderPipeline,
        jitter: Arc<dyn JitterEstimator>,
        erstellt: Instant,
    ) -> Self {
        Self {
            context,
            pipeline,
            erstellt,
            jitter,
        }
    }

    /// Aktuelle Pufferverzoegerung
    pub fn verzoegerung(&self) -> Duration {
        verzoegerung(self.jitter.as_ref())
    }

    /// Ab wann die Wiedergabe beginnen darf
    pub fn aktivierungszeit(&self) -> Instant {
        self.erstellt + self.verzoegerung()
    }

    pub fn erstellt(&self) -> Instant {
        self.erstellt
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn priority(&self) -> ChannelPriority {
        self.pipeline.priority()
    }

    pub fn positional(&self) -> bool {
        self.pipeline.positional()
    }

    pub fn ausgabe_format(&self) -> WaveFormat {
        self.pipeline.ausgabe_format()
    }

    pub fn puffer_anzahl(&self) -> usize {
        self.pipeline.puffer_anzahl()
    }

    pub fn signal(&self) -> &Arc<SessionSignal> {
        self.pipeline.signal()
    }

    /// Liest Samples. `true` sobald die Session vollstaendig abgespielt ist.
    pub fn read(&mut self, ausgabe: &mut [f32]) -> VoiceResult<bool> {
        self.pipeline.read(ausgabe)
    }
}

impl std::fmt::Debug for SpeechSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechSession")
            .field("context", &self.context)
            .field("erstellt", &self.erstellt)
            .field("puffer", &self.pipeline.puffer_anzahl())
            .finish()
    }
}
