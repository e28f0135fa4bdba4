//! Vorverarbeitungs-Pipeline
//!
//! Der Capture-Thread schreibt Mikrofon-Frames ueber einen `CaptureEingang`
//! in einen Transfer-Puffer. Ein eigener Verarbeitungs-Thread leert den
//! Puffer, resampelt auf 48 kHz, schneidet 10ms-Frames zu, laesst sie durch
//! den `FrameProcessor` laufen und verteilt das Ergebnis an alle
//! Mikrofon-Abonnenten. Wechselt die Spracherkennung, werden die
//! VAD-Abonnenten benachrichtigt.
//!
//! Der Verarbeitungs-Thread wartet hoechstens 10ms auf ein Wecksignal.
//! Auf der Capture-Seite blockiert und loggt nichts: ist der Puffer voll,
//! wird der Frame nur atomar gezaehlt. Der Verarbeitungs-Thread meldet den
//! Verlust und ersetzt ihn durch einen stillen Frame.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use parking_lot::Mutex;
use sprechfunk_core::{diagnose, SprechfunkError};
use tracing::{debug, error, info, warn};

use crate::dsp::{ArvMeter, FrameProcessor};
use crate::error::{AudioError, AudioResult};
use crate::format::{WaveFormat, INTERNE_ABTASTRATE};
use crate::pool::ConcurrentPool;
use crate::resample::{FrameReshaper, Resampler};
use crate::transfer_buffer::{transfer_buffer, TransferReader, TransferWriter};

/// Freie Eingangs-Frames im Pool
const POOL_KAPAZITAET: usize = 24;

/// Plaetze im Transfer-Puffer zwischen Capture- und Verarbeitungs-Thread
const PUFFER_KAPAZITAET: usize = 12;

/// Laengste Wartezeit auf ein Wecksignal (kleinste Frame-Dauer)
const WARTEZEIT: Duration = Duration::from_millis(10);

/// Groesse der Frames die der `FrameProcessor` sieht (10ms bei 48 kHz)
pub const ZWISCHEN_FRAME_GROESSE: usize = 480;

// ---------------------------------------------------------------------------
// Abonnenten
// ---------------------------------------------------------------------------

/// Empfaengt vorverarbeitetes Mikrofon-Audio
pub trait MicrophoneSubscriber: Send + Sync {
    /// Wird im Verarbeitungs-Thread fuer jeden Frame aufgerufen
    fn receive(&self, samples: &[f32], format: WaveFormat) -> AudioResult<()>;

    /// Der Sample-Strom ist unterbrochen, gepufferte Daten verwerfen
    fn reset(&self);
}

/// Wird bei Beginn und Ende erkannter Sprache benachrichtigt
pub trait VadSubscriber: Send + Sync {
    fn voice_activation_start(&self);
    fn voice_activation_stop(&self);
}

type Liste<T> = Mutex<Arc<Vec<Arc<T>>>>;

/// Abonnentenlisten der Pipeline
///
/// Aenderungen ersetzen die Liste (copy-on-write); der Verarbeitungs-Thread
/// haelt das Lock nur fuer das Klonen des `Arc`, nie waehrend der Aufrufe.
#[derive(Clone, Default)]
pub struct Abonnements {
    mic: Arc<Liste<dyn MicrophoneSubscriber>>,
    vad: Arc<Liste<dyn VadSubscriber>>,
}

impl Abonnements {
    pub fn mic_abonnieren(&self, abonnent: Arc<dyn MicrophoneSubscriber>) {
        let mut liste = self.mic.lock();
        let mut neu = Vec::clone(&liste);
        neu.push(abonnent);
        *liste = Arc::new(neu);
    }

    /// Entfernt einen Abonnenten, `false` wenn er nicht eingetragen war
    pub fn mic_abbestellen(&self, abonnent: &Arc<dyn MicrophoneSubscriber>) -> bool {
        entfernen(&self.mic, abonnent)
    }

    pub fn vad_abonnieren(&self, abonnent: Arc<dyn VadSubscriber>) {
        let mut liste = self.vad.lock();
        let mut neu = Vec::clone(&liste);
        neu.push(abonnent);
        *liste = Arc::new(neu);
    }

    pub fn vad_abbestellen(&self, abonnent: &Arc<dyn VadSubscriber>) -> bool {
        entfernen(&self.vad, abonnent)
    }

    pub fn mic_anzahl(&self) -> usize {
        self.mic.lock().len()
    }

    pub fn vad_anzahl(&self) -> usize {
        self.vad.lock().len()
    }

    fn mic_snapshot(&self) -> Arc<Vec<Arc<dyn MicrophoneSubscriber>>> {
        Arc::clone(&self.mic.lock())
    }

    fn vad_snapshot(&self) -> Arc<Vec<Arc<dyn VadSubscriber>>> {
        Arc::clone(&self.vad.lock())
    }
}

fn entfernen<T: ?Sized>(liste: &Liste<T>, ziel: &Arc<T>) -> bool {
    let mut liste = liste.lock();
    let ziel_ptr = Arc::as_ptr(ziel) as *const ();
    let Some(pos) = liste
        .iter()
        .position(|a| Arc::as_ptr(a) as *const () == ziel_ptr)
    else {
        return false;
    };
    let mut neu = Vec::clone(&liste);
    neu.remove(pos);
    *liste = Arc::new(neu);
    true
}

// ---------------------------------------------------------------------------
// Zustand
// ---------------------------------------------------------------------------

/// Zustand der Pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineZustand {
    Idle = 0,
    Running = 1,
    Resetting = 2,
}

impl PipelineZustand {
    fn aus_u8(wert: u8) -> Self {
        match wert {
            1 => Self::Running,
            2 => Self::Resetting,
            _ => Self::Idle,
        }
    }
}

/// Selbst zuruecksetzendes Wecksignal ohne Lock
///
/// `setzen` darf aus dem Echtzeit-Thread kommen: es setzt nur ein Flag und
/// weckt den angemeldeten Thread per `unpark`. Ein Signal vor der
/// Anmeldung bleibt im Flag erhalten.
#[derive(Default)]
struct Wecker {
    gesetzt: AtomicBool,
    thread: OnceLock<Thread>,
}

impl Wecker {
    /// Meldet den aufrufenden Thread als Wartenden an
    fn anmelden(&self) {
        if self.thread.set(thread::current()).is_err() {
            debug!("Wecker hat bereits einen wartenden Thread");
        }
    }

    fn setzen(&self) {
        self.gesetzt.store(true, Ordering::Release);
        if let Some(t) = self.thread.get() {
            t.unpark();
        }
    }

    /// Nur vom angemeldeten Thread aufrufen
    fn warten(&self, timeout: Duration) {
        if !self.gesetzt.swap(false, Ordering::AcqRel) {
            thread::park_timeout(timeout);
            self.gesetzt.store(false, Ordering::Release);
        }
    }
}

/// Zwischen Pipeline, Capture-Eingang und Verarbeitungs-Thread geteilt
struct Geteilt {
    laeuft: AtomicBool,
    reset_angefordert: AtomicBool,
    verlorene_frames: AtomicU32,
    wecker: Wecker,
    zustand: AtomicU8,
    sprache: AtomicBool,
    amplitude: AtomicU32,
    abgestuerzt: AtomicBool,
    unterdrueckung: Mutex<Option<f32>>,
}

impl Geteilt {
    fn zustand_setzen(&self, zustand: PipelineZustand) {
        self.zustand.store(zustand as u8, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// CaptureEingang
// ---------------------------------------------------------------------------

/// Schreibende Seite fuer den Capture-Thread
///
/// Es gibt pro Pipeline genau einen Eingang; er besitzt die schreibende
/// Haelfte des Transfer-Puffers.
pub struct CaptureEingang {
    schreiber: TransferWriter<Vec<f32>>,
    pool: ConcurrentPool<Vec<f32>>,
    geteilt: Arc<Geteilt>,
    format: WaveFormat,
    frame_size: usize,
    aktuell: Vec<f32>,
    gefuellt: usize,
}

impl CaptureEingang {
    pub fn format(&self) -> WaveFormat {
        self.format
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Holt einen leeren Frame aus dem Pool
    pub fn get_frame_buffer(&self) -> Vec<f32> {
        let mut frame = self.pool.get();
        frame.resize(self.frame_size, 0.0);
        frame
    }

    /// Uebergibt einen vollen Frame an den Verarbeitungs-Thread
    pub fn send(&mut self, frame: Vec<f32>) {
        if let Err(frame) = self.schreiber.write(frame) {
            self.geteilt.verlorene_frames.fetch_add(1, Ordering::AcqRel);
            self.pool.put(frame);
        }
        self.geteilt.wecker.setzen();
    }

    /// Zerlegt beliebig viele Samples in Frames und sendet volle Frames
    pub fn send_samples(&mut self, mut samples: &[f32]) {
        while !samples.is_empty() {
            if self.aktuell.len() != self.frame_size {
                self.aktuell = self.get_frame_buffer();
                self.gefuellt = 0;
            }

            let n = (self.frame_size - self.gefuellt).min(samples.len());
            self.aktuell[self.gefuellt..self.gefuellt + n].copy_from_slice(&samples[..n]);
            self.gefuellt += n;
            samples = &samples[n..];

            if self.gefuellt == self.frame_size {
                let voll = std::mem::take(&mut self.aktuell);
                self.gefuellt = 0;
                self.send(voll);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Verarbeitungs-Thread
// ---------------------------------------------------------------------------

struct Verarbeiter<P> {
    prozessor: P,
    leser: TransferReader<Vec<f32>>,
    pool: ConcurrentPool<Vec<f32>>,
    resampler: Resampler,
    reshaper: FrameReshaper,
    resample_puffer: Vec<f32>,
    zwischen_frame: Vec<f32>,
    leerer_frame: Vec<f32>,
    arv: ArvMeter,
    reset_angewendet: bool,
    ausgabe_format: WaveFormat,
    geteilt: Arc<Geteilt>,
    abos: Abonnements,
}

impl<P: FrameProcessor> Verarbeiter<P> {
    fn ausfuehren(&mut self) -> AudioResult<()> {
        self.geteilt.wecker.anmelden();
        while self.geteilt.laeuft.load(Ordering::Acquire) {
            if self.leser.estimated_unread_count() == 0 {
                self.geteilt.wecker.warten(WARTEZEIT);
            }

            if self.geteilt.reset_angefordert.swap(false, Ordering::AcqRel) && !self.reset_angewendet {
                self.reset_anwenden()?;
            }

            if let Some(stufe) = self.geteilt.unterdrueckung.lock().take() {
                self.prozessor.set_unterdrueckung(stufe);
            }

            let anzahl = self.leser.estimated_unread_count();
            if anzahl == 0 {
                continue;
            }

            self.reset_angewendet = false;
            self.geteilt.zustand_setzen(PipelineZustand::Running);

            let mut verpasst = self.geteilt.verlorene_frames.swap(0, Ordering::AcqRel);
            if verpasst > 0 {
                warn!(verpasst, "Mikrofon-Frames passten nicht in den Eingangspuffer");
            }

            for i in 0..anzahl {
                match self.leser.read() {
                    Some(frame) => {
                        self.frame_verarbeiten(&frame)?;
                        self.pool.put(frame);
                    }
                    None => {
                        warn!(anzahl, frame = i, "Eingangspuffer lieferte weniger Frames als erwartet");
                        verpasst += 1;
                    }
                }
            }

            for _ in 0..verpasst {
                let leer = std::mem::take(&mut self.leerer_frame);
                let ergebnis = self.frame_verarbeiten(&leer);
                self.leerer_frame = leer;
                ergebnis?;
            }
        }

        while let Some(frame) = self.leser.read() {
            self.pool.put(frame);
        }
        Ok(())
    }

    fn reset_anwenden(&mut self) -> AudioResult<()> {
        debug!("Vorverarbeitungs-Pipeline wird zurueckgesetzt");
        self.geteilt.zustand_setzen(PipelineZustand::Resetting);

        self.resampler.reset()?;
        self.reshaper.reset();
        self.resample_puffer.clear();
        self.arv.reset();
        self.prozessor.reset();
        self.geteilt.verlorene_frames.store(0, Ordering::Release);
        self.geteilt.amplitude.store(0f32.to_bits(), Ordering::Release);

        for abonnent in self.abos.mic_snapshot().iter() {
            abonnent.reset();
        }

        self.reset_angewendet = true;
        Ok(())
    }

    fn frame_verarbeiten(&mut self, frame: &[f32]) -> AudioResult<()> {
        let vorher = self.prozessor.is_speech_detected();

        self.resample_puffer.clear();
        self.resampler.process(frame, &mut self.resample_puffer)?;
        self.reshaper.write(&self.resample_puffer);

        while self.reshaper.read_frame(&mut self.zwischen_frame) {
            self.prozessor.process(&mut self.zwischen_frame)?;
            let amplitude = self.arv.update(&self.zwischen_frame);
            self.geteilt.amplitude.store(amplitude.to_bits(), Ordering::Release);

            for abonnent in self.abos.mic_snapshot().iter() {
                if let Err(e) = abonnent.receive(&self.zwischen_frame, self.ausgabe_format) {
                    error!(fehler = %e, "Mikrofon-Abonnent meldet Fehler");
                }
            }
        }

        let nachher = self.prozessor.is_speech_detected();
        self.geteilt.sprache.store(nachher, Ordering::Release);
        if vorher != nachher {
            for abonnent in self.abos.vad_snapshot().iter() {
                if nachher {
                    abonnent.voice_activation_start();
                } else {
                    abonnent.voice_activation_stop();
                }
            }
        }
        Ok(())
    }
}

fn thread_einstieg<P: FrameProcessor>(mut verarbeiter: Verarbeiter<P>) {
    let geteilt = Arc::clone(&verarbeiter.geteilt);

    match panic::catch_unwind(AssertUnwindSafe(|| verarbeiter.ausfuehren())) {
        Ok(Ok(())) => debug!("Vorverarbeitungs-Thread beendet"),
        Ok(Err(e)) => {
            error!(
                diagnose_id = %diagnose::VERARBEITUNG_ABGESTUERZT,
                fehler = %e,
                "Fehler hat den Vorverarbeitungs-Thread beendet"
            );
            geteilt.abgestuerzt.store(true, Ordering::Release);
        }
        Err(_) => {
            error!(
                diagnose_id = %diagnose::VERARBEITUNG_ABGESTUERZT,
                "Panik hat den Vorverarbeitungs-Thread beendet"
            );
            geteilt.abgestuerzt.store(true, Ordering::Release);
        }
    }
    geteilt.zustand_setzen(PipelineZustand::Idle);
}

// ---------------------------------------------------------------------------
// PreprocessingPipeline
// ---------------------------------------------------------------------------

/// Vorverarbeitung mit eigenem Thread, generisch ueber das DSP-Backend
pub struct PreprocessingPipeline<P: FrameProcessor + 'static> {
    geteilt: Arc<Geteilt>,
    abos: Abonnements,
    eingang_format: WaveFormat,
    input_frame_size: usize,
    verarbeiter: Option<Verarbeiter<P>>,
    thread: Option<JoinHandle<()>>,
}

impl<P: FrameProcessor + 'static> PreprocessingPipeline<P> {
    /// Erstellt Pipeline und zugehoerigen Capture-Eingang
    ///
    /// `input_frame_size` ist die Groesse der Frames, die der Capture-Thread
    /// ueber den Eingang schickt.
    pub fn neu(
        eingang_format: WaveFormat,
        input_frame_size: usize,
        prozessor: P,
    ) -> AudioResult<(Self, CaptureEingang)> {
        if input_frame_size == 0 {
            return Err(AudioError::Konfiguration(
                "Eingangs-Framegroesse darf nicht 0 sein".into(),
            ));
        }
        if eingang_format.channels != 1 {
            return Err(AudioError::Konfiguration(format!(
                "Nur Mono-Eingang wird unterstuetzt, war {eingang_format}"
            )));
        }

        let geteilt = Arc::new(Geteilt {
            laeuft: AtomicBool::new(false),
            reset_angefordert: AtomicBool::new(true),
            verlorene_frames: AtomicU32::new(0),
            wecker: Wecker::default(),
            zustand: AtomicU8::new(PipelineZustand::Idle as u8),
            sprache: AtomicBool::new(false),
            amplitude: AtomicU32::new(0f32.to_bits()),
            abgestuerzt: AtomicBool::new(false),
            unterdrueckung: Mutex::new(None),
        });

        let pool = ConcurrentPool::neu(POOL_KAPAZITAET, move || vec![0.0f32; input_frame_size]);
        let (schreiber, leser) = transfer_buffer(PUFFER_KAPAZITAET);
        let abos = Abonnements::default();

        let verarbeiter = Verarbeiter {
            prozessor,
            leser,
            pool: pool.clone(),
            resampler: Resampler::neu(eingang_format.sample_rate, INTERNE_ABTASTRATE)?,
            reshaper: FrameReshaper::neu(ZWISCHEN_FRAME_GROESSE),
            resample_puffer: Vec::with_capacity(input_frame_size * 4),
            zwischen_frame: vec![0.0; ZWISCHEN_FRAME_GROESSE],
            leerer_frame: vec![0.0; input_frame_size],
            arv: ArvMeter::default(),
            reset_angewendet: false,
            ausgabe_format: WaveFormat::mono(INTERNE_ABTASTRATE),
            geteilt: Arc::clone(&geteilt),
            abos: abos.clone(),
        };

        let eingang = CaptureEingang {
            schreiber,
            pool,
            geteilt: Arc::clone(&geteilt),
            format: eingang_format,
            frame_size: input_frame_size,
            aktuell: Vec::new(),
            gefuellt: 0,
        };

        Ok((
            Self {
                geteilt,
                abos,
                eingang_format,
                input_frame_size,
                verarbeiter: Some(verarbeiter),
                thread: None,
            },
            eingang,
        ))
    }

    /// Startet den Verarbeitungs-Thread (nur einmal moeglich)
    pub fn start(&mut self) -> AudioResult<()> {
        let Some(verarbeiter) = self.verarbeiter.take() else {
            return Err(SprechfunkError::moeglicher_fehler(
                "Vorverarbeitungs-Pipeline wurde bereits gestartet",
                diagnose::PIPELINE_BEREITS_GESTARTET,
            )
            .into());
        };

        self.geteilt.laeuft.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name("sprechfunk-vorverarbeitung".to_string())
            .spawn(move || thread_einstieg(verarbeiter))
            .map_err(|e| AudioError::Thread(e.to_string()))?;
        self.thread = Some(handle);

        info!(format = %self.eingang_format, frame_size = self.input_frame_size, "Vorverarbeitung gestartet");
        Ok(())
    }

    /// Stoppt den Thread und wartet auf sein Ende
    pub fn stop(&mut self) {
        self.geteilt.laeuft.store(false, Ordering::Release);
        self.geteilt.wecker.setzen();

        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Vorverarbeitungs-Thread konnte nicht sauber beendet werden");
            }
            info!("Vorverarbeitung gestoppt");
        }
        self.geteilt.zustand_setzen(PipelineZustand::Idle);
    }

    /// Fordert einen Reset an; er wird beim naechsten Aufwachen angewendet
    pub fn reset(&self) {
        self.geteilt.reset_angefordert.store(true, Ordering::Release);
        self.geteilt.wecker.setzen();
    }

    /// Aendert die Staerke der Rauschunterdrueckung
    pub fn set_unterdrueckung(&self, stufe: f32) {
        *self.geteilt.unterdrueckung.lock() = Some(stufe);
    }

    pub fn abonnements(&self) -> Abonnements {
        self.abos.clone()
    }

    /// Geglaettete Amplitude (ARV) des verarbeiteten Signals
    pub fn amplitude(&self) -> f32 {
        f32::from_bits(self.geteilt.amplitude.load(Ordering::Acquire))
    }

    pub fn is_speech_detected(&self) -> bool {
        self.geteilt.sprache.load(Ordering::Acquire)
    }

    pub fn zustand(&self) -> PipelineZustand {
        PipelineZustand::aus_u8(self.geteilt.zustand.load(Ordering::Acquire))
    }

    /// Ist der Thread an einem Fehler gestorben?
    pub fn ist_abgestuerzt(&self) -> bool {
        self.geteilt.abgestuerzt.load(Ordering::Acquire)
    }

    /// Die VAD laeuft immer, die Pipeline braucht daher immer Eingang
    pub fn requires_input(&self) -> bool {
        true
    }

    pub fn input_frame_size(&self) -> usize {
        self.input_frame_size
    }

    pub fn ausgabe_format(&self) -> WaveFormat {
        WaveFormat::mono(INTERNE_ABTASTRATE)
    }
}

impl<P: FrameProcessor + 'static> Drop for PreprocessingPipeline<P> {
    fn drop(&mut self) {
        self.stop();
    }
}
