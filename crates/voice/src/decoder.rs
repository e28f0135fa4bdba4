//! Decoder-Pipeline eines entfernten Sprechers
//!
//! Die Pipeline ist in zwei Haelften geteilt:
//!
//! - [`DecoderEingang`] lebt auf dem Haupt-Thread. Er nimmt empfangene
//!   Pakete an, misst ihre Verspaetung und reicht sie ueber einen
//!   Transfer-Puffer weiter.
//! - [`DecoderPipeline`] lebt im Audio-Thread. Sie uebernimmt die Frames in
//!   den Jitter Buffer, dekodiert in Sequenzreihenfolge, begrenzt weich
//!   und bringt das Ergebnis auf die Ausgaberate.
//!
//! Prioritaet und Raeumlichkeit werden sofort beim Empfang gespiegelt,
//! auch wenn das zugehoerige Audio noch im Puffer liegt.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sprechfunk_audio::{transfer_buffer, Resampler, TransferReader, TransferWriter, VoiceDecoder, WaveFormat};
use sprechfunk_core::{ChannelPriority, VoiceConfig, VoicePacket};
use tracing::{debug, trace, warn};

use crate::error::VoiceResult;
use crate::jitter_buffer::{EncodedAudioBuffer, PufferFrame};

/// Kapazitaet des Transfer-Puffers zwischen Empfang und Wiedergabe
const EINGANG_KAPAZITAET: usize = 64;

/// Ab diesem Betrag wird weich begrenzt
const CLIP_KNIE: f32 = 0.7;

// ---------------------------------------------------------------------------
// Gemeinsamer Zustand
// ---------------------------------------------------------------------------

/// Zwischen Eingang und Pipeline geteilte Metadaten
#[derive(Debug)]
pub struct SessionSignal {
    priority: AtomicU8,
    positional: AtomicBool,
    stop: AtomicBool,
    verworfen: AtomicU64,
}

impl SessionSignal {
    fn neu() -> Self {
        Self {
            priority: AtomicU8::new(prioritaet_als_byte(ChannelPriority::None)),
            positional: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            verworfen: AtomicU64::new(0),
        }
    }

    /// Prioritaet des zuletzt empfangenen Pakets
    pub fn priority(&self) -> ChannelPriority {
        prioritaet_aus_byte(self.priority.load(Ordering::Relaxed))
    }

    pub fn positional(&self) -> bool {
        self.positional.load(Ordering::Relaxed)
    }

    /// Der Sender hat aufgehoert zu sprechen
    pub fn stop_angefordert(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Pakete die weder in den Transfer-Puffer passten noch rechtzeitig kamen
    pub fn verworfen(&self) -> u64 {
        self.verworfen.load(Ordering::Relaxed)
    }
}

pub(crate) fn prioritaet_als_byte(p: ChannelPriority) -> u8 {
    match p {
        ChannelPriority::None => 0,
        ChannelPriority::Low => 1,
        ChannelPriority::Default => 2,
        ChannelPriority::Medium => 3,
        ChannelPriority::High => 4,
    }
}

pub(crate) fn prioritaet_aus_byte(b: u8) -> ChannelPriority {
    match b {
        1 => ChannelPriority::Low,
        2 => ChannelPriority::Default,
        3 => ChannelPriority::Medium,
        4 => ChannelPriority::High,
        _ => ChannelPriority::None,
    }
}

/// Weiche Begrenzung: unterhalb des Knies linear, darueber `tanh`-Kurve
/// die asymptotisch gegen 1.0 laeuft
pub fn soft_clip(samples: &mut [f32]) {
    let rest = 1.0 - CLIP_KNIE;
    for s in samples.iter_mut() {
        let betrag = s.abs();
        if betrag > CLIP_KNIE {
            *s = s.signum() * (CLIP_KNIE + rest * ((betrag - CLIP_KNIE) / rest).tanh());
        }
    }
}

/// Erstellt Eingang und Pipeline fuer eine Sprech-Session
pub fn decoder_pipeline(
    decoder: Box<dyn VoiceDecoder>,
    ausgabe_rate: u32,
    config: &VoiceConfig,
) -> VoiceResult<(DecoderEingang, DecoderPipeline)> {
    let codec_format = decoder.format();
    let frame_size = decoder.frame_size();
    let frame_dauer = codec_format.dauer_von(frame_size);

    let (schreiber, leser) = transfer_buffer(EINGANG_KAPAZITAET);
    let signal = Arc::new(SessionSignal::neu());

    let zaehler = Arc::clone(&signal);
    let puffer = EncodedAudioBuffer::neu(config.jitter_warn_schwelle, move |_| {
        zaehler.verworfen.fetch_add(1, Ordering::Relaxed);
    });

    let eingang = DecoderEingang {
        schreiber,
        signal: Arc::clone(&signal),
        erste_ankunft: None,
        frame_dauer,
    };

    let pipeline = DecoderPipeline {
        leser,
        signal,
        puffer,
        decoder,
        resampler: Resampler::neu(codec_format.sample_rate, ausgabe_rate)?,
        frame: vec![0.0; frame_size],
        resample_puffer: Vec::with_capacity(frame_size * 2),
        bereit: VecDeque::with_capacity(frame_size * 2),
        ende: false,
        ausgabe_format: WaveFormat::mono(ausgabe_rate),
        frame_dauer,
    };

    Ok((eingang, pipeline))
}

// ---------------------------------------------------------------------------
// DecoderEingang (Haupt-Thread)
// ---------------------------------------------------------------------------

/// Empfangsseite der Pipeline
pub struct DecoderEingang {
    schreiber: TransferWriter<PufferFrame>,
    signal: Arc<SessionSignal>,
    /// Ankunftszeit und Sequenz des ersten Pakets
    erste_ankunft: Option<(Instant, u32)>,
    frame_dauer: Duration,
}

impl DecoderEingang {
    /// Reicht ein Paket weiter und gibt seine Verspaetung in Sekunden zurueck.
    ///
    /// Referenz ist die Ankunft des ersten Pakets plus Frame-Dauer mal
    /// Sequenzabstand. Das erste Paket hat Verspaetung 0.
    pub fn push(&mut self, paket: &VoicePacket, jetzt: Instant) -> f32 {
        let spaet = match self.erste_ankunft {
            None => {
                self.erste_ankunft = Some((jetzt, paket.sequence_number));
                0.0
            }
            Some((erste, erste_seq)) => {
                let abstand = i64::from(paket.sequence_number) - i64::from(erste_seq);
                let soll = self.frame_dauer.as_secs_f64() * abstand as f64;
                let ist = jetzt.saturating_duration_since(erste).as_secs_f64();
                (ist - soll) as f32
            }
        };

        self.signal
            .priority
            .store(prioritaet_als_byte(paket.priority), Ordering::Relaxed);
        self.signal.positional.store(paket.positional, Ordering::Relaxed);

        let frame = PufferFrame::neu(paket.sequence_number, paket.payload.clone());
        if self.schreiber.write(frame).is_err() {
            self.signal.verworfen.fetch_add(1, Ordering::Relaxed);
            warn!(
                spieler = %paket.sender,
                sequenz = paket.sequence_number,
                "Decoder-Eingang voll, Paket verworfen"
            );
        }

        spaet
    }

    /// Signalisiert das Ende des Streams
    pub fn stop(&self) {
        self.signal.stop.store(true, Ordering::Release);
    }

    pub fn signal(&self) -> &Arc<SessionSignal> {
        &self.signal
    }

    /// Ungelesene Pakete im Transfer-Puffer
    pub fn ausstehend(&self) -> usize {
        self.schreiber.estimated_unread_count()
    }
}

// ---------------------------------------------------------------------------
// DecoderPipeline (Audio-Thread)
// ---------------------------------------------------------------------------

/// Wiedergabeseite der Pipeline
pub struct DecoderPipeline {
    leser: TransferReader<PufferFrame>,
    signal: Arc<SessionSignal>,
    puffer: EncodedAudioBuffer,
    decoder: Box<dyn VoiceDecoder>,
    resampler: Resampler,
    frame: Vec<f32>,
    resample_puffer: Vec<f32>,
    /// Dekodierte Samples in Ausgaberate, noch nicht gelesen
    bereit: VecDeque<f32>,
    /// Der letzte Frame wurde aus dem Jitter Buffer geholt
    ende: bool,
    ausgabe_format: WaveFormat,
    frame_dauer: Duration,
}

impl DecoderPipeline {
    /// Fuellt `ausgabe` vollstaendig.
    ///
    /// Gibt `true` zurueck sobald der Stream beendet und vollstaendig
    /// ausgelesen ist; der Rest von `ausgabe` ist dann Stille.
    pub fn read(&mut self, ausgabe: &mut [f32]) -> VoiceResult<bool> {
        self.eingang_uebernehmen();

        let mut geschrieben = 0;
        while geschrieben < ausgabe.len() {
            if self.bereit.is_empty() {
                if self.ende {
                    ausgabe[geschrieben..].fill(0.0);
                    return Ok(true);
                }
                self.frame_dekodieren()?;
                continue;
            }

            let n = self.bereit.len().min(ausgabe.len() - geschrieben);
            for (ziel, s) in ausgabe[geschrieben..geschrieben + n]
                .iter_mut()
                .zip(self.bereit.drain(..n))
            {
                *ziel = s;
            }
            geschrieben += n;
        }

        Ok(self.ende && self.bereit.is_empty())
    }

    pub fn priority(&self) -> ChannelPriority {
        self.signal.priority()
    }

    pub fn positional(&self) -> bool {
        self.signal.positional()
    }

    pub fn signal(&self) -> &Arc<SessionSignal> {
        &self.signal
    }

    pub fn ausgabe_format(&self) -> WaveFormat {
        self.ausgabe_format
    }

    pub fn frame_dauer(&self) -> Duration {
        self.frame_dauer
    }

    /// Frames im Jitter Buffer
    pub fn puffer_anzahl(&self) -> usize {
        self.puffer.len()
    }

    fn eingang_uebernehmen(&mut self) {
        // Stop zuerst lesen: alles was davor geschrieben wurde ist dann sichtbar
        let stop = self.signal.stop_angefordert();
        while let Some(frame) = self.leser.read() {
            self.puffer.push(frame);
        }
        if stop && !self.puffer.ist_gestoppt() {
            debug!(gepuffert = self.puffer.len(), "Stream-Ende empfangen");
            self.puffer.stop();
        }
    }

    fn frame_dekodieren(&mut self) -> VoiceResult<()> {
        let (frame, mehr) = self.puffer.read();

        let n = match frame {
            Some(f) => match self.decoder.decode(Some(f.payload.as_ref()), &mut self.frame) {
                Ok(n) => n,
                Err(e) => {
                    warn!(sequenz = f.sequence, fehler = %e, "Frame nicht dekodierbar, verschleiere");
                    self.decoder.decode(None, &mut self.frame)?
                }
            },
            None if mehr => {
                trace!(sequenz = self.puffer.sequence_number().wrapping_sub(1), "Verschleiere fehlenden Frame");
                self.decoder.decode(None, &mut self.frame)?
            }
            None => 0,
        };

        if !mehr {
            self.ende = true;
        }

        let dekodiert = &mut self.frame[..n];
        soft_clip(dekodiert);

        self.resample_puffer.clear();
        self.resampler.process(dekodiert, &mut self.resample_puffer)?;
        self.bereit.extend(self.resample_puffer.drain(..));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
