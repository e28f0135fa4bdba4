//! Encoder-Pipeline
//!
//! Abonniert das vorverarbeitete Mikrofon-Audio, bringt es auf die
//! Abtastrate des Codecs, schneidet Frames in Codec-Groesse zu und reicht
//! jedes kodierte Paket an den `VoiceSender` weiter.
//!
//! Ohne offene Kanaele oder im Stummmodus wird das Abonnement beendet.
//! Beim naechsten Abonnieren werden Resampler und Puffer geleert, bevor
//! neue Samples angenommen werden.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use sprechfunk_core::{diagnose, SprechfunkError};
use tracing::{debug, trace};

use crate::codec::VoiceEncoder;
use crate::error::AudioResult;
use crate::format::WaveFormat;
use crate::preprocessing::{Abonnements, MicrophoneSubscriber};
use crate::resample::{FrameReshaper, Resampler};

/// Ziel fuer kodierte Sprachpakete
pub trait VoiceSender: Send + Sync {
    /// Verschickt ein kodiertes Paket
    fn send_voice(&self, encoded: Bytes);

    /// Anzahl aktuell offener Sprachkanaele
    fn channel_count(&self) -> usize;
}

struct KodierZustand {
    encoder: Box<dyn VoiceEncoder>,
    resampler: Resampler,
    reshaper: FrameReshaper,
    resample_puffer: Vec<f32>,
    frame: Vec<f32>,
    reset_required: bool,
}

struct EncoderKern {
    eingang_format: WaveFormat,
    sender: Arc<dyn VoiceSender>,
    zustand: Mutex<KodierZustand>,
}

impl EncoderKern {
    fn handle(&self, samples: &[f32], format: WaveFormat) -> AudioResult<()> {
        let mut z = self.zustand.lock();

        if z.reset_required {
            trace!("Encoder-Pipeline wird zurueckgesetzt");
            z.resampler.reset()?;
            z.reshaper.reset();
            z.encoder.reset()?;
            z.reset_required = false;
        }

        if format != self.eingang_format {
            return Err(SprechfunkError::moeglicher_fehler(
                format!(
                    "Samples im Format {} erwartet, erhalten {}",
                    self.eingang_format, format
                ),
                diagnose::FORMAT_FEHLANPASSUNG,
            )
            .into());
        }

        let KodierZustand {
            encoder,
            resampler,
            reshaper,
            resample_puffer,
            frame,
            ..
        } = &mut *z;

        resample_puffer.clear();
        resampler.process(samples, resample_puffer)?;
        reshaper.write(resample_puffer);

        while reshaper.read_frame(frame) {
            let paket = encoder.encode(frame)?;
            self.sender.send_voice(paket);
        }
        Ok(())
    }
}

impl MicrophoneSubscriber for EncoderKern {
    fn receive(&self, samples: &[f32], format: WaveFormat) -> AudioResult<()> {
        self.handle(samples, format)
    }

    fn reset(&self) {
        self.zustand.lock().reset_required = true;
    }
}

/// Kodiert Mikrofon-Audio und uebergibt es dem Netzwerk
pub struct EncoderPipeline {
    kern: Arc<EncoderKern>,
    abonnent: Arc<dyn MicrophoneSubscriber>,
    abos: Abonnements,
    abonniert: bool,
}

impl EncoderPipeline {
    /// `eingang_format` ist das Ausgabeformat der Vorverarbeitung
    pub fn neu(
        abos: Abonnements,
        eingang_format: WaveFormat,
        encoder: Box<dyn VoiceEncoder>,
        sender: Arc<dyn VoiceSender>,
    ) -> AudioResult<Self> {
        let codec_format = encoder.format();
        let frame_size = encoder.frame_size();

        let kern = Arc::new(EncoderKern {
            eingang_format,
            sender,
            zustand: Mutex::new(KodierZustand {
                encoder,
                resampler: Resampler::neu(eingang_format.sample_rate, codec_format.sample_rate)?,
                reshaper: FrameReshaper::neu(frame_size),
                resample_puffer: Vec::with_capacity(frame_size * 2),
                frame: vec![0.0; frame_size],
                reset_required: false,
            }),
        });
        let abonnent: Arc<dyn MicrophoneSubscriber> = kern.clone();

        Ok(Self {
            kern,
            abonnent,
            abos,
            abonniert: false,
        })
    }

    /// Passt das Abonnement an Stummschaltung und offene Kanaele an
    pub fn update(&mut self, muted: bool) -> AudioResult<()> {
        let soll_abonnieren = !muted && self.kern.sender.channel_count() > 0;

        if soll_abonnieren {
            if !self.abonniert {
                self.start_capture()?;
            }
        } else if self.abonniert {
            self.stop_capture()?;
        }
        Ok(())
    }

    /// Nimmt Samples direkt an (wie ein Aufruf aus der Vorverarbeitung)
    pub fn handle(&self, samples: &[f32], format: WaveFormat) -> AudioResult<()> {
        self.kern.handle(samples, format)
    }

    pub fn ist_abonniert(&self) -> bool {
        self.abonniert
    }

    fn start_capture(&mut self) -> AudioResult<()> {
        if self.abonniert {
            return Err(SprechfunkError::moeglicher_fehler(
                "Encoder ist bereits am Mikrofon angemeldet",
                diagnose::CAPTURE_BEREITS_ABONNIERT,
            )
            .into());
        }
        debug!("Encoder abonniert Mikrofon");

        self.abos.mic_abonnieren(Arc::clone(&self.abonnent));
        self.abonniert = true;
        Ok(())
    }

    fn stop_capture(&mut self) -> AudioResult<()> {
        if !self.abonniert {
            return Err(SprechfunkError::moeglicher_fehler(
                "Encoder ist nicht am Mikrofon angemeldet",
                diagnose::CAPTURE_NICHT_ABONNIERT,
            )
            .into());
        }
        debug!("Encoder meldet sich vom Mikrofon ab");

        self.abos.mic_abbestellen(&self.abonnent);
        self.abonniert = false;
        self.kern.zustand.lock().reset_required = true;
        Ok(())
    }
}

impl Drop for EncoderPipeline {
    fn drop(&mut self) {
        if self.abonniert {
            self.abos.mic_abbestellen(&self.abonnent);
        }
    }
}
