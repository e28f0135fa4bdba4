//! Codec-Schnittstelle und Implementierungen
//!
//! Encoder und Decoder arbeiten immer frame-genau: `encode` erwartet exakt
//! `frame_size()` Samples, `decode` liefert genau einen Frame. Fehlt ein
//! Paket, wird `decode(None)` aufgerufen (Packet Loss Concealment).
//!
//! - `OpusEncoder`/`OpusDecoder`: audiopus, 48 kHz Mono, VoIP
//! - `PcmEncoder`/`PcmDecoder`: unkomprimiertes 16-Bit-PCM ohne PLC,
//!   deterministisch und fuer Tests geeignet

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};
use bytes::{BufMut, Bytes, BytesMut};
use sprechfunk_core::VoiceConfig;
use tracing::debug;

use crate::error::{AudioError, AudioResult};
use crate::format::{WaveFormat, INTERNE_ABTASTRATE};

/// Obergrenze fuer ein kodiertes Opus-Paket
const MAX_PAKET_BYTES: usize = 4000;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Kodiert PCM-Frames fester Groesse
pub trait VoiceEncoder: Send {
    /// Eingangsformat
    fn format(&self) -> WaveFormat;

    /// Samples pro Frame
    fn frame_size(&self) -> usize;

    /// Kodiert genau einen Frame
    fn encode(&mut self, pcm: &[f32]) -> AudioResult<Bytes>;

    /// Verwirft Codec-Zustand zwischen zwei Sprachsitzungen
    fn reset(&mut self) -> AudioResult<()>;
}

/// Dekodiert Pakete zu PCM-Frames fester Groesse
pub trait VoiceDecoder: Send {
    /// Ausgangsformat
    fn format(&self) -> WaveFormat;

    /// Samples pro Frame
    fn frame_size(&self) -> usize;

    /// Dekodiert ein Paket in `ausgabe` (Laenge `frame_size()`).
    ///
    /// `None` bedeutet verlorenes Paket: der Decoder soll den Frame
    /// verschleiern, ohne PLC liefert er Stille.
    fn decode(&mut self, paket: Option<&[u8]>, ausgabe: &mut [f32]) -> AudioResult<usize>;

    fn reset(&mut self) -> AudioResult<()>;
}

/// Erzeugt zueinander passende Encoder und Decoder
pub trait CodecFabrik: Send + Sync {
    fn encoder(&self) -> AudioResult<Box<dyn VoiceEncoder>>;
    fn decoder(&self) -> AudioResult<Box<dyn VoiceDecoder>>;
}

// ---------------------------------------------------------------------------
// Opus
// ---------------------------------------------------------------------------

/// Opus-Encoder: kodiert f32-PCM zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    bitrate_kbps: u32,
    komplexitaet: u8,
    frame_size: usize,
}

impl OpusEncoder {
    /// Erstellt einen Encoder aus der Voice-Konfiguration
    pub fn neu(config: &VoiceConfig) -> AudioResult<Self> {
        config.validieren()?;

        let encoder = encoder_bauen(config.bitrate_kbps, config.komplexitaet)?;
        let frame_size = WaveFormat::mono(INTERNE_ABTASTRATE).samples_fuer(config.frame_dauer());

        debug!(
            bitrate_kbps = config.bitrate_kbps,
            frame_size, "OpusEncoder erstellt"
        );

        Ok(Self {
            encoder,
            bitrate_kbps: config.bitrate_kbps,
            komplexitaet: config.komplexitaet,
            frame_size,
        })
    }
}

fn encoder_bauen(bitrate_kbps: u32, komplexitaet: u8) -> AudioResult<Encoder> {
    let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
        .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

    encoder
        .set_bitrate(Bitrate::BitsPerSecond(bitrate_kbps as i32 * 1000))
        .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

    encoder
        .set_complexity(komplexitaet)
        .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

    Ok(encoder)
}

impl VoiceEncoder for OpusEncoder {
    fn format(&self) -> WaveFormat {
        WaveFormat::mono(INTERNE_ABTASTRATE)
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn encode(&mut self, pcm: &[f32]) -> AudioResult<Bytes> {
        if pcm.len() != self.frame_size {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Samples lang sein, war {}",
                self.frame_size,
                pcm.len()
            )));
        }

        let mut output = vec![0u8; MAX_PAKET_BYTES];
        let written = self
            .encoder
            .encode_float(pcm, &mut output)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        output.truncate(written);
        Ok(Bytes::from(output))
    }

    fn reset(&mut self) -> AudioResult<()> {
        self.encoder = encoder_bauen(self.bitrate_kbps, self.komplexitaet)?;
        Ok(())
    }
}

/// Opus-Decoder: dekodiert Opus-Bytes zu f32-PCM
pub struct OpusDecoder {
    decoder: Decoder,
    frame_size: usize,
    puffer: Vec<f32>,
}

impl OpusDecoder {
    pub fn neu(config: &VoiceConfig) -> AudioResult<Self> {
        let decoder = Decoder::new(SampleRate::Hz48000, Channels::Mono)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        let frame_size = WaveFormat::mono(INTERNE_ABTASTRATE).samples_fuer(config.frame_dauer());

        Ok(Self {
            decoder,
            frame_size,
            puffer: vec![0.0; frame_size],
        })
    }
}

impl VoiceDecoder for OpusDecoder {
    fn format(&self) -> WaveFormat {
        WaveFormat::mono(INTERNE_ABTASTRATE)
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn decode(&mut self, paket: Option<&[u8]>, ausgabe: &mut [f32]) -> AudioResult<usize> {
        self.puffer.iter_mut().for_each(|s| *s = 0.0);
        let decoded = self
            .decoder
            .decode_float(paket, &mut self.puffer, false)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;

        let n = decoded.min(ausgabe.len());
        ausgabe[..n].copy_from_slice(&self.puffer[..n]);
        Ok(n)
    }

    fn reset(&mut self) -> AudioResult<()> {
        self.decoder = Decoder::new(SampleRate::Hz48000, Channels::Mono)
            .map_err(|e| AudioError::CodecFehler(e.to_string()))?;
        Ok(())
    }
}

/// Fabrik fuer Opus-Codecs einer gemeinsamen Konfiguration
#[derive(Debug, Clone)]
pub struct OpusFabrik {
    config: VoiceConfig,
}

impl OpusFabrik {
    pub fn neu(config: VoiceConfig) -> Self {
        Self { config }
    }
}

impl CodecFabrik for OpusFabrik {
    fn encoder(&self) -> AudioResult<Box<dyn VoiceEncoder>> {
        Ok(Box::new(OpusEncoder::neu(&self.config)?))
    }

    fn decoder(&self) -> AudioResult<Box<dyn VoiceDecoder>> {
        Ok(Box::new(OpusDecoder::neu(&self.config)?))
    }
}

// ---------------------------------------------------------------------------
// PCM
// ---------------------------------------------------------------------------

/// 16-Bit-PCM (little endian)
pub struct PcmEncoder {
    format: WaveFormat,
    frame_size: usize,
}

impl PcmEncoder {
    pub fn neu(format: WaveFormat, frame_size: usize) -> Self {
        Self { format, frame_size }
    }
}

impl VoiceEncoder for PcmEncoder {
    fn format(&self) -> WaveFormat {
        self.format
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn encode(&mut self, pcm: &[f32]) -> AudioResult<Bytes> {
        if pcm.len() != self.frame_size {
            return Err(AudioError::Konfiguration(format!(
                "PCM-Frame muss {} Samples lang sein, war {}",
                self.frame_size,
                pcm.len()
            )));
        }
        let mut buf = BytesMut::with_capacity(pcm.len() * 2);
        for &s in pcm {
            buf.put_i16_le((s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16);
        }
        Ok(buf.freeze())
    }

    fn reset(&mut self) -> AudioResult<()> {
        Ok(())
    }
}

/// Gegenstueck zu `PcmEncoder`; verlorene Pakete werden zu Stille
pub struct PcmDecoder {
    format: WaveFormat,
    frame_size: usize,
}

impl PcmDecoder {
    pub fn neu(format: WaveFormat, frame_size: usize) -> Self {
        Self { format, frame_size }
    }
}

impl VoiceDecoder for PcmDecoder {
    fn format(&self) -> WaveFormat {
        self.format
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn decode(&mut self, paket: Option<&[u8]>, ausgabe: &mut [f32]) -> AudioResult<usize> {
        let n = self.frame_size.min(ausgabe.len());
        ausgabe[..n].iter_mut().for_each(|s| *s = 0.0);

        if let Some(daten) = paket {
            for (ziel, paar) in ausgabe[..n].iter_mut().zip(daten.chunks_exact(2)) {
                *ziel = f32::from(i16::from_le_bytes([paar[0], paar[1]])) / f32::from(i16::MAX);
            }
        }
        Ok(n)
    }

    fn reset(&mut self) -> AudioResult<()> {
        Ok(())
    }
}

/// Fabrik fuer PCM-Codecs
#[derive(Debug, Clone, Copy)]
pub struct PcmFabrik {
    format: WaveFormat,
    frame_size: usize,
}

impl PcmFabrik {
    pub fn neu(format: WaveFormat, frame_size: usize) -> Self {
        Self { format, frame_size }
    }
}

impl CodecFabrik for PcmFabrik {
    fn encoder(&self) -> AudioResult<Box<dyn VoiceEncoder>> {
        Ok(Box::new(PcmEncoder::neu(self.format, self.frame_size)))
    }

    fn decoder(&self) -> AudioResult<Box<dyn VoiceDecoder>> {
        Ok(Box::new(PcmDecoder::neu(self.format, self.frame_size)))
    }
}
