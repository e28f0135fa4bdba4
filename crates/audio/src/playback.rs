//! Audio-Playback via cpal
//!
//! Oeffnet einen cpal OutputStream, der im Callback Mono-Samples aus einer
//! `WiedergabeQuelle` zieht und auf alle Ausgabekanaele verteilt.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, Stream, StreamConfig};
use tracing::{debug, error};

use crate::error::{AudioError, AudioResult};
use crate::format::{WaveFormat, INTERNE_ABTASTRATE};

/// Liefert Mono-Samples fuer den Ausgabe-Callback
pub trait WiedergabeQuelle: Send + 'static {
    /// Fuellt `ausgabe` vollstaendig (Stille wenn nichts ansteht)
    fn lesen(&mut self, ausgabe: &mut [f32]);
}

/// Standard-Ausgabegeraet des Hosts
pub fn standard_ausgabegeraet() -> AudioResult<Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::KeinStandardAusgabegeraet)
}

/// Verteilt Mono-Samples auf verschachtelte Ausgabekanaele
pub fn auffaechern<T>(mono: &[f32], kanaele: usize, data: &mut [T])
where
    T: SizedSample + FromSample<f32>,
{
    for (frame, &s) in data.chunks_exact_mut(kanaele.max(1)).zip(mono) {
        let wert = T::from_sample(s.clamp(-1.0, 1.0));
        frame.iter_mut().for_each(|z| *z = wert);
    }
}

/// Laufender Ausgabe-Stream
pub struct Lautsprecher {
    _stream: Stream,
    format: WaveFormat,
    kanaele: u16,
}

impl Lautsprecher {
    /// Oeffnet einen Stream bei 48 kHz mit der Kanalanzahl des Geraets
    pub fn oeffnen(device: &Device, quelle: impl WiedergabeQuelle) -> AudioResult<Self> {
        let supported = device
            .supported_output_configs()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?
            .find(|c| {
                c.min_sample_rate() <= INTERNE_ABTASTRATE && c.max_sample_rate() >= INTERNE_ABTASTRATE
            })
            .ok_or_else(|| {
                AudioError::StreamFehler("Ausgabegeraet unterstuetzt keine 48 kHz".into())
            })?;

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: INTERNE_ABTASTRATE,
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => stream_bauen::<f32>(device, &config, quelle),
            SampleFormat::I16 => stream_bauen::<i16>(device, &config, quelle),
            SampleFormat::U16 => stream_bauen::<u16>(device, &config, quelle),
            anderes => Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {anderes:?}"
            ))),
        }?;

        stream
            .play()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        debug!("Playback-Stream geoeffnet: {}Hz {}ch", INTERNE_ABTASTRATE, config.channels);

        Ok(Self {
            _stream: stream,
            format: WaveFormat::mono(INTERNE_ABTASTRATE),
            kanaele: config.channels,
        })
    }

    /// Format das die Quelle liefern muss
    pub fn format(&self) -> WaveFormat {
        self.format
    }

    pub fn kanaele(&self) -> u16 {
        self.kanaele
    }
}

fn stream_bauen<T>(
    device: &Device,
    config: &StreamConfig,
    mut quelle: impl WiedergabeQuelle,
) -> AudioResult<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let kanaele = config.channels as usize;
    let mut mono: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / kanaele.max(1);
                if mono.len() < frames {
                    mono.resize(frames, 0.0);
                }
                quelle.lesen(&mut mono[..frames]);
                auffaechern(&mono[..frames], kanaele, data);
            },
            |err| error!("Playback-Fehler: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamFehler(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stille;

    impl WiedergabeQuelle for Stille {
        fn lesen(&mut self, ausgabe: &mut [f32]) {
            ausgabe.fill(0.0);
        }
    }

    #[test]
    fn mono_auf_stereo() {
        let mut data = [0.0f32; 4];
        auffaechern(&[0.25, -0.5], 2, &mut data);
        assert_eq!(data, [0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn i16_ausgabe_wird_begrenzt() {
        let mut data = [0i16; 2];
        auffaechern(&[2.0, -2.0], 1, &mut data);
        assert_eq!(data[0], i16::MAX);
        assert!(data[1] <= -i16::MAX);
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn lautsprecher_oeffnen() {
        let device = standard_ausgabegeraet().unwrap();
        let lautsprecher = Lautsprecher::oeffnen(&device, Stille).unwrap();
        assert_eq!(lautsprecher.format(), WaveFormat::mono(48_000));
    }
}
