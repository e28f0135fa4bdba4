//! Mikrofon-Capture via cpal
//!
//! Oeffnet einen cpal InputStream und uebergibt die Samples im Callback an
//! den `CaptureEingang` der Vorverarbeitung. Mehrkanal-Eingang wird zu Mono
//! heruntergemischt.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tracing::{debug, error};

use crate::error::{AudioError, AudioResult};
use crate::format::{WaveFormat, INTERNE_ABTASTRATE};
use crate::preprocessing::CaptureEingang;

/// Vom Geraet gelieferte Sample-Formate, in Vorzugsreihenfolge
const UNTERSTUETZTE_FORMATE: [SampleFormat; 3] = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];

/// Was das Eingabegeraet tatsaechlich liefert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeraeteFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl GeraeteFormat {
    /// Format nach dem Heruntermischen
    pub fn mono_format(&self) -> WaveFormat {
        WaveFormat::mono(self.sample_rate)
    }
}

/// Standard-Eingabegeraet des Hosts
pub fn standard_eingabegeraet() -> AudioResult<Device> {
    cpal::default_host()
        .default_input_device()
        .ok_or(AudioError::KeinStandardEingabegeraet)
}

/// Sucht ein Geraeteformat, bevorzugt Mono bei 48 kHz
pub fn format_ermitteln(device: &Device) -> AudioResult<GeraeteFormat> {
    let configs: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .filter(|c| UNTERSTUETZTE_FORMATE.contains(&c.sample_format()))
        .collect();

    let passend = |kanaele: u16| {
        configs.iter().find(|c| {
            c.channels() == kanaele
                && c.min_sample_rate() <= INTERNE_ABTASTRATE
                && c.max_sample_rate() >= INTERNE_ABTASTRATE
        })
    };

    if let Some(c) = passend(1).or_else(|| passend(2)) {
        return Ok(GeraeteFormat {
            sample_rate: INTERNE_ABTASTRATE,
            channels: c.channels(),
            sample_format: c.sample_format(),
        });
    }

    // Keine 48 kHz: native Rate nehmen, die Vorverarbeitung resampelt
    let c = configs
        .iter()
        .min_by_key(|c| c.channels())
        .ok_or_else(|| AudioError::StreamFehler("Eingabegeraet ohne unterstuetztes Format".into()))?;
    Ok(GeraeteFormat {
        sample_rate: c.max_sample_rate(),
        channels: c.channels(),
        sample_format: c.sample_format(),
    })
}

/// Mischt verschachtelte Mehrkanal-Samples zu Mono
pub fn heruntermischen<T>(data: &[T], kanaele: usize, ziel: &mut Vec<f32>)
where
    T: Sample,
    f32: FromSample<T>,
{
    ziel.clear();
    if kanaele <= 1 {
        ziel.extend(data.iter().map(|s| f32::from_sample(*s)));
        return;
    }
    let faktor = 1.0 / kanaele as f32;
    ziel.extend(
        data.chunks_exact(kanaele)
            .map(|frame| frame.iter().map(|s| f32::from_sample(*s)).sum::<f32>() * faktor),
    );
}

/// Laufender Mikrofon-Stream
///
/// Wird der Stream gedroppt, stoppt die Aufnahme.
pub struct Mikrofon {
    _stream: Stream,
    format: GeraeteFormat,
}

impl Mikrofon {
    /// Oeffnet und startet den Stream
    ///
    /// Der `CaptureEingang` muss fuer `format.mono_format()` erstellt sein.
    pub fn oeffnen(device: &Device, format: GeraeteFormat, eingang: CaptureEingang) -> AudioResult<Self> {
        if eingang.format() != format.mono_format() {
            return Err(AudioError::Konfiguration(format!(
                "Capture-Eingang erwartet {}, Geraet liefert {}",
                eingang.format(),
                format.mono_format()
            )));
        }

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: format.sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match format.sample_format {
            SampleFormat::F32 => stream_bauen::<f32>(device, &config, eingang),
            SampleFormat::I16 => stream_bauen::<i16>(device, &config, eingang),
            SampleFormat::U16 => stream_bauen::<u16>(device, &config, eingang),
            anderes => Err(AudioError::StreamFehler(format!(
                "Nicht unterstuetztes Sample-Format: {anderes:?}"
            ))),
        }?;

        stream
            .play()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        debug!(
            "Capture-Stream geoeffnet: {}Hz {}ch {:?}",
            format.sample_rate, format.channels, format.sample_format
        );

        Ok(Self {
            _stream: stream,
            format,
        })
    }

    pub fn format(&self) -> GeraeteFormat {
        self.format
    }
}

fn stream_bauen<T>(device: &Device, config: &StreamConfig, mut eingang: CaptureEingang) -> AudioResult<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let kanaele = config.channels as usize;
    let mut mono = Vec::with_capacity(eingang.frame_size() * 4);

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                heruntermischen(data, kanaele, &mut mono);
                eingang.send_samples(&mono);
            },
            |err| error!("Capture-Fehler: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamFehler(e.to_string()))
}
