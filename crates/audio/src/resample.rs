//! Resampling und Frame-Zuschnitt
//!
//! `Resampler` wandelt Mono-Samples zwischen beliebigen Abtastraten
//! (rubato, FFT-basiert, synchron). Bei gleicher Ein- und Ausgangsrate
//! werden die Samples unveraendert durchgereicht.
//!
//! `FrameReshaper` sammelt Reads beliebiger Laenge und gibt sie in
//! Frames fester Groesse wieder aus.

use std::collections::VecDeque;

use audioadapter_buffers::direct::SequentialSliceOfVecs;
use rubato::{Fft, FixedSync, Resampler as _};

use crate::error::{AudioError, AudioResult};

/// Mono
const MONO: usize = 1;

/// Teil-Chunks des FFT-Resamplers (1 = geringste Latenz)
const SUB_CHUNKS: usize = 1;

// ---------------------------------------------------------------------------
// Resampler
// ---------------------------------------------------------------------------

/// Mono-Resampler zwischen zwei festen Abtastraten
pub struct Resampler {
    von: u32,
    nach: u32,
    /// `None` = gleiche Rate, Durchreichen
    fft: Option<Fft<f32>>,
    eingang: Vec<f32>,
    arbeit_ein: Vec<Vec<f32>>,
    arbeit_aus: Vec<Vec<f32>>,
}

impl Resampler {
    /// Erstellt einen Resampler `von` Hz -> `nach` Hz
    pub fn neu(von: u32, nach: u32) -> AudioResult<Self> {
        if von == 0 || nach == 0 {
            return Err(AudioError::Konfiguration(format!(
                "Ungueltige Abtastrate: {von} -> {nach}"
            )));
        }

        let fft = if von == nach {
            None
        } else {
            let chunk = (von as usize / 100).max(1);
            Some(
                Fft::<f32>::new(
                    von as usize,
                    nach as usize,
                    chunk,
                    SUB_CHUNKS,
                    MONO,
                    FixedSync::Input,
                )
                .map_err(|e| AudioError::Resampler(e.to_string()))?,
            )
        };

        let (ein_max, aus_max) = fft
            .as_ref()
            .map(|f| (f.input_frames_max(), f.output_frames_max()))
            .unwrap_or((0, 0));

        Ok(Self {
            von,
            nach,
            fft,
            eingang: Vec::new(),
            arbeit_ein: vec![vec![0.0; ein_max]],
            arbeit_aus: vec![vec![0.0; aus_max]],
        })
    }

    pub fn von(&self) -> u32 {
        self.von
    }

    pub fn nach(&self) -> u32 {
        self.nach
    }

    /// Reicht der Resampler nur durch?
    pub fn ist_durchreichend(&self) -> bool {
        self.fft.is_none()
    }

    /// Resampelt `samples` und haengt das Ergebnis an `ausgabe` an.
    ///
    /// Der FFT-Resampler arbeitet in festen Bloecken, Reste bleiben bis
    /// zum naechsten Aufruf gepuffert.
    pub fn process(&mut self, samples: &[f32], ausgabe: &mut Vec<f32>) -> AudioResult<()> {
        let Some(fft) = self.fft.as_mut() else {
            ausgabe.extend_from_slice(samples);
            return Ok(());
        };

        self.eingang.extend_from_slice(samples);

        while self.eingang.len() >= fft.input_frames_next() {
            let benoetigt = fft.input_frames_next();
            self.arbeit_ein[0][..benoetigt].copy_from_slice(&self.eingang[..benoetigt]);
            self.eingang.drain(..benoetigt);

            let ein = SequentialSliceOfVecs::new(&self.arbeit_ein[..], MONO, benoetigt)
                .map_err(|e| AudioError::Resampler(e.to_string()))?;
            let aus_frames = fft.output_frames_next();
            let mut aus = SequentialSliceOfVecs::new_mut(&mut self.arbeit_aus[..], MONO, aus_frames)
                .map_err(|e| AudioError::Resampler(e.to_string()))?;

            let (_, geschrieben) = fft
                .process_into_buffer(&ein, &mut aus, None)
                .map_err(|e| AudioError::Resampler(e.to_string()))?;

            ausgabe.extend_from_slice(&self.arbeit_aus[0][..geschrieben]);
        }

        Ok(())
    }

    /// Verwirft allen internen Zustand
    pub fn reset(&mut self) -> AudioResult<()> {
        *self = Self::neu(self.von, self.nach)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FrameReshaper
// ---------------------------------------------------------------------------

/// Zerlegt einen Sample-Strom in Frames fester Groesse
#[derive(Debug)]
pub struct FrameReshaper {
    frame_groesse: usize,
    puffer: VecDeque<f32>,
}

impl FrameReshaper {
    pub fn neu(frame_groesse: usize) -> Self {
        Self {
            frame_groesse,
            puffer: VecDeque::with_capacity(frame_groesse * 4),
        }
    }

    pub fn frame_groesse(&self) -> usize {
        self.frame_groesse
    }

    pub fn write(&mut self, samples: &[f32]) {
        self.puffer.extend(samples.iter().copied());
    }

    /// Fuellt `frame` falls genug Samples vorliegen.
    ///
    /// `frame` muss genau `frame_groesse()` lang sein, sonst wird nichts
    /// gelesen.
    pub fn read_frame(&mut self, frame: &mut [f32]) -> bool {
        if frame.len() != self.frame_groesse || self.puffer.len() < self.frame_groesse {
            return false;
        }
        for (ziel, quelle) in frame.iter_mut().zip(self.puffer.drain(..self.frame_groesse)) {
            *ziel = quelle;
        }
        true
    }

    /// Liest bis zu `ziel.len()` Samples, gibt die Anzahl zurueck
    pub fn read_samples(&mut self, ziel: &mut [f32]) -> usize {
        let anzahl = ziel.len().min(self.puffer.len());
        for (z, q) in ziel.iter_mut().zip(self.puffer.drain(..anzahl)) {
            *z = q;
        }
        anzahl
    }

    /// Gepufferte Samples
    pub fn verfuegbar(&self) -> usize {
        self.puffer.len()
    }

    pub fn reset(&mut self) {
        self.puffer.clear();
    }
}
