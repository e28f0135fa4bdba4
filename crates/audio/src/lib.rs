//! sprechfunk-audio – Audio-Seite von Sprechfunk
//!
//! - Transfer-Puffer und Frame-Pool zwischen Echtzeit- und Verarbeitungs-Thread
//! - Resampling (rubato) und Frame-Zuschnitt
//! - Vorverarbeitung mit eigenem Thread, Noise Gate und VAD
//! - Encoder-Pipeline und Codec-Schnittstelle (Opus, PCM)
//! - Mikrofon-Capture und Lautsprecher-Playback via cpal

pub mod capture;
pub mod codec;
pub mod dsp;
pub mod encoder;
pub mod error;
pub mod format;
pub mod playback;
pub mod pool;
pub mod preprocessing;
pub mod resample;
pub mod transfer_buffer;

// Bequeme Re-Exporte der wichtigsten Typen
pub use capture::{format_ermitteln, standard_eingabegeraet, GeraeteFormat, Mikrofon};
pub use codec::{
    CodecFabrik, OpusDecoder, OpusEncoder, OpusFabrik, PcmDecoder, PcmEncoder, PcmFabrik,
    VoiceDecoder, VoiceEncoder,
};
pub use dsp::{ArvMeter, FrameProcessor, StandardProzessor};
pub use encoder::{EncoderPipeline, VoiceSender};
pub use error::{AudioError, AudioResult};
pub use format::{WaveFormat, INTERNE_ABTASTRATE};
pub use playback::{standard_ausgabegeraet, Lautsprecher, WiedergabeQuelle};
pub use pool::ConcurrentPool;
pub use preprocessing::{
    Abonnements, CaptureEingang, MicrophoneSubscriber, PipelineZustand, PreprocessingPipeline,
    VadSubscriber,
};
pub use resample::{FrameReshaper, Resampler};
pub use transfer_buffer::{transfer_buffer, TransferReader, TransferWriter};
