//! sprechfunk-voice – Empfang, Wiedergabe und Sitzungslogik
//!
//! Alles zwischen dem Draht-Protokoll und dem Lautsprecher: Jitter Buffer,
//! Decoder-Pipeline, Sprech-Sessions mit Desync-Korrektur, Mixer sowie
//! die Sitzungslogik von Client und Server.
//!
//! ## Module
//! - [`jitter_buffer`] – Ordnet kodierte Frames eines Sprechers
//! - [`decoder`] – Decoder-Pipeline, geteilt in Haupt- und Audio-Thread
//! - [`session`] – Sprech-Sessions und Jitter-Schaetzung
//! - [`desync`] – Geschwindigkeitskorrektur der Wiedergabe
//! - [`playback`] – Wiedergabe-Slot pro Spieler
//! - [`mixer`] – Mischt alle Slots, blendet nach Prioritaet aus
//! - [`orchestration`] – Verteilt Ereignisse auf Sessions und Slots
//! - [`channels`] – Offene Sendekanaele und ihre Sessions
//! - [`rooms`] – Raeume denen der lokale Spieler zuhoert
//! - [`peers`] – Bekannte Spieler aus der Routing-Tabelle
//! - [`receiving`] – Empfangszustand pro Sprecher
//! - [`comms`] – Sende- und Empfangsverarbeitung
//! - [`traffic`] – Verkehrszaehler
//! - [`server`] – Basis-Server
//! - [`client`] – Basis-Client

pub mod channels;
pub mod client;
pub mod comms;
pub mod decoder;
pub mod desync;
pub mod error;
pub mod jitter_buffer;
pub mod mixer;
pub mod orchestration;
pub mod peers;
pub mod playback;
pub mod receiving;
pub mod rooms;
pub mod server;
pub mod session;
pub mod traffic;

pub use channels::{ChannelCollection, OpenChannel};
pub use client::{BaseClient, ClientStatus, ClientTransport};
pub use comms::{CommsProcessor, Sendekanal};
pub use desync::DesyncCorrector;
pub use error::{VoiceError, VoiceResult};
pub use jitter_buffer::EncodedAudioBuffer;
pub use mixer::{Mixer, MixerAusgang};
pub use orchestration::{PlaybackOrchestrator, VoicePlayback};
pub use playback::{PlaybackSlot, WiedergabeZustand};
pub use rooms::{RoomMembership, Rooms};
pub use server::{BaseServer, ServerTransport};
pub use session::{FensterJitterSchaetzer, JitterEstimator, SpeechSession};
pub use traffic::{TrafficCounter, TrafficStats};
