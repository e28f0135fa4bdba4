//! sprechfunk-core – Gemeinsame Typen, Konfiguration und Fehlertypen
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Sprechfunk-Crates gemeinsam genutzt werden.

pub mod config;
pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use config::VoiceConfig;
pub use error::{diagnose, Result, SprechfunkError};
pub use event::{EncodedAudio, TextMessage, VoiceEvent, VoicePacket};
pub use types::{ChannelPriority, ChannelProperties, ChannelType, PeerId, RoomId};
