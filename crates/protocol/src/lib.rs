//! sprechfunk-protocol – Binaeres Draht-Protokoll
//!
//! Definiert alle Nachrichten die zwischen Client und Server ausgetauscht
//! werden, die bitgepackten Kanal-Metadaten und die Routing-Tabelle.
//! Das Format ist bit-genau festgelegt, damit unabhaengig gebaute
//! Teilnehmer miteinander sprechen koennen.

pub mod bitfield;
pub mod error;
pub mod message;
pub mod packet;
pub mod routing;

pub use bitfield::ChannelBitField;
pub use error::{ProtokollFehler, ProtokollResult};
pub use message::{ChannelHeader, ClientState, Header, Message, MessageType, TextData, VoiceData, MAGIC};
pub use packet::{PacketReader, PacketWriter};
pub use routing::RoutingTable;
