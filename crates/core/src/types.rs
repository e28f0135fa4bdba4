//! Gemeinsame Identifikations- und Kanaltypen fuer Sprechfunk
//!
//! IDs verwenden das Newtype-Pattern um Verwechslungen zwischen Spieler-
//! und Raum-IDs zur Compilezeit auszuschliessen. Auf dem Draht sind beide
//! schlicht `u16`.

use serde::{Deserialize, Serialize};

/// Vom Server vergebene Spieler-ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u16);

impl PeerId {
    /// Gibt den Rohwert zurueck
    pub fn inner(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

/// Raum-ID, stabil aus dem Raumnamen abgeleitet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId(pub u16);

impl RoomId {
    /// Leitet die ID aus dem Raumnamen ab.
    ///
    /// FNV-1a (32 Bit) ueber die UTF-8-Bytes, danach die beiden Haelften
    /// per XOR auf 16 Bit gefaltet. Alle Teilnehmer muessen dieselbe
    /// Funktion verwenden.
    pub fn aus_name(name: &str) -> Self {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in name.as_bytes() {
            hash ^= u32::from(*byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
        Self(((hash >> 16) ^ (hash & 0xFFFF)) as u16)
    }

    /// Gibt den Rohwert zurueck
    pub fn inner(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "room:{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Kanaele
// ---------------------------------------------------------------------------

/// Ziel-Art eines Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelType {
    /// Direkt an einen Spieler
    Player = 0,
    /// An alle Mitglieder eines Raums
    Room = 1,
}

impl ChannelType {
    /// Konvertiert ein Byte in einen `ChannelType`.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Player),
            1 => Some(Self::Room),
            _ => None,
        }
    }
}

/// Prioritaet eines Sprechers.
///
/// Die Reihenfolge der Varianten ist die Rangfolge (`None` < `High`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum ChannelPriority {
    /// Kein Kanal adressiert uns
    None,
    Low,
    #[default]
    Default,
    Medium,
    High,
}

/// Eigenschaften eines offenen Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelProperties {
    /// Audio soll raeumlich wiedergegeben werden
    pub positional: bool,
    /// Prioritaet des Sprechers auf diesem Kanal
    pub priority: ChannelPriority,
}

impl ChannelProperties {
    pub fn neu(positional: bool, priority: ChannelPriority) -> Self {
        Self {
            positional,
            priority,
        }
    }
}
