//! Datenmodell fuer Sprachpakete und Ereignisse
//!
//! Ereignisse werden waehrend eines Netzwerk-Updates gesammelt und erst
//! danach auf dem Haupt-Thread ausgeliefert. Ein Handler kann dadurch nie
//! in die laufende Paketverarbeitung zurueckspringen.

use bytes::Bytes;

use crate::types::{ChannelPriority, ChannelType};

/// Kodierter Audio-Frame mit umlaufender Sequenznummer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudio {
    /// Sequenznummer des Senders (u16, laeuft um)
    pub sequence: u16,
    /// Codec-Nutzdaten
    pub payload: Bytes,
}

impl EncodedAudio {
    pub fn neu(sequence: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }
}

/// Empfangenes Sprachpaket, bereit fuer die Wiedergabe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePacket {
    /// Name des sendenden Spielers
    pub sender: String,
    /// Hoechste Prioritaet aller Kanaele die uns adressieren
    pub priority: ChannelPriority,
    /// Alle adressierenden Kanaele sind raeumlich
    pub positional: bool,
    /// Kodierte Nutzdaten
    pub payload: Bytes,
    /// Lokale, monoton steigende Sequenznummer (nach Verlustausgleich)
    pub sequence_number: u32,
}

/// Empfangene Textnachricht
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    /// Name des Absenders
    pub sender: String,
    /// Spieler- oder Raumnachricht
    pub recipient_type: ChannelType,
    /// Name des Empfaengers (Spieler oder Raum)
    pub recipient: String,
    /// Nachrichtentext
    pub text: String,
}

/// Alle Ereignisse die der Client an die Anwendung meldet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    /// Ein Spieler ist der Sitzung beigetreten
    PlayerJoined { name: String },
    /// Ein Spieler hat die Sitzung verlassen
    PlayerLeft { name: String },
    /// Ein Spieler hat begonnen zu sprechen
    PlayerStartedSpeaking { name: String },
    /// Ein Spieler hat aufgehoert zu sprechen
    PlayerStoppedSpeaking { name: String },
    /// Sprachpaket fuer die Wiedergabe
    VoicePacketReceived(VoicePacket),
    /// Textnachricht empfangen
    TextMessageReceived(TextMessage),
}

impl VoiceEvent {
    /// Name des betroffenen Spielers (Absender bei Paketen)
    pub fn spieler(&self) -> &str {
        match self {
            Self::PlayerJoined { name }
            | Self::PlayerLeft { name }
            | Self::PlayerStartedSpeaking { name }
            | Self::PlayerStoppedSpeaking { name } => name,
            Self::VoicePacketReceived(p) => &p.sender,
            Self::TextMessageReceived(t) => &t.sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ereignis_spielername() {
        let e = VoiceEvent::PlayerJoined {
            name: "anna".into(),
        };
        assert_eq!(e.spieler(), "anna");

        let p = VoiceEvent::VoicePacketReceived(VoicePacket {
            sender: "bert".into(),
            priority: ChannelPriority::Default,
            positional: false,
            payload: Bytes::from_static(&[1, 2, 3]),
            sequence_number: 4,
        });
        assert_eq!(p.spieler(), "bert");
    }

    #[test]
    fn encoded_audio_aus_vec() {
        let a = EncodedAudio::neu(65535, vec![9u8, 8]);
        assert_eq!(a.sequence, u16::MAX);
        assert_eq!(&a.payload[..], &[9, 8]);
    }
}
