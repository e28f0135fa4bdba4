//! Nachrichten des Sprechfunk-Protokolls
//!
//! ## Header
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       2   Magic 0x8BC7 (big-endian)
//!  2       1   Nachrichtentyp
//!  3       4   Session-ID (fehlt bei HandshakeRequest)
//! ```
//!
//! ## VoiceData
//!
//! ```text
//! [options:1][senderId:2][sequenceNumber:2][numChannels:2]
//! numChannels x [channelBitfield:1][recipientId:2]
//! [Audio-Nutzdaten bis Paketende]
//! ```
//!
//! Die unteren zwei Bits von `options` tragen die Session der
//! Kanal-Sammlung des Senders.
//!
//! Der Empfaenger liest zuerst nur den Header, prueft die Session und
//! dekodiert den Rumpf erst danach.

use bytes::Bytes;
use sprechfunk_core::{ChannelType, EncodedAudio, PeerId};

use crate::bitfield::ChannelBitField;
use crate::error::{ProtokollFehler, ProtokollResult};
use crate::packet::{PacketReader, PacketWriter};
use crate::routing::RoutingTable;

/// Magic am Anfang jedes Pakets
pub const MAGIC: u16 = 0x8BC7;

/// Maske der Sammlungs-Session im Options-Byte
pub const OPTIONS_SESSION_MASKE: u8 = 0b0000_0011;

// ---------------------------------------------------------------------------
// Nachrichtentyp
// ---------------------------------------------------------------------------

/// Art der Nachricht (drittes Byte jedes Pakets)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ClientState = 1,
    PlayerRoutingUpdate = 2,
    VoiceData = 3,
    TextData = 4,
    HandshakeRequest = 5,
    HandshakeResponse = 6,
    ErrorWrongSession = 7,
}

impl MessageType {
    /// Konvertiert ein Byte in einen `MessageType`.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::ClientState),
            2 => Some(Self::PlayerRoutingUpdate),
            3 => Some(Self::VoiceData),
            4 => Some(Self::TextData),
            5 => Some(Self::HandshakeRequest),
            6 => Some(Self::HandshakeResponse),
            7 => Some(Self::ErrorWrongSession),
            _ => None,
        }
    }

    /// Traegt dieser Typ eine Session-ID im Header?
    pub fn hat_session(&self) -> bool {
        *self != Self::HandshakeRequest
    }
}

/// Paket-Header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub typ: MessageType,
    /// `None` nur bei `HandshakeRequest`
    pub session: Option<u32>,
}

impl Header {
    /// Liest Magic, Typ und ggf. Session.
    ///
    /// Der Reader steht danach am Anfang des Rumpfs.
    pub fn lesen(r: &mut PacketReader<'_>) -> ProtokollResult<Self> {
        let magic = r.u16()?;
        if magic != MAGIC {
            return Err(ProtokollFehler::FalscheMagic(magic));
        }

        let roh = r.u8()?;
        let typ = MessageType::from_u8(roh).ok_or(ProtokollFehler::UnbekannterTyp(roh))?;
        let session = if typ.hat_session() {
            Some(r.u32()?)
        } else {
            None
        };

        Ok(Self { typ, session })
    }

    fn schreiben(typ: MessageType, session: u32, w: &mut PacketWriter) {
        w.u16(MAGIC).u8(typ as u8);
        if typ.hat_session() {
            w.u32(session);
        }
    }
}

// ---------------------------------------------------------------------------
// Rumpf-Typen
// ---------------------------------------------------------------------------

/// Ein Kanal-Eintrag im VoiceData-Paket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelHeader {
    pub bitfield: ChannelBitField,
    pub recipient: u16,
}

/// Sprachdaten eines Senders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceData {
    /// Session der Kanal-Sammlung (2 Bit)
    pub channel_session: u8,
    pub sender: PeerId,
    pub channels: Vec<ChannelHeader>,
    pub audio: EncodedAudio,
}

/// Textnachricht an einen Spieler oder Raum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextData {
    pub sender: PeerId,
    pub recipient_type: ChannelType,
    pub recipient: u16,
    pub text: String,
}

/// Zustand eines Clients (Name und gehoerte Raeume)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    pub name: String,
    pub rooms: Vec<String>,
}

/// Alle Nachrichten
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    HandshakeRequest { name: String },
    HandshakeResponse,
    ClientState(ClientState),
    PlayerRoutingUpdate(RoutingTable),
    VoiceData(VoiceData),
    TextData(TextData),
    ErrorWrongSession,
}

impl Message {
    pub fn typ(&self) -> MessageType {
        match self {
            Self::HandshakeRequest { .. } => MessageType::HandshakeRequest,
            Self::HandshakeResponse => MessageType::HandshakeResponse,
            Self::ClientState(_) => MessageType::ClientState,
            Self::PlayerRoutingUpdate(_) => MessageType::PlayerRoutingUpdate,
            Self::VoiceData(_) => MessageType::VoiceData,
            Self::TextData(_) => MessageType::TextData,
            Self::ErrorWrongSession => MessageType::ErrorWrongSession,
        }
    }

    /// Schreibt Header und Rumpf.
    ///
    /// `session` wird bei `HandshakeRequest` ignoriert.
    pub fn kodieren(&self, session: u32) -> ProtokollResult<Bytes> {
        let mut w = PacketWriter::neu();
        Header::schreiben(self.typ(), session, &mut w);

        match self {
            Self::HandshakeRequest { name } => {
                w.string(name)?;
            }
            Self::HandshakeResponse | Self::ErrorWrongSession => {}
            Self::ClientState(state) => {
                w.string(&state.name)?;
                w.anzahl(state.rooms.len())?;
                for room in &state.rooms {
                    w.string(room)?;
                }
            }
            Self::PlayerRoutingUpdate(tabelle) => tabelle.serialisieren(&mut w)?,
            Self::VoiceData(voice) => {
                w.u8(voice.channel_session & OPTIONS_SESSION_MASKE)
                    .u16(voice.sender.0)
                    .u16(voice.audio.sequence)
                    .anzahl(voice.channels.len())?;
                for kanal in &voice.channels {
                    w.u8(kanal.bitfield.raw()).u16(kanal.recipient);
                }
                w.bytes(&voice.audio.payload);
            }
            Self::TextData(text) => {
                w.u16(text.sender.0)
                    .u8(text.recipient_type as u8)
                    .u16(text.recipient);
                w.string(&text.text)?;
            }
        }

        Ok(w.fertig())
    }

    /// Liest den Rumpf eines Pakets dessen Header bereits gelesen wurde
    pub fn rumpf_lesen(typ: MessageType, r: &mut PacketReader<'_>) -> ProtokollResult<Self> {
        Ok(match typ {
            MessageType::HandshakeRequest => Self::HandshakeRequest { name: r.string()? },
            MessageType::HandshakeResponse => Self::HandshakeResponse,
            MessageType::ErrorWrongSession => Self::ErrorWrongSession,
            MessageType::ClientState => {
                let name = r.string()?;
                let anzahl = r.u16()?;
                let mut rooms = Vec::with_capacity(anzahl as usize);
                for _ in 0..anzahl {
                    rooms.push(r.string()?);
                }
                Self::ClientState(ClientState { name, rooms })
            }
            MessageType::PlayerRoutingUpdate => {
                Self::PlayerRoutingUpdate(RoutingTable::deserialisieren(r)?)
            }
            MessageType::VoiceData => {
                let options = r.u8()?;
                let sender = PeerId(r.u16()?);
                let sequence = r.u16()?;
                let anzahl = r.u16()?;
                let mut channels = Vec::with_capacity(anzahl as usize);
                for _ in 0..anzahl {
                    let bitfield = ChannelBitField::from_raw(r.u8()?);
                    let recipient = r.u16()?;
                    channels.push(ChannelHeader {
                        bitfield,
                        recipient,
                    });
                }
                let payload = Bytes::copy_from_slice(r.rest());
                Self::VoiceData(VoiceData {
                    channel_session: options & OPTIONS_SESSION_MASKE,
                    sender,
                    channels,
                    audio: EncodedAudio::neu(sequence, payload),
                })
            }
            MessageType::TextData => {
                let sender = PeerId(r.u16()?);
                let roh_typ = r.u8()?;
                let recipient_type = ChannelType::from_u8(roh_typ)
                    .ok_or(ProtokollFehler::UngueltigerKanalTyp(roh_typ))?;
                let recipient = r.u16()?;
                let text = r.string()?;
                Self::TextData(TextData {
                    sender,
                    recipient_type,
                    recipient,
                    text,
                })
            }
        })
    }

    /// Liest ein komplettes Paket (Header und Rumpf)
    pub fn dekodieren(daten: &[u8]) -> ProtokollResult<(Header, Self)> {
        let mut r = PacketReader::neu(daten);
        let header = Header::lesen(&mut r)?;
        let nachricht = Self::rumpf_lesen(header.typ, &mut r)?;
        Ok((header, nachricht))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprechfunk_core::ChannelPriority;

    fn voice_beispiel() -> VoiceData {
        VoiceData {
            channel_session: 2,
            sender: PeerId(7),
            channels: vec![
                ChannelHeader {
                    bitfield: ChannelBitField::neu(
                        ChannelType::Player,
                        1,
                        ChannelPriority::High,
                        false,
                        false,
                    ),
                    recipient: 3,
                },
                ChannelHeader {
                    bitfield: ChannelBitField::neu(
                        ChannelType::Room,
                        0,
                        ChannelPriority::Default,
                        true,
                        true,
                    ),
                    recipient: 0xBEEF,
                },
            ],
            audio: EncodedAudio::neu(0xFFFE, vec![0xAA, 0xBB, 0xCC]),
        }
    }

    #[test]
    fn voice_data_bytelayout() {
        let daten = Message::VoiceData(voice_beispiel())
            .kodieren(0x0102_0304)
            .unwrap();

        let erwartet: Vec<u8> = vec![
            0x8B, 0xC7, // Magic
            3,    // VoiceData
            1, 2, 3, 4, // Session
            2,    // Options
            0, 7, // Sender
            0xFF, 0xFE, // Sequenz
            0, 2, // Kanalanzahl
            0b0011_1000, 0, 3, // Spieler, Session 1, High
            0b0000_0111, 0xBE, 0xEF, // Raum, positional, closing
            0xAA, 0xBB, 0xCC,
        ];
        assert_eq!(&daten[..], &erwartet[..]);
    }

    #[test]
    fn voice_data_wird_gelesen() {
        let original = voice_beispiel();
        let daten = Message::VoiceData(original.clone()).kodieren(99).unwrap();
        let (header, nachricht) = Message::dekodieren(&daten).unwrap();
        assert_eq!(header.session, Some(99));
        assert_eq!(nachricht, Message::VoiceData(original));
    }

    #[test]
    fn handshake_request_hat_keine_session() {
        let daten = Message::HandshakeRequest {
            name: "anna".into(),
        }
        .kodieren(1234)
        .unwrap();
        assert_eq!(&daten[..3], &[0x8B, 0xC7, 5]);
        assert_eq!(&daten[3..5], &[0, 4]);

        let (header, nachricht) = Message::dekodieren(&daten).unwrap();
        assert_eq!(header.session, None);
        assert_eq!(
            nachricht,
            Message::HandshakeRequest {
                name: "anna".into()
            }
        );
    }

    #[test]
    fn falsche_magic() {
        let fehler = Message::dekodieren(&[0x12, 0x34, 3]).unwrap_err();
        assert_eq!(fehler, ProtokollFehler::FalscheMagic(0x1234));
    }

    #[test]
    fn unbekannter_typ() {
        let fehler = Message::dekodieren(&[0x8B, 0xC7, 42, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(fehler, ProtokollFehler::UnbekannterTyp(42));
    }

    #[test]
    fn abgeschnittenes_paket() {
        let daten = Message::VoiceData(voice_beispiel()).kodieren(1).unwrap();
        assert!(matches!(
            Message::dekodieren(&daten[..12]),
            Err(ProtokollFehler::ZuKurz { .. })
        ));
    }

    #[test]
    fn text_mit_ungueltigem_empfaengertyp() {
        let mut daten = Message::TextData(TextData {
            sender: PeerId(1),
            recipient_type: ChannelType::Room,
            recipient: 5,
            text: "hallo".into(),
        })
        .kodieren(1)
        .unwrap()
        .to_vec();
        // Typ-Byte des Empfaengers liegt hinter Header (7) und Sender (2)
        daten[9] = 9;
        assert_eq!(
            Message::dekodieren(&daten).unwrap_err(),
            ProtokollFehler::UngueltigerKanalTyp(9)
        );
    }

    #[test]
    fn client_state_und_routing_update() {
        let state = Message::ClientState(ClientState {
            name: "bert".into(),
            rooms: vec!["Lobby".into(), "Team A".into()],
        });
        let (_, gelesen) = Message::dekodieren(&state.kodieren(5).unwrap()).unwrap();
        assert_eq!(gelesen, state);

        let mut tabelle = RoutingTable::neu();
        tabelle.hinzufuegen("anna");
        tabelle.hinzufuegen("bert");
        let update = Message::PlayerRoutingUpdate(tabelle);
        let (_, gelesen) = Message::dekodieren(&update.kodieren(5).unwrap()).unwrap();
        assert_eq!(gelesen, update);
    }

    #[test]
    fn session_fehler_und_antwort_sind_nur_header() {
        for nachricht in [Message::ErrorWrongSession, Message::HandshakeResponse] {
            let daten = nachricht.kodieren(0xDEAD_BEEF).unwrap();
            assert_eq!(daten.len(), 7);
            let (header, gelesen) = Message::dekodieren(&daten).unwrap();
            assert_eq!(header.session, Some(0xDEAD_BEEF));
            assert_eq!(gelesen, nachricht);
        }
    }

    #[test]
    fn zu_viele_raeume_sind_fehler() {
        let state = Message::ClientState(ClientState {
            name: "anna".into(),
            rooms: vec![String::new(); usize::from(u16::MAX) + 1],
        });
        assert_eq!(
            state.kodieren(1).unwrap_err(),
            ProtokollFehler::ZuVieleEintraege(65536)
        );
    }
}
