//! Offene Sprachkanaele des lokalen Spielers
//!
//! Zwei Session-Zaehler erkennen Neustarts auf der Empfangsseite:
//!
//! - Jeder Kanal hat eine eigene Session, die beim Wiederoeffnen eines
//!   schliessenden Kanals um eins steigt (auf dem Draht modulo 4).
//! - Die Sammlung hat eine Session, die steigt sobald alle Kanaele
//!   schliessend sind. Sie steht im Options-Byte jedes VoiceData-Pakets.
//!
//! Beide Zaehler sind unabhaengig voneinander.

use sprechfunk_core::{diagnose, ChannelPriority, ChannelProperties, ChannelType, SprechfunkError};
use sprechfunk_protocol::ChannelBitField;
use tracing::{debug, error};

/// Ein offener oder schliessender Kanal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenChannel {
    typ: ChannelType,
    recipient: u16,
    properties: ChannelProperties,
    session_id: u16,
    closing: bool,
}

impl OpenChannel {
    pub fn neu(typ: ChannelType, recipient: u16, properties: ChannelProperties) -> Self {
        Self {
            typ,
            recipient,
            properties,
            session_id: 0,
            closing: false,
        }
    }

    /// Derselbe Kanal im Zustand "schliessend"
    pub fn as_closing(&self) -> Result<Self, SprechfunkError> {
        if self.closing {
            error!(
                diagnose_id = %diagnose::KANAL_BEREITS_SCHLIESSEND,
                recipient = self.recipient,
                "Kanal wird doppelt geschlossen"
            );
            return Err(SprechfunkError::moeglicher_fehler(
                "Kanal ist bereits schliessend",
                diagnose::KANAL_BEREITS_SCHLIESSEND,
            ));
        }
        Ok(Self {
            closing: true,
            ..*self
        })
    }

    /// Derselbe Kanal wieder offen, mit neuer Session
    pub fn as_open(&self) -> Result<Self, SprechfunkError> {
        if !self.closing {
            error!(
                diagnose_id = %diagnose::KANAL_NICHT_SCHLIESSEND,
                recipient = self.recipient,
                "Offener Kanal soll wiedergeoeffnet werden"
            );
            return Err(SprechfunkError::moeglicher_fehler(
                "Kanal ist nicht schliessend",
                diagnose::KANAL_NICHT_SCHLIESSEND,
            ));
        }
        Ok(Self {
            closing: false,
            session_id: self.session_id.wrapping_add(1),
            ..*self
        })
    }

    pub fn typ(&self) -> ChannelType {
        self.typ
    }

    pub fn recipient(&self) -> u16 {
        self.recipient
    }

    pub fn properties(&self) -> ChannelProperties {
        self.properties
    }

    pub fn priority(&self) -> ChannelPriority {
        self.properties.priority
    }

    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Metadaten-Byte fuer den Draht
    pub fn bitfield(&self) -> ChannelBitField {
        ChannelBitField::neu(
            self.typ,
            self.session_id,
            self.properties.priority,
            self.properties.positional,
            self.closing,
        )
    }

    fn passt(&self, typ: ChannelType, recipient: u16, properties: ChannelProperties) -> bool {
        self.typ == typ && self.recipient == recipient && self.properties == properties
    }
}

// ---------------------------------------------------------------------------
// ChannelCollection
// ---------------------------------------------------------------------------

/// Alle Kanaele ueber die gerade gesendet wird
#[derive(Debug, Default, Clone)]
pub struct ChannelCollection {
    kanaele: Vec<OpenChannel>,
    session_id: u8,
}

impl ChannelCollection {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Oeffnet einen Kanal. Ein passender schliessender Kanal wird
    /// wiedergeoeffnet, sonst kommt ein neuer hinzu.
    pub fn open(&mut self, typ: ChannelType, recipient: u16, properties: ChannelProperties) {
        let schliessend = self
            .kanaele
            .iter_mut()
            .find(|k| k.closing && k.passt(typ, recipient, properties));

        match schliessend {
            Some(kanal) => {
                // Der Kanal ist garantiert schliessend
                if let Ok(offen) = kanal.as_open() {
                    debug!(recipient, session = offen.session_id, "Kanal wiedergeoeffnet");
                    *kanal = offen;
                }
            }
            None => {
                debug!(recipient, ?typ, "Kanal geoeffnet");
                self.kanaele.push(OpenChannel::neu(typ, recipient, properties));
            }
        }
    }

    /// Markiert den ersten passenden offenen Kanal als schliessend.
    ///
    /// Sind danach alle Kanaele schliessend, beginnt eine neue
    /// Sammlungs-Session.
    pub fn close(&mut self, typ: ChannelType, recipient: u16, properties: ChannelProperties) -> bool {
        let offen = self
            .kanaele
            .iter_mut()
            .find(|k| !k.closing && k.passt(typ, recipient, properties));

        let Some(kanal) = offen else {
            return false;
        };
        match kanal.as_closing() {
            Ok(schliessend) => *kanal = schliessend,
            Err(_) => return false,
        }

        if self.kanaele.iter().all(|k| k.closing) {
            self.session_id = self.session_id.wrapping_add(1);
            debug!(session = self.session_id, "Alle Kanaele schliessend, neue Sammlungs-Session");
        }
        true
    }

    /// Entfernt schliessende Kanaele (nach dem Senden ihres letzten Pakets)
    pub fn clean_closing_channels(&mut self) {
        self.kanaele.retain(|k| !k.closing);
    }

    /// Momentaufnahme aller Kanaele mit der Sammlungs-Session
    pub fn channels(&self) -> (u8, Vec<OpenChannel>) {
        (self.session_id, self.kanaele.clone())
    }

    pub fn iter(&self) -> impl Iterator<Item = &OpenChannel> {
        self.kanaele.iter()
    }

    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    pub fn len(&self) -> usize {
        self.kanaele.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kanaele.is_empty()
    }

    /// Kanaele die nicht schliessend sind
    pub fn offene(&self) -> usize {
        self.kanaele.iter().filter(|k| !k.closing).count()
    }
}
