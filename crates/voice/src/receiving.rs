//! Empfangszustand pro entferntem Sprecher
//!
//! Leitet aus den Kanal-Metadaten eines VoiceData-Pakets ab, ob der
//! Sprecher neu angefangen oder aufgehoert hat, und uebersetzt die
//! umlaufende 16-Bit-Sequenz des Senders in eine monotone lokale 32-Bit-
//! Sequenz fuer den Jitter Buffer.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sprechfunk_core::{ChannelPriority, ChannelType, PeerId, RoomId, VoiceEvent, VoicePacket};
use sprechfunk_protocol::VoiceData;
use tracing::{debug, trace};

use crate::rooms::Rooms;

/// Kanal-ID aus Typ und Empfaenger: `typ | recipient << 8`
pub fn composite_id(typ: ChannelType, recipient: u16) -> u32 {
    u32::from(typ as u8) | (u32::from(recipient) << 8)
}

/// Vorzeichenbehafteter Abstand zweier umlaufender Sequenznummern
pub fn wrapped_delta(basis: u16, sequenz: u16) -> i32 {
    i32::from(sequenz.wrapping_sub(basis) as i16)
}

/// Wer als Empfaenger zaehlt
#[derive(Debug, Clone, Copy)]
pub struct Adressat<'a> {
    pub eigene_id: PeerId,
    pub rooms: &'a Rooms,
}

impl Adressat<'_> {
    fn gemeint(&self, typ: ChannelType, recipient: u16) -> bool {
        match typ {
            ChannelType::Player => recipient == self.eigene_id.0,
            ChannelType::Room => self.rooms.contains(RoomId(recipient)),
        }
    }
}

/// Zusammenfassung der Kanaele die uns adressieren
struct KanalAuswertung {
    force_reset: bool,
    adressiert: bool,
    positional: bool,
    alle_schliessend: bool,
    priority: ChannelPriority,
}

/// Zustand eines Sprechers aus Sicht des Empfaengers
#[derive(Debug)]
pub struct ReceivingState {
    spieler: String,
    expected_channel_session: Option<u8>,
    base_sequence: Option<u16>,
    local_sequence: u32,
    last_receipt: Option<Instant>,
    open: bool,
    per_channel_sessions: HashMap<u32, u8>,
    timeout: Duration,
}

impl ReceivingState {
    pub fn neu(spieler: impl Into<String>, timeout: Duration) -> Self {
        Self {
            spieler: spieler.into(),
            expected_channel_session: None,
            base_sequence: None,
            local_sequence: 0,
            last_receipt: None,
            open: false,
            per_channel_sessions: HashMap::new(),
            timeout,
        }
    }

    pub fn spieler(&self) -> &str {
        &self.spieler
    }

    /// Der Sprecher spricht gerade
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn local_sequence(&self) -> u32 {
        self.local_sequence
    }

    /// Verarbeitet ein Paket und stellt es als Ereignis zu.
    ///
    /// Gibt die lokale Sequenz zurueck, oder `None` wenn das Paket verworfen
    /// wurde oder uns nicht adressiert. Beendet das Paket die Aeusserung,
    /// folgt das Stop-Ereignis direkt nach dem Paket.
    pub fn verarbeiten(
        &mut self,
        daten: &VoiceData,
        adressat: Adressat<'_>,
        jetzt: Instant,
        ereignisse: &mut Vec<VoiceEvent>,
    ) -> Option<u32> {
        let auswertung = self.kanaele_lesen(daten, adressat);
        if !auswertung.adressiert {
            trace!(spieler = %self.spieler, "Paket adressiert uns nicht");
            return None;
        }
        self.last_receipt = Some(jetzt);

        let sequenz = daten.audio.sequence;
        let lokal = self.sprecher_aktualisieren(&auswertung, daten.channel_session, sequenz, ereignisse)?;

        let paket = VoicePacket {
            sender: self.spieler.clone(),
            priority: auswertung.priority,
            positional: auswertung.positional,
            payload: daten.audio.payload.clone(),
            sequence_number: lokal,
        };

        ereignisse.push(VoiceEvent::VoicePacketReceived(paket));

        if !self.open {
            debug!(spieler = %self.spieler, "Letztes Paket, Sprecher hoert auf");
            ereignisse.push(VoiceEvent::PlayerStoppedSpeaking {
                name: self.spieler.clone(),
            });
        }
        Some(lokal)
    }

    /// Beendet eine Aeusserung nach zu langer Funkstille
    pub fn timeout_pruefen(&mut self, jetzt: Instant, ereignisse: &mut Vec<VoiceEvent>) {
        let abgelaufen = self
            .last_receipt
            .is_some_and(|t| jetzt.saturating_duration_since(t) > self.timeout);
        if self.open && abgelaufen {
            debug!(spieler = %self.spieler, "Empfangs-Timeout");
            self.schliessen(ereignisse);
        }
    }

    /// Setzt den Zustand zurueck. Ein offener Sprecher wird beendet.
    pub fn reset(&mut self, ereignisse: &mut Vec<VoiceEvent>) {
        if self.open {
            self.schliessen(ereignisse);
        }
        self.expected_channel_session = None;
        self.base_sequence = None;
        self.local_sequence = 0;
        self.last_receipt = None;
        self.per_channel_sessions.clear();
    }

    fn schliessen(&mut self, ereignisse: &mut Vec<VoiceEvent>) {
        self.open = false;
        ereignisse.push(VoiceEvent::PlayerStoppedSpeaking {
            name: self.spieler.clone(),
        });
    }

    fn kanaele_lesen(&mut self, daten: &VoiceData, adressat: Adressat<'_>) -> KanalAuswertung {
        let mut geaendert = 0usize;
        let mut a = KanalAuswertung {
            force_reset: false,
            adressiert: false,
            positional: true,
            alle_schliessend: true,
            priority: ChannelPriority::None,
        };

        for kanal in &daten.channels {
            let typ = kanal.bitfield.typ();
            let id = composite_id(typ, kanal.recipient);
            let session = kanal.bitfield.session_id();
            // Nur bekannte Kanaele mit neuer Session zaehlen
            if let Some(vorher) = self.per_channel_sessions.insert(id, session) {
                if vorher != session {
                    geaendert += 1;
                }
            }

            if adressat.gemeint(typ, kanal.recipient) {
                a.adressiert = true;
                a.positional &= kanal.bitfield.is_positional();
                a.alle_schliessend &= kanal.bitfield.is_closing();
                a.priority = a.priority.max(kanal.bitfield.priority());
            }
        }

        // Nur Kanaele des aktuellen Pakets behalten
        if self.per_channel_sessions.len() > daten.channels.len() {
            self.per_channel_sessions.retain(|id, _| {
                daten
                    .channels
                    .iter()
                    .any(|k| composite_id(k.bitfield.typ(), k.recipient) == *id)
            });
        }

        a.force_reset = !daten.channels.is_empty() && geaendert == daten.channels.len();
        if !a.adressiert {
            a.positional = false;
        }
        a
    }

    fn sprecher_aktualisieren(
        &mut self,
        a: &KanalAuswertung,
        channel_session: u8,
        sequenz: u16,
        ereignisse: &mut Vec<VoiceEvent>,
    ) -> Option<u32> {
        if a.force_reset || self.expected_channel_session != Some(channel_session) {
            self.expected_channel_session = Some(channel_session);
            if self.open {
                debug!(spieler = %self.spieler, session = channel_session, "Kanal-Session gewechselt");
                self.schliessen(ereignisse);
            }
        }

        if !self.open {
            if let Some(basis) = self.base_sequence {
                if wrapped_delta(basis, sequenz) < 0 {
                    trace!(spieler = %self.spieler, sequenz, basis, "Veraltetes Paket nach Sprechende verworfen");
                    return None;
                }
            }
            self.base_sequence = Some(sequenz);
            self.local_sequence = 0;
            self.open = true;
            debug!(spieler = %self.spieler, sequenz, "Sprecher beginnt");
            ereignisse.push(VoiceEvent::PlayerStartedSpeaking {
                name: self.spieler.clone(),
            });
        }

        let basis = self.base_sequence.unwrap_or(sequenz);
        let delta = wrapped_delta(basis, sequenz);
        let neu = i64::from(self.local_sequence) + i64::from(delta);
        if neu < 0 {
            trace!(spieler = %self.spieler, sequenz, "Paket vor Sessionbeginn verworfen");
            return None;
        }

        self.local_sequence = neu as u32;
        self.base_sequence = Some(sequenz);
        self.open = !a.alle_schliessend;
        Some(self.local_sequence)
    }
}
