//! Sprach- und Textverkehr des Clients
//!
//! Die Sendeseite ([`Sendekanal`]) wird von der Encoder-Pipeline auf deren
//! Verarbeitungs-Thread benutzt. Sie legt fertig kodierte Pakete in einen
//! Transfer-Puffer, den der Client in seinem Update leert.
//!
//! Die Empfangsseite ([`CommsProcessor`]) lebt auf dem Haupt-Thread und
//! fuehrt pro Sprecher einen [`ReceivingState`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use sprechfunk_audio::{transfer_buffer, TransferReader, TransferWriter, VoiceSender};
use sprechfunk_core::{
    ChannelProperties, ChannelType, EncodedAudio, PeerId, RoomId, TextMessage, VoiceConfig, VoiceEvent,
};
use sprechfunk_protocol::{ChannelHeader, Message, TextData, VoiceData};
use tracing::{debug, error, trace, warn};

use crate::channels::ChannelCollection;
use crate::error::{VoiceError, VoiceResult};
use crate::peers::PeerCollection;
use crate::receiving::{Adressat, ReceivingState};
use crate::rooms::Rooms;

// ---------------------------------------------------------------------------
// Sendeseite
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Verbindung {
    session: u32,
    eigene_id: PeerId,
}

/// Kanaele und Warteschlange fuer ausgehende Sprachpakete
pub struct Sendekanal {
    kanaele: Mutex<ChannelCollection>,
    verbindung: Mutex<Option<Verbindung>>,
    sequenz: AtomicU16,
    warteschlange: Mutex<TransferWriter<Bytes>>,
    verworfen: AtomicU64,
}

impl Sendekanal {
    /// Erstellt den Sendekanal und die Leseseite seiner Warteschlange
    pub fn neu(kapazitaet: usize) -> (Arc<Self>, TransferReader<Bytes>) {
        let (schreiber, leser) = transfer_buffer(kapazitaet);
        let kanal = Arc::new(Self {
            kanaele: Mutex::new(ChannelCollection::neu()),
            verbindung: Mutex::new(None),
            sequenz: AtomicU16::new(0),
            warteschlange: Mutex::new(schreiber),
            verworfen: AtomicU64::new(0),
        });
        (kanal, leser)
    }

    /// Setzt Server-Session und eigene ID, `None` beim Trennen
    pub fn verbindung_setzen(&self, verbindung: Option<(u32, PeerId)>) {
        *self.verbindung.lock() = verbindung.map(|(session, eigene_id)| Verbindung { session, eigene_id });
    }

    pub fn kanal_oeffnen(&self, typ: ChannelType, recipient: u16, properties: ChannelProperties) {
        self.kanaele.lock().open(typ, recipient, properties);
    }

    pub fn kanal_schliessen(&self, typ: ChannelType, recipient: u16, properties: ChannelProperties) -> bool {
        self.kanaele.lock().close(typ, recipient, properties)
    }

    /// Kopie der aktuellen Kanal-Sammlung
    pub fn kanaele(&self) -> ChannelCollection {
        self.kanaele.lock().clone()
    }

    /// Verworfene Pakete (Warteschlange voll)
    pub fn verworfen(&self) -> u64 {
        self.verworfen.load(Ordering::Relaxed)
    }

    /// Verpackt ein kodiertes Paket und stellt es in die Warteschlange.
    ///
    /// Gibt `false` zurueck wenn nicht gesendet wurde (keine Verbindung,
    /// keine Kanaele oder Warteschlange voll).
    pub fn send_voice_data(&self, encoded: Bytes) -> VoiceResult<bool> {
        let Some(verbindung) = *self.verbindung.lock() else {
            trace!("Keine Verbindung, Sprachpaket verworfen");
            return Ok(false);
        };

        let mut kanaele = self.kanaele.lock();
        if kanaele.is_empty() {
            trace!("Keine Kanaele offen, Sprachpaket verworfen");
            return Ok(false);
        }

        let channels = kanaele
            .iter()
            .map(|k| ChannelHeader {
                bitfield: k.bitfield(),
                recipient: k.recipient(),
            })
            .collect();
        let sequenz = self.sequenz.fetch_add(1, Ordering::Relaxed);

        let daten = Message::VoiceData(VoiceData {
            channel_session: kanaele.session_id(),
            sender: verbindung.eigene_id,
            channels,
            audio: EncodedAudio::neu(sequenz, encoded),
        })
        .kodieren(verbindung.session)?;

        // Schliessende Kanaele sind mit diesem Paket abgemeldet
        kanaele.clean_closing_channels();
        drop(kanaele);

        if self.warteschlange.lock().write(daten).is_err() {
            self.verworfen.fetch_add(1, Ordering::Relaxed);
            warn!(sequenz, "Sende-Warteschlange voll, Sprachpaket verworfen");
            return Ok(false);
        }
        Ok(true)
    }
}

impl VoiceSender for Sendekanal {
    fn send_voice(&self, encoded: Bytes) {
        if let Err(e) = self.send_voice_data(encoded) {
            error!(fehler = %e, "Sprachpaket konnte nicht verpackt werden");
        }
    }

    fn channel_count(&self) -> usize {
        self.kanaele.lock().len()
    }
}

// ---------------------------------------------------------------------------
// Empfangsseite
// ---------------------------------------------------------------------------

/// Empfangszustaende aller Sprecher und Textverarbeitung
pub struct CommsProcessor {
    empfang: HashMap<String, ReceivingState>,
    config: VoiceConfig,
}

impl CommsProcessor {
    pub fn neu(config: &VoiceConfig) -> Self {
        Self {
            empfang: HashMap::new(),
            config: config.clone(),
        }
    }

    /// Verarbeitet empfangene Sprachdaten
    pub fn voice_empfangen(
        &mut self,
        daten: &VoiceData,
        peers: &PeerCollection,
        rooms: &Rooms,
        jetzt: Instant,
        ereignisse: &mut Vec<VoiceEvent>,
    ) {
        let Some(name) = peers.get_name(daten.sender) else {
            debug!(sender = %daten.sender, "Sprachdaten von unbekanntem Spieler verworfen");
            return;
        };
        let Some(eigene_id) = peers.eigene_id() else {
            debug!("Sprachdaten vor eigener ID verworfen");
            return;
        };

        let timeout = self.config.empfangs_timeout();
        let state = self
            .empfang
            .entry(name.to_owned())
            .or_insert_with(|| ReceivingState::neu(name, timeout));

        let adressat = Adressat { eigene_id, rooms };
        state.verarbeiten(daten, adressat, jetzt, ereignisse);
    }

    /// Verarbeitet eine empfangene Textnachricht
    pub fn text_empfangen(
        &self,
        daten: &TextData,
        peers: &PeerCollection,
        rooms: &Rooms,
        ereignisse: &mut Vec<VoiceEvent>,
    ) {
        let Some(sender) = peers.get_name(daten.sender) else {
            error!(sender = %daten.sender, "Textnachricht von unbekanntem Spieler");
            return;
        };
        let empfaenger = match daten.recipient_type {
            ChannelType::Player => peers.get_name(PeerId(daten.recipient)),
            ChannelType::Room => rooms.name(RoomId(daten.recipient)),
        };
        let Some(empfaenger) = empfaenger else {
            error!(
                sender,
                recipient = daten.recipient,
                typ = ?daten.recipient_type,
                "Empfaenger der Textnachricht unbekannt"
            );
            return;
        };

        ereignisse.push(VoiceEvent::TextMessageReceived(TextMessage {
            sender: sender.to_owned(),
            recipient_type: daten.recipient_type,
            recipient: empfaenger.to_owned(),
            text: daten.text.clone(),
        }));
    }

    /// Baut eine Textnachricht an einen Spieler oder Raum
    pub fn text_kodieren(
        &self,
        typ: ChannelType,
        empfaenger: &str,
        text: &str,
        peers: &PeerCollection,
        session: u32,
    ) -> VoiceResult<Bytes> {
        let sender = peers.eigene_id().ok_or(VoiceError::NichtVerbunden)?;
        let recipient = match typ {
            ChannelType::Player => peers
                .get_id(empfaenger)
                .ok_or_else(|| VoiceError::UnbekannterSpieler(empfaenger.to_owned()))?
                .0,
            ChannelType::Room => RoomId::aus_name(empfaenger).0,
        };

        let daten = Message::TextData(TextData {
            sender,
            recipient_type: typ,
            recipient,
            text: text.to_owned(),
        })
        .kodieren(session)?;
        Ok(daten)
    }

    /// Ein Spieler ist (wieder) beigetreten
    pub fn spieler_beigetreten(&mut self, name: &str, ereignisse: &mut Vec<VoiceEvent>) {
        if let Some(state) = self.empfang.get_mut(name) {
            state.reset(ereignisse);
        }
    }

    /// Ein Spieler hat verlassen
    pub fn spieler_verlassen(&mut self, name: &str, ereignisse: &mut Vec<VoiceEvent>) {
        if let Some(mut state) = self.empfang.remove(name) {
            state.reset(ereignisse);
        }
    }

    /// Prueft Empfangs-Timeouts
    pub fn update(&mut self, jetzt: Instant, ereignisse: &mut Vec<VoiceEvent>) {
        for state in self.empfang.values_mut() {
            state.timeout_pruefen(jetzt, ereignisse);
        }
    }

    /// Beendet alle Sprecher
    pub fn stop(&mut self, ereignisse: &mut Vec<VoiceEvent>) {
        for (_, mut state) in self.empfang.drain() {
            state.reset(ereignisse);
        }
    }

    /// Sprecher die gerade sprechen
    pub fn sprecher(&self) -> impl Iterator<Item = &str> {
        self.empfang
            .values()
            .filter(|s| s.is_open())
            .map(|s| s.spieler())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprechfunk_core::ChannelPriority;
    use sprechfunk_protocol::RoutingTable;

    fn props() -> ChannelProperties {
        ChannelProperties::neu(false, ChannelPriority::Default)
    }

    fn peers(eigener: &str, namen: &[&str]) -> PeerCollection {
        let mut t = RoutingTable::neu();
        for n in namen {
            t.hinzufuegen(n);
        }
        let mut p = PeerCollection::neu(eigener);
        p.routing_update(t, &mut Vec::new());
        p
    }

    fn voice(daten: &Bytes) -> VoiceData {
        match Message::dekodieren(daten).unwrap().1 {
            Message::VoiceData(v) => v,
            andere => panic!("unerwartet: {andere:?}"),
        }
    }

    #[test]
    fn ohne_verbindung_wird_nicht_gesendet() {
        let (kanal, mut leser) = Sendekanal::neu(4);
        kanal.kanal_oeffnen(ChannelType::Room, 1, props());
        assert!(!kanal.send_voice_data(Bytes::from_static(&[1])).unwrap());
        assert!(leser.read().is_none());
    }

    #[test]
    fn ohne_kanaele_wird_nicht_gesendet() {
        let (kanal, mut leser) = Sendekanal::neu(4);
        kanal.verbindung_setzen(Some((7, PeerId(2))));
        assert_eq!(kanal.channel_count(), 0);
        assert!(!kanal.send_voice_data(Bytes::from_static(&[1])).unwrap());
        assert!(leser.read().is_none());
    }

    #[test]
    fn sequenz_steigt_und_schliessende_kanaele_gehen() {
        let (kanal, mut leser) = Sendekanal::neu(4);
        kanal.verbindung_setzen(Some((7, PeerId(2))));
        kanal.kanal_oeffnen(ChannelType::Room, 1, props());
        kanal.kanal_oeffnen(ChannelType::Player, 5, props());

        kanal.send_voice(Bytes::from_static(&[1]));
        kanal.kanal_schliessen(ChannelType::Player, 5, props());
        kanal.send_voice(Bytes::from_static(&[2]));
        kanal.send_voice(Bytes::from_static(&[3]));

        let a = voice(&leser.read().unwrap());
        let b = voice(&leser.read().unwrap());
        let c = voice(&leser.read().unwrap());
        assert_eq!(
            (a.audio.sequence, b.audio.sequence, c.audio.sequence),
            (0, 1, 2)
        );
        assert_eq!(a.sender, PeerId(2));
        assert_eq!(a.channels.len(), 2);
        assert_eq!(b.channels.len(), 2);
        assert!(b.channels[1].bitfield.is_closing());
        assert_eq!(c.channels.len(), 1);
        assert_eq!(kanal.channel_count(), 1);
    }

    #[test]
    fn volle_warteschlange_verwirft() {
        let (kanal, _leser) = Sendekanal::neu(1);
        kanal.verbindung_setzen(Some((7, PeerId(2))));
        kanal.kanal_oeffnen(ChannelType::Room, 1, props());
        assert!(kanal.send_voice_data(Bytes::from_static(&[1])).unwrap());
        assert!(!kanal.send_voice_data(Bytes::from_static(&[2])).unwrap());
        assert_eq!(kanal.verworfen(), 1);
    }

    #[test]
    fn empfang_liefert_paket_und_ereignisse() {
        let (kanal, mut leser) = Sendekanal::neu(4);
        kanal.verbindung_setzen(Some((7, PeerId(0))));
        kanal.kanal_oeffnen(ChannelType::Player, 1, props());
        kanal.send_voice(Bytes::from_static(&[1]));
        kanal.kanal_schliessen(ChannelType::Player, 1, props());
        kanal.send_voice(Bytes::from_static(&[2]));

        let empfaenger = peers("ben", &["anna", "ben"]);
        let rooms = Rooms::neu();
        let mut comms = CommsProcessor::neu(&VoiceConfig::default());
        let mut e = Vec::new();
        let jetzt = Instant::now();
        while let Some(daten) = leser.read() {
            comms.voice_empfangen(&voice(&daten), &empfaenger, &rooms, jetzt, &mut e);
        }

        let arten: Vec<String> = e
            .iter()
            .map(|e| match e {
                VoiceEvent::PlayerStartedSpeaking { name } => format!("start:{name}"),
                VoiceEvent::PlayerStoppedSpeaking { name } => format!("stop:{name}"),
                VoiceEvent::VoicePacketReceived(p) => format!("paket:{}", p.sequence_number),
                andere => format!("{andere:?}"),
            })
            .collect();
        assert_eq!(arten, vec!["start:anna", "paket:0", "paket:1", "stop:anna"]);
    }

    #[test]
    fn unbekannter_sender_wird_verworfen() {
        let empfaenger = peers("ben", &["ben"]);
        let mut comms = CommsProcessor::neu(&VoiceConfig::default());
        let mut e = Vec::new();
        let daten = VoiceData {
            channel_session: 0,
            sender: PeerId(9),
            channels: vec![],
            audio: EncodedAudio::neu(0, vec![1]),
        };
        comms.voice_empfangen(&daten, &empfaenger, &Rooms::neu(), Instant::now(), &mut e);
        assert!(e.is_empty());
    }

    #[test]
    fn text_an_raum_wird_aufgeloest() {
        let anna = peers("anna", &["anna", "ben"]);
        let comms = CommsProcessor::neu(&VoiceConfig::default());
        let daten = comms
            .text_kodieren(ChannelType::Room, "lobby", "hallo", &anna, 3)
            .unwrap();
        let text = match Message::dekodieren(&daten).unwrap().1 {
            Message::TextData(t) => t,
            andere => panic!("unerwartet: {andere:?}"),
        };

        let ben = peers("ben", &["anna", "ben"]);
        let mut rooms = Rooms::neu();
        rooms.join("lobby");
        let mut e = Vec::new();
        comms.text_empfangen(&text, &ben, &rooms, &mut e);
        match &e[..] {
            [VoiceEvent::TextMessageReceived(m)] => {
                assert_eq!(m.sender, "anna");
                assert_eq!(m.recipient, "lobby");
                assert_eq!(m.text, "hallo");
            }
            andere => panic!("unerwartet: {andere:?}"),
        }
    }

    #[test]
    fn text_an_unbekannten_spieler_ist_fehler() {
        let anna = peers("anna", &["anna"]);
        let comms = CommsProcessor::neu(&VoiceConfig::default());
        let fehler = comms
            .text_kodieren(ChannelType::Player, "niemand", "hallo", &anna, 3)
            .unwrap_err();
        assert!(matches!(fehler, VoiceError::UnbekannterSpieler(n) if n == "niemand"));
    }

    #[test]
    fn verlassen_beendet_sprecher() {
        let (kanal, mut leser) = Sendekanal::neu(4);
        kanal.verbindung_setzen(Some((7, PeerId(0))));
        kanal.kanal_oeffnen(ChannelType::Player, 1, props());
        kanal.send_voice(Bytes::from_static(&[1]));

        let ben = peers("ben", &["anna", "ben"]);
        let mut comms = CommsProcessor::neu(&VoiceConfig::default());
        let mut e = Vec::new();
        let daten = leser.read().unwrap();
        comms.voice_empfangen(&voice(&daten), &ben, &Rooms::neu(), Instant::now(), &mut e);
        assert_eq!(comms.sprecher().collect::<Vec<_>>(), vec!["anna"]);

        e.clear();
        comms.spieler_verlassen("anna", &mut e);
        assert!(matches!(&e[..], [VoiceEvent::PlayerStoppedSpeaking { name }] if name == "anna"));
        assert_eq!(comms.sprecher().count(), 0);
    }
}
