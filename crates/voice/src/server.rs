//! Basis-Server: Session, Routing-Tabelle und Weiterleitung
//!
//! Der Server ist transportunabhaengig. Der Host ruft fuer jedes
//! empfangene Datagramm [`BaseServer::paket_empfangen`] auf und reicht
//! dabei einen [`ServerTransport`] zum Antworten mit.
//!
//! ## Weiterleitung
//! - VoiceData unzuverlaessig an alle direkt oder ueber Raeume
//!   adressierten Spieler, nie zurueck an den Sender
//! - TextData zuverlaessig nach denselben Regeln
//! - Jede Aenderung der Spielerliste wird als vollstaendige Routing-Tabelle
//!   an alle Clients verteilt

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Instant;

use sprechfunk_core::{diagnose, ChannelPriority, ChannelType, PeerId, RoomId};
use sprechfunk_protocol::{
    ChannelBitField, ChannelHeader, ClientState, Header, Message, PacketReader, ProtokollFehler,
    RoutingTable,
};
use tracing::{debug, error, info, trace, warn};

use crate::traffic::{TrafficCounter, TrafficStats};

/// Sendet an einzelne Verbindungen
pub trait ServerTransport<V> {
    fn send_reliable(&mut self, an: &V, daten: &[u8]);
    fn send_unreliable(&mut self, an: &V, daten: &[u8]);
}

/// Verkehr des Servers nach Paketart
#[derive(Debug, Default, Clone)]
pub struct ServerTraffic {
    pub recv_client_state: TrafficCounter,
    pub recv_voice: TrafficCounter,
    pub recv_text: TrafficCounter,
    pub recv_handshake: TrafficCounter,
    pub sent: TrafficCounter,
}

impl ServerTraffic {
    /// Summe aller empfangenen Pakete
    pub fn empfangen(&self) -> TrafficStats {
        TrafficStats::combine([
            &self.recv_client_state,
            &self.recv_voice,
            &self.recv_text,
            &self.recv_handshake,
        ])
    }
}

#[derive(Debug, Clone)]
struct ClientInfo {
    name: String,
    id: PeerId,
    rooms: Vec<RoomId>,
}

/// Server-Kern, generisch ueber die Verbindungskennung `V`
pub struct BaseServer<V> {
    session: u32,
    routing: RoutingTable,
    clients: HashMap<V, ClientInfo>,
    traffic: ServerTraffic,
}

impl<V> BaseServer<V>
where
    V: Clone + Eq + Hash + Debug,
{
    /// Neuer Server mit zufaelliger Session
    pub fn neu() -> Self {
        Self::mit_session(rand::random())
    }

    pub fn mit_session(session: u32) -> Self {
        info!(session, "Server-Session erzeugt");
        Self {
            session,
            routing: RoutingTable::neu(),
            clients: HashMap::new(),
            traffic: ServerTraffic::default(),
        }
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn routing(&self) -> &RoutingTable {
        &self.routing
    }

    pub fn traffic(&self) -> &ServerTraffic {
        &self.traffic
    }

    pub fn client_anzahl(&self) -> usize {
        self.clients.len()
    }

    /// Verarbeitet ein empfangenes Datagramm
    pub fn paket_empfangen(
        &mut self,
        transport: &mut impl ServerTransport<V>,
        von: &V,
        daten: &[u8],
        jetzt: Instant,
    ) {
        let mut leser = PacketReader::neu(daten);
        let header = match Header::lesen(&mut leser) {
            Ok(header) => header,
            Err(ProtokollFehler::FalscheMagic(magic)) => {
                warn!(?von, magic, "Paket mit falscher Magic verworfen");
                return;
            }
            Err(e) => {
                warn!(?von, fehler = %e, "Header nicht lesbar, verworfen");
                return;
            }
        };

        // Session vor dem Rumpf pruefen
        if header.typ.hat_session() && header.session != Some(self.session) {
            warn!(?von, erhalten = ?header.session, erwartet = self.session, "Falsche Session");
            self.senden(transport, von, &Message::ErrorWrongSession, jetzt);
            return;
        }

        let nachricht = match Message::rumpf_lesen(header.typ, &mut leser) {
            Ok(nachricht) => nachricht,
            Err(e) => {
                warn!(?von, typ = ?header.typ, fehler = %e, "Paket nicht lesbar, verworfen");
                return;
            }
        };

        match nachricht {
            Message::HandshakeRequest { name } => {
                self.traffic.recv_handshake.update(daten.len(), jetzt);
                self.handshake(transport, von, &name, jetzt);
            }
            Message::ClientState(state) => {
                self.traffic.recv_client_state.update(daten.len(), jetzt);
                self.client_state(transport, von, state, jetzt);
            }
            Message::VoiceData(voice) => {
                self.traffic.recv_voice.update(daten.len(), jetzt);
                let ziele = self.ziele(von, voice.sender, &voice.channels);
                for ziel in &ziele {
                    transport.send_unreliable(ziel, daten);
                    self.traffic.sent.update(daten.len(), jetzt);
                }
                trace!(?von, ziele = ziele.len(), sequenz = voice.audio.sequence, "Sprachdaten weitergeleitet");
            }
            Message::TextData(text) => {
                self.traffic.recv_text.update(daten.len(), jetzt);
                let kanal = [ChannelHeader {
                    bitfield: ChannelBitField::neu(text.recipient_type, 0, ChannelPriority::Default, false, false),
                    recipient: text.recipient,
                }];
                let ziele = self.ziele(von, text.sender, &kanal);
                for ziel in &ziele {
                    transport.send_reliable(ziel, daten);
                    self.traffic.sent.update(daten.len(), jetzt);
                }
                debug!(?von, ziele = ziele.len(), "Textnachricht weitergeleitet");
            }
            Message::PlayerRoutingUpdate(_) | Message::HandshakeResponse | Message::ErrorWrongSession => {
                error!(
                    diagnose_id = %diagnose::CLIENT_NACHRICHT_AM_SERVER,
                    ?von,
                    typ = ?header.typ,
                    "Client-Nachricht am Server empfangen"
                );
            }
        }
    }

    /// Eine Verbindung ist weg
    pub fn client_getrennt(&mut self, transport: &mut impl ServerTransport<V>, von: &V, jetzt: Instant) {
        let Some(info) = self.clients.remove(von) else {
            return;
        };
        info!(spieler = %info.name, id = %info.id, "Client getrennt");

        // Derselbe Name kann ueber eine andere Verbindung wieder da sein
        if !self.clients.values().any(|c| c.name == info.name) {
            self.routing.entfernen(&info.name);
        }
        self.routing_verteilen(transport, jetzt);
    }

    fn handshake(&mut self, transport: &mut impl ServerTransport<V>, von: &V, name: &str, jetzt: Instant) {
        if self.clients.contains_key(von) {
            debug!(?von, spieler = name, "Erneuter Handshake, alte Verbindung wird getrennt");
            self.client_getrennt(transport, von, jetzt);
        }
        debug!(?von, spieler = name, "Handshake");
        self.senden(transport, von, &Message::HandshakeResponse, jetzt);
    }

    fn client_state(&mut self, transport: &mut impl ServerTransport<V>, von: &V, state: ClientState, jetzt: Instant) {
        let ClientState { name, rooms } = state;

        if let Some(alt) = self.clients.get(von) {
            if alt.name != name {
                warn!(?von, alt = %alt.name, neu = %name, "Client hat seinen Namen geaendert");
                let alter_name = alt.name.clone();
                self.clients.remove(von);
                if !self.clients.values().any(|c| c.name == alter_name) {
                    self.routing.entfernen(&alter_name);
                }
            }
        }

        let id = self.routing.hinzufuegen(&name);
        let rooms: Vec<RoomId> = rooms.iter().map(|r| RoomId::aus_name(r)).collect();
        let neu = !self.clients.contains_key(von);
        debug!(spieler = %name, %id, raeume = rooms.len(), "Client-Zustand aktualisiert");
        self.clients.insert(von.clone(), ClientInfo { name, id, rooms });

        if neu {
            self.routing_verteilen(transport, jetzt);
        }
    }

    /// Verbindungen die ein Paket mit diesen Kanaelen erhalten
    fn ziele(&self, von: &V, sender: PeerId, kanaele: &[ChannelHeader]) -> Vec<V> {
        match self.clients.get(von) {
            Some(info) if info.id == sender => {}
            Some(info) => {
                warn!(?von, angegeben = %sender, tatsaechlich = %info.id, "Absender-ID passt nicht zur Verbindung");
                return Vec::new();
            }
            None => {
                debug!(?von, "Paket von unbekannter Verbindung verworfen");
                return Vec::new();
            }
        }

        let mut ziele: Vec<V> = Vec::new();
        for (verbindung, info) in &self.clients {
            if verbindung == von || ziele.contains(verbindung) {
                continue;
            }
            let adressiert = kanaele.iter().any(|k| match k.bitfield.typ() {
                ChannelType::Player => info.id.0 == k.recipient,
                ChannelType::Room => info.rooms.contains(&RoomId(k.recipient)),
            });
            if adressiert {
                ziele.push(verbindung.clone());
            }
        }
        ziele
    }

    fn routing_verteilen(&mut self, transport: &mut impl ServerTransport<V>, jetzt: Instant) {
        let nachricht = Message::PlayerRoutingUpdate(self.routing.clone());
        let daten = match nachricht.kodieren(self.session) {
            Ok(d) => d,
            Err(e) => {
                error!(fehler = %e, "Routing-Tabelle nicht kodierbar");
                return;
            }
        };
        for verbindung in self.clients.keys() {
            transport.send_reliable(verbindung, &daten);
            self.traffic.sent.update(daten.len(), jetzt);
        }
        debug!(spieler = self.routing.len(), "Routing-Tabelle verteilt");
    }

    /// Antwortet zuverlaessig auf einer einzelnen Verbindung
    fn senden(&mut self, transport: &mut impl ServerTransport<V>, an: &V, nachricht: &Message, jetzt: Instant) {
        match nachricht.kodieren(self.session) {
            Ok(daten) => {
                transport.send_reliable(an, &daten);
                self.traffic.sent.update(daten.len(), jetzt);
            }
            Err(e) => error!(fehler = %e, typ = ?nachricht.typ(), "Nachricht nicht kodierbar"),
        }
    }
}

impl<V> Default for BaseServer<V>
where
    V: Clone + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::neu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprechfunk_core::EncodedAudio;
    use sprechfunk_protocol::{TextData, VoiceData};

    /// Merkt sich alle gesendeten Pakete
    #[derive(Default)]
    struct Protokoll {
        gesendet: Vec<(u8, bool, Message)>,
    }

    impl Protokoll {
        fn an(&self, ziel: u8) -> Vec<&Message> {
            self.gesendet
                .iter()
                .filter(|(z, _, _)| *z == ziel)
                .map(|(_, _, m)| m)
                .collect()
        }
    }

    impl ServerTransport<u8> for Protokoll {
        fn send_reliable(&mut self, an: &u8, daten: &[u8]) {
            self.gesendet.push((*an, true, Message::dekodieren(daten).unwrap().1));
        }
        fn send_unreliable(&mut self, an: &u8, daten: &[u8]) {
            self.gesendet.push((*an, false, Message::dekodieren(daten).unwrap().1));
        }
    }

    const SESSION: u32 = 0xABCD;

    fn anmelden(server: &mut BaseServer<u8>, t: &mut Protokoll, verbindung: u8, name: &str, rooms: &[&str]) {
        let jetzt = Instant::now();
        let hs = Message::HandshakeRequest { name: name.into() }.kodieren(0).unwrap();
        server.paket_empfangen(t, &verbindung, &hs, jetzt);
        let state = Message::ClientState(ClientState {
            name: name.into(),
            rooms: rooms.iter().map(|r| r.to_string()).collect(),
        })
        .kodieren(SESSION)
        .unwrap();
        server.paket_empfangen(t, &verbindung, &state, jetzt);
    }

    fn voice(sender: u16, typ: ChannelType, recipient: u16) -> Vec<u8> {
        Message::VoiceData(VoiceData {
            channel_session: 0,
            sender: PeerId(sender),
            channels: vec![ChannelHeader {
                bitfield: ChannelBitField::neu(typ, 0, ChannelPriority::Default, false, false),
                recipient,
            }],
            audio: EncodedAudio::neu(1, vec![9, 9]),
        })
        .kodieren(SESSION)
        .unwrap()
        .to_vec()
    }

    #[test]
    fn handshake_wird_beantwortet() {
        let mut server = BaseServer::mit_session(SESSION);
        let mut t = Protokoll::default();
        let hs = Message::HandshakeRequest { name: "anna".into() }.kodieren(0).unwrap();
        server.paket_empfangen(&mut t, &1u8, &hs, Instant::now());
        assert_eq!(t.an(1), vec![&Message::HandshakeResponse]);
        assert_eq!(server.traffic().recv_handshake.pakete(), 1);
    }

    #[test]
    fn falsche_session_wird_abgewiesen() {
        let mut server = BaseServer::mit_session(SESSION);
        let mut t = Protokoll::default();
        let state = Message::ClientState(ClientState {
            name: "anna".into(),
            rooms: vec![],
        })
        .kodieren(SESSION + 1)
        .unwrap();
        server.paket_empfangen(&mut t, &1u8, &state, Instant::now());

        assert_eq!(t.gesendet.len(), 1);
        assert_eq!(t.gesendet[0], (1, true, Message::ErrorWrongSession));
        assert!(server.routing().is_empty());
        assert_eq!(server.traffic().recv_client_state.pakete(), 0);
    }

    #[test]
    fn falsche_session_vor_unlesbarem_rumpf_wird_abgewiesen() {
        let mut server = BaseServer::mit_session(SESSION);
        let mut t = Protokoll::default();

        // Header mit alter Session, Rumpf nach einem Byte abgeschnitten
        let mut daten = voice(7, ChannelType::Player, 1);
        daten[3..7].copy_from_slice(&0x1111u32.to_be_bytes());
        daten.truncate(8);
        server.paket_empfangen(&mut t, &7u8, &daten, Instant::now());
        assert_eq!(t.an(7), vec![&Message::ErrorWrongSession]);

        // Mit richtiger Session bleibt derselbe Rumpf unlesbar und wird verworfen
        let mut daten = voice(7, ChannelType::Player, 1);
        daten.truncate(8);
        server.paket_empfangen(&mut t, &7u8, &daten, Instant::now());
        assert_eq!(t.gesendet.len(), 1);
        assert_eq!(server.traffic().recv_voice.pakete(), 0);
    }

    #[test]
    fn falsche_magic_wird_ignoriert() {
        let mut server: BaseServer<u8> = BaseServer::mit_session(SESSION);
        let mut t = Protokoll::default();
        server.paket_empfangen(&mut t, &1, &[0, 0, 1, 0, 0, 0, 0], Instant::now());
        assert!(t.gesendet.is_empty());
    }

    #[test]
    fn client_state_verteilt_routing() {
        let mut server = BaseServer::mit_session(SESSION);
        let mut t = Protokoll::default();
        anmelden(&mut server, &mut t, 1, "anna", &[]);
        anmelden(&mut server, &mut t, 2, "ben", &[]);

        let letzte = t.an(1).into_iter().rev().find_map(|m| match m {
            Message::PlayerRoutingUpdate(r) => Some(r.clone()),
            _ => None,
        });
        let tabelle = letzte.unwrap();
        assert_eq!(tabelle.get_id("anna"), Some(PeerId(0)));
        assert_eq!(tabelle.get_id("ben"), Some(PeerId(1)));
        assert_eq!(server.client_anzahl(), 2);
    }

    #[test]
    fn sprache_an_spieler_und_raum() {
        let mut server = BaseServer::mit_session(SESSION);
        let mut t = Protokoll::default();
        anmelden(&mut server, &mut t, 1, "anna", &["lobby"]);
        anmelden(&mut server, &mut t, 2, "ben", &["lobby"]);
        anmelden(&mut server, &mut t, 3, "carl", &[]);
        t.gesendet.clear();

        // Direkt an carl
        server.paket_empfangen(&mut t, &1, &voice(0, ChannelType::Player, 2), Instant::now());
        assert_eq!(t.gesendet.len(), 1);
        assert_eq!(t.gesendet[0].0, 3);
        assert!(!t.gesendet[0].1);

        // An den Raum: ben, nicht zurueck an anna
        t.gesendet.clear();
        let lobby = RoomId::aus_name("lobby").0;
        server.paket_empfangen(&mut t, &1, &voice(0, ChannelType::Room, lobby), Instant::now());
        let ziele: Vec<u8> = t.gesendet.iter().map(|(z, _, _)| *z).collect();
        assert_eq!(ziele, vec![2]);
        assert_eq!(server.traffic().recv_voice.pakete(), 2);
    }

    #[test]
    fn gefaelschter_absender_wird_verworfen() {
        let mut server = BaseServer::mit_session(SESSION);
        let mut t = Protokoll::default();
        anmelden(&mut server, &mut t, 1, "anna", &[]);
        anmelden(&mut server, &mut t, 2, "ben", &[]);
        t.gesendet.clear();

        server.paket_empfangen(&mut t, &1, &voice(1, ChannelType::Player, 0), Instant::now());
        assert!(t.gesendet.is_empty());
    }

    #[test]
    fn text_wird_zuverlaessig_weitergeleitet() {
        let mut server = BaseServer::mit_session(SESSION);
        let mut t = Protokoll::default();
        anmelden(&mut server, &mut t, 1, "anna", &[]);
        anmelden(&mut server, &mut t, 2, "ben", &[]);
        t.gesendet.clear();

        let text = Message::TextData(TextData {
            sender: PeerId(0),
            recipient_type: ChannelType::Player,
            recipient: 1,
            text: "hallo".into(),
        })
        .kodieren(SESSION)
        .unwrap();
        server.paket_empfangen(&mut t, &1, &text, Instant::now());
        assert_eq!(t.gesendet.len(), 1);
        assert_eq!(t.gesendet[0].0, 2);
        assert!(t.gesendet[0].1);
    }

    #[test]
    fn trennen_entfernt_aus_routing() {
        let mut server = BaseServer::mit_session(SESSION);
        let mut t = Protokoll::default();
        anmelden(&mut server, &mut t, 1, "anna", &[]);
        anmelden(&mut server, &mut t, 2, "ben", &[]);
        t.gesendet.clear();

        server.client_getrennt(&mut t, &1, Instant::now());
        assert!(server.routing().get_id("anna").is_none());
        assert!(matches!(t.an(2)[..], [Message::PlayerRoutingUpdate(_)]));
    }

    #[test]
    fn client_nachricht_am_server_wird_verworfen() {
        let mut server: BaseServer<u8> = BaseServer::mit_session(SESSION);
        let mut t = Protokoll::default();
        let antwort = Message::HandshakeResponse.kodieren(SESSION).unwrap();
        server.paket_empfangen(&mut t, &1, &antwort, Instant::now());
        assert!(t.gesendet.is_empty());
    }
}
