//! Basis-Client: Handshake, Routing, Senden und Empfangen
//!
//! Empfangene Datagramme werden mit [`BaseClient::paket_empfangen`]
//! eingereiht und erst in [`BaseClient::update`] verarbeitet. Ereignisse
//! entstehen waehrend des Updates und werden am Ende gesammelt ueber einen
//! `crossbeam-channel` ausgeliefert.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use sprechfunk_audio::{TransferReader, VoiceSender};
use sprechfunk_core::{diagnose, ChannelProperties, ChannelType, RoomId, VoiceConfig, VoiceEvent};
use sprechfunk_protocol::{ClientState, Header, Message, MessageType, PacketReader, RoutingTable};
use tracing::{debug, error, info, trace, warn};

use crate::comms::{CommsProcessor, Sendekanal};
use crate::error::{VoiceError, VoiceResult};
use crate::peers::PeerCollection;
use crate::rooms::{RoomMembership, Rooms};
use crate::traffic::{TrafficCounter, TrafficStats};

/// Abstand zwischen zwei unbeantworteten Handshakes
const HANDSHAKE_WIEDERHOLUNG: Duration = Duration::from_secs(2);

/// Sendet an den Server
pub trait ClientTransport {
    fn send_reliable(&mut self, daten: &[u8]);
    fn send_unreliable(&mut self, daten: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Getrennt,
    /// Handshake gesendet, Antwort steht aus
    Handshake,
    Verbunden,
}

/// Verkehr des Clients nach Paketart
#[derive(Debug, Default, Clone)]
pub struct ClientTraffic {
    pub recv_handshake: TrafficCounter,
    pub recv_routing: TrafficCounter,
    pub recv_voice: TrafficCounter,
    pub recv_text: TrafficCounter,
    pub sent: TrafficCounter,
}

impl ClientTraffic {
    pub fn empfangen(&self) -> TrafficStats {
        TrafficStats::combine([
            &self.recv_handshake,
            &self.recv_routing,
            &self.recv_voice,
            &self.recv_text,
        ])
    }
}

pub struct BaseClient {
    status: ClientStatus,
    session: Option<u32>,
    handshake_gesendet: Option<Instant>,
    peers: PeerCollection,
    rooms: Rooms,
    comms: CommsProcessor,
    sende: Arc<Sendekanal>,
    ausgang: TransferReader<Bytes>,
    eingang: VecDeque<Bytes>,
    puffer: Vec<VoiceEvent>,
    ereignis_tx: Sender<VoiceEvent>,
    ereignis_rx: Receiver<VoiceEvent>,
    traffic: ClientTraffic,
}

impl BaseClient {
    pub fn neu(name: impl Into<String>, config: &VoiceConfig) -> Self {
        let (sende, ausgang) = Sendekanal::neu(config.sende_puffer.max(1));
        let (ereignis_tx, ereignis_rx) = unbounded();
        Self {
            status: ClientStatus::Getrennt,
            session: None,
            handshake_gesendet: None,
            peers: PeerCollection::neu(name),
            rooms: Rooms::neu(),
            comms: CommsProcessor::neu(config),
            sende,
            ausgang,
            eingang: VecDeque::new(),
            puffer: Vec::new(),
            ereignis_tx,
            ereignis_rx,
            traffic: ClientTraffic::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.peers.eigener_name()
    }

    pub fn status(&self) -> ClientStatus {
        self.status
    }

    pub fn session(&self) -> Option<u32> {
        self.session
    }

    pub fn peers(&self) -> &PeerCollection {
        &self.peers
    }

    pub fn rooms(&self) -> &Rooms {
        &self.rooms
    }

    pub fn traffic(&self) -> &ClientTraffic {
        &self.traffic
    }

    /// Empfaenger fuer alle Ereignisse dieses Clients
    pub fn ereignisse(&self) -> Receiver<VoiceEvent> {
        self.ereignis_rx.clone()
    }

    /// Ziel fuer die Encoder-Pipeline
    pub fn voice_sender(&self) -> Arc<dyn VoiceSender> {
        self.sende.clone()
    }

    /// Verworfene ausgehende Sprachpakete
    pub fn verworfen(&self) -> u64 {
        self.sende.verworfen()
    }

    /// Startet den Handshake
    pub fn verbinden(&mut self, transport: &mut impl ClientTransport, jetzt: Instant) {
        info!(spieler = %self.name(), "Verbinde mit Server");
        self.status = ClientStatus::Handshake;
        self.session = None;
        self.handshake_senden(transport, jetzt);
    }

    /// Reiht ein empfangenes Datagramm ein
    pub fn paket_empfangen(&mut self, daten: Bytes) {
        self.eingang.push_back(daten);
    }

    /// Verarbeitet Eingang, Timeouts und Ausgang und liefert Ereignisse aus
    pub fn update(&mut self, transport: &mut impl ClientTransport, jetzt: Instant) {
        while let Some(daten) = self.eingang.pop_front() {
            self.verarbeiten(transport, &daten, jetzt);
        }

        match self.status {
            ClientStatus::Getrennt => {}
            ClientStatus::Handshake => {
                let faellig = self
                    .handshake_gesendet
                    .map_or(true, |t| jetzt.saturating_duration_since(t) >= HANDSHAKE_WIEDERHOLUNG);
                if faellig {
                    debug!("Keine Handshake-Antwort, wiederhole");
                    self.handshake_senden(transport, jetzt);
                }
            }
            ClientStatus::Verbunden => {
                self.comms.update(jetzt, &mut self.puffer);
                if self.rooms.aenderung_abholen() {
                    self.client_state_senden(transport, jetzt);
                }
                while let Some(daten) = self.ausgang.read() {
                    transport.send_unreliable(&daten);
                    self.traffic.sent.update(daten.len(), jetzt);
                }
            }
        }

        self.ausliefern();
    }

    /// Trennt und meldet alle Spieler ab
    pub fn trennen(&mut self) {
        info!(spieler = %self.name(), "Verbindung getrennt");
        self.zuruecksetzen();
        self.status = ClientStatus::Getrennt;
        self.handshake_gesendet = None;
        self.eingang.clear();
        while self.ausgang.read().is_some() {}
        self.ausliefern();
    }

    // -----------------------------------------------------------------------
    // Raeume, Kanaele, Text
    // -----------------------------------------------------------------------

    /// Hoert einem Raum zu. Der Server erfaehrt es beim naechsten Update.
    pub fn raum_beitreten(&mut self, name: &str) -> RoomMembership {
        self.rooms.join(name)
    }

    pub fn raum_verlassen(&mut self, mitgliedschaft: RoomMembership) -> bool {
        self.rooms.leave(mitgliedschaft)
    }

    /// Oeffnet einen Sendekanal an einen Spieler oder Raum
    pub fn kanal_oeffnen(&self, typ: ChannelType, ziel: &str, properties: ChannelProperties) -> VoiceResult<()> {
        let recipient = self.empfaenger_id(typ, ziel)?;
        self.sende.kanal_oeffnen(typ, recipient, properties);
        Ok(())
    }

    pub fn kanal_schliessen(&self, typ: ChannelType, ziel: &str, properties: ChannelProperties) -> VoiceResult<bool> {
        let recipient = self.empfaenger_id(typ, ziel)?;
        Ok(self.sende.kanal_schliessen(typ, recipient, properties))
    }

    /// Sendet eine Textnachricht zuverlaessig
    pub fn text_senden(
        &mut self,
        transport: &mut impl ClientTransport,
        typ: ChannelType,
        empfaenger: &str,
        text: &str,
        jetzt: Instant,
    ) -> VoiceResult<()> {
        let session = match (self.status, self.session) {
            (ClientStatus::Verbunden, Some(session)) => session,
            _ => return Err(VoiceError::NichtVerbunden),
        };
        let daten = self.comms.text_kodieren(typ, empfaenger, text, &self.peers, session)?;
        transport.send_reliable(&daten);
        self.traffic.sent.update(daten.len(), jetzt);
        Ok(())
    }

    fn empfaenger_id(&self, typ: ChannelType, ziel: &str) -> VoiceResult<u16> {
        match typ {
            ChannelType::Player => self
                .peers
                .get_id(ziel)
                .map(|id| id.0)
                .ok_or_else(|| VoiceError::UnbekannterSpieler(ziel.to_owned())),
            ChannelType::Room => Ok(RoomId::aus_name(ziel).0),
        }
    }

    // -----------------------------------------------------------------------
    // Eingang
    // -----------------------------------------------------------------------

    fn verarbeiten(&mut self, transport: &mut impl ClientTransport, daten: &[u8], jetzt: Instant) {
        let mut leser = PacketReader::neu(daten);
        let header = match Header::lesen(&mut leser) {
            Ok(header) => header,
            Err(e) => {
                warn!(fehler = %e, "Header vom Server nicht lesbar, verworfen");
                return;
            }
        };

        // Handshake-Antwort und Session-Fehler gelten unabhaengig von der eigenen Session
        let sitzungsfrei = matches!(header.typ, MessageType::HandshakeResponse | MessageType::ErrorWrongSession);
        if !sitzungsfrei && (header.session != self.session || self.status != ClientStatus::Verbunden) {
            debug!(erhalten = ?header.session, erwartet = ?self.session, "Paket einer fremden Session verworfen");
            return;
        }

        let nachricht = match Message::rumpf_lesen(header.typ, &mut leser) {
            Ok(nachricht) => nachricht,
            Err(e) => {
                warn!(typ = ?header.typ, fehler = %e, "Paket vom Server nicht lesbar, verworfen");
                return;
            }
        };

        match nachricht {
            Message::HandshakeResponse => {
                self.traffic.recv_handshake.update(daten.len(), jetzt);
                if self.status != ClientStatus::Handshake {
                    debug!("Unerwartete Handshake-Antwort ignoriert");
                    return;
                }
                self.session = header.session;
                self.status = ClientStatus::Verbunden;
                self.handshake_gesendet = None;
                info!(session = ?self.session, "Mit Server verbunden");
                self.client_state_senden(transport, jetzt);
            }
            Message::ErrorWrongSession => {
                warn!(session = ?self.session, "Server meldet falsche Session, neuer Handshake");
                self.zuruecksetzen();
                self.status = ClientStatus::Handshake;
                self.session = None;
                self.handshake_senden(transport, jetzt);
            }
            Message::PlayerRoutingUpdate(tabelle) => {
                self.traffic.recv_routing.update(daten.len(), jetzt);
                self.routing_update(tabelle);
            }
            Message::VoiceData(voice) => {
                self.traffic.recv_voice.update(daten.len(), jetzt);
                self.comms
                    .voice_empfangen(&voice, &self.peers, &self.rooms, jetzt, &mut self.puffer);
            }
            Message::TextData(text) => {
                self.traffic.recv_text.update(daten.len(), jetzt);
                self.comms
                    .text_empfangen(&text, &self.peers, &self.rooms, &mut self.puffer);
            }
            Message::HandshakeRequest { .. } | Message::ClientState(_) => {
                error!(
                    diagnose_id = %diagnose::SERVER_NACHRICHT_AM_CLIENT,
                    typ = ?header.typ,
                    "Server-Nachricht am Client empfangen"
                );
            }
        }
    }

    fn routing_update(&mut self, tabelle: RoutingTable) {
        let mut aenderungen = Vec::new();
        if !self.peers.routing_update(tabelle, &mut aenderungen) {
            return;
        }

        for ereignis in &aenderungen {
            match ereignis {
                VoiceEvent::PlayerJoined { name } => {
                    self.comms.spieler_beigetreten(name, &mut self.puffer)
                }
                VoiceEvent::PlayerLeft { name } => self.comms.spieler_verlassen(name, &mut self.puffer),
                _ => {}
            }
        }
        self.puffer.extend(aenderungen);

        let verbindung = self.session.zip(self.peers.eigene_id());
        self.sende.verbindung_setzen(verbindung);
        trace!(spieler = self.peers.tabelle().len(), "Routing-Tabelle uebernommen");
    }

    // -----------------------------------------------------------------------
    // Ausgang
    // -----------------------------------------------------------------------

    fn handshake_senden(&mut self, transport: &mut impl ClientTransport, jetzt: Instant) {
        let nachricht = Message::HandshakeRequest {
            name: self.name().to_owned(),
        };
        self.senden(transport, &nachricht, jetzt);
        self.handshake_gesendet = Some(jetzt);
    }

    fn client_state_senden(&mut self, transport: &mut impl ClientTransport, jetzt: Instant) {
        let nachricht = Message::ClientState(ClientState {
            name: self.name().to_owned(),
            rooms: self.rooms.namen().map(str::to_owned).collect(),
        });
        debug!(raeume = self.rooms.len(), "Sende Client-Zustand");
        self.senden(transport, &nachricht, jetzt);
    }

    fn senden(&mut self, transport: &mut impl ClientTransport, nachricht: &Message, jetzt: Instant) {
        match nachricht.kodieren(self.session.unwrap_or(0)) {
            Ok(daten) => {
                transport.send_reliable(&daten);
                self.traffic.sent.update(daten.len(), jetzt);
            }
            Err(e) => error!(fehler = %e, typ = ?nachricht.typ(), "Nachricht nicht kodierbar"),
        }
    }

    // -----------------------------------------------------------------------
    // Zustand
    // -----------------------------------------------------------------------

    fn zuruecksetzen(&mut self) {
        self.peers.clear(&mut self.puffer);
        self.comms.stop(&mut self.puffer);
        self.sende.verbindung_setzen(None);
    }

    fn ausliefern(&mut self) {
        for ereignis in self.puffer.drain(..) {
            // Der eigene Empfaenger lebt so lange wie der Client
            let _ = self.ereignis_tx.send(ereignis);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{BaseServer, ServerTransport};
    use sprechfunk_core::{ChannelPriority, PeerId};

    /// Sammelt gesendete Pakete eines Clients
    #[derive(Default)]
    struct Leitung {
        raus: Vec<(bool, Bytes)>,
    }

    impl ClientTransport for Leitung {
        fn send_reliable(&mut self, daten: &[u8]) {
            self.raus.push((true, Bytes::copy_from_slice(daten)));
        }
        fn send_unreliable(&mut self, daten: &[u8]) {
            self.raus.push((false, Bytes::copy_from_slice(daten)));
        }
    }

    /// Server-Seite: Pakete je Verbindung
    #[derive(Default)]
    struct Verteiler {
        raus: Vec<(u8, Bytes)>,
    }

    impl ServerTransport<u8> for Verteiler {
        fn send_reliable(&mut self, an: &u8, daten: &[u8]) {
            self.raus.push((*an, Bytes::copy_from_slice(daten)));
        }
        fn send_unreliable(&mut self, an: &u8, daten: &[u8]) {
            self.raus.push((*an, Bytes::copy_from_slice(daten)));
        }
    }

    /// Server plus Clients, Pakete werden von Hand weitergereicht
    struct Netz {
        server: BaseServer<u8>,
        verteiler: Verteiler,
        clients: Vec<(BaseClient, Leitung)>,
    }

    impl Netz {
        fn neu(namen: &[&str]) -> Self {
            let config = VoiceConfig::default();
            Self {
                server: BaseServer::mit_session(77),
                verteiler: Verteiler::default(),
                clients: namen
                    .iter()
                    .map(|n| (BaseClient::neu(*n, &config), Leitung::default()))
                    .collect(),
            }
        }

        /// Reicht Pakete hin und her bis Ruhe herrscht
        fn pumpen(&mut self, jetzt: Instant) {
            for _ in 0..8 {
                for (client, leitung) in &mut self.clients {
                    client.update(leitung, jetzt);
                }
                let mut bewegt = false;
                for (i, (_, leitung)) in self.clients.iter_mut().enumerate() {
                    for (_, daten) in leitung.raus.drain(..) {
                        self.server.paket_empfangen(&mut self.verteiler, &(i as u8), &daten, jetzt);
                        bewegt = true;
                    }
                }
                for (ziel, daten) in self.verteiler.raus.drain(..) {
                    self.clients[ziel as usize].0.paket_empfangen(daten);
                    bewegt = true;
                }
                if !bewegt {
                    break;
                }
            }
        }
    }

    fn props() -> ChannelProperties {
        ChannelProperties::neu(false, ChannelPriority::Default)
    }

    #[test]
    fn handshake_und_routing() {
        let mut netz = Netz::neu(&["anna", "ben"]);
        let jetzt = Instant::now();
        for (client, leitung) in &mut netz.clients {
            client.verbinden(leitung, jetzt);
        }
        netz.pumpen(jetzt);

        let (anna, _) = &netz.clients[0];
        assert_eq!(anna.status(), ClientStatus::Verbunden);
        assert_eq!(anna.session(), Some(77));
        assert_eq!(anna.peers().eigene_id(), Some(PeerId(0)));
        assert_eq!(anna.peers().get_id("ben"), Some(PeerId(1)));

        let beigetreten: Vec<String> = anna
            .ereignisse()
            .try_iter()
            .filter_map(|e| match e {
                VoiceEvent::PlayerJoined { name } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(beigetreten, vec!["ben".to_owned()]);
    }

    #[test]
    fn sprache_wird_ueber_server_zugestellt() {
        let mut netz = Netz::neu(&["anna", "ben"]);
        let jetzt = Instant::now();
        for (client, leitung) in &mut netz.clients {
            client.verbinden(leitung, jetzt);
        }
        netz.pumpen(jetzt);

        let anna = &netz.clients[0].0;
        anna.kanal_oeffnen(ChannelType::Player, "ben", props()).unwrap();
        anna.voice_sender().send_voice(Bytes::from_static(&[1, 2, 3]));
        let ben_rx = netz.clients[1].0.ereignisse();
        while ben_rx.try_recv().is_ok() {}
        netz.pumpen(jetzt);

        let ereignisse: Vec<VoiceEvent> = ben_rx.try_iter().collect();
        assert!(matches!(&ereignisse[0], VoiceEvent::PlayerStartedSpeaking { name } if name == "anna"));
        match &ereignisse[1] {
            VoiceEvent::VoicePacketReceived(p) => {
                assert_eq!(p.sender, "anna");
                assert_eq!(&p.payload[..], &[1, 2, 3]);
            }
            andere => panic!("unerwartet: {andere:?}"),
        }
        assert_eq!(netz.clients[1].0.traffic().recv_voice.pakete(), 1);
    }

    #[test]
    fn raumwechsel_sendet_client_state() {
        let mut netz = Netz::neu(&["anna", "ben"]);
        let jetzt = Instant::now();
        for (client, leitung) in &mut netz.clients {
            client.verbinden(leitung, jetzt);
        }
        netz.pumpen(jetzt);

        netz.clients[1].0.raum_beitreten("lobby");
        netz.pumpen(jetzt);

        let anna = &netz.clients[0].0;
        anna.kanal_oeffnen(ChannelType::Room, "lobby", props()).unwrap();
        anna.voice_sender().send_voice(Bytes::from_static(&[4]));
        let ben_rx = netz.clients[1].0.ereignisse();
        while ben_rx.try_recv().is_ok() {}
        netz.pumpen(jetzt);

        assert!(ben_rx
            .try_iter()
            .any(|e| matches!(e, VoiceEvent::VoicePacketReceived(ref p) if p.sender == "anna")));
    }

    #[test]
    fn fremde_session_wird_vor_dem_rumpf_verworfen() {
        let mut netz = Netz::neu(&["anna"]);
        let jetzt = Instant::now();
        let (anna, leitung) = &mut netz.clients[0];
        anna.verbinden(leitung, jetzt);
        netz.pumpen(jetzt);

        let (anna, leitung) = &mut netz.clients[0];
        let rx = anna.ereignisse();
        while rx.try_recv().is_ok() {}

        // Alte Session, Rumpf nach dem Absender abgeschnitten
        let text = Message::TextData(sprechfunk_protocol::TextData {
            sender: PeerId(3),
            recipient_type: ChannelType::Player,
            recipient: 0,
            text: "hallo".into(),
        })
        .kodieren(78)
        .unwrap();
        anna.paket_empfangen(text.slice(..9));
        anna.update(leitung, jetzt);

        assert_eq!(anna.status(), ClientStatus::Verbunden);
        assert_eq!(anna.traffic().recv_text.pakete(), 0);
        assert!(rx.try_iter().next().is_none());
        assert!(leitung.raus.is_empty());
    }

    #[test]
    fn text_an_spieler() {
        let mut netz = Netz::neu(&["anna", "ben"]);
        let jetzt = Instant::now();
        for (client, leitung) in &mut netz.clients {
            client.verbinden(leitung, jetzt);
        }
        netz.pumpen(jetzt);

        let ben_rx = netz.clients[1].0.ereignisse();
        while ben_rx.try_recv().is_ok() {}
        let (anna, leitung) = &mut netz.clients[0];
        anna.text_senden(leitung, ChannelType::Player, "ben", "hallo", jetzt).unwrap();
        netz.pumpen(jetzt);

        match ben_rx.try_iter().next() {
            Some(VoiceEvent::TextMessageReceived(m)) => {
                assert_eq!(m.sender, "anna");
                assert_eq!(m.recipient, "ben");
                assert_eq!(m.text, "hallo");
            }
            andere => panic!("unerwartet: {andere:?}"),
        }
    }

    #[test]
    fn text_ohne_verbindung_ist_fehler() {
        let mut client = BaseClient::neu("anna", &VoiceConfig::default());
        let mut leitung = Leitung::default();
        let fehler = client
            .text_senden(&mut leitung, ChannelType::Room, "lobby", "hallo", Instant::now())
            .unwrap_err();
        assert!(matches!(fehler, VoiceError::NichtVerbunden));
        assert!(leitung.raus.is_empty());
    }

    #[test]
    fn falsche_session_fuehrt_zu_neuem_handshake() {
        let mut netz = Netz::neu(&["anna", "ben"]);
        let jetzt = Instant::now();
        for (client, leitung) in &mut netz.clients {
            client.verbinden(leitung, jetzt);
        }
        netz.pumpen(jetzt);

        // Server startet neu und kennt die alte Session nicht mehr
        netz.server = BaseServer::mit_session(78);
        let (anna, leitung) = &mut netz.clients[0];
        let anna_rx = anna.ereignisse();
        while anna_rx.try_recv().is_ok() {}
        anna.raum_beitreten("lobby");
        anna.update(leitung, jetzt);
        let raus: Vec<Bytes> = leitung.raus.drain(..).map(|(_, d)| d).collect();
        for daten in raus {
            netz.server.paket_empfangen(&mut netz.verteiler, &0, &daten, jetzt);
        }
        for (_, daten) in netz.verteiler.raus.drain(..) {
            anna.paket_empfangen(daten);
        }
        anna.update(leitung, jetzt);

        assert_eq!(anna.status(), ClientStatus::Handshake);
        assert!(anna
            .ereignisse()
            .try_iter()
            .any(|e| matches!(e, VoiceEvent::PlayerLeft { ref name } if name == "ben")));
        match Message::dekodieren(&leitung.raus[0].1).unwrap().1 {
            Message::HandshakeRequest { name } => assert_eq!(name, "anna"),
            andere => panic!("unerwartet: {andere:?}"),
        }

        netz.pumpen(jetzt);
        assert_eq!(netz.clients[0].0.status(), ClientStatus::Verbunden);
        assert_eq!(netz.clients[0].0.session(), Some(78));
    }

    #[test]
    fn handshake_wird_wiederholt() {
        let mut client = BaseClient::neu("anna", &VoiceConfig::default());
        let mut leitung = Leitung::default();
        let t0 = Instant::now();
        client.verbinden(&mut leitung, t0);
        client.update(&mut leitung, t0 + Duration::from_millis(500));
        assert_eq!(leitung.raus.len(), 1);
        client.update(&mut leitung, t0 + HANDSHAKE_WIEDERHOLUNG);
        assert_eq!(leitung.raus.len(), 2);
    }

    #[test]
    fn kanal_an_unbekannten_spieler_ist_fehler() {
        let client = BaseClient::neu("anna", &VoiceConfig::default());
        let fehler = client
            .kanal_oeffnen(ChannelType::Player, "niemand", props())
            .unwrap_err();
        assert!(matches!(fehler, VoiceError::UnbekannterSpieler(_)));
    }
}
