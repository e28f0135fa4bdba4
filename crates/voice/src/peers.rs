//! Bekannte Spieler des Clients
//!
//! Der Server schickt nur vollstaendige Routing-Tabellen. Beitritte und
//! Abgaenge werden hier aus der Differenz zwischen alter und neuer Tabelle
//! abgeleitet.

use sprechfunk_core::{PeerId, VoiceEvent};
use sprechfunk_protocol::RoutingTable;
use tracing::{debug, warn};

/// Routing-Tabelle plus Name des lokalen Spielers
#[derive(Debug)]
pub struct PeerCollection {
    eigener_name: String,
    tabelle: RoutingTable,
}

impl PeerCollection {
    pub fn neu(eigener_name: impl Into<String>) -> Self {
        Self {
            eigener_name: eigener_name.into(),
            tabelle: RoutingTable::neu(),
        }
    }

    /// Ersetzt die Tabelle und meldet Abgaenge und Beitritte.
    ///
    /// Fehlt der lokale Spieler in der neuen Tabelle, wird sie verworfen.
    pub fn routing_update(&mut self, neu: RoutingTable, ereignisse: &mut Vec<VoiceEvent>) -> bool {
        if neu.get_id(&self.eigener_name).is_none() {
            warn!(spieler = %self.eigener_name, "Routing-Tabelle ohne lokalen Spieler verworfen");
            return false;
        }

        for (_, name) in self.tabelle.eintraege() {
            if name != self.eigener_name && neu.get_id(name).is_none() {
                debug!(spieler = name, "Spieler hat verlassen");
                ereignisse.push(VoiceEvent::PlayerLeft { name: name.to_owned() });
            }
        }

        let alt = std::mem::replace(&mut self.tabelle, neu);

        for (_, name) in self.tabelle.eintraege() {
            if name != self.eigener_name && alt.get_id(name).is_none() {
                debug!(spieler = name, "Spieler ist beigetreten");
                ereignisse.push(VoiceEvent::PlayerJoined { name: name.to_owned() });
            }
        }
        true
    }

    /// Leert die Tabelle und meldet alle bekannten Spieler als verlassen
    pub fn clear(&mut self, ereignisse: &mut Vec<VoiceEvent>) {
        for (_, name) in self.tabelle.eintraege() {
            if name != self.eigener_name {
                ereignisse.push(VoiceEvent::PlayerLeft { name: name.to_owned() });
            }
        }
        self.tabelle.clear();
    }

    /// Vom Server vergebene ID des lokalen Spielers
    pub fn eigene_id(&self) -> Option<PeerId> {
        self.tabelle.get_id(&self.eigener_name)
    }

    pub fn eigener_name(&self) -> &str {
        &self.eigener_name
    }

    pub fn get_id(&self, name: &str) -> Option<PeerId> {
        self.tabelle.get_id(name)
    }

    pub fn get_name(&self, id: PeerId) -> Option<&str> {
        self.tabelle.get_name(id)
    }

    pub fn tabelle(&self) -> &RoutingTable {
        &self.tabelle
    }
}
