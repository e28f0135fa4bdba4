//! Routing-Tabelle: Spielername <-> Spieler-ID
//!
//! Der Server vergibt IDs in Beitrittsreihenfolge. Freie Plaetze entstehen
//! beim Verlassen und werden erst beim naechsten Beitritt wiederverwendet.
//! Clients ersetzen ihre Tabelle bei jedem `PlayerRoutingUpdate`
//! vollstaendig durch den empfangenen Snapshot.

use std::collections::HashMap;

use sprechfunk_core::PeerId;

use crate::error::ProtokollResult;
use crate::packet::{PacketReader, PacketWriter};

/// Bidirektionale Zuordnung Name <-> ID
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    /// Index = ID, `None` = freier Platz
    plaetze: Vec<Option<String>>,
    index: HashMap<String, u16>,
}

impl RoutingTable {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Traegt einen Spieler ein und gibt seine ID zurueck.
    /// Ist der Name bereits bekannt, bleibt seine ID erhalten.
    pub fn hinzufuegen(&mut self, name: &str) -> PeerId {
        if let Some(id) = self.index.get(name) {
            return PeerId(*id);
        }

        let id = match self.plaetze.iter().position(Option::is_none) {
            Some(frei) => {
                self.plaetze[frei] = Some(name.to_owned());
                frei
            }
            None => {
                self.plaetze.push(Some(name.to_owned()));
                self.plaetze.len() - 1
            }
        } as u16;

        self.index.insert(name.to_owned(), id);
        PeerId(id)
    }

    /// Entfernt einen Spieler. Gibt seine alte ID zurueck.
    pub fn entfernen(&mut self, name: &str) -> Option<PeerId> {
        let id = self.index.remove(name)?;
        if let Some(platz) = self.plaetze.get_mut(id as usize) {
            *platz = None;
        }
        while matches!(self.plaetze.last(), Some(None)) {
            self.plaetze.pop();
        }
        Some(PeerId(id))
    }

    pub fn get_id(&self, name: &str) -> Option<PeerId> {
        self.index.get(name).copied().map(PeerId)
    }

    pub fn get_name(&self, id: PeerId) -> Option<&str> {
        self.plaetze.get(id.0 as usize)?.as_deref()
    }

    /// Alle Eintraege in ID-Reihenfolge
    pub fn eintraege(&self) -> impl Iterator<Item = (PeerId, &str)> {
        self.plaetze
            .iter()
            .enumerate()
            .filter_map(|(id, name)| name.as_deref().map(|n| (PeerId(id as u16), n)))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn clear(&mut self) {
        self.plaetze.clear();
        self.index.clear();
    }

    /// Schreibt den Snapshot: Anzahl, dann je `(id, name)`
    pub fn serialisieren(&self, w: &mut PacketWriter) -> ProtokollResult<()> {
        w.anzahl(self.len())?;
        for (id, name) in self.eintraege() {
            w.u16(id.0);
            w.string(name)?;
        }
        Ok(())
    }

    /// Liest einen kompletten Snapshot
    pub fn deserialisieren(r: &mut PacketReader<'_>) -> ProtokollResult<Self> {
        let anzahl = r.u16()?;
        let mut tabelle = Self::neu();
        for _ in 0..anzahl {
            let id = r.u16()?;
            let name = r.string()?;
            let idx = id as usize;
            if tabelle.plaetze.len() <= idx {
                tabelle.plaetze.resize(idx + 1, None);
            }
            tabelle.plaetze[idx] = Some(name.clone());
            tabelle.index.insert(name, id);
        }
        Ok(tabelle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_in_beitrittsreihenfolge() {
        let mut t = RoutingTable::neu();
        assert_eq!(t.hinzufuegen("anna"), PeerId(0));
        assert_eq!(t.hinzufuegen("bert"), PeerId(1));
        assert_eq!(t.hinzufuegen("anna"), PeerId(0));
        assert_eq!(t.len(), 2);
        assert_eq!(t.get_name(PeerId(1)), Some("bert"));
        assert_eq!(t.get_id("bert"), Some(PeerId(1)));
    }

    #[test]
    fn freie_plaetze_werden_wiederverwendet() {
        let mut t = RoutingTable::neu();
        t.hinzufuegen("anna");
        t.hinzufuegen("bert");
        t.hinzufuegen("carl");
        assert_eq!(t.entfernen("bert"), Some(PeerId(1)));
        assert_eq!(t.get_name(PeerId(1)), None);
        assert_eq!(t.hinzufuegen("dora"), PeerId(1));
    }

    #[test]
    fn entfernen_kompaktiert_das_ende() {
        let mut t = RoutingTable::neu();
        t.hinzufuegen("anna");
        t.hinzufuegen("bert");
        t.entfernen("bert");
        assert_eq!(t.hinzufuegen("carl"), PeerId(1));
        assert_eq!(t.entfernen("unbekannt"), None);
    }

    #[test]
    fn snapshot_ersetzt_tabelle_mit_luecken() {
        let mut t = RoutingTable::neu();
        t.hinzufuegen("anna");
        t.hinzufuegen("bert");
        t.hinzufuegen("carl");
        t.entfernen("bert");

        let mut w = PacketWriter::neu();
        t.serialisieren(&mut w).unwrap();
        let daten = w.fertig();

        let gelesen = RoutingTable::deserialisieren(&mut PacketReader::neu(&daten)).unwrap();
        assert_eq!(gelesen.get_id("carl"), Some(PeerId(2)));
        assert_eq!(gelesen.get_name(PeerId(1)), None);
        assert_eq!(gelesen.len(), 2);
    }
}
