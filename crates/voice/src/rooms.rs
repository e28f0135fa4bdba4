//! Raeume die der lokale Spieler mithoert
//!
//! Mitgliedschaften werden gezaehlt: ein Raum bleibt in der Menge bis die
//! letzte Mitgliedschaft zurueckgegeben wurde.

use sprechfunk_core::RoomId;
use tracing::debug;

/// Beleg fuer einen Beitritt. Wird mit [`Rooms::leave`] zurueckgegeben.
#[derive(Debug, PartialEq, Eq)]
pub struct RoomMembership {
    name: String,
    id: RoomId,
}

impl RoomMembership {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> RoomId {
        self.id
    }
}

#[derive(Debug)]
struct Eintrag {
    id: RoomId,
    name: String,
    anzahl: usize,
}

/// Nach ID sortierte Raumliste
#[derive(Debug, Default)]
pub struct Rooms {
    eintraege: Vec<Eintrag>,
    geaendert: bool,
}

impl Rooms {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Tritt einem Raum bei
    pub fn join(&mut self, name: &str) -> RoomMembership {
        let id = RoomId::aus_name(name);
        match self.position(id, name) {
            Ok(i) => self.eintraege[i].anzahl += 1,
            Err(i) => {
                debug!(raum = name, %id, "Raum beigetreten");
                self.eintraege.insert(
                    i,
                    Eintrag {
                        id,
                        name: name.to_owned(),
                        anzahl: 1,
                    },
                );
                self.geaendert = true;
            }
        }
        RoomMembership {
            name: name.to_owned(),
            id,
        }
    }

    /// Gibt eine Mitgliedschaft zurueck. `true` wenn der Raum damit
    /// verlassen wurde.
    pub fn leave(&mut self, mitgliedschaft: RoomMembership) -> bool {
        let Ok(i) = self.position(mitgliedschaft.id, &mitgliedschaft.name) else {
            return false;
        };
        let eintrag = &mut self.eintraege[i];
        eintrag.anzahl -= 1;
        if eintrag.anzahl > 0 {
            return false;
        }
        let alt = self.eintraege.remove(i);
        debug!(raum = %alt.name, id = %alt.id, "Raum verlassen");
        self.geaendert = true;
        true
    }

    pub fn contains(&self, id: RoomId) -> bool {
        self.eintraege
            .binary_search_by(|e| e.id.cmp(&id))
            .is_ok()
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.position(RoomId::aus_name(name), name).is_ok()
    }

    /// Name zu einer ID
    pub fn name(&self, id: RoomId) -> Option<&str> {
        let start = self.eintraege.partition_point(|e| e.id < id);
        self.eintraege
            .get(start)
            .filter(|e| e.id == id)
            .map(|e| e.name.as_str())
    }

    pub fn namen(&self) -> impl Iterator<Item = &str> {
        self.eintraege.iter().map(|e| e.name.as_str())
    }

    pub fn ids(&self) -> impl Iterator<Item = RoomId> + '_ {
        self.eintraege.iter().map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.eintraege.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eintraege.is_empty()
    }

    /// Liefert einmalig `true` nach jeder Aenderung der Raummenge
    pub fn aenderung_abholen(&mut self) -> bool {
        std::mem::take(&mut self.geaendert)
    }

    fn position(&self, id: RoomId, name: &str) -> Result<usize, usize> {
        self.eintraege
            .binary_search_by(|e| e.id.cmp(&id).then_with(|| e.name.as_str().cmp(name)))
    }
}
