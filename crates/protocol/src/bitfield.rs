//! Bitgepackte Kanal-Metadaten eines Sprachpakets
//!
//! ```text
//! Bit   7   6 5     4 3        2        1            0
//!     +---+-------+----------+--------+------------+------+
//!     | - | Sess. | Priorit. | Closing| Positional | Typ  |
//!     +---+-------+----------+--------+------------+------+
//! ```
//!
//! Typ: 1 = Raum, 0 = Spieler. Prioritaet: 0 = Default, 1 = Low,
//! 2 = Medium, 3 = High. Die Session-ID laeuft modulo 4 um und dient nur
//! der Erkennung eines Neustarts des Kanals.

use sprechfunk_core::{ChannelPriority, ChannelType};

const TYP_MASKE: u8 = 0b0000_0001;
const POSITIONAL_MASKE: u8 = 0b0000_0010;
const CLOSING_MASKE: u8 = 0b0000_0100;
const PRIORITAET_MASKE: u8 = 0b0001_1000;
const PRIORITAET_OFFSET: u8 = 3;
const SESSION_MASKE: u8 = 0b0110_0000;
const SESSION_OFFSET: u8 = 5;

/// Ein Byte Kanal-Metadaten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelBitField(u8);

impl ChannelBitField {
    /// Packt die Metadaten. `session_id` wird modulo 4 uebernommen.
    ///
    /// `ChannelPriority::None` ist keine Kanalprioritaet und wird wie
    /// `Default` kodiert.
    pub fn neu(
        typ: ChannelType,
        session_id: u16,
        priority: ChannelPriority,
        positional: bool,
        closing: bool,
    ) -> Self {
        let mut bits = 0u8;
        if typ == ChannelType::Room {
            bits |= TYP_MASKE;
        }
        if positional {
            bits |= POSITIONAL_MASKE;
        }
        if closing {
            bits |= CLOSING_MASKE;
        }

        let prio: u8 = match priority {
            ChannelPriority::Low => 1,
            ChannelPriority::Medium => 2,
            ChannelPriority::High => 3,
            ChannelPriority::None | ChannelPriority::Default => 0,
        };
        bits |= (prio << PRIORITAET_OFFSET) & PRIORITAET_MASKE;
        bits |= (((session_id % 4) as u8) << SESSION_OFFSET) & SESSION_MASKE;

        Self(bits)
    }

    /// Uebernimmt ein Byte vom Draht
    pub fn from_raw(bits: u8) -> Self {
        Self(bits)
    }

    pub fn raw(&self) -> u8 {
        self.0
    }

    pub fn typ(&self) -> ChannelType {
        if self.0 & TYP_MASKE == TYP_MASKE {
            ChannelType::Room
        } else {
            ChannelType::Player
        }
    }

    pub fn is_positional(&self) -> bool {
        self.0 & POSITIONAL_MASKE == POSITIONAL_MASKE
    }

    pub fn is_closing(&self) -> bool {
        self.0 & CLOSING_MASKE == CLOSING_MASKE
    }

    pub fn priority(&self) -> ChannelPriority {
        match (self.0 & PRIORITAET_MASKE) >> PRIORITAET_OFFSET {
            1 => ChannelPriority::Low,
            2 => ChannelPriority::Medium,
            3 => ChannelPriority::High,
            _ => ChannelPriority::Default,
        }
    }

    /// Session-ID modulo 4
    pub fn session_id(&self) -> u8 {
        (self.0 & SESSION_MASKE) >> SESSION_OFFSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIORITAETEN: [ChannelPriority; 4] = [
        ChannelPriority::Low,
        ChannelPriority::Default,
        ChannelPriority::Medium,
        ChannelPriority::High,
    ];

    #[test]
    fn alle_gueltigen_kombinationen_bleiben_erhalten() {
        for typ in [ChannelType::Player, ChannelType::Room] {
            for session in 0u16..4 {
                for prio in PRIORITAETEN {
                    for positional in [false, true] {
                        for closing in [false, true] {
                            let feld = ChannelBitField::neu(typ, session, prio, positional, closing);
                            let gelesen = ChannelBitField::from_raw(feld.raw());
                            assert_eq!(gelesen.typ(), typ);
                            assert_eq!(gelesen.session_id() as u16, session);
                            assert_eq!(gelesen.priority(), prio);
                            assert_eq!(gelesen.is_positional(), positional);
                            assert_eq!(gelesen.is_closing(), closing);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn session_id_laeuft_modulo_vier_um() {
        let a = ChannelBitField::neu(ChannelType::Player, 5, ChannelPriority::Default, false, false);
        assert_eq!(a.session_id(), 1);
        let b = ChannelBitField::neu(ChannelType::Player, 4, ChannelPriority::Default, false, false);
        assert_eq!(b.session_id(), 0);
    }

    #[test]
    fn session_id_beruehrt_typ_bit_nicht() {
        // Session 3 belegt genau die Bits 5 und 6
        let feld = ChannelBitField::neu(ChannelType::Player, 3, ChannelPriority::Default, false, false);
        assert_eq!(feld.raw(), 0b0110_0000);
        assert_eq!(feld.typ(), ChannelType::Player);
    }

    #[test]
    fn bitlayout_ist_festgelegt() {
        let feld = ChannelBitField::neu(ChannelType::Room, 2, ChannelPriority::High, true, true);
        assert_eq!(feld.raw(), 0b0101_1111);
    }

    #[test]
    fn keine_prioritaet_wird_als_default_gelesen() {
        let feld = ChannelBitField::neu(ChannelType::Room, 0, ChannelPriority::None, false, false);
        assert_eq!(feld.priority(), ChannelPriority::Default);
    }
}
