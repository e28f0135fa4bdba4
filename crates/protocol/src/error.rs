//! Fehlertypen fuer das Draht-Protokoll

use thiserror::Error;

/// Fehler beim Lesen oder Schreiben eines Pakets
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtokollFehler {
    #[error("Paket zu kurz: {benoetigt} Bytes benoetigt, {verfuegbar} verfuegbar")]
    ZuKurz { benoetigt: usize, verfuegbar: usize },

    #[error("Falsche Magic: 0x{0:04X}")]
    FalscheMagic(u16),

    #[error("Unbekannter Nachrichtentyp: {0}")]
    UnbekannterTyp(u8),

    #[error("Ungueltiger Kanaltyp: {0}")]
    UngueltigerKanalTyp(u8),

    #[error("Zeichenkette ist kein gueltiges UTF-8")]
    UngueltigesUtf8,

    #[error("Feld zu lang fuer das Laengenpraefix: {0} Bytes")]
    ZuLang(usize),

    #[error("Zu viele Eintraege fuer ein u16-Zaehlfeld: {0}")]
    ZuVieleEintraege(usize),
}

pub type ProtokollResult<T> = Result<T, ProtokollFehler>;
