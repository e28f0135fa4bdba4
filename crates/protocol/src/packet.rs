//! Lese- und Schreibhilfen fuer Pakete
//!
//! Alle Mehrbyte-Werte sind big-endian. Zeichenketten werden als
//! `u16`-Laenge gefolgt von UTF-8-Bytes geschrieben.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtokollFehler, ProtokollResult};

/// Schreibt ein Paket in einen wachsenden Puffer
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    pub fn neu() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn u8(&mut self, wert: u8) -> &mut Self {
        self.buf.put_u8(wert);
        self
    }

    pub fn u16(&mut self, wert: u16) -> &mut Self {
        self.buf.put_u16(wert);
        self
    }

    pub fn u32(&mut self, wert: u32) -> &mut Self {
        self.buf.put_u32(wert);
        self
    }

    /// Schreibt eine Zeichenkette mit `u16`-Laengenpraefix
    pub fn string(&mut self, wert: &str) -> ProtokollResult<&mut Self> {
        let laenge = u16::try_from(wert.len()).map_err(|_| ProtokollFehler::ZuLang(wert.len()))?;
        self.buf.put_u16(laenge);
        self.buf.put_slice(wert.as_bytes());
        Ok(self)
    }

    /// Schreibt die Anzahl einer Liste als `u16`
    pub fn anzahl(&mut self, n: usize) -> ProtokollResult<&mut Self> {
        let wert = u16::try_from(n).map_err(|_| ProtokollFehler::ZuVieleEintraege(n))?;
        self.buf.put_u16(wert);
        Ok(self)
    }

    /// Schreibt Rohbytes ohne Laengenpraefix
    pub fn bytes(&mut self, daten: &[u8]) -> &mut Self {
        self.buf.put_slice(daten);
        self
    }

    /// Bisher geschriebene Bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Schliesst das Paket ab
    pub fn fertig(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Liest ein Paket mit Laengenpruefung vor jedem Zugriff
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    daten: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn neu(daten: &'a [u8]) -> Self {
        Self { daten, pos: 0 }
    }

    fn nimm(&mut self, anzahl: usize) -> ProtokollResult<&'a [u8]> {
        let verfuegbar = self.daten.len() - self.pos;
        if verfuegbar < anzahl {
            return Err(ProtokollFehler::ZuKurz {
                benoetigt: anzahl,
                verfuegbar,
            });
        }
        let teil = &self.daten[self.pos..self.pos + anzahl];
        self.pos += anzahl;
        Ok(teil)
    }

    pub fn u8(&mut self) -> ProtokollResult<u8> {
        Ok(self.nimm(1)?[0])
    }

    pub fn u16(&mut self) -> ProtokollResult<u16> {
        let b = self.nimm(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> ProtokollResult<u32> {
        let b = self.nimm(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn string(&mut self) -> ProtokollResult<String> {
        let laenge = self.u16()? as usize;
        let roh = self.nimm(laenge)?;
        std::str::from_utf8(roh)
            .map(str::to_owned)
            .map_err(|_| ProtokollFehler::UngueltigesUtf8)
    }

    /// Alle verbleibenden Bytes (z.B. Audio-Nutzdaten am Paketende)
    pub fn rest(&mut self) -> &'a [u8] {
        let teil = &self.daten[self.pos..];
        self.pos = self.daten.len();
        teil
    }

    /// Anzahl noch ungelesener Bytes
    pub fn verbleibend(&self) -> usize {
        self.daten.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn werte_sind_big_endian() {
        let mut w = PacketWriter::neu();
        w.u16(0x8BC7).u32(0x0102_0304);
        assert_eq!(&w.fertig()[..], &[0x8B, 0xC7, 1, 2, 3, 4]);
    }

    #[test]
    fn string_mit_laengenpraefix() {
        let mut w = PacketWriter::neu();
        w.string("äb").unwrap();
        let daten = w.fertig();
        assert_eq!(&daten[..2], &[0, 3]);

        let mut r = PacketReader::neu(&daten);
        assert_eq!(r.string().unwrap(), "äb");
        assert_eq!(r.verbleibend(), 0);
    }

    #[test]
    fn lesen_ueber_das_ende_ist_fehler() {
        let mut r = PacketReader::neu(&[1, 2, 3]);
        assert_eq!(r.u16().unwrap(), 0x0102);
        assert_eq!(
            r.u32(),
            Err(ProtokollFehler::ZuKurz {
                benoetigt: 4,
                verfuegbar: 1
            })
        );
    }

    #[test]
    fn laengenpraefix_laenger_als_paket() {
        let mut r = PacketReader::neu(&[0, 10, b'a']);
        assert!(matches!(r.string(), Err(ProtokollFehler::ZuKurz { .. })));
    }

    #[test]
    fn ungueltiges_utf8() {
        let mut r = PacketReader::neu(&[0, 2, 0xC3, 0x28]);
        assert_eq!(r.string(), Err(ProtokollFehler::UngueltigesUtf8));
    }

    #[test]
    fn rest_liefert_alle_verbleibenden_bytes() {
        let mut r = PacketReader::neu(&[9, 1, 2, 3]);
        r.u8().unwrap();
        assert_eq!(r.rest(), &[1, 2, 3]);
        assert!(r.rest().is_empty());
    }
}
