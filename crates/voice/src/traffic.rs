//! Verkehrszaehler fuer Client und Server
//!
//! Zaehlt Pakete und Bytes und schaetzt die Datenrate ueber ein gleitendes
//! Fenster von zehn Sekunden.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

const FENSTER: Duration = Duration::from_secs(10);

/// Momentaufnahme eines oder mehrerer Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    pub pakete: u64,
    pub bytes: u64,
    pub bytes_pro_sekunde: u64,
}

impl TrafficStats {
    /// Summe mehrerer Zaehler
    pub fn combine<'a>(zaehler: impl IntoIterator<Item = &'a TrafficCounter>) -> Self {
        zaehler.into_iter().fold(Self::default(), |acc, z| Self {
            pakete: acc.pakete + z.pakete,
            bytes: acc.bytes + z.bytes,
            bytes_pro_sekunde: acc.bytes_pro_sekunde + z.bytes_pro_sekunde,
        })
    }
}

impl fmt::Display for TrafficStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {}pkts at {}/s",
            format_bytes(self.bytes),
            self.pakete,
            format_bytes(self.bytes_pro_sekunde)
        )
    }
}

/// Bytes lesbar mit B, KiB oder MiB
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    match bytes {
        b if b < KIB => format!("{b}B"),
        b if b < MIB => format!("{:.1}KiB", b as f64 / KIB as f64),
        b => format!("{:.1}MiB", b as f64 / MIB as f64),
    }
}

/// Zaehler fuer eine Paketart
#[derive(Debug, Default, Clone)]
pub struct TrafficCounter {
    pakete: u64,
    bytes: u64,
    fenster: VecDeque<(Instant, u64)>,
    im_fenster: u64,
    bytes_pro_sekunde: u64,
}

impl TrafficCounter {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Zaehlt ein Paket
    pub fn update(&mut self, bytes: usize, jetzt: Instant) {
        let bytes = bytes as u64;
        self.pakete += 1;
        self.bytes += bytes;

        self.fenster.push_back((jetzt, bytes));
        self.im_fenster += bytes;
        while let Some(&(zeit, alt)) = self.fenster.front() {
            if jetzt.saturating_duration_since(zeit) <= FENSTER {
                break;
            }
            self.fenster.pop_front();
            self.im_fenster -= alt;
        }
        self.bytes_pro_sekunde = self.im_fenster / FENSTER.as_secs();
    }

    pub fn pakete(&self) -> u64 {
        self.pakete
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn bytes_pro_sekunde(&self) -> u64 {
        self.bytes_pro_sekunde
    }

    pub fn stats(&self) -> TrafficStats {
        TrafficStats::combine([self])
    }
}

impl fmt::Display for TrafficCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.stats().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zaehlt_pakete_und_bytes() {
        let t0 = Instant::now();
        let mut z = TrafficCounter::neu();
        z.update(100, t0);
        z.update(50, t0 + Duration::from_secs(1));
        assert_eq!(z.pakete(), 2);
        assert_eq!(z.bytes(), 150);
        assert_eq!(z.bytes_pro_sekunde(), 15);
    }

    #[test]
    fn altes_faellt_aus_dem_fenster() {
        let t0 = Instant::now();
        let mut z = TrafficCounter::neu();
        z.update(10_000, t0);
        z.update(500, t0 + Duration::from_secs(11));
        assert_eq!(z.bytes(), 10_500);
        assert_eq!(z.bytes_pro_sekunde(), 50);
    }

    #[test]
    fn combine_summiert() {
        let t0 = Instant::now();
        let mut a = TrafficCounter::neu();
        let mut b = TrafficCounter::neu();
        a.update(2_048, t0);
        b.update(1_024, t0);
        let s = TrafficStats::combine([&a, &b]);
        assert_eq!(s.pakete, 2);
        assert_eq!(s.bytes, 3_072);
        assert_eq!(s.to_string(), "3.0KiB in 2pkts at 307B/s");
    }

    #[test]
    fn bytes_formatierung() {
        assert_eq!(format_bytes(0), "0B");
        assert_eq!(format_bytes(1_023), "1023B");
        assert_eq!(format_bytes(1_536), "1.5KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0MiB");
    }
}
