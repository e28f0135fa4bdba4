//! Jitter Buffer fuer kodierte Sprachframes eines Sprechers
//!
//! Ordnet eingehende Frames nach ihrer lokalen Sequenznummer und gibt sie
//! im Takt der Wiedergabe wieder aus. Jeder `read` schiebt die erwartete
//! Sequenznummer um genau eins weiter, egal ob der Frame vorlag oder
//! nicht. Fehlende Frames werden dadurch als Luecke gemeldet statt auf
//! sie zu warten.
//!
//! ## Eigenschaften
//! - O(log n) Einfuegen und Entnahme (Min-Heap nach Sequenz)
//! - Frames aelter als die erwartete Sequenz werden beim naechsten `read`
//!   an den Verworfen-Handler uebergeben, nie ausgeliefert
//! - Keine Locks, wird pro Sprecher nur vom Audio-Thread benutzt

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use bytes::Bytes;
use tracing::{trace, warn};

/// Standard-Warnschwelle fuer Fuellstand und Rueckstand
pub const STANDARD_WARN_SCHWELLE: usize = 30;

/// Ein gepufferter, noch kodierter Frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PufferFrame {
    /// Lokale, monoton steigende Sequenznummer
    pub sequence: u32,
    /// Codec-Nutzdaten
    pub payload: Bytes,
}

impl PufferFrame {
    pub fn neu(sequence: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            payload: payload.into(),
        }
    }
}

/// Ordnet Frames ausschliesslich nach Sequenz
struct NachSequenz(PufferFrame);

impl PartialEq for NachSequenz {
    fn eq(&self, other: &Self) -> bool {
        self.0.sequence == other.0.sequence
    }
}

impl Eq for NachSequenz {}

impl PartialOrd for NachSequenz {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NachSequenz {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.sequence.cmp(&other.0.sequence)
    }
}

/// Wird fuer jeden verworfenen Frame aufgerufen
pub type VerworfenHandler = Box<dyn FnMut(PufferFrame) + Send>;

// ---------------------------------------------------------------------------
// EncodedAudioBuffer
// ---------------------------------------------------------------------------

/// Sortierender Puffer fuer kodierte Frames
pub struct EncodedAudioBuffer {
    heap: BinaryHeap<Reverse<NachSequenz>>,
    /// Naechste erwartete Sequenznummer
    erwartet: u32,
    /// Der Sender hat das Ende des Streams signalisiert
    complete: bool,
    warn_schwelle: usize,
    verworfen: VerworfenHandler,
    verworfen_gesamt: u64,
}

impl EncodedAudioBuffer {
    /// Erstellt einen leeren Puffer
    pub fn neu(warn_schwelle: usize, verworfen: impl FnMut(PufferFrame) + Send + 'static) -> Self {
        Self {
            heap: BinaryHeap::new(),
            erwartet: 0,
            complete: false,
            warn_schwelle,
            verworfen: Box::new(verworfen),
            verworfen_gesamt: 0,
        }
    }

    /// Puffer ohne eigenen Handler (verworfene Frames werden nur gezaehlt)
    pub fn standard() -> Self {
        Self::neu(STANDARD_WARN_SCHWELLE, |_| {})
    }

    /// Fuegt einen Frame ein
    pub fn push(&mut self, frame: PufferFrame) {
        self.heap.push(Reverse(NachSequenz(frame)));

        if self.heap.len() > self.warn_schwelle {
            warn!(
                anzahl = self.heap.len(),
                erwartet = self.erwartet,
                "Jitter Buffer ungewoehnlich voll"
            );
        }
    }

    /// Liest den naechsten Frame in Sequenzreihenfolge.
    ///
    /// Gibt `(frame, mehr)` zurueck. `frame` ist `None` wenn der erwartete
    /// Frame (noch) fehlt; der Aufrufer muss dann Ersatz erzeugen. `mehr`
    /// ist erst dann `false`, wenn `stop` aufgerufen wurde und der Puffer
    /// leer ist.
    pub fn read(&mut self) -> (Option<PufferFrame>, bool) {
        // Verspaetete Frames zuerst entfernen
        loop {
            let veraltet = matches!(
                self.heap.peek(),
                Some(Reverse(kopf)) if kopf.0.sequence < self.erwartet
            );
            if !veraltet {
                break;
            }
            if let Some(Reverse(NachSequenz(alt))) = self.heap.pop() {
                let rueckstand = self.erwartet - alt.sequence;
                if rueckstand as usize > self.warn_schwelle {
                    warn!(
                        sequenz = alt.sequence,
                        erwartet = self.erwartet,
                        "Frame extrem verspaetet verworfen"
                    );
                } else {
                    trace!(sequenz = alt.sequence, erwartet = self.erwartet, "Verspaeteten Frame verworfen");
                }
                self.verwerfen(alt);
            }
        }

        let treffer = self
            .heap
            .peek()
            .is_some_and(|Reverse(kopf)| kopf.0.sequence == self.erwartet);
        let frame = if treffer {
            self.heap.pop().map(|Reverse(NachSequenz(f))| f)
        } else {
            trace!(erwartet = self.erwartet, "Frame fehlt");
            None
        };

        self.erwartet = self.erwartet.wrapping_add(1);
        (frame, !(self.complete && self.heap.is_empty()))
    }

    /// Markiert das Ende des Streams. Gepufferte Frames bleiben lesbar.
    pub fn stop(&mut self) {
        self.complete = true;
    }

    /// Leert den Puffer ueber den Verworfen-Handler und beginnt wieder bei 0
    pub fn reset(&mut self) {
        while let Some(Reverse(NachSequenz(frame))) = self.heap.pop() {
            self.verwerfen(frame);
        }
        self.erwartet = 0;
        self.complete = false;
    }

    /// Naechste erwartete Sequenznummer
    pub fn sequence_number(&self) -> u32 {
        self.erwartet
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn ist_gestoppt(&self) -> bool {
        self.complete
    }

    /// Anzahl bisher verworfener Frames
    pub fn verworfen_gesamt(&self) -> u64 {
        self.verworfen_gesamt
    }

    fn verwerfen(&mut self, frame: PufferFrame) {
        self.verworfen_gesamt += 1;
        (self.verworfen)(frame);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
