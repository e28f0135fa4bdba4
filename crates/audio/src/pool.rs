//! Nebenlaeufiger Objekt-Pool fuer Sample-Puffer
//!
//! Holen und Zurueckgeben blockieren nie: ist der Pool leer, wird ein
//! frisches Objekt erzeugt; ist er voll, wird das zurueckgegebene Objekt
//! verworfen.

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Begrenzter Pool, gemeinsam nutzbar ueber Thread-Grenzen
pub struct ConcurrentPool<T> {
    frei_tx: Sender<T>,
    frei_rx: Receiver<T>,
    fabrik: Arc<dyn Fn() -> T + Send + Sync>,
}

impl<T> Clone for ConcurrentPool<T> {
    fn clone(&self) -> Self {
        Self {
            frei_tx: self.frei_tx.clone(),
            frei_rx: self.frei_rx.clone(),
            fabrik: Arc::clone(&self.fabrik),
        }
    }
}

impl<T> ConcurrentPool<T> {
    /// Erstellt einen Pool der hoechstens `kapazitaet` freie Objekte haelt
    pub fn neu(kapazitaet: usize, fabrik: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let (frei_tx, frei_rx) = bounded(kapazitaet.max(1));
        Self {
            frei_tx,
            frei_rx,
            fabrik: Arc::new(fabrik),
        }
    }

    /// Holt ein Objekt (frisch erzeugt falls der Pool leer ist)
    pub fn get(&self) -> T {
        self.frei_rx.try_recv().unwrap_or_else(|_| (self.fabrik)())
    }

    /// Gibt ein Objekt zurueck. Ist der Pool voll, wird es verworfen.
    pub fn put(&self, item: T) {
        if self.frei_tx.try_send(item).is_err() {
            tracing::trace!("Pool voll, Objekt verworfen");
        }
    }

    /// Anzahl aktuell freier Objekte
    pub fn frei(&self) -> usize {
        self.frei_rx.len()
    }
}
