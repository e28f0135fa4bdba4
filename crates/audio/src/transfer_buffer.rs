//! Transfer-Puffer zwischen Echtzeit- und Verarbeitungs-Thread
//!
//! Begrenzte lock-free SPSC-Queue auf Basis von `ringbuf`. Schreiber und
//! Leser sind getrennte Typen: es gibt pro Puffer genau einen Produzenten
//! und genau einen Konsumenten, mehrere Schreiber sind nicht ausdrueckbar.
//! Weder `write` noch `read` blockieren jemals.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Schreibende Haelfte (z.B. im Audio-Callback)
pub struct TransferWriter<T> {
    producer: HeapProd<T>,
}

/// Lesende Haelfte (z.B. im Verarbeitungs-Thread)
pub struct TransferReader<T> {
    consumer: HeapCons<T>,
}

/// Erstellt einen Transfer-Puffer mit fester Kapazitaet
pub fn transfer_buffer<T>(kapazitaet: usize) -> (TransferWriter<T>, TransferReader<T>) {
    let (producer, consumer) = HeapRb::<T>::new(kapazitaet.max(1)).split();
    (TransferWriter { producer }, TransferReader { consumer })
}

impl<T> TransferWriter<T> {
    /// Schreibt ein Element.
    ///
    /// Ist der Puffer voll, kommt das Element unveraendert zurueck damit
    /// der Aufrufer es z.B. an seinen Pool zurueckgeben kann.
    pub fn write(&mut self, item: T) -> Result<(), T> {
        self.producer.try_push(item)
    }

    /// Ungefaehre Anzahl ungelesener Elemente
    pub fn estimated_unread_count(&self) -> usize {
        self.producer.occupied_len()
    }

    pub fn kapazitaet(&self) -> usize {
        self.producer.capacity().get()
    }
}

impl<T> TransferReader<T> {
    /// Liest das aelteste Element, `None` wenn leer
    pub fn read(&mut self) -> Option<T> {
        self.consumer.try_pop()
    }

    /// Ungefaehre Anzahl ungelesener Elemente
    pub fn estimated_unread_count(&self) -> usize {
        self.consumer.occupied_len()
    }
}
