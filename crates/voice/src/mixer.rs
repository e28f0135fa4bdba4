//! Mischt die Wiedergabe-Slots aller Spieler in einen Ausgabestrom
//!
//! Spricht jemand mit hoeherer Prioritaet, werden alle niedriger
//! priorisierten Slots ausgeblendet. Stummgeschaltete Slots laufen weiter,
//! tragen aber nichts zum Ausgang bei.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use sprechfunk_audio::WiedergabeQuelle;
use sprechfunk_core::{ChannelPriority, VoiceConfig};
use tracing::debug;

use crate::playback::PlaybackSlot;

/// Registry aller Wiedergabe-Slots
pub struct Mixer {
    slots: DashMap<String, Arc<PlaybackSlot>>,
    config: VoiceConfig,
    ausgabe_rate: u32,
}

impl Mixer {
    pub fn neu(config: &VoiceConfig, ausgabe_rate: u32) -> Self {
        Self {
            slots: DashMap::new(),
            config: config.clone(),
            ausgabe_rate,
        }
    }

    /// Slot eines Spielers, wird bei Bedarf angelegt
    pub fn slot(&self, spieler: &str) -> Arc<PlaybackSlot> {
        if let Some(slot) = self.slots.get(spieler) {
            return Arc::clone(slot.value());
        }
        let slot = self
            .slots
            .entry(spieler.to_owned())
            .or_insert_with(|| {
                debug!(spieler, "Wiedergabe-Slot angelegt");
                Arc::new(PlaybackSlot::neu(spieler, &self.config))
            });
        Arc::clone(slot.value())
    }

    pub fn vorhanden(&self, spieler: &str) -> Option<Arc<PlaybackSlot>> {
        self.slots.get(spieler).map(|s| Arc::clone(s.value()))
    }

    /// Entfernt den Slot und bricht seine Wiedergabe ab
    pub fn entfernen(&self, spieler: &str) -> bool {
        match self.slots.remove(spieler) {
            Some((_, slot)) => {
                slot.stoppen();
                debug!(spieler, "Wiedergabe-Slot entfernt");
                true
            }
            None => false,
        }
    }

    pub fn anzahl(&self) -> usize {
        self.slots.len()
    }

    pub fn ausgabe_rate(&self) -> u32 {
        self.ausgabe_rate
    }

    /// Hoechste Prioritaet unter den gerade spielenden Slots
    pub fn top_priority(&self) -> ChannelPriority {
        self.slots
            .iter()
            .filter(|s| s.ist_aktiv())
            .map(|s| s.priority())
            .max()
            .unwrap_or(ChannelPriority::None)
    }

    /// Ziel-Lautstaerke eines Slots bei gegebener Top-Prioritaet
    pub fn ziel_gain(slot: &PlaybackSlot, top: ChannelPriority) -> f32 {
        if slot.ist_stumm() || top > slot.priority() {
            0.0
        } else {
            1.0
        }
    }

    /// Fuellt `ausgabe` mit der Summe aller Slots (Audio-Thread)
    pub fn mischen(&self, ausgabe: &mut [f32], jetzt: Instant) {
        ausgabe.fill(0.0);
        let top = self.top_priority();
        for eintrag in self.slots.iter() {
            let slot = eintrag.value();
            slot.mischen(ausgabe, jetzt, Self::ziel_gain(slot, top));
        }
    }
}

/// Verbindet den Mixer mit dem Lautsprecher-Callback
pub struct MixerAusgang {
    mixer: Arc<Mixer>,
}

impl MixerAusgang {
    pub fn neu(mixer: Arc<Mixer>) -> Self {
        Self { mixer }
    }
}

impl WiedergabeQuelle for MixerAusgang {
    fn lesen(&mut self, ausgabe: &mut [f32]) {
        self.mixer.mischen(ausgabe, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decoder_pipeline, DecoderEingang};
    use crate::session::{JitterEstimator, SessionContext, SpeechSession};
    use sprechfunk_audio::{PcmDecoder, PcmEncoder, VoiceEncoder, WaveFormat};
    use sprechfunk_core::VoicePacket;
    use std::time::Duration;

    const FRAME: usize = 960;

    struct Ruhig;

    impl JitterEstimator for Ruhig {
        fn update(&self, _: f32) {}
        fn jitter(&self) -> f32 {
            0.0
        }
        fn confidence(&self) -> f32 {
            1.0
        }
    }

    fn sprechen(mixer: &Mixer, spieler: &str, prio: ChannelPriority, wert: f32, t0: Instant) -> DecoderEingang {
        let decoder = Box::new(PcmDecoder::neu(WaveFormat::mono(48_000), FRAME));
        let (mut eingang, pipeline) = decoder_pipeline(decoder, 48_000, &VoiceConfig::default()).unwrap();
        let mut enc = PcmEncoder::neu(WaveFormat::mono(48_000), FRAME);
        for seq in 0..4 {
            eingang.push(
                &VoicePacket {
                    sender: spieler.into(),
                    priority: prio,
                    positional: false,
                    payload: enc.encode(&[wert; FRAME]).unwrap(),
                    sequence_number: seq,
                },
                t0,
            );
        }
        let session = SpeechSession::neu(SessionContext::neu(spieler, 0), pipeline, Arc::new(Ruhig), t0);
        mixer.slot(spieler).play(session);
        eingang
    }

    #[test]
    fn slot_wird_einmal_angelegt() {
        let mixer = Mixer::neu(&VoiceConfig::default(), 48_000);
        let a = mixer.slot("anna");
        let b = mixer.slot("anna");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mixer.anzahl(), 1);
        assert!(mixer.entfernen("anna"));
        assert!(!mixer.entfernen("anna"));
        assert!(mixer.vorhanden("anna").is_none());
    }

    #[test]
    fn summiert_gleich_priorisierte_sprecher() {
        let t0 = Instant::now();
        let mixer = Mixer::neu(&VoiceConfig::default(), 48_000);
        let _a = sprechen(&mixer, "anna", ChannelPriority::Default, 0.2, t0);
        let _b = sprechen(&mixer, "ben", ChannelPriority::Default, 0.1, t0);

        let mut block = vec![1.0f32; FRAME];
        mixer.mischen(&mut block, t0 + Duration::from_millis(50));
        assert!(block.iter().all(|s| (s - 0.3).abs() < 1e-3));
    }

    #[test]
    fn hoehere_prioritaet_blendet_andere_aus() {
        let t0 = Instant::now();
        let mixer = Mixer::neu(&VoiceConfig::default(), 48_000);
        let _a = sprechen(&mixer, "anna", ChannelPriority::High, 0.3, t0);
        let _b = sprechen(&mixer, "ben", ChannelPriority::Default, 0.2, t0);
        assert_eq!(mixer.top_priority(), ChannelPriority::High);

        let start = t0 + Duration::from_millis(50);
        let mut block = vec![0.0f32; FRAME];
        mixer.mischen(&mut block, start);
        mixer.mischen(&mut block, start + Duration::from_millis(20));
        assert!(block.iter().all(|s| (s - 0.3).abs() < 1e-3));
    }

    #[test]
    fn stummer_slot_traegt_nichts_bei() {
        let t0 = Instant::now();
        let mixer = Mixer::neu(&VoiceConfig::default(), 48_000);
        let _a = sprechen(&mixer, "anna", ChannelPriority::Default, 0.3, t0);
        mixer.slot("anna").set_stumm(true);

        let start = t0 + Duration::from_millis(50);
        let mut block = vec![0.0f32; FRAME];
        mixer.mischen(&mut block, start);
        mixer.mischen(&mut block, start + Duration::from_millis(20));
        assert!(block.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn ohne_slots_ist_ausgang_still() {
        let mixer = Arc::new(Mixer::neu(&VoiceConfig::default(), 48_000));
        let mut ausgang = MixerAusgang::neu(Arc::clone(&mixer));
        let mut block = vec![0.7f32; 64];
        ausgang.lesen(&mut block);
        assert!(block.iter().all(|s| *s == 0.0));
    }
}
