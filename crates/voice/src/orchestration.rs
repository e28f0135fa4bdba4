//! Verteilt Sprach-Ereignisse auf Sessions und Wiedergabe-Slots
//!
//! Pro Spieler haelt ein [`VoicePlayback`] die gerade empfangende Session
//! und eine Warteschlange fertig angelegter Sessions. Sobald die
//! Aktivierungszeit der naechsten Session erreicht ist, beginnt sie zu
//! spielen. Eine noch laufende Session desselben Spielers wird dabei
//! zwangsweise beendet.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use sprechfunk_audio::CodecFabrik;
use sprechfunk_core::{VoiceConfig, VoiceEvent, VoicePacket};
use tracing::{debug, trace};

use crate::decoder::{decoder_pipeline, DecoderEingang};
use crate::error::VoiceResult;
use crate::mixer::{Mixer, MixerAusgang};
use crate::playback::PlaybackSlot;
use crate::session::{FensterJitterSchaetzer, JitterEstimator, SessionContext, SpeechSession};

// ---------------------------------------------------------------------------
// VoicePlayback
// ---------------------------------------------------------------------------

/// Wiedergabe-Zustand eines einzelnen Spielers
pub struct VoicePlayback {
    spieler: String,
    slot: Arc<PlaybackSlot>,
    jitter: Arc<FensterJitterSchaetzer>,
    /// Eingang der Session die gerade Pakete empfaengt
    eingang: Option<DecoderEingang>,
    wartend: VecDeque<SpeechSession>,
    naechste_id: u32,
    fabrik: Arc<dyn CodecFabrik>,
    config: VoiceConfig,
    ausgabe_rate: u32,
}

impl VoicePlayback {
    pub fn neu(
        spieler: impl Into<String>,
        slot: Arc<PlaybackSlot>,
        fabrik: Arc<dyn CodecFabrik>,
        config: &VoiceConfig,
        ausgabe_rate: u32,
    ) -> Self {
        Self {
            spieler: spieler.into(),
            slot,
            jitter: Arc::new(FensterJitterSchaetzer::default()),
            eingang: None,
            wartend: VecDeque::new(),
            naechste_id: 0,
            fabrik,
            config: config.clone(),
            ausgabe_rate,
        }
    }

    /// Legt eine neue Session an. Eine noch empfangende wird vorher beendet.
    pub fn start_session(&mut self, jetzt: Instant) -> VoiceResult<()> {
        self.stop_session();

        let decoder = self.fabrik.decoder()?;
        let (eingang, pipeline) = decoder_pipeline(decoder, self.ausgabe_rate, &self.config)?;
        let context = SessionContext::neu(self.spieler.as_str(), self.naechste_id);
        self.naechste_id = self.naechste_id.wrapping_add(1);

        let jitter: Arc<dyn JitterEstimator> = self.jitter.clone();
        let session = SpeechSession::neu(context, pipeline, jitter, jetzt);
        debug!(session = %session.context(), verzoegerung_ms = session.verzoegerung().as_millis() as u64, "Session angelegt");

        self.wartend.push_back(session);
        self.eingang = Some(eingang);
        Ok(())
    }

    /// Der Spieler hat aufgehoert zu sprechen
    pub fn stop_session(&mut self) {
        if let Some(eingang) = self.eingang.take() {
            eingang.stop();
        }
    }

    /// Nimmt ein Paket an. Ohne laufende Session wird eine angelegt.
    pub fn receive(&mut self, paket: &VoicePacket, jetzt: Instant) -> VoiceResult<()> {
        if self.eingang.is_none() {
            debug!(spieler = %self.spieler, sequenz = paket.sequence_number, "Paket ohne Session, lege Session an");
            self.start_session(jetzt)?;
        }
        if let Some(eingang) = self.eingang.as_mut() {
            let spaet = eingang.push(paket, jetzt);
            self.jitter.update(spaet);
        }
        Ok(())
    }

    /// Startet die naechste faellige Session
    pub fn update(&mut self, jetzt: Instant) {
        self.slot.aufraeumen();

        let bereit = self
            .wartend
            .front()
            .is_some_and(|s| s.aktivierungszeit() <= jetzt);
        if !bereit {
            return;
        }
        if let Some(session) = self.wartend.pop_front() {
            trace!(session = %session.context(), "Session wird abgespielt");
            self.slot.play(session);
        }
    }

    /// Bricht Empfang und Wiedergabe ab
    pub fn stoppen(&mut self) {
        self.stop_session();
        self.wartend.clear();
        self.slot.stoppen();
    }

    pub fn spricht(&self) -> bool {
        self.eingang.is_some()
    }

    pub fn wartende_sessions(&self) -> usize {
        self.wartend.len()
    }

    /// Aktivierungszeit der naechsten wartenden Session
    pub fn naechste_aktivierung(&self) -> Option<Instant> {
        self.wartend.front().map(|s| s.aktivierungszeit())
    }

    pub fn slot(&self) -> &Arc<PlaybackSlot> {
        &self.slot
    }

    pub fn jitter(&self) -> &FensterJitterSchaetzer {
        &self.jitter
    }
}

// ---------------------------------------------------------------------------
// PlaybackOrchestrator
// ---------------------------------------------------------------------------

/// Setzt Client-Ereignisse in Wiedergabe um
pub struct PlaybackOrchestrator {
    mixer: Arc<Mixer>,
    spieler: HashMap<String, VoicePlayback>,
    fabrik: Arc<dyn CodecFabrik>,
    config: VoiceConfig,
}

impl PlaybackOrchestrator {
    pub fn neu(fabrik: Arc<dyn CodecFabrik>, config: &VoiceConfig, ausgabe_rate: u32) -> Self {
        Self {
            mixer: Arc::new(Mixer::neu(config, ausgabe_rate)),
            spieler: HashMap::new(),
            fabrik,
            config: config.clone(),
        }
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    /// Quelle fuer den Lautsprecher
    pub fn ausgang(&self) -> MixerAusgang {
        MixerAusgang::neu(Arc::clone(&self.mixer))
    }

    /// Verarbeitet ein Ereignis des Clients
    pub fn ereignis(&mut self, ereignis: &VoiceEvent, jetzt: Instant) -> VoiceResult<()> {
        match ereignis {
            VoiceEvent::PlayerJoined { name } => {
                self.playback(name);
            }
            VoiceEvent::PlayerLeft { name } => {
                if let Some(mut p) = self.spieler.remove(name) {
                    p.stoppen();
                }
                self.mixer.entfernen(name);
            }
            VoiceEvent::PlayerStartedSpeaking { name } => {
                self.playback(name).start_session(jetzt)?;
            }
            VoiceEvent::PlayerStoppedSpeaking { name } => {
                if let Some(p) = self.spieler.get_mut(name) {
                    p.stop_session();
                }
            }
            VoiceEvent::VoicePacketReceived(paket) => {
                self.playback(&paket.sender).receive(paket, jetzt)?;
            }
            VoiceEvent::TextMessageReceived(_) => {}
        }
        Ok(())
    }

    /// Startet faellige Sessions
    pub fn update(&mut self, jetzt: Instant) {
        for p in self.spieler.values_mut() {
            p.update(jetzt);
        }
    }

    /// Schaltet einen Spieler lokal stumm
    pub fn set_stumm(&self, spieler: &str, stumm: bool) -> bool {
        match self.spieler.get(spieler) {
            Some(p) => {
                p.slot().set_stumm(stumm);
                true
            }
            None => false,
        }
    }

    pub fn playback_von(&self, spieler: &str) -> Option<&VoicePlayback> {
        self.spieler.get(spieler)
    }

    pub fn spieler_anzahl(&self) -> usize {
        self.spieler.len()
    }

    /// Beendet alle Wiedergaben
    pub fn stoppen(&mut self) {
        for (name, mut p) in self.spieler.drain() {
            p.stoppen();
            self.mixer.entfernen(&name);
        }
    }

    fn playback(&mut self, spieler: &str) -> &mut VoicePlayback {
        let Self {
            mixer,
            spieler: alle,
            fabrik,
            config,
        } = self;
        alle.entry(spieler.to_owned()).or_insert_with(|| {
            VoicePlayback::neu(spieler, mixer.slot(spieler), Arc::clone(fabrik), config, mixer.ausgabe_rate())
        })
    }
}
