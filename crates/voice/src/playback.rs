//! Wiedergabe-Slot eines entfernten Spielers
//!
//! Ein `PlaybackSlot` spielt hoechstens eine [`SpeechSession`] gleichzeitig.
//! Der Haupt-Thread startet Sessions mit [`PlaybackSlot::play`], der
//! Audio-Thread mischt sie mit [`PlaybackSlot::mischen`] in den Ausgabepuffer.
//!
//! Pro Callback wird der Desync zwischen Wanduhr und gelesener Position
//! neu berechnet. Kleine Abweichungen werden ueber die Wiedergabe-
//! geschwindigkeit ausgeglichen, grosse durch Springen bzw. Stille.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sprechfunk_audio::ArvMeter;
use sprechfunk_core::{diagnose, ChannelPriority, VoiceConfig};
use tracing::{debug, error, trace, warn};

use crate::decoder::{prioritaet_als_byte, prioritaet_aus_byte, SessionSignal};
use crate::desync::DesyncCorrector;
use crate::error::VoiceResult;
use crate::session::SpeechSession;

const PHASE_KEINE: u8 = 0;
const PHASE_AKTIV: u8 = 1;
const PHASE_FERTIG: u8 = 2;

/// Zustand eines Slots aus Sicht des Haupt-Threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WiedergabeZustand {
    /// Keine Session zugewiesen
    NoSession,
    /// Session spielt, der Sender spricht noch
    Active,
    /// Session spielt, der Sender hat aufgehoert; der Rest wird ausgespielt
    Draining,
    /// Session ist fertig, wartet auf `aufraeumen`
    Complete,
}

// ---------------------------------------------------------------------------
// Zeitdehnung
// ---------------------------------------------------------------------------

/// Lineare Interpolation fuer leicht veraenderte Wiedergabegeschwindigkeit.
///
/// Bei Faktor 1.0 werden die Quellsamples unveraendert ausgegeben.
struct Dehnung {
    vorrat: VecDeque<f32>,
    /// Bruchteil-Position im Vorrat, immer in `[0, 1)`
    pos: f64,
    lese: Vec<f32>,
}

impl Dehnung {
    fn neu() -> Self {
        Self {
            vorrat: VecDeque::new(),
            pos: 0.0,
            lese: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.vorrat.clear();
        self.pos = 0.0;
    }

    /// Fuellt `ausgabe`. Gibt zurueck ob die Quelle fertig ist und wie viele
    /// Quellsamples verbraucht wurden.
    fn erzeugen(
        &mut self,
        session: &mut SpeechSession,
        ausgabe: &mut [f32],
        geschwindigkeit: f32,
    ) -> VoiceResult<(bool, usize)> {
        let n = ausgabe.len();
        if n == 0 {
            return Ok((false, 0));
        }
        let schritt = f64::from(geschwindigkeit);

        // Letzte Leseposition plus ein Sample fuer die Interpolation
        let benoetigt = (self.pos + (n - 1) as f64 * schritt).floor() as usize + 2;
        let mut fertig = false;
        if self.vorrat.len() < benoetigt {
            let fehlt = benoetigt - self.vorrat.len();
            if self.lese.len() < fehlt {
                self.lese.resize(fehlt, 0.0);
            }
            fertig = session.read(&mut self.lese[..fehlt])?;
            self.vorrat.extend(self.lese[..fehlt].iter().copied());
        }

        for (i, ziel) in ausgabe.iter_mut().enumerate() {
            let p = self.pos + i as f64 * schritt;
            let k = p.floor() as usize;
            let anteil = (p - k as f64) as f32;
            let a = self.vorrat[k];
            let b = self.vorrat[k + 1];
            *ziel = a + (b - a) * anteil;
        }

        let ende = self.pos + n as f64 * schritt;
        let verbraucht = (ende.floor() as usize).min(self.vorrat.len());
        self.vorrat.drain(..verbraucht);
        self.pos = ende - verbraucht as f64;
        Ok((fertig, verbraucht))
    }
}

// ---------------------------------------------------------------------------
// PlaybackSlot
// ---------------------------------------------------------------------------

struct AktiveSession {
    session: SpeechSession,
    aktivierung: Instant,
    /// Bisher abgespielte Quellsamples
    gelesen: u64,
    desync: DesyncCorrector,
    dehnung: Dehnung,
    arv: ArvMeter,
}

struct SlotInnen {
    aktiv: Option<AktiveSession>,
    gain: f32,
    temp: Vec<f32>,
}

/// Spielt die Sessions eines Spielers nacheinander ab
pub struct PlaybackSlot {
    spieler: String,
    config: VoiceConfig,
    innen: Mutex<SlotInnen>,
    /// Nur vom Haupt-Thread benutzt
    signal: Mutex<Option<Arc<SessionSignal>>>,
    phase: AtomicU8,
    stumm: AtomicBool,
    arv: AtomicU32,
    geschwindigkeit: AtomicU32,
    desync_ms: AtomicI64,
    priority: AtomicU8,
}

impl PlaybackSlot {
    pub fn neu(spieler: impl Into<String>, config: &VoiceConfig) -> Self {
        Self {
            spieler: spieler.into(),
            config: config.clone(),
            innen: Mutex::new(SlotInnen {
                aktiv: None,
                gain: 1.0,
                temp: Vec::new(),
            }),
            signal: Mutex::new(None),
            phase: AtomicU8::new(PHASE_KEINE),
            stumm: AtomicBool::new(false),
            arv: AtomicU32::new(0.0f32.to_bits()),
            geschwindigkeit: AtomicU32::new(1.0f32.to_bits()),
            desync_ms: AtomicI64::new(0),
            priority: AtomicU8::new(prioritaet_als_byte(ChannelPriority::None)),
        }
    }

    pub fn spieler(&self) -> &str {
        &self.spieler
    }

    /// Startet die Wiedergabe einer Session.
    ///
    /// Laeuft noch eine Session, wird sie sofort beendet und `true`
    /// zurueckgegeben. Die Aktivierungszeit wird hier festgeschrieben.
    pub fn play(&self, session: SpeechSession) -> bool {
        let context = session.context().clone();
        let signal = Arc::clone(session.signal());
        let priority = session.priority();
        let neu = AktiveSession {
            aktivierung: session.aktivierungszeit(),
            session,
            gelesen: 0,
            desync: DesyncCorrector::neu(&self.config),
            dehnung: Dehnung::neu(),
            arv: ArvMeter::default(),
        };

        let mut innen = self.innen.lock();
        let verdraengt = match innen.aktiv.replace(neu) {
            Some(alt) => {
                warn!(
                    diagnose_id = %diagnose::WIEDERGABE_BEREITS_AKTIV,
                    spieler = %self.spieler,
                    alt = %alt.session.context(),
                    neu = %context,
                    "Vorherige Session wird zwangsweise beendet"
                );
                true
            }
            None => false,
        };
        *self.signal.lock() = Some(signal);
        self.messwerte_setzen(0.0, 1.0, 0, priority);
        self.phase.store(PHASE_AKTIV, Ordering::Release);
        drop(innen);

        debug!(spieler = %self.spieler, session = %context, "Wiedergabe gestartet");
        verdraengt
    }

    /// Beendet die laufende Session ohne sie auszuspielen
    pub fn stoppen(&self) {
        let mut innen = self.innen.lock();
        if let Some(alt) = innen.aktiv.take() {
            debug!(spieler = %self.spieler, session = %alt.session.context(), "Wiedergabe abgebrochen");
        }
        *self.signal.lock() = None;
        self.messwerte_setzen(0.0, 1.0, 0, ChannelPriority::None);
        self.phase.store(PHASE_KEINE, Ordering::Release);
    }

    /// Gibt einen fertigen Slot fuer die naechste Session frei
    pub fn aufraeumen(&self) -> bool {
        let frei = self
            .phase
            .compare_exchange(PHASE_FERTIG, PHASE_KEINE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if frei {
            *self.signal.lock() = None;
        }
        frei
    }

    pub fn zustand(&self) -> WiedergabeZustand {
        match self.phase.load(Ordering::Acquire) {
            PHASE_AKTIV => {
                let stop = self
                    .signal
                    .lock()
                    .as_ref()
                    .is_some_and(|s| s.stop_angefordert());
                if stop {
                    WiedergabeZustand::Draining
                } else {
                    WiedergabeZustand::Active
                }
            }
            PHASE_FERTIG => WiedergabeZustand::Complete,
            _ => WiedergabeZustand::NoSession,
        }
    }

    /// Spielt gerade (auch beim Ausspielen des Rests)
    pub fn ist_aktiv(&self) -> bool {
        self.phase.load(Ordering::Acquire) == PHASE_AKTIV
    }

    pub fn set_stumm(&self, stumm: bool) {
        self.stumm.store(stumm, Ordering::Relaxed);
    }

    pub fn ist_stumm(&self) -> bool {
        self.stumm.load(Ordering::Relaxed)
    }

    /// Mittlerer Betrag des zuletzt gemischten Blocks (geglaettet)
    pub fn arv(&self) -> f32 {
        f32::from_bits(self.arv.load(Ordering::Relaxed))
    }

    pub fn geschwindigkeit(&self) -> f32 {
        f32::from_bits(self.geschwindigkeit.load(Ordering::Relaxed))
    }

    pub fn desync_ms(&self) -> i64 {
        self.desync_ms.load(Ordering::Relaxed)
    }

    /// Prioritaet der laufenden Session, `None` ohne Session
    pub fn priority(&self) -> ChannelPriority {
        prioritaet_aus_byte(self.priority.load(Ordering::Relaxed))
    }

    /// Mischt die laufende Session additiv in `mix` (Audio-Thread).
    ///
    /// Die Lautstaerke laeuft ueber den Block linear auf `ziel_gain`.
    pub fn mischen(&self, mix: &mut [f32], jetzt: Instant, ziel_gain: f32) {
        // Ein leerer Block verbraucht nichts und misst keinen Versatz
        if mix.is_empty() {
            return;
        }
        let Some(mut innen) = self.innen.try_lock() else {
            trace!(spieler = %self.spieler, "Slot gesperrt, Block ausgelassen");
            return;
        };
        let SlotInnen { aktiv, gain, temp } = &mut *innen;
        let Some(a) = aktiv.as_mut() else {
            return;
        };

        if temp.len() < mix.len() {
            temp.resize(mix.len(), 0.0);
        }
        let block = &mut temp[..mix.len()];

        let fertig = match self.abspielen(a, block, jetzt) {
            Ok(fertig) => fertig,
            Err(e) => {
                error!(
                    spieler = %self.spieler,
                    session = %a.session.context(),
                    fehler = %e,
                    "Wiedergabe fehlgeschlagen, Session wird beendet"
                );
                block.fill(0.0);
                true
            }
        };

        let start = *gain;
        let schritt = (ziel_gain - start) / mix.len().max(1) as f32;
        for (i, (m, s)) in mix.iter_mut().zip(block.iter()).enumerate() {
            *m += s * (start + schritt * (i + 1) as f32);
        }
        *gain = ziel_gain;

        if fertig {
            debug!(spieler = %self.spieler, session = %a.session.context(), "Session abgespielt");
            *aktiv = None;
            self.messwerte_setzen(0.0, 1.0, 0, ChannelPriority::None);
            self.phase.store(PHASE_FERTIG, Ordering::Release);
        }
    }

    fn abspielen(&self, a: &mut AktiveSession, block: &mut [f32], jetzt: Instant) -> VoiceResult<bool> {
        let rate = u64::from(a.session.ausgabe_format().sample_rate.max(1));
        let ideal = jetzt.saturating_duration_since(a.aktivierung);
        let ist = Duration::from_secs_f64(a.gelesen as f64 / rate as f64);
        a.desync.update(ideal, ist);

        let d = a.desync.desync_ms();
        let grenze = self.config.hard_skip_ms as i64;

        if d > grenze {
            warn!(spieler = %self.spieler, desync_ms = d, "Wiedergabe liegt zu weit zurueck, springe");
            let mut rest = (d as u64 * rate / 1000) as usize;
            a.gelesen += rest as u64;
            a.desync.skip(-d);
            a.dehnung.reset();
            while rest > 0 {
                let n = rest.min(block.len());
                if a.session.read(&mut block[..n])? {
                    block.fill(0.0);
                    return Ok(true);
                }
                rest -= n;
            }
        } else if d < -grenze {
            warn!(spieler = %self.spieler, desync_ms = d, "Wiedergabe liegt zu weit vorne, fuege Stille ein");
            block.fill(0.0);
            let dauer_ms = block.len() as u64 * 1000 / rate;
            a.desync.skip(dauer_ms as i64);
            self.messwerte_setzen(0.0, 1.0, d, a.session.priority());
            return Ok(false);
        }

        let geschwindigkeit = a.desync.korrigierte_geschwindigkeit();
        let (fertig, verbraucht) = a.dehnung.erzeugen(&mut a.session, block, geschwindigkeit)?;
        a.gelesen += verbraucht as u64;

        let arv = a.arv.update(block);
        self.messwerte_setzen(arv, geschwindigkeit, a.desync.desync_ms(), a.session.priority());
        Ok(fertig)
    }

    fn messwerte_setzen(&self, arv: f32, geschwindigkeit: f32, desync_ms: i64, priority: ChannelPriority) {
        self.arv.store(arv.to_bits(), Ordering::Relaxed);
        self.geschwindigkeit
            .store(geschwindigkeit.to_bits(), Ordering::Relaxed);
        self.desync_ms.store(desync_ms, Ordering::Relaxed);
        self.priority
            .store(prioritaet_als_byte(priority), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for PlaybackSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSlot")
            .field("spieler", &self.spieler)
            .field("zustand", &self.zustand())
            .field("stumm", &self.ist_stumm())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{decoder_pipeline, DecoderEingang};
    use crate::session::{JitterEstimator, SessionContext};
    use sprechfunk_audio::{PcmDecoder, PcmEncoder, VoiceEncoder, WaveFormat};
    use sprechfunk_core::VoicePacket;

    const FRAME: usize = 960;

    /// Feste Verzoegerung von 50ms
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

    fn paket(seq: u32, wert: f32) -> VoicePacket {
        let mut enc = PcmEncoder::neu(WaveFormat::mono(48_000), FRAME);
        VoicePacket {
            sender: "anna".into(),
            priority: ChannelPriority::Default,
            positional: false,
            payload: enc.encode(&[wert; FRAME]).unwrap(),
            sequence_number: seq,
        }
    }

    fn session(t0: Instant, id: u32) -> (DecoderEingang, SpeechSession) {
        let decoder = Box::new(PcmDecoder::neu(WaveFormat::mono(48_000), FRAME));
        let (eingang, pipeline) = decoder_pipeline(decoder, 48_000, &VoiceConfig::default()).unwrap();
        let s = SpeechSession::neu(SessionContext::neu("anna", id), pipeline, Arc::new(Ruhig), t0);
        (eingang, s)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn spielt_session_bis_zum_ende() {
        let t0 = Instant::now();
        let slot = PlaybackSlot::neu("anna", &VoiceConfig::default());
        let (mut eingang, s) = session(t0, 1);
        for seq in 0..3 {
            eingang.push(&paket(seq, 0.2), t0);
        }

        assert_eq!(slot.zustand(), WiedergabeZustand::NoSession);
        assert!(!slot.play(s));
        assert_eq!(slot.zustand(), WiedergabeZustand::Active);
        assert_eq!(slot.priority(), ChannelPriority::Default);

        eingang.stop();
        assert_eq!(slot.zustand(), WiedergabeZustand::Draining);

        let start = t0 + ms(50);
        let mut bloecke = 0;
        for k in 0..3u64 {
            let mut mix = vec![0.0f32; FRAME];
            slot.mischen(&mut mix, start + ms(20 * k), 1.0);
            assert!(mix.iter().all(|s| (s - 0.2).abs() < 1e-3), "block {k}");
            bloecke += 1;
        }
        assert_eq!(bloecke, 3);
        assert_eq!(slot.zustand(), WiedergabeZustand::Complete);
        assert!((slot.geschwindigkeit() - 1.0).abs() < 1e-6);

        assert!(slot.aufraeumen());
        assert_eq!(slot.zustand(), WiedergabeZustand::NoSession);
        assert!(!slot.aufraeumen());
    }

    #[test]
    fn zweites_play_beendet_erste_session() {
        let t0 = Instant::now();
        let slot = PlaybackSlot::neu("anna", &VoiceConfig::default());
        let (_e1, s1) = session(t0, 1);
        let (_e2, s2) = session(t0, 2);
        assert!(!slot.play(s1));
        assert!(slot.play(s2));
        assert_eq!(slot.zustand(), WiedergabeZustand::Active);
    }

    #[test]
    fn mischen_addiert_mit_gain_rampe() {
        let t0 = Instant::now();
        let slot = PlaybackSlot::neu("anna", &VoiceConfig::default());
        let (mut eingang, s) = session(t0, 1);
        for seq in 0..4 {
            eingang.push(&paket(seq, 0.5), t0);
        }
        slot.play(s);

        let mut mix = vec![0.1f32; FRAME];
        slot.mischen(&mut mix, t0 + ms(50), 1.0);
        assert!(mix.iter().all(|s| (s - 0.6).abs() < 1e-3));

        // Rampe von 1.0 auf 0.0 ueber den Block
        let mut mix = vec![0.0f32; FRAME];
        slot.mischen(&mut mix, t0 + ms(70), 0.0);
        assert!(mix[0] > 0.49);
        assert!(mix[FRAME - 1].abs() < 1e-6);

        // Danach stumm
        let mut mix = vec![0.0f32; FRAME];
        slot.mischen(&mut mix, t0 + ms(90), 0.0);
        assert!(mix.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn grosser_rueckstand_wird_uebersprungen() {
        let t0 = Instant::now();
        let slot = PlaybackSlot::neu("anna", &VoiceConfig::default());
        let (mut eingang, s) = session(t0, 1);
        for seq in 0..60 {
            eingang.push(&paket(seq, 0.1), t0);
        }
        slot.play(s);

        // Ein Callback eine Sekunde nach Aktivierung
        let mut mix = vec![0.0f32; FRAME];
        slot.mischen(&mut mix, t0 + ms(50) + ms(1_000), 1.0);
        assert_eq!(slot.zustand(), WiedergabeZustand::Active);
        assert!(slot.desync_ms().abs() < 50, "desync {}", slot.desync_ms());
    }

    #[test]
    fn leerer_block_bei_grossem_rueckstand() {
        let t0 = Instant::now();
        let slot = PlaybackSlot::neu("anna", &VoiceConfig::default());
        let (mut eingang, s) = session(t0, 1);
        for seq in 0..100 {
            eingang.push(&paket(seq, 0.1), t0);
        }
        slot.play(s);

        let spaet = t0 + ms(1_500);
        slot.mischen(&mut [], spaet, 1.0);
        assert_eq!(slot.zustand(), WiedergabeZustand::Active);
        assert_eq!(slot.desync_ms(), 0);

        // Der naechste echte Block springt wie gewohnt
        let mut mix = vec![0.0f32; FRAME];
        slot.mischen(&mut mix, spaet, 1.0);
        assert_eq!(slot.zustand(), WiedergabeZustand::Active);
        assert!(slot.desync_ms().abs() < 50, "desync {}", slot.desync_ms());
    }

    #[test]
    fn kleiner_rueckstand_beschleunigt() {
        let t0 = Instant::now();
        let slot = PlaybackSlot::neu("anna", &VoiceConfig::default());
        let (mut eingang, s) = session(t0, 1);
        for seq in 0..30 {
            eingang.push(&paket(seq, 0.1), t0);
        }
        slot.play(s);

        let mut mix = vec![0.0f32; FRAME];
        slot.mischen(&mut mix, t0 + ms(50) + ms(200), 1.0);
        let v = slot.geschwindigkeit();
        assert!(v > 1.0 && v <= 1.1, "geschwindigkeit {v}");
    }

    #[test]
    fn vorlaufende_wiedergabe_fuegt_stille_ein() {
        let t0 = Instant::now();
        let slot = PlaybackSlot::neu("anna", &VoiceConfig::default());
        let (mut eingang, s) = session(t0, 1);
        for seq in 0..30 {
            eingang.push(&paket(seq, 0.4), t0);
        }
        let aktivierung = s.aktivierungszeit();
        slot.play(s);

        // Mehrere Bloecke im selben Augenblick: die gelesene Position
        // laeuft der Wanduhr davon
        let mut stille = false;
        for _ in 0..40 {
            let mut mix = vec![0.0f32; FRAME];
            slot.mischen(&mut mix, aktivierung, 1.0);
            if mix.iter().all(|s| *s == 0.0) {
                stille = true;
                break;
            }
        }
        assert!(stille);
        assert!(slot.desync_ms() < 0);
    }

    #[test]
    fn stoppen_leert_slot() {
        let t0 = Instant::now();
        let slot = PlaybackSlot::neu("anna", &VoiceConfig::default());
        let (_e, s) = session(t0, 1);
        slot.play(s);
        slot.stoppen();
        assert_eq!(slot.zustand(), WiedergabeZustand::NoSession);
        let mut mix = vec![0.0f32; 16];
        slot.mischen(&mut mix, t0, 1.0);
        assert!(mix.iter().all(|s| *s == 0.0));
    }
}
