//! Ende-zu-Ende: empfangene Pakete bis zum gemischten Ausgang

use std::sync::Arc;
use std::time::{Duration, Instant};

use sprechfunk_audio::{PcmEncoder, PcmFabrik, VoiceEncoder, WaveFormat};
use sprechfunk_core::{ChannelPriority, VoiceConfig, VoiceEvent, VoicePacket};
use sprechfunk_voice::{PlaybackOrchestrator, WiedergabeZustand};

const RATE: u32 = 48_000;
const FRAME: usize = 960;
const FRAME_DAUER: Duration = Duration::from_millis(20);

fn orchestrator() -> PlaybackOrchestrator {
    let fabrik = Arc::new(PcmFabrik::neu(WaveFormat::mono(RATE), FRAME));
    PlaybackOrchestrator::neu(fabrik, &VoiceConfig::default(), RATE)
}

/// Frame mit konstantem Wert `0.1 * (seq + 1)`
fn paket(seq: u32) -> VoiceEvent {
    let mut enc = PcmEncoder::neu(WaveFormat::mono(RATE), FRAME);
    let wert = 0.1 * (seq + 1) as f32;
    VoiceEvent::VoicePacketReceived(VoicePacket {
        sender: "anna".into(),
        priority: ChannelPriority::Default,
        positional: false,
        payload: enc.encode(&[wert; FRAME]).unwrap(),
        sequence_number: seq,
    })
}

fn anna() -> String {
    "anna".to_owned()
}

#[test]
fn verlorener_frame_wird_stille_rest_bleibt_synchron() {
    let mut o = orchestrator();
    let t0 = Instant::now();

    o.ereignis(&VoiceEvent::PlayerStartedSpeaking { name: anna() }, t0).unwrap();
    for seq in [0u32, 1, 2, 4, 5] {
        o.ereignis(&paket(seq), t0 + FRAME_DAUER * seq).unwrap();
    }

    let aktivierung = o.playback_von("anna").unwrap().naechste_aktivierung().unwrap();
    assert!(aktivierung >= t0 + Duration::from_millis(50));
    o.update(aktivierung);

    let slot = o.mixer().slot("anna");
    assert_eq!(slot.zustand(), WiedergabeZustand::Active);

    let mut block = vec![0.0f32; FRAME];
    for k in 0..6u32 {
        o.mixer().mischen(&mut block, aktivierung + FRAME_DAUER * k);

        let geschwindigkeit = slot.geschwindigkeit();
        assert!((0.9..=1.1).contains(&geschwindigkeit), "geschwindigkeit {geschwindigkeit}");

        if k == 3 {
            assert!(block.iter().all(|s| *s == 0.0), "block 3 muss still sein");
        } else {
            let erwartet = 0.1 * (k + 1) as f32;
            for (i, s) in block.iter().enumerate() {
                assert!((s - erwartet).abs() < 1e-3, "block {k} sample {i}: {s} statt {erwartet}");
            }
        }
    }
    assert_eq!(slot.desync_ms(), 0);
}

#[test]
fn gestoppte_session_wird_ausgespielt_und_freigegeben() {
    let mut o = orchestrator();
    let t0 = Instant::now();

    o.ereignis(&VoiceEvent::PlayerStartedSpeaking { name: anna() }, t0).unwrap();
    o.ereignis(&paket(0), t0).unwrap();
    o.ereignis(&paket(1), t0 + FRAME_DAUER).unwrap();
    o.ereignis(&VoiceEvent::PlayerStoppedSpeaking { name: anna() }, t0 + FRAME_DAUER).unwrap();

    let aktivierung = o.playback_von("anna").unwrap().naechste_aktivierung().unwrap();
    o.update(aktivierung);
    let slot = o.mixer().slot("anna");
    assert_eq!(slot.zustand(), WiedergabeZustand::Draining);

    let mut block = vec![0.0f32; FRAME];
    o.mixer().mischen(&mut block, aktivierung);
    assert!((block[0] - 0.1).abs() < 1e-3);
    o.mixer().mischen(&mut block, aktivierung + FRAME_DAUER);
    assert!((block[FRAME - 1] - 0.2).abs() < 1e-3);
    assert_eq!(slot.zustand(), WiedergabeZustand::Complete);

    o.update(aktivierung + FRAME_DAUER * 2);
    assert_eq!(slot.zustand(), WiedergabeZustand::NoSession);

    // Danach nur noch Stille
    o.mixer().mischen(&mut block, aktivierung + FRAME_DAUER * 3);
    assert!(block.iter().all(|s| *s == 0.0));
}

#[test]
fn hoehere_prioritaet_blendet_andere_aus() {
    let mut o = orchestrator();
    let t0 = Instant::now();
    let mut enc = PcmEncoder::neu(WaveFormat::mono(RATE), FRAME);

    for (name, prio, wert) in [("anna", ChannelPriority::Default, 0.2f32), ("ben", ChannelPriority::High, 0.3)] {
        o.ereignis(&VoiceEvent::PlayerStartedSpeaking { name: name.into() }, t0).unwrap();
        for seq in 0..4u32 {
            let ereignis = VoiceEvent::VoicePacketReceived(VoicePacket {
                sender: name.into(),
                priority: prio,
                positional: false,
                payload: enc.encode(&[wert; FRAME]).unwrap(),
                sequence_number: seq,
            });
            o.ereignis(&ereignis, t0).unwrap();
        }
    }

    let aktivierung = ["anna", "ben"]
        .iter()
        .filter_map(|n| o.playback_von(n).and_then(|p| p.naechste_aktivierung()))
        .max()
        .unwrap();
    o.update(aktivierung);

    // Im ersten Block wird anna noch ueber die Blocklaenge ausgeblendet
    let mut block = vec![0.0f32; FRAME];
    o.mixer().mischen(&mut block, aktivierung);
    o.mixer().mischen(&mut block, aktivierung + FRAME_DAUER);
    o.mixer().mischen(&mut block, aktivierung + FRAME_DAUER * 2);

    // anna ist ausgeblendet, nur ben bleibt
    assert!((block[FRAME - 1] - 0.3).abs() < 1e-3, "sample {}", block[FRAME - 1]);
}
