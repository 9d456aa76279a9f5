//! Session-Szenarien ueber die oeffentliche API des Mixers

use parking_lot::Mutex;
use raumklang_core::ParticipantId;
use raumklang_mixer::{
    AudioFrame, FramePool, ManualClock, MixerConfig, ParticipantChannel, ParticipantState,
    QueueChannel, RouterMixer, SharedFramePool, SpatialTag,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SPP: u16 = 480;
const TAKT_US: u64 = 10_000;

#[derive(Clone)]
struct AufzeichnenderKanal {
    id: ParticipantId,
    verbunden: Arc<AtomicBool>,
    gesendet: Arc<Mutex<Vec<AudioFrame>>>,
}

impl AufzeichnenderKanal {
    fn neu() -> Self {
        Self {
            id: ParticipantId::new(),
            verbunden: Arc::new(AtomicBool::new(true)),
            gesendet: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn letzte(&self) -> AudioFrame {
        self.gesendet.lock().last().cloned().expect("keine Ausgabe")
    }
}

impl ParticipantChannel for AufzeichnenderKanal {
    fn id(&self) -> ParticipantId {
        self.id
    }
    fn is_connected(&self) -> bool {
        self.verbunden.load(Ordering::Relaxed)
    }
    fn is_muted(&self) -> bool {
        false
    }
    fn supports_spatial(&self) -> bool {
        true
    }
    fn send(&self, frame: &AudioFrame) {
        self.gesendet.lock().push(frame.clone());
    }
}

struct Session {
    mixer: RouterMixer,
    uhr: ManualClock,
    pool: Arc<SharedFramePool>,
    kanaele: Vec<AufzeichnenderKanal>,
}

impl Session {
    fn neu(anzahl: usize, config: MixerConfig) -> Self {
        let pool = Arc::new(SharedFramePool::neu(SPP as usize));
        let uhr = ManualClock::neu(5_000_000);
        let mut mixer = RouterMixer::mit_config(pool.clone(), config, Arc::new(uhr.clone()))
            .expect("Mixer");
        let kanaele: Vec<_> = (0..anzahl).map(|_| AufzeichnenderKanal::neu()).collect();
        for k in &kanaele {
            mixer.beitreten(Box::new(k.clone())).expect("Beitritt");
        }
        Self {
            mixer,
            uhr,
            pool,
            kanaele,
        }
    }

    fn senden(&mut self, idx: usize, wert: f32) -> usize {
        let mut frame = self.pool.acquire(SPP as usize);
        frame.init(0, 1, 1, SPP, 48_000, false, 0).expect("init");
        frame.samples_mut(0, 0).fill(wert);
        frame.set_spatial_tag(
            0,
            Some(SpatialTag::neu(idx as u32 + 1, [idx as f32, 1.0, 0.0], [0.0; 3])),
        );
        let id = self.kanaele[idx].id;
        self.mixer.frame_empfangen(&id, frame).expect("Frame")
    }

    fn takt(&mut self, werte: &[f32]) {
        for (idx, &wert) in werte.iter().enumerate() {
            self.senden(idx, wert);
        }
        self.uhr.vorstellen(TAKT_US);
    }
}

fn config(prominent_cap: u16) -> MixerConfig {
    MixerConfig {
        speech_packet_threshold: 3,
        silence_packet_threshold: 3,
        new_participant_packets: 3,
        ..MixerConfig::mit_format(48_000, SPP, prominent_cap)
    }
}

#[test]
fn zehn_teilnehmer_zwei_sprecher_werden_prominent() {
    let mut s = Session::neu(10, config(2));
    let mut werte = [0.001f32; 10];
    werte[2] = 0.3;
    werte[7] = 0.25;

    for _ in 0..12 {
        s.takt(&werte);
    }

    let snapshot = s.mixer.snapshot();
    let prominent: Vec<usize> = snapshot
        .teilnehmer
        .iter()
        .enumerate()
        .filter(|(_, t)| t.prominent)
        .map(|(idx, _)| idx)
        .collect();
    assert_eq!(prominent, vec![2, 7]);
    assert_eq!(snapshot.prominente_streams, 2);

    // Die acht leisen erhalten identische Ausgaben: Mix-Minus-Self + zwei Sprecher
    let referenz = s.kanaele[0].letzte();
    for idx in (0..10).filter(|i| !prominent.contains(i)) {
        let ausgabe = s.kanaele[idx].letzte();
        assert_eq!(ausgabe.stream_count(), 3);
        assert!(ausgabe
            .samples(0, 0)
            .iter()
            .all(|&x| (x - 0.007).abs() < 1e-5));
        assert_eq!(ausgabe.samples(1, 0), referenz.samples(1, 0));
        assert_eq!(ausgabe.spatial_tag(1).map(|t| t.source_id), Some(3));
        assert_eq!(ausgabe.spatial_tag(2).map(|t| t.source_id), Some(8));
        assert!(ausgabe.samples(1, 0).iter().all(|&x| (x - 0.3).abs() < 1e-6));
    }

    // Sprecher hoeren den vollen Mix und nur den jeweils anderen Sprecher
    let sprecher = s.kanaele[2].letzte();
    assert!(sprecher.samples(0, 0).iter().all(|&x| (x - 0.008).abs() < 1e-5));
    assert_eq!(sprecher.spatial_tag(1).map(|t| t.source_id), Some(8));
}

#[test]
fn stillstand_fuehrt_zu_hoffnungslos_verspaetet() {
    let mut s = Session::neu(3, config(2));
    for _ in 0..6 {
        s.takt(&[0.1, 0.1, 0.1]);
    }
    let stumm = s.kanaele[2].id;

    // Letzte wartende Frames verbrauchen
    s.senden(0, 0.1);
    s.senden(1, 0.1);

    let mut umgeschaltet_in = None;
    for runde in 1..=15u32 {
        s.uhr.vorstellen(300_000);
        s.senden(0, 0.1);
        s.senden(1, 0.1);
        let state = s.mixer.teilnehmer(&stumm).map(|p| p.state());
        if umgeschaltet_in.is_none() && state == Some(ParticipantState::HopelesslyLate) {
            umgeschaltet_in = Some(runde);
        }
    }

    assert_eq!(umgeschaltet_in, Some(10));
    let c = s.mixer.teilnehmer(&stumm).expect("C");
    assert!(!c.is_wait_candidate());
    assert!(c.verspaetet_in_folge() >= 15);

    // C haelt keine Runde mehr auf
    s.uhr.vorstellen(TAKT_US);
    s.senden(1, 0.1);
    assert_eq!(s.senden(0, 0.1), 1);
}

#[test]
fn repraesentant_mit_hysterese() {
    // Ohne prominente Streams landen alle im Umgebungs-Mix
    let mut s = Session::neu(3, config(0));

    for _ in 0..8 {
        s.takt(&[0.3, 0.2, 0.0]);
    }
    assert_eq!(s.mixer.repraesentant().map(|t| t.source_id), Some(1));
    let ausgabe = s.kanaele[2].letzte();
    assert_eq!(ausgabe.stream_count(), 1);
    assert_eq!(ausgabe.spatial_tag(0).map(|t| t.source_id), Some(1));

    // B wird lauter, A spricht weiter -> Repraesentant bleibt A
    for _ in 0..3 {
        s.takt(&[0.3, 0.6, 0.0]);
    }
    assert_eq!(s.mixer.repraesentant().map(|t| t.source_id), Some(1));

    // A verstummt -> nach der Stille-Schwelle uebernimmt B
    for _ in 0..6 {
        s.takt(&[0.0, 0.6, 0.0]);
    }
    assert_eq!(s.mixer.repraesentant().map(|t| t.source_id), Some(2));
}

#[test]
fn queue_ausgleich_haelt_mindestens_zwei_frames() {
    let mut s = Session::neu(2, config(2));
    for _ in 0..6 {
        s.takt(&[0.01, 0.01]);
    }

    // B faellt aus, A schickt einen Schwall leiser Frames
    s.senden(0, 0.01);
    for _ in 0..8 {
        s.senden(0, 0.01);
    }
    s.uhr.vorstellen(260_000);
    s.senden(0, 0.01);

    // Sechs zu alte Frames verworfen; der Ausgleich stoppt bei zwei Frames,
    // die folgende Runde entnimmt davon einen
    assert_eq!(s.mixer.snapshot().ausgleich_verworfen, 6);
    let a = s.mixer.teilnehmer(&s.kanaele[0].id).expect("A");
    assert_eq!(a.queue_laenge(), 1);
}

#[tokio::test]
async fn ausgaben_kommen_ueber_queue_kanaele_an() {
    let pool: Arc<dyn FramePool> = Arc::new(SharedFramePool::neu(SPP as usize));
    let uhr = ManualClock::neu(1_000_000);
    let mut mixer = RouterMixer::mit_config(pool.clone(), config(2), Arc::new(uhr.clone()))
        .expect("Mixer");

    let mut empfaenger = Vec::new();
    let mut ids = Vec::new();
    for _ in 0..2 {
        let id = ParticipantId::new();
        let (kanal, rx, _steuerung) = QueueChannel::neu(id, false);
        mixer.beitreten(Box::new(kanal)).expect("Beitritt");
        empfaenger.push(rx);
        ids.push(id);
    }

    for takt in 0..2u32 {
        for id in &ids {
            let mut frame = pool.acquire(SPP as usize);
            frame.init(0, 1, 1, SPP, 48_000, false, takt).expect("init");
            frame.samples_mut(0, 0).fill(0.2);
            mixer.frame_empfangen(id, frame).expect("Frame");
        }
        uhr.vorstellen(20_000);
    }

    let erste = empfaenger[0].recv().await.expect("Frame fuer A");
    assert_eq!(erste.sample_count(), SPP);
    assert_eq!(erste.sample_rate(), 48_000);

    let mut fuer_a = vec![erste];
    while let Ok(frame) = empfaenger[0].try_recv() {
        fuer_a.push(frame);
    }
    // A hoert B's Beitrag, nie den eigenen doppelt
    assert!(fuer_a
        .iter()
        .any(|f| f.samples(0, 0).iter().all(|&x| (x - 0.2).abs() < 1e-6)));
    assert!(fuer_a
        .iter()
        .all(|f| f.samples(0, 0).iter().all(|&x| x <= 0.2 + 1e-6)));
    assert!(empfaenger[1].try_recv().is_ok());
}
