//! Full-stack scenarios on the mock backend: configuration in, nodes built
//! lazily, interfaces bridged to the node format, and blocks driven through
//! the mixing, capture, AEC, and muxer paths.

use std::sync::Arc;

use brook_core::{ChannelRole, SampleEncoding, Time, TimeDelta};
use brook_io::{Manager, MockBackend};

fn i16_frames(vals: &[i16]) -> Vec<u8> {
    vals.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

fn stereo() -> Vec<ChannelRole> {
    ChannelRole::default_map()
}

fn manager(backend: &MockBackend, json: &str) -> Manager {
    init_tracing();
    Manager::from_json(Arc::new(backend.clone()), json).unwrap()
}

/// `RUST_LOG=brook_io=debug cargo test` shows the engine's view of a
/// failing scenario.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

const SPEAKER: &str = r#"{
    "speaker": {
        "io": "output",
        "frequency": 48000,
        "channel-map": ["front-left", "front-right"],
        "type": "int16",
        "nb-chunk": 512,
        "volume-name": "MASTER"
    }
}"#;

#[test]
fn resampled_playback_serves_one_second() {
    let backend = MockBackend::new();
    let mgr = manager(&backend, SPEAKER);
    let out = mgr
        .create_output(44100, stereo(), SampleEncoding::Int16, "speaker")
        .unwrap();
    out.start().unwrap();

    // One second of constant full-on signal at the application rate.
    let second: Vec<i16> = vec![1000; 44100 * 2];
    out.write(&i16_frames(&second), 44100).unwrap();

    // Drive one second of hardware time and count frames carrying signal.
    let mut live_frames = 0usize;
    for _ in 0..100 {
        let block = backend.drive_output(0, Time::ZERO, 480).unwrap();
        live_frames += to_i16(&block).chunks_exact(2).filter(|f| f[0] != 0).count();
    }
    // 44100 input frames resample to ~48000; the tail underflows to silence.
    assert!(
        (47800..=48000).contains(&live_frames),
        "served {live_frames} live frames"
    );
}

#[test]
fn two_interfaces_mix_with_saturation() {
    let backend = MockBackend::new();
    let mgr = manager(&backend, SPEAKER);
    let a = mgr
        .create_output(48000, stereo(), SampleEncoding::Int16, "speaker")
        .unwrap();
    let b = mgr
        .create_output(48000, stereo(), SampleEncoding::Int16, "speaker")
        .unwrap();
    a.start().unwrap();
    b.start().unwrap();
    // One node, one hardware stream, two producers.
    assert_eq!(backend.output_count(), 1);

    a.write(&i16_frames(&[20000; 64]), 32).unwrap();
    b.write(&i16_frames(&[20000; 64]), 32).unwrap();
    let block = backend.drive_output(0, Time::ZERO, 32).unwrap();
    // 20000 + 20000 clips at the int16 ceiling, never wraps.
    assert!(to_i16(&block).iter().all(|&v| v == 32767));

    a.write(&i16_frames(&[1000; 64]), 32).unwrap();
    b.write(&i16_frames(&[-250; 64]), 32).unwrap();
    let block = backend.drive_output(0, Time::ZERO, 32).unwrap();
    assert!(to_i16(&block).iter().all(|&v| v == 750));
}

#[test]
fn master_volume_scales_and_mutes_the_stream() {
    let backend = MockBackend::new();
    let mgr = manager(&backend, SPEAKER);
    let out = mgr
        .create_output(48000, stereo(), SampleEncoding::Int16, "speaker")
        .unwrap();
    out.start().unwrap();

    // -6.0206 dB is a linear factor of 0.5.
    mgr.set_volume("MASTER", -6.0206).unwrap();
    assert_eq!(mgr.get_volume("MASTER"), Some(-6.0206));
    out.write(&i16_frames(&[10000; 64]), 32).unwrap();
    let block = backend.drive_output(0, Time::ZERO, 32).unwrap();
    assert!(to_i16(&block).iter().all(|&v| (v - 5000).abs() <= 1));

    mgr.set_mute("MASTER", true);
    assert!(mgr.get_mute("MASTER"));
    out.write(&i16_frames(&[10000; 64]), 32).unwrap();
    let block = backend.drive_output(0, Time::ZERO, 32).unwrap();
    assert!(to_i16(&block).iter().all(|&v| v == 0));

    assert!(mgr.set_volume("MASTER", -400.0).is_err());
}

#[test]
fn capture_broadcasts_to_every_interface() {
    let backend = MockBackend::new();
    let mgr = manager(
        &backend,
        r#"{ "microphone": { "io": "input", "nb-chunk": 256 } }"#,
    );
    let a = mgr
        .create_input(48000, stereo(), SampleEncoding::Int16, "microphone")
        .unwrap();
    let b = mgr
        .create_input(48000, stereo(), SampleEncoding::Int16, "microphone")
        .unwrap();
    a.start().unwrap();
    b.start().unwrap();
    assert_eq!(backend.input_count(), 1);

    let data: Vec<i16> = (0..128).collect();
    assert!(backend.drive_input(0, Time::ZERO, &i16_frames(&data), 64));

    let mut out = vec![0u8; 128 * 2];
    assert_eq!(a.read(&mut out, 64).unwrap(), 64);
    assert_eq!(to_i16(&out), data);
    assert_eq!(b.read(&mut out, 64).unwrap(), 64);
    assert_eq!(to_i16(&out), data);
}

#[test]
fn auto_fields_negotiate_with_the_device() {
    let backend = MockBackend::new()
        .with_rates(&[44100])
        .with_encodings(&[SampleEncoding::Float32]);
    let mgr = manager(
        &backend,
        r#"{ "line": { "io": "input", "frequency": 0, "type": "auto" } }"#,
    );
    let node = mgr.node("line").unwrap();
    assert_eq!(node.hardware_format().rate(), 44100);
    assert_eq!(node.hardware_format().encoding(), SampleEncoding::Float32);
}

const DUPLEX: &str = r#"{
    "speaker": {
        "io": "output",
        "frequency": 48000,
        "channel-map": ["front-left", "front-right"],
        "type": "int16",
        "nb-chunk": 256
    },
    "microphone": {
        "io": "input",
        "frequency": 48000,
        "channel-map": ["front-left", "front-right"],
        "type": "int16",
        "nb-chunk": 256
    },
    "microphone-clean": {
        "io": "aec",
        "map-on-microphone": { "map-on": "microphone" },
        "map-on-feedback": { "map-on": "speaker" },
        "frequency": 48000,
        "channel-map": ["front-center"],
        "type": "int16",
        "nb-chunk": 256
    }
}"#;

#[test]
fn aec_passes_the_microphone_while_the_speaker_is_quiet() {
    let backend = MockBackend::new();
    let mgr = manager(&backend, DUPLEX);
    let clean = mgr
        .create_input(
            48000,
            vec![ChannelRole::FrontCenter],
            SampleEncoding::Int16,
            "microphone-clean",
        )
        .unwrap();
    clean.start().unwrap();
    // Starting the composite stream started both source streams.
    assert_eq!(backend.active_input_count(), 1);
    assert_eq!(backend.active_output_count(), 1);

    // Loud microphone, silent speaker. The gate holds the microphone down
    // until the feedback has been quiet for the 100 ms latency window, then
    // releases over another 100 ms; 48 cycles of 256 frames at 48 kHz put
    // the tail well past both.
    let mic: Vec<i16> = vec![8000; 256 * 2];
    let t0 = Time::from_nanos(1_000_000);
    for k in 0..48u64 {
        let t = t0 + TimeDelta::from_frames(k * 256, 48000);
        assert!(backend.drive_input(0, t, &i16_frames(&mic), 256));
        backend.drive_output(0, t, 256).unwrap();
    }

    let total = 48 * 256;
    let mut out = vec![0u8; total * 2];
    assert_eq!(clean.read(&mut out, total).unwrap(), total);
    let samples = to_i16(&out);
    // Quiet feedback has reopened the gate: the mono mix passes at full gain.
    for &v in &samples[total - 1024..] {
        assert!((v - 8000).abs() <= 1, "sample {v}");
    }
    // The first latency window was still ducked.
    assert!(samples[2048].abs() <= 8000 / 50, "early sample not ducked");

    clean.stop();
    assert_eq!(backend.active_input_count(), 0);
    assert_eq!(backend.active_output_count(), 0);
}

#[test]
fn aec_ducks_the_microphone_while_the_speaker_plays() {
    let backend = MockBackend::new();
    let mgr = manager(&backend, DUPLEX);
    let clean = mgr
        .create_input(
            48000,
            vec![ChannelRole::FrontCenter],
            SampleEncoding::Int16,
            "microphone-clean",
        )
        .unwrap();
    clean.start().unwrap();

    // Something loud on the speaker so its feedback tap carries signal.
    let speaker = mgr
        .create_output(48000, stereo(), SampleEncoding::Int16, "speaker")
        .unwrap();
    speaker.start().unwrap();
    speaker.write(&i16_frames(&vec![20000; 4096 * 2]), 4096).unwrap();

    let mic: Vec<i16> = vec![8000; 256 * 2];
    let t0 = Time::from_nanos(1_000_000);
    for k in 0..8u64 {
        let t = t0 + TimeDelta::from_frames(k * 256, 48000);
        assert!(backend.drive_input(0, t, &i16_frames(&mic), 256));
        backend.drive_output(0, t, 256).unwrap();
    }

    let mut out = vec![0u8; 2048 * 2];
    assert_eq!(clean.read(&mut out, 2048).unwrap(), 2048);
    // 1 ms attack at 48 kHz: the gain floor is reached within 48 frames.
    let tail = &to_i16(&out)[1024..];
    for &v in tail {
        assert!(v.abs() <= 8000 / 50, "sample {v} not ducked");
    }
}

#[test]
fn muxer_merges_two_captures_by_channel_map() {
    let backend = MockBackend::new();
    let mgr = manager(
        &backend,
        r#"{
            "mic-a": { "io": "input", "channel-map": ["front-center"], "nb-chunk": 256 },
            "mic-b": { "io": "input", "channel-map": ["front-center"], "nb-chunk": 256 },
            "paired": {
                "io": "muxer",
                "map-on-input-1": { "map-on": "mic-a" },
                "map-on-input-2": { "map-on": "mic-b" },
                "input-1-remap": ["front-left"],
                "input-2-remap": ["front-right"],
                "frequency": 48000,
                "channel-map": ["front-left", "front-right"],
                "mux-demux-type": "int16",
                "nb-chunk": 256
            }
        }"#,
    );
    let paired = mgr
        .create_input(48000, stereo(), SampleEncoding::Int16, "paired")
        .unwrap();
    paired.start().unwrap();
    assert_eq!(backend.active_input_count(), 2);

    let a: Vec<i16> = vec![300; 256];
    let b: Vec<i16> = vec![-300; 256];
    let t0 = Time::from_nanos(1_000_000);
    for k in 0..4u64 {
        let t = t0 + TimeDelta::from_frames(k * 256, 48000);
        assert!(backend.drive_input(0, t, &i16_frames(&a), 256));
        assert!(backend.drive_input(1, t, &i16_frames(&b), 256));
    }

    let mut out = vec![0u8; 1024 * 4];
    assert_eq!(paired.read(&mut out, 1024).unwrap(), 1024);
    for frame in to_i16(&out).chunks_exact(2) {
        assert_eq!(frame, [300, -300]);
    }
}

#[test]
fn unknown_stream_is_reported() {
    let backend = MockBackend::new();
    let mgr = manager(&backend, SPEAKER);
    let err = mgr
        .create_output(48000, stereo(), SampleEncoding::Int16, "basement")
        .unwrap_err();
    assert!(matches!(err, brook_io::Error::Config(_)));
}
