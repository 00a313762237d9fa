// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end scenarios against real wiring: the reference WAV decoder
//! plugin feeding the streamer, and the in-process null sink standing in
//! for a real audio device.

use abi_stable::sabi_trait::TD_Opaque;
use parking_lot::Mutex as PMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use waveloom_core::{
    BuiltinPlugin, CommandLoop, Event, EventBus, EventKind, HostFacade, InMemoryPlaylist,
    NullOutputSink, PlayItem, PluginRegistry, SinkController, SinkState, Streamer,
    TransportCommand,
};
use waveloom_plugin_api::{DecoderPlugin_TO, HostFunctions, OutputSinkPlugin_TO};
use waveloom_wav_decoder::WavDecoderPlugin;

fn write_wav(path: &std::path::Path, sample_rate: u32, channels: u16, seconds: f32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (sample_rate as f32 * seconds) as u32;
    for i in 0..frames * channels as u32 {
        writer.write_sample((i % 1000) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Probes `locator` through the real decoder plugin so `total_samples`/
/// `end_sample` are populated the way a playlist importer would fill them.
fn probed_item(plugin: &waveloom_plugin_api::DecoderPluginBox, locator: &str) -> PlayItem {
    plugin
        .insert(abi_stable::std_types::RStr::from(locator))
        .into_option()
        .expect("probe should succeed")
        .into()
}

struct Harness {
    bus: Arc<EventBus>,
    streamer: Arc<Streamer>,
    sink: Arc<SinkController>,
    host: Arc<HostFacade>,
    _command_loop: CommandLoop,
    // The decoder table streamer holds is an `Arc` clone of this registry's,
    // but `PluginRegistry::drop` clears its tables on the way out — keep it
    // alive for as long as the streamer that shares it.
    _registry: PluginRegistry,
    init_count: Arc<PMutex<u64>>,
    bytes_written: Arc<PMutex<u64>>,
    last_format: Arc<PMutex<Option<waveloom_plugin_api::WaveFormatFfi>>>,
}

fn build_harness(items: Vec<PlayItem>) -> Harness {
    let mut registry = PluginRegistry::new();
    registry.register_builtin(
        "wav",
        BuiltinPlugin::Decoder(DecoderPlugin_TO::from_value(WavDecoderPlugin::new(), TD_Opaque)),
    );

    let null_sink = NullOutputSink::new();
    let bytes_written = null_sink.counter();
    let init_count = null_sink.init_count();
    let last_format = null_sink.last_format();
    registry.register_builtin(
        "null",
        BuiltinPlugin::Output(OutputSinkPlugin_TO::from_value(null_sink, TD_Opaque)),
    );

    let output = registry.take_output("null").unwrap().into_plugin();

    let bus = Arc::new(EventBus::new());
    let (transport_tx, transport_rx) = waveloom_core::transport_channel();
    let host = Arc::new(HostFacade::new(bus.clone(), transport_tx.clone()));
    let playlist: Arc<dyn waveloom_core::PlaylistHandle> = Arc::new(InMemoryPlaylist::new(items));
    let streamer = Arc::new(Streamer::new(bus.clone(), registry.decoder_table(), playlist.clone()));
    let sink = Arc::new(SinkController::new(output, streamer.clone()));
    let command_loop = CommandLoop::spawn(
        bus.clone(),
        streamer.clone(),
        sink.clone(),
        playlist,
        transport_tx,
        transport_rx,
    );

    Harness {
        bus,
        streamer,
        sink,
        host,
        _command_loop: command_loop,
        _registry: registry,
        init_count,
        bytes_written,
        last_format,
    }
}

fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    pred()
}

/// S1: play a single track end to end.
#[test]
fn s1_play_a_single_track() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.wav");
    write_wav(&path, 44100, 2, 1.0);

    let item = probed_item(
        &DecoderPlugin_TO::from_value(WavDecoderPlugin::new(), TD_Opaque),
        path.to_str().unwrap(),
    );

    let harness = build_harness(vec![item]);

    let started = Arc::new(AtomicUsize::new(0));
    let started_clone = started.clone();
    harness
        .host
        .subscribe("test", EventKind::SongStarted, move |_| {
            started_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    harness.host.post_transport(TransportCommand::PlaySong).unwrap();

    assert!(wait_until(Duration::from_secs(2), || started.load(Ordering::SeqCst) >= 1));
    assert!(wait_until(Duration::from_secs(1), || harness.sink.state() == SinkState::Playing));

    assert!(wait_until(Duration::from_millis(500), || *harness.bytes_written.lock() >= 8192));

    let pos1 = harness.streamer.get_playpos();
    std::thread::sleep(Duration::from_millis(100));
    let pos2 = harness.streamer.get_playpos();
    assert!(pos2 >= pos1, "playpos should not go backwards: {pos1} -> {pos2}");
}

/// S2: seek mid-track lands within one sample-period of the target.
#[test]
fn s2_seek_mid_track() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.wav");
    write_wav(&path, 44100, 2, 5.0);
    let item = probed_item(
        &DecoderPlugin_TO::from_value(WavDecoderPlugin::new(), TD_Opaque),
        path.to_str().unwrap(),
    );

    let harness = build_harness(vec![item]);
    harness.host.post_transport(TransportCommand::PlaySong).unwrap();
    assert!(wait_until(Duration::from_secs(2), || harness.streamer.is_track_active()));
    std::thread::sleep(Duration::from_millis(50));

    harness.host.post_transport(TransportCommand::Seek(3.0)).unwrap();

    // The decode thread lands playpos on the exact target the instant it
    // applies the seek; the tolerance here covers scheduling jitter under
    // a loaded test run, not decode granularity.
    assert!(wait_until(Duration::from_secs(1), || {
        (harness.streamer.get_playpos() - 3.0).abs() <= 0.1
    }));
}

/// S3: the playlist advances through both tracks and then stops.
#[test]
fn s3_track_advance() {
    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("a.wav");
    let path_b = dir.path().join("b.wav");
    write_wav(&path_a, 8000, 1, 0.3);
    write_wav(&path_b, 8000, 1, 0.3);

    let decoder = DecoderPlugin_TO::from_value(WavDecoderPlugin::new(), TD_Opaque);
    let item_a = probed_item(&decoder, path_a.to_str().unwrap());
    let item_b = probed_item(&decoder, path_b.to_str().unwrap());

    let harness = build_harness(vec![item_a, item_b]);

    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let e1 = events.clone();
    harness
        .host
        .subscribe("test", EventKind::SongStarted, move |_| e1.lock().unwrap().push("started"))
        .unwrap();
    let e2 = events.clone();
    harness
        .host
        .subscribe("test", EventKind::SongFinished, move |_| e2.lock().unwrap().push("finished"))
        .unwrap();

    harness.host.post_transport(TransportCommand::PlaySong).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        events.lock().unwrap().as_slice() == ["started", "finished", "started", "finished"]
    }));

    assert!(wait_until(Duration::from_secs(1), || harness.sink.state() == SinkState::Stopped));
}

/// S4: advancing to a track with a different format recreates the device queue.
#[test]
fn s4_format_change_triggers_one_reinit() {
    let dir = tempfile::tempdir().unwrap();
    let path_a = dir.path().join("a.wav");
    let path_b = dir.path().join("b.wav");
    write_wav(&path_a, 8000, 1, 0.3);
    write_wav(&path_b, 16000, 2, 0.3);

    let decoder = DecoderPlugin_TO::from_value(WavDecoderPlugin::new(), TD_Opaque);
    let item_a = probed_item(&decoder, path_a.to_str().unwrap());
    let item_b = probed_item(&decoder, path_b.to_str().unwrap());

    let harness = build_harness(vec![item_a, item_b]);
    harness.host.post_transport(TransportCommand::PlaySong).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        harness
            .last_format
            .lock()
            .map(|f| f.sample_rate == 16000 && f.channels == 2)
            .unwrap_or(false)
    }));

    // Exactly two negotiations: the initial 8kHz mono track, then the 16kHz
    // stereo one after advance.
    assert_eq!(*harness.init_count.lock(), 2);
}

/// S5: pause then unpause leaves exactly one audio thread alive and the
/// device toggles running=false then running=true.
#[test]
fn s5_pause_then_unpause() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.wav");
    write_wav(&path, 44100, 2, 2.0);
    let item = probed_item(
        &DecoderPlugin_TO::from_value(WavDecoderPlugin::new(), TD_Opaque),
        path.to_str().unwrap(),
    );

    let harness = build_harness(vec![item]);
    harness.host.post_transport(TransportCommand::PlaySong).unwrap();
    assert!(wait_until(Duration::from_secs(2), || harness.sink.state() == SinkState::Playing));

    harness.host.post_transport(TransportCommand::PauseSong).unwrap();
    assert!(wait_until(Duration::from_secs(1), || harness.sink.state() == SinkState::Paused));

    std::thread::sleep(Duration::from_millis(100));

    harness.host.post_transport(TransportCommand::PlaySong).unwrap();
    assert!(wait_until(Duration::from_secs(1), || harness.sink.state() == SinkState::Playing));

    // Pause keeps the audio thread running rather than tearing it down —
    // only a transition to/from Stopped spawns or joins it.
    assert!(harness.sink.has_audio_thread());

    let pinged = Arc::new(AtomicUsize::new(0));
    let pinged_clone = pinged.clone();
    harness
        .bus
        .subscribe("test", EventKind::VolumeChanged, move |_| {
            pinged_clone.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    harness.bus.emit(Event::VolumeChanged {
        at: Instant::now(),
        db: 0.0,
    });
    assert_eq!(pinged.load(Ordering::SeqCst), 1);
}

/// S6: plugin discovery skips a broken module but keeps the good ones.
#[test]
fn s6_discovery_skips_bad_plugin_keeps_good_ones() {
    let mut registry = PluginRegistry::new();
    registry.register_builtin(
        "a",
        BuiltinPlugin::Decoder(DecoderPlugin_TO::from_value(WavDecoderPlugin::new(), TD_Opaque)),
    );
    registry.register_builtin(
        "c",
        BuiltinPlugin::Output(OutputSinkPlugin_TO::from_value(NullOutputSink::new(), TD_Opaque)),
    );

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.so"), b"not an actual shared object").unwrap();

    // Discovery of a directory containing only a broken module must not
    // error out as a whole, and must not disturb the already-registered
    // builtins.
    registry.discover(dir.path(), &HostFunctions::inert()).unwrap();

    let table = registry.decoder_table();
    let decoders = table.read();
    assert_eq!(decoders.all().len(), 1);
    assert_eq!(decoders.all()[0].id, "a");
    assert_eq!(registry.outputs().count(), 1);
}
