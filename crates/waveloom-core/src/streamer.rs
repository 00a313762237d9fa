// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Streamer (spec §4.4): owns the currently playing `DecoderInstance`,
//! brokers PCM between it and the sink through an internal ring, tracks
//! playback position, and honours seeks.

use crate::bus::{Event, EventBus};
use crate::registry::DecoderTable;
use crate::ringbuf::{RingBuffer, RingBufferReader, RingBufferWriter};
use crate::types::{PlayItem, PlaybackOrder, WaveFormat};
use abi_stable::std_types::RSliceMut;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use waveloom_plugin_api::DecoderInstanceBox;

/// Default PCM ring capacity in bytes: a few seconds at CD quality, large
/// enough that decode can run ahead of playback by a bounded amount.
const RING_CAPACITY_BYTES: usize = 256 * 1024;

/// Block size the decode thread reads in one `DecoderInstance::read` call.
const DECODE_CHUNK_BYTES: usize = 8192;

enum DecodeCommand {
    Load(PlayItem),
    Seek(f64),
    Stop,
    Shutdown,
}

struct ActiveTrack {
    item: PlayItem,
    instance: DecoderInstanceBox,
    format: WaveFormat,
}

struct DecodeThreadState {
    active: Option<ActiveTrack>,
    order: PlaybackOrder,
}

struct Shared {
    bus: Arc<EventBus>,
    decoders: Arc<RwLock<DecoderTable>>,
    playlist: Arc<dyn crate::playlist::PlaylistHandle>,
    current_format: Mutex<Option<WaveFormat>>,
    frames_consumed: AtomicI64,
    track_active: AtomicBool,
    /// Set once the playlist runs out after a track finishes; cleared the
    /// next time a track loads. Lets the sink notice "nothing left to
    /// play" without polling the playlist itself.
    playlist_exhausted: AtomicBool,
    /// Shared with the decode thread so a seek/stop/load can flush
    /// already-queued PCM instead of leaving it for the sink to drain
    /// before the repositioned audio becomes visible.
    ring_reader: Mutex<RingBufferReader<u8>>,
}

/// Non-blocking PCM broker between the current decoder and the sink.
pub struct Streamer {
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<DecodeCommand>,
    thread: Option<JoinHandle<()>>,
}

impl Streamer {
    pub fn new(
        bus: Arc<EventBus>,
        decoders: Arc<RwLock<DecoderTable>>,
        playlist: Arc<dyn crate::playlist::PlaylistHandle>,
    ) -> Self {
        let (writer, reader) = RingBuffer::<u8>::new(RING_CAPACITY_BYTES).split();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            bus,
            decoders,
            playlist,
            current_format: Mutex::new(None),
            frames_consumed: AtomicI64::new(0),
            track_active: AtomicBool::new(false),
            playlist_exhausted: AtomicBool::new(false),
            ring_reader: Mutex::new(reader),
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("waveloom-decode".into())
            .spawn(move || decode_thread_main(thread_shared, cmd_rx, writer))
            .expect("failed to spawn decode thread");

        Self {
            shared,
            cmd_tx,
            thread: Some(thread),
        }
    }

    /// Loads `item` as the current track: tears down any existing
    /// `DecoderInstance`, opens and inits a new one, emits `SongStarted`.
    pub fn load(&self, item: PlayItem) {
        let _ = self.cmd_tx.send(DecodeCommand::Load(item));
    }

    pub fn stop(&self) {
        let _ = self.cmd_tx.send(DecodeCommand::Stop);
        self.shared.ring_reader.lock().clear();
    }

    /// Records a pending seek; applied on the decode thread's next tick.
    pub fn set_seek(&self, t_seconds: f64) {
        let _ = self.cmd_tx.send(DecodeCommand::Seek(t_seconds));
    }

    /// Non-blocking predicate: true when a subsequent `read` is expected to
    /// yield at least one sample worth of data.
    pub fn ok_to_read(&self, _hint: i64) -> bool {
        self.shared.ring_reader.lock().available() > 0
    }

    /// Non-blocking; returns bytes written (possibly short, possibly zero).
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut reader = self.shared.ring_reader.lock();
        let mut written = 0;
        while written < buf.len() {
            match reader.pop() {
                Some(byte) => {
                    buf[written] = byte;
                    written += 1;
                }
                None => break,
            }
        }
        if written > 0 {
            if let Some(fmt) = *self.shared.current_format.lock() {
                let frame_bytes = fmt.bytes_per_frame().max(1);
                self.shared
                    .frames_consumed
                    .fetch_add((written / frame_bytes) as i64, Ordering::Relaxed);
            }
        }
        written
    }

    pub fn get_playpos(&self) -> f64 {
        let fmt = *self.shared.current_format.lock();
        match fmt {
            Some(fmt) if fmt.sample_rate > 0 => {
                self.shared.frames_consumed.load(Ordering::Relaxed) as f64 / fmt.sample_rate as f64
            }
            _ => 0.0,
        }
    }

    pub fn current_format(&self) -> Option<WaveFormat> {
        *self.shared.current_format.lock()
    }

    pub fn is_track_active(&self) -> bool {
        self.shared.track_active.load(Ordering::Relaxed)
    }

    /// True once a track has finished and the playlist had nothing left
    /// to advance to. The sink uses this to stop itself instead of idling
    /// on a silent device.
    pub fn is_playlist_exhausted(&self) -> bool {
        self.shared.playlist_exhausted.load(Ordering::Relaxed)
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(DecodeCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn open_decoder_for(
    decoders: &RwLock<DecoderTable>,
    item: &PlayItem,
) -> Option<(DecoderInstanceBox, WaveFormat)> {
    let table = decoders.read();
    let record = table
        .by_id(&item.decoder_id)
        .or_else(|| table.active().next())?;
    let mut instance = record.plugin().open();
    let ffi_item = item.into();
    let result = instance.init(&ffi_item);
    match result {
        abi_stable::std_types::RResult::ROk(fmt) => Some((instance, fmt.into())),
        abi_stable::std_types::RResult::RErr(e) => {
            tracing::warn!(error = %e, locator = %item.locator, "decoder init failed");
            None
        }
    }
}

fn decode_thread_main(
    shared: Arc<Shared>,
    cmd_rx: mpsc::Receiver<DecodeCommand>,
    mut writer: RingBufferWriter<u8>,
) {
    let mut state = DecodeThreadState {
        active: None,
        order: PlaybackOrder::Linear,
    };
    let mut chunk = vec![0u8; DECODE_CHUNK_BYTES];

    loop {
        let mut shutdown = false;
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                DecodeCommand::Shutdown => {
                    shutdown = true;
                }
                DecodeCommand::Stop => {
                    if let Some(track) = state.active.take() {
                        drop(track.instance);
                    }
                    *shared.current_format.lock() = None;
                    shared.track_active.store(false, Ordering::Relaxed);
                    shared
                        .frames_consumed
                        .store(0, Ordering::Relaxed);
                    shared.ring_reader.lock().clear();
                }
                DecodeCommand::Load(item) => {
                    load_track(&shared, &mut state, item);
                }
                DecodeCommand::Seek(t) => {
                    if let Some(track) = state.active.as_mut() {
                        let sample = (t * track.format.sample_rate as f64).round() as i64;
                        match track.instance.seek_sample(sample) {
                            abi_stable::std_types::RResult::ROk(()) => {
                                shared.frames_consumed.store(
                                    (t * track.format.sample_rate as f64) as i64,
                                    Ordering::Relaxed,
                                );
                                // Drop already-decoded pre-seek PCM so the
                                // sink's next read reflects the new position
                                // instead of draining stale buffered audio.
                                shared.ring_reader.lock().clear();
                            }
                            abi_stable::std_types::RResult::RErr(e) => {
                                tracing::warn!(error = %e, "seek failed");
                            }
                        }
                    }
                }
            }
        }
        if shutdown {
            return;
        }

        if state.active.is_some() && writer.available() * 2 < writer.capacity() {
            let (n, format) = {
                let track = state.active.as_mut().unwrap();
                let buf = RSliceMut::from(&mut chunk[..]);
                (track.instance.read(buf), track.format)
            };
            if n > 0 {
                writer.push_slice(&chunk[..n as usize]);
                // Pace decode to roughly the rate the sink consumes at.
                // Without this a track much smaller than the ring
                // buffer (or several in a row) decodes and auto-advances
                // in one burst, finishing the whole playlist before the
                // audio thread gets a single tick to observe it.
                let bytes_per_frame = format.bytes_per_frame().max(1);
                if format.sample_rate > 0 {
                    let frames = n as usize / bytes_per_frame;
                    let secs = frames as f64 / format.sample_rate as f64;
                    std::thread::sleep(Duration::from_secs_f64(secs));
                }
                continue;
            } else {
                // End of track: finish, advance, or stop.
                let finished_item = state.active.take().map(|t| t.item);
                if let Some(item) = finished_item {
                    shared.bus.emit(Event::SongFinished {
                        at: std::time::Instant::now(),
                        item,
                    });
                }
                shared.track_active.store(false, Ordering::Relaxed);
                match shared.playlist.advance(state.order) {
                    Some(next) => load_track(&shared, &mut state, next),
                    None => {
                        *shared.current_format.lock() = None;
                        shared.playlist_exhausted.store(true, Ordering::Relaxed);
                    }
                }
                continue;
            }
        }

        std::thread::sleep(Duration::from_millis(2));
    }
}

fn load_track(shared: &Arc<Shared>, state: &mut DecodeThreadState, item: PlayItem) {
    if let Some(prev) = state.active.take() {
        drop(prev.instance);
    }
    // Any PCM still queued belongs to the track being replaced; drop it so
    // the sink doesn't play a tail of the old track (and, on a format
    // change, doesn't misinterpret old-format bytes under the new one).
    shared.ring_reader.lock().clear();
    match open_decoder_for(&shared.decoders, &item) {
        Some((instance, format)) => {
            *shared.current_format.lock() = Some(format);
            shared.track_active.store(true, Ordering::Relaxed);
            shared.playlist_exhausted.store(false, Ordering::Relaxed);
            shared.frames_consumed.store(
                (item.start_sample).max(0),
                Ordering::Relaxed,
            );
            shared.bus.emit(Event::SongStarted {
                at: std::time::Instant::now(),
                item: item.clone(),
            });
            state.active = Some(ActiveTrack {
                item,
                instance,
                format,
            });
        }
        None => {
            shared.track_active.store(false, Ordering::Relaxed);
            *shared.current_format.lock() = None;
        }
    }
}
