// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Output sink controller: the `STOPPED`/`PAUSED`/`PLAYING` state machine
//! and its dedicated audio thread (spec §4.5).

use crate::error::SinkDeviceError;
use crate::streamer::Streamer;
use crate::types::{SinkState, WaveFormat};
use abi_stable::std_types::{RResult, RSlice};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use waveloom_plugin_api::OutputSinkPluginBox;

/// Bytes pulled from the streamer per audio-thread tick. Matches the
/// decode chunk size so one tick's worth of decode keeps pace with one
/// tick's worth of playback.
const BLOCK_BYTES: usize = 8192;

const IDLE_SLEEP: Duration = Duration::from_millis(10);

struct SinkShared {
    plugin: OutputSinkPluginBox,
    state: SinkState,
    last_format: Option<WaveFormat>,
}

/// The running audio thread plus the flag used to ask it to exit. Exists
/// only while `SinkShared::state != Stopped` (spec §4.5): spawned on the
/// STOPPED->PLAYING/PAUSED transition, joined on the ->STOPPED one.
struct AudioThread {
    stop_flag: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns exactly one `OutputSinkPlugin` and the audio thread that drives
/// it. Unlike a pool worker, the thread is not kept alive across a stop:
/// `stop()` joins it and `play()`/`pause()` from `Stopped` spawn a fresh
/// one, matching the transitions spec §4.5 names explicitly.
pub struct SinkController {
    shared: Arc<Mutex<SinkShared>>,
    streamer: Arc<Streamer>,
    thread: Mutex<Option<AudioThread>>,
}

impl SinkController {
    pub fn new(plugin: OutputSinkPluginBox, streamer: Arc<Streamer>) -> Self {
        let shared = Arc::new(Mutex::new(SinkShared {
            plugin,
            state: SinkState::Stopped,
            last_format: None,
        }));

        Self {
            shared,
            streamer,
            thread: Mutex::new(None),
        }
    }

    fn spawn_thread(&self) -> AudioThread {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_shared = self.shared.clone();
        let thread_stop = stop_flag.clone();
        let streamer = self.streamer.clone();
        let handle = std::thread::Builder::new()
            .name("waveloom-audio".into())
            .spawn(move || audio_thread_main(thread_shared, thread_stop, streamer))
            .expect("failed to spawn audio thread");
        AudioThread { stop_flag, handle }
    }

    /// Replaces a finished (or never-started) thread slot with a freshly
    /// spawned one. The previous handle, if any, belongs to a thread that
    /// already exited on its own (playlist exhaustion) or was never
    /// spawned; joining it is instant either way.
    fn ensure_thread_running(&self, thread_guard: &mut Option<AudioThread>) {
        if let Some(prev) = thread_guard.take() {
            prev.stop_flag.store(true, Ordering::Relaxed);
            let _ = prev.handle.join();
        }
        *thread_guard = Some(self.spawn_thread());
    }

    pub fn play(&self) -> Result<(), SinkDeviceError> {
        let mut thread_guard = self.thread.lock();
        let mut shared = self.shared.lock();
        let from_stopped = shared.state == SinkState::Stopped;
        let result = if shared.state == SinkState::Paused {
            shared.plugin.unpause()
        } else {
            shared.plugin.play()
        };
        into_result(result)?;
        shared.state = SinkState::Playing;
        drop(shared);
        if from_stopped {
            self.ensure_thread_running(&mut thread_guard);
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<(), SinkDeviceError> {
        let mut thread_guard = self.thread.lock();
        let mut shared = self.shared.lock();
        let from_stopped = shared.state == SinkState::Stopped;
        into_result(shared.plugin.pause())?;
        shared.state = SinkState::Paused;
        drop(shared);
        if from_stopped {
            self.ensure_thread_running(&mut thread_guard);
        }
        Ok(())
    }

    pub fn stop(&self) -> Result<(), SinkDeviceError> {
        let mut thread_guard = self.thread.lock();
        {
            let mut shared = self.shared.lock();
            into_result(shared.plugin.stop())?;
            shared.plugin.free();
            shared.state = SinkState::Stopped;
            shared.last_format = None;
        }
        if let Some(thread) = thread_guard.take() {
            thread.stop_flag.store(true, Ordering::Relaxed);
            let _ = thread.handle.join();
        }
        Ok(())
    }

    pub fn state(&self) -> SinkState {
        self.shared.lock().state
    }

    /// Whether an audio thread is currently spawned. Exposed so tests can
    /// check the `state != Stopped` <=> thread-alive invariant (spec §4.5,
    /// testable property 5) without reaching into private fields.
    pub fn has_audio_thread(&self) -> bool {
        self.thread.lock().is_some()
    }
}

impl Drop for SinkController {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.lock().take() {
            thread.stop_flag.store(true, Ordering::Relaxed);
            let _ = thread.handle.join();
        }
    }
}

fn into_result<T>(r: RResult<T, waveloom_plugin_api::SinkDeviceError>) -> Result<T, SinkDeviceError> {
    match r {
        RResult::ROk(v) => Ok(v),
        RResult::RErr(e) => Err(e.into()),
    }
}

fn audio_thread_main(shared: Arc<Mutex<SinkShared>>, stop_flag: Arc<AtomicBool>, streamer: Arc<Streamer>) {
    let mut buf = vec![0u8; BLOCK_BYTES];

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            shared.lock().plugin.free();
            return;
        }

        let mut guard = shared.lock();
        if guard.state != SinkState::Playing {
            drop(guard);
            std::thread::sleep(IDLE_SLEEP);
            continue;
        }

        if streamer.is_playlist_exhausted() && !streamer.is_track_active() && !streamer.ok_to_read(-1) {
            match guard.plugin.stop() {
                RResult::ROk(()) => {}
                RResult::RErr(e) => tracing::warn!(error = %e, "sink stop failed at playlist end"),
            }
            guard.plugin.free();
            guard.state = SinkState::Stopped;
            guard.last_format = None;
            drop(guard);
            // The controller's invariant is "the audio thread exists iff
            // state != Stopped"; having just made that transition
            // ourselves, exit rather than idle-loop as a live thread
            // backing a Stopped state. `SinkController::play`/`pause`
            // will spawn a fresh thread on the next STOPPED transition.
            return;
        }

        if let Some(fmt) = streamer.current_format() {
            if guard.last_format != Some(fmt) {
                guard.plugin.free();
                match guard.plugin.init(fmt.into()) {
                    RResult::ROk(()) => guard.last_format = Some(fmt),
                    RResult::RErr(e) => {
                        tracing::warn!(error = %e, "sink init failed after format change");
                        drop(guard);
                        std::thread::sleep(IDLE_SLEEP);
                        continue;
                    }
                }
            }
        }

        if streamer.ok_to_read(-1) {
            let n = streamer.read(&mut buf);
            if n < buf.len() {
                buf[n..].fill(0);
            }
            if let RResult::RErr(e) = guard.plugin.write(RSlice::from(&buf[..])) {
                tracing::warn!(error = %e, "sink write failed");
            }
            drop(guard);
        } else {
            drop(guard);
            std::thread::sleep(IDLE_SLEEP);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::null_sink::NullOutputSink;
    use crate::playlist::InMemoryPlaylist;
    use crate::registry::DecoderTable;
    use abi_stable::sabi_trait::TD_Opaque;
    use waveloom_plugin_api::OutputSinkPlugin_TO;

    fn controller() -> SinkController {
        let bus = Arc::new(EventBus::new());
        let decoders = Arc::new(parking_lot::RwLock::new(DecoderTable::default()));
        let playlist: Arc<dyn crate::playlist::PlaylistHandle> = Arc::new(InMemoryPlaylist::new(Vec::new()));
        let streamer = Arc::new(Streamer::new(bus, decoders, playlist));
        let plugin = OutputSinkPlugin_TO::from_value(NullOutputSink::new(), TD_Opaque);
        SinkController::new(plugin, streamer)
    }

    #[test]
    fn starts_stopped_with_no_audio_thread() {
        let sink = controller();
        assert_eq!(sink.state(), SinkState::Stopped);
        assert!(!sink.has_audio_thread());
    }

    #[test]
    fn play_from_stopped_spawns_a_thread() {
        let sink = controller();
        sink.play().unwrap();
        assert_eq!(sink.state(), SinkState::Playing);
        assert!(sink.has_audio_thread());
    }

    #[test]
    fn pause_from_stopped_also_spawns_a_thread() {
        let sink = controller();
        sink.pause().unwrap();
        assert_eq!(sink.state(), SinkState::Paused);
        assert!(sink.has_audio_thread());
    }

    #[test]
    fn pause_then_play_does_not_respawn_the_thread() {
        let sink = controller();
        sink.play().unwrap();
        assert!(sink.has_audio_thread());
        sink.pause().unwrap();
        assert!(sink.has_audio_thread());
        sink.play().unwrap();
        assert!(sink.has_audio_thread());
    }

    #[test]
    fn stop_joins_the_thread_and_frees_the_plugin() {
        let sink = controller();
        sink.play().unwrap();
        assert!(sink.has_audio_thread());
        sink.stop().unwrap();
        assert_eq!(sink.state(), SinkState::Stopped);
        assert!(!sink.has_audio_thread());
    }
}
