// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Transport commands and the serial command loop that applies them to
//! the streamer, sink, and playlist (spec §5/§6).

use crate::bus::{Event, EventBus};
use crate::playlist::PlaylistHandle;
use crate::sink::SinkController;
use crate::streamer::Streamer;
use crate::types::PlaybackOrder;
use parking_lot::Mutex;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// One command per message-loop entry point named in spec §6
/// (`M_PLAYSONG`/`M_STOPSONG`/`M_PAUSESONG`/`M_NEXTSONG`/`M_PREVSONG`/
/// `M_PLAYRANDOM`/`M_TERMINATE`), plus the seek and order controls the
/// host façade exposes to collaborators.
#[derive(Debug, Clone, Copy)]
pub enum TransportCommand {
    PlaySong,
    StopSong,
    PauseSong,
    UnpauseSong,
    NextSong,
    PrevSong,
    PlayRandom,
    Seek(f64),
    SetOrder(PlaybackOrder),
    Terminate,
}

/// Bounded capacity for the transport command queue; a full queue makes
/// `post_transport` fail fast with `MessageQueueFull` rather than block.
const QUEUE_CAPACITY: usize = 64;

/// Creates the transport channel. Split out from `CommandLoop::spawn` so a
/// `SyncSender` clone can be handed to the host façade (and from there,
/// into `HostFunctions::post_transport`) before the command loop itself —
/// and before plugin discovery, which needs the façade — is spawned.
/// `SyncSender::try_send` queues onto the channel fine before any
/// `Receiver` exists to drain it.
pub fn channel() -> (SyncSender<TransportCommand>, Receiver<TransportCommand>) {
    sync_channel(QUEUE_CAPACITY)
}

/// Serial applier of `TransportCommand`s to the streamer/sink/playlist.
/// Runs on its own thread so callers (the host façade, a GUI, a plugin
/// callback) never touch streamer/sink state directly.
pub struct CommandLoop {
    tx: SyncSender<TransportCommand>,
    thread: Option<JoinHandle<()>>,
}

impl CommandLoop {
    pub fn spawn(
        bus: Arc<EventBus>,
        streamer: Arc<Streamer>,
        sink: Arc<SinkController>,
        playlist: Arc<dyn PlaylistHandle>,
        tx: SyncSender<TransportCommand>,
        rx: Receiver<TransportCommand>,
    ) -> Self {
        let thread = std::thread::Builder::new()
            .name("waveloom-transport".into())
            .spawn(move || command_loop_main(bus, streamer, sink, playlist, rx))
            .expect("failed to spawn transport thread");

        Self {
            tx,
            thread: Some(thread),
        }
    }

    pub fn sender(&self) -> SyncSender<TransportCommand> {
        self.tx.clone()
    }
}

impl Drop for CommandLoop {
    fn drop(&mut self) {
        let _ = self.tx.try_send(TransportCommand::Terminate);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn command_loop_main(
    bus: Arc<EventBus>,
    streamer: Arc<Streamer>,
    sink: Arc<SinkController>,
    playlist: Arc<dyn PlaylistHandle>,
    rx: Receiver<TransportCommand>,
) {
    let order = Mutex::new(PlaybackOrder::Linear);

    while let Ok(cmd) = rx.recv() {
        match cmd {
            TransportCommand::Terminate => {
                let _ = sink.stop();
                streamer.stop();
                return;
            }
            TransportCommand::PlaySong => {
                let item = playlist.current().or_else(|| playlist.advance(*order.lock()));
                if let Some(item) = item {
                    streamer.load(item);
                    if sink.play().is_ok() {
                        bus.emit(Event::Unpaused {
                            at: std::time::Instant::now(),
                        });
                    }
                }
            }
            TransportCommand::StopSong => {
                let _ = sink.stop();
                streamer.stop();
                bus.emit(Event::Stopped {
                    at: std::time::Instant::now(),
                });
            }
            TransportCommand::PauseSong => {
                if sink.pause().is_ok() {
                    bus.emit(Event::Paused {
                        at: std::time::Instant::now(),
                    });
                }
            }
            TransportCommand::UnpauseSong => {
                if sink.play().is_ok() {
                    bus.emit(Event::Unpaused {
                        at: std::time::Instant::now(),
                    });
                }
            }
            TransportCommand::NextSong => {
                if let Some(item) = playlist.advance(*order.lock()) {
                    streamer.load(item);
                    let _ = sink.play();
                }
            }
            TransportCommand::PrevSong => {
                if let Some(item) = playlist.previous() {
                    streamer.load(item);
                    let _ = sink.play();
                }
            }
            TransportCommand::PlayRandom => {
                if let Some(item) = playlist.advance(PlaybackOrder::Random) {
                    streamer.load(item);
                    let _ = sink.play();
                }
            }
            TransportCommand::Seek(t) => {
                streamer.set_seek(t);
            }
            TransportCommand::SetOrder(new_order) => {
                *order.lock() = new_order;
            }
        }
    }
}
