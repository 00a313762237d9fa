// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Host façade (spec §4.6): a thin re-export of the bus, transport, and
//! volume surface, handed to the command loop and to any in-process
//! collaborator that needs it. Transport entries post onto the command
//! queue rather than acting directly, so callers cannot reentrantly
//! corrupt the streamer.
//!
//! `host_functions` additionally exposes this same surface across the
//! dynamic-loading ABI as a `HostFunctions` table (spec §4.1/§4.6), so
//! out-of-tree plugins can subscribe to events, post transport commands,
//! and read/set volume without linking against `waveloom-core` directly.

use crate::bus::{Event, EventBus, EventKind, SubscriptionId};
use crate::error::TransportError;
use crate::transport::TransportCommand;
use crate::types::PlayItem;
use parking_lot::RwLock;
use std::os::raw::c_void;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use waveloom_plugin_api::{
    EventCallbackFn, EventFfi, EventKindFfi, HostFunctions, TransportCommandFfi, TransportCommandKind,
};

impl From<EventKind> for EventKindFfi {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::SongStarted => EventKindFfi::SongStarted,
            EventKind::SongFinished => EventKindFfi::SongFinished,
            EventKind::Paused => EventKindFfi::Paused,
            EventKind::Unpaused => EventKindFfi::Unpaused,
            EventKind::Stopped => EventKindFfi::Stopped,
            EventKind::VolumeChanged => EventKindFfi::VolumeChanged,
            EventKind::PluginLoaded => EventKindFfi::PluginLoaded,
            EventKind::PluginUnloaded => EventKindFfi::PluginUnloaded,
        }
    }
}

impl From<EventKindFfi> for EventKind {
    fn from(kind: EventKindFfi) -> Self {
        match kind {
            EventKindFfi::SongStarted => EventKind::SongStarted,
            EventKindFfi::SongFinished => EventKind::SongFinished,
            EventKindFfi::Paused => EventKind::Paused,
            EventKindFfi::Unpaused => EventKind::Unpaused,
            EventKindFfi::Stopped => EventKind::Stopped,
            EventKindFfi::VolumeChanged => EventKind::VolumeChanged,
            EventKindFfi::PluginLoaded => EventKind::PluginLoaded,
            EventKindFfi::PluginUnloaded => EventKind::PluginUnloaded,
        }
    }
}

impl From<&Event> for EventFfi {
    fn from(event: &Event) -> Self {
        use abi_stable::std_types::{RNone, RSome};
        match event {
            Event::SongStarted { item, .. } => EventFfi {
                kind: EventKindFfi::SongStarted,
                item: RSome(item.into()),
                volume_db: 0.0,
            },
            Event::SongFinished { item, .. } => EventFfi {
                kind: EventKindFfi::SongFinished,
                item: RSome(item.into()),
                volume_db: 0.0,
            },
            Event::Paused { .. } => EventFfi {
                kind: EventKindFfi::Paused,
                item: RNone,
                volume_db: 0.0,
            },
            Event::Unpaused { .. } => EventFfi {
                kind: EventKindFfi::Unpaused,
                item: RNone,
                volume_db: 0.0,
            },
            Event::Stopped { .. } => EventFfi {
                kind: EventKindFfi::Stopped,
                item: RNone,
                volume_db: 0.0,
            },
            Event::VolumeChanged { db, .. } => EventFfi {
                kind: EventKindFfi::VolumeChanged,
                item: RNone,
                volume_db: *db,
            },
            Event::PluginLoaded { .. } => EventFfi {
                kind: EventKindFfi::PluginLoaded,
                item: RNone,
                volume_db: 0.0,
            },
            Event::PluginUnloaded { .. } => EventFfi {
                kind: EventKindFfi::PluginUnloaded,
                item: RNone,
                volume_db: 0.0,
            },
        }
    }
}

impl From<TransportCommandFfi> for TransportCommand {
    fn from(cmd: TransportCommandFfi) -> Self {
        match cmd.kind {
            TransportCommandKind::PlaySong => TransportCommand::PlaySong,
            TransportCommandKind::StopSong => TransportCommand::StopSong,
            TransportCommandKind::PauseSong => TransportCommand::PauseSong,
            TransportCommandKind::UnpauseSong => TransportCommand::UnpauseSong,
            TransportCommandKind::NextSong => TransportCommand::NextSong,
            TransportCommandKind::PrevSong => TransportCommand::PrevSong,
            TransportCommandKind::PlayRandom => TransportCommand::PlayRandom,
            TransportCommandKind::Seek => TransportCommand::Seek(cmd.seek_seconds),
            TransportCommandKind::Terminate => TransportCommand::Terminate,
        }
    }
}

/// Wraps the opaque callback-data pointer a plugin registers at subscribe
/// time. The pointer itself is never dereferenced on this side, only
/// carried across the subscriber-table thread boundary and handed back
/// verbatim to the plugin's own callback.
struct SendSyncPtr(*mut c_void);
unsafe impl Send for SendSyncPtr {}
unsafe impl Sync for SendSyncPtr {}

impl SendSyncPtr {
    // Routing the field through a method (rather than `data.0` at the call
    // site) keeps 2021 disjoint closure capture from capturing just the raw
    // pointer field, which would drop the `Send`/`Sync` impl above it.
    fn get(&self) -> *mut c_void {
        self.0
    }
}

extern "C" fn ffi_subscribe(
    host: *const c_void,
    kind: EventKindFfi,
    plugin_id: abi_stable::std_types::RStr,
    callback: EventCallbackFn,
    data: *mut c_void,
) -> u64 {
    let facade = unsafe { &*(host as *const HostFacade) };
    let data = SendSyncPtr(data);
    match facade.bus.subscribe(plugin_id.as_str(), EventKind::from(kind), move |event| {
        let ffi_event: EventFfi = event.into();
        callback(&ffi_event, data.get());
    }) {
        Ok(id) => id.as_u64(),
        Err(_) => 0,
    }
}

extern "C" fn ffi_unsubscribe(host: *const c_void, kind: EventKindFfi, subscription_id: u64) {
    let facade = unsafe { &*(host as *const HostFacade) };
    facade
        .bus
        .unsubscribe(kind.into(), SubscriptionId::from_u64(subscription_id));
}

extern "C" fn ffi_post_transport(host: *const c_void, cmd: TransportCommandFfi) -> bool {
    let facade = unsafe { &*(host as *const HostFacade) };
    facade.post_transport(cmd.into()).is_ok()
}

extern "C" fn ffi_volume_db(host: *const c_void) -> f32 {
    let facade = unsafe { &*(host as *const HostFacade) };
    facade.volume_db()
}

extern "C" fn ffi_set_volume_db(host: *const c_void, db: f32) {
    let facade = unsafe { &*(host as *const HostFacade) };
    facade.set_volume_db(db);
}

extern "C" fn ffi_md5_hex(data: abi_stable::std_types::RSlice<u8>) -> abi_stable::std_types::RString {
    abi_stable::std_types::RString::from(md5_hex(data.as_slice()))
}

/// Converts a decibel value to linear amplitude.
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Converts a linear amplitude to decibels.
pub fn linear_to_db(amp: f32) -> f32 {
    if amp <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * amp.log10()
    }
}

/// Computes the MD5 digest of `data`, returned as lowercase hex.
pub fn md5_hex(data: &[u8]) -> String {
    let digest = md5::compute(data);
    format!("{digest:x}")
}

pub struct HostFacade {
    bus: Arc<EventBus>,
    transport_tx: SyncSender<TransportCommand>,
    volume_db: RwLock<f32>,
    current_item: Arc<RwLock<Option<PlayItem>>>,
}

impl HostFacade {
    pub fn new(bus: Arc<EventBus>, transport_tx: SyncSender<TransportCommand>) -> Self {
        let current_item = Arc::new(RwLock::new(None));

        let started = current_item.clone();
        bus.subscribe("host-facade", EventKind::SongStarted, move |event| {
            if let Event::SongStarted { item, .. } = event {
                *started.write() = Some(item.clone());
            }
        })
        .expect("bus subscriber table has room for the host façade's own subscriptions");

        let finished = current_item.clone();
        bus.subscribe("host-facade", EventKind::SongFinished, move |_| {
            *finished.write() = None;
        })
        .expect("bus subscriber table has room for the host façade's own subscriptions");

        Self {
            bus,
            transport_tx,
            volume_db: RwLock::new(0.0),
            current_item,
        }
    }

    pub fn subscribe(
        &self,
        plugin_id: impl Into<String>,
        kind: EventKind,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, crate::error::EventBusError> {
        self.bus.subscribe(plugin_id, kind, callback)
    }

    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) {
        self.bus.unsubscribe(kind, id);
    }

    /// Posts a transport command onto the command queue. Never blocks: if
    /// the queue is full, returns `MessageQueueFull` for the caller to
    /// retry or drop.
    pub fn post_transport(&self, cmd: TransportCommand) -> Result<(), TransportError> {
        self.transport_tx
            .try_send(cmd)
            .map_err(|_| TransportError::MessageQueueFull)
    }

    pub fn volume_db(&self) -> f32 {
        *self.volume_db.read()
    }

    pub fn set_volume_db(&self, db: f32) {
        *self.volume_db.write() = db;
        self.bus.emit(Event::VolumeChanged {
            at: std::time::Instant::now(),
            db,
        });
    }

    pub fn volume_linear(&self) -> f32 {
        db_to_linear(self.volume_db())
    }

    pub fn set_volume_linear(&self, amp: f32) {
        self.set_volume_db(linear_to_db(amp));
    }

    pub fn current_item(&self) -> Option<PlayItem> {
        self.current_item.read().clone()
    }

    pub fn md5_hex(&self, data: &[u8]) -> String {
        md5_hex(data)
    }

    /// Builds the function table handed to every `<stem>_load` call (spec
    /// §4.1/§4.6). `self` must be wrapped in an `Arc` so `host` stays a
    /// stable address across the façade's lifetime: an `&HostFacade`'s
    /// address would move with its owner, but an `Arc`'s heap allocation
    /// doesn't. The extra strong reference this leaks is paid once, at
    /// startup, for a table that outlives every plugin that holds it.
    pub fn host_functions(self: &Arc<Self>) -> HostFunctions {
        let host = Arc::into_raw(self.clone()) as *const c_void;
        HostFunctions {
            host,
            subscribe: ffi_subscribe,
            unsubscribe: ffi_unsubscribe,
            post_transport: ffi_post_transport,
            volume_db: ffi_volume_db,
            set_volume_db: ffi_set_volume_db,
            md5_hex: ffi_md5_hex,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    fn item() -> PlayItem {
        PlayItem {
            locator: "test.wav".into(),
            decoder_id: "wav".into(),
            filetype: "WAV".into(),
            total_samples: 44100,
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
            is_float: false,
            is_big_endian: false,
            channel_mask: 0b11,
            start_sample: 0,
            end_sample: 44099,
            metadata: Default::default(),
        }
    }

    #[test]
    fn current_item_tracks_song_started_and_finished() {
        let bus = Arc::new(EventBus::new());
        let (tx, _rx) = std::sync::mpsc::sync_channel(8);
        let facade = HostFacade::new(bus.clone(), tx);
        assert!(facade.current_item().is_none());

        bus.emit(Event::SongStarted {
            at: std::time::Instant::now(),
            item: item(),
        });
        assert_eq!(facade.current_item().map(|i| i.locator), Some("test.wav".into()));

        bus.emit(Event::SongFinished {
            at: std::time::Instant::now(),
            item: item(),
        });
        assert!(facade.current_item().is_none());
    }

    #[test]
    fn db_linear_round_trip() {
        let db = -6.0;
        let amp = db_to_linear(db);
        assert!((linear_to_db(amp) - db).abs() < 1e-3);
    }

    #[test]
    fn silence_is_negative_infinity_db() {
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
    }

    #[test]
    fn md5_matches_known_vector() {
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn host_functions_subscribe_and_post_transport_reach_the_facade() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use waveloom_plugin_api::{EventFfi, TransportCommandFfi, TransportCommandKind};

        let bus = Arc::new(EventBus::new());
        let (tx, rx) = std::sync::mpsc::sync_channel(8);
        let facade = Arc::new(HostFacade::new(bus.clone(), tx));
        let host_fns = facade.host_functions();

        static SEEN: AtomicUsize = AtomicUsize::new(0);
        extern "C" fn cb(_event: &EventFfi, _data: *mut std::os::raw::c_void) {
            SEEN.fetch_add(1, Ordering::SeqCst);
        }
        let id = (host_fns.subscribe)(
            host_fns.host,
            EventKindFfi::Stopped,
            abi_stable::std_types::RStr::from("plugin-under-test"),
            cb,
            std::ptr::null_mut(),
        );
        assert_ne!(id, 0);

        bus.emit(Event::Stopped {
            at: std::time::Instant::now(),
        });
        assert_eq!(SEEN.load(Ordering::SeqCst), 1);

        (host_fns.unsubscribe)(host_fns.host, EventKindFfi::Stopped, id);
        bus.emit(Event::Stopped {
            at: std::time::Instant::now(),
        });
        assert_eq!(SEEN.load(Ordering::SeqCst), 1);

        assert!((host_fns.post_transport)(
            host_fns.host,
            TransportCommandFfi::simple(TransportCommandKind::PlaySong)
        ));
        assert!(matches!(rx.recv().unwrap(), TransportCommand::PlaySong));

        (host_fns.set_volume_db)(host_fns.host, -6.0);
        assert!(((host_fns.volume_db)(host_fns.host) - (-6.0)).abs() < 1e-6);

        // SAFETY: undoes the deliberate `Arc::into_raw` leak in
        // `host_functions` now that this table is done with.
        unsafe {
            Arc::decrement_strong_count(host_fns.host as *const HostFacade);
        }
    }
}
