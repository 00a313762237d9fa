// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Topic-indexed, synchronous event bus (spec §4.2).

use crate::types::PlayItem;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::EventBusError;

/// Fixed set of event kinds known at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SongStarted,
    SongFinished,
    Paused,
    Unpaused,
    Stopped,
    VolumeChanged,
    PluginLoaded,
    PluginUnloaded,
}

/// A dispatched event. `SongStarted`/`SongFinished` carry the current
/// `PlayItem`, valid only for the duration of dispatch; other kinds carry
/// only the generic header.
#[derive(Debug, Clone)]
pub enum Event {
    SongStarted { at: Instant, item: PlayItem },
    SongFinished { at: Instant, item: PlayItem },
    Paused { at: Instant },
    Unpaused { at: Instant },
    Stopped { at: Instant },
    VolumeChanged { at: Instant, db: f32 },
    PluginLoaded { at: Instant, id: String },
    PluginUnloaded { at: Instant, id: String },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::SongStarted { .. } => EventKind::SongStarted,
            Event::SongFinished { .. } => EventKind::SongFinished,
            Event::Paused { .. } => EventKind::Paused,
            Event::Unpaused { .. } => EventKind::Unpaused,
            Event::Stopped { .. } => EventKind::Stopped,
            Event::VolumeChanged { .. } => EventKind::VolumeChanged,
            Event::PluginLoaded { .. } => EventKind::PluginLoaded,
            Event::PluginUnloaded { .. } => EventKind::PluginUnloaded,
        }
    }
}

/// Opaque handle returned from `subscribe`, used to `unsubscribe` later.
///
/// The source system keys a subscription by `(event, callback, data)` —
/// a C function pointer plus an opaque `void*`. Native Rust closures have
/// no such stable identity, so the handle plays that role here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Encodes this id the way it crosses the plugin ABI boundary (spec §4.6).
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Decodes an id handed back by a plugin's `unsubscribe` call.
    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }
}

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    plugin_id: String,
    callback: Callback,
}

/// Maximum subscribers per event kind before `subscribe` starts failing
/// with `SubscriberTableFull`.
const DEFAULT_CAPACITY_PER_KIND: usize = 256;

pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<Subscriber>>>,
    next_id: AtomicU64,
    capacity_per_kind: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY_PER_KIND)
    }

    pub fn with_capacity(capacity_per_kind: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity_per_kind,
        }
    }

    /// Appends a subscriber to `kind`'s list.
    pub fn subscribe(
        &self,
        plugin_id: impl Into<String>,
        kind: EventKind,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, EventBusError> {
        let mut table = self.subscribers.lock();
        let list = table.entry(kind).or_default();
        if list.len() >= self.capacity_per_kind {
            tracing::warn!(?kind, "subscriber table full");
            return Err(EventBusError::SubscriberTableFull);
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        list.push(Subscriber {
            id,
            plugin_id: plugin_id.into(),
            callback: Arc::new(callback),
        });
        Ok(id)
    }

    /// Removes the first matching subscriber for `kind`.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) {
        let mut table = self.subscribers.lock();
        if let Some(list) = table.get_mut(&kind) {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
            }
        }
    }

    /// Dispatches `event` synchronously, on the calling thread, to every
    /// subscriber of `event.kind()` in subscription order.
    ///
    /// Dispatch operates on a snapshot taken at the start of the call: a
    /// subscriber added mid-dispatch does not see the in-flight event, and
    /// one removed mid-dispatch still receives it (removal only affects
    /// subsequent emits).
    pub fn emit(&self, event: Event) {
        let snapshot: Vec<Callback> = {
            let table = self.subscribers.lock();
            table
                .get(&event.kind())
                .map(|list| list.iter().map(|s| s.callback.clone()).collect())
                .unwrap_or_default()
        };
        tracing::debug!(kind = ?event.kind(), subscribers = snapshot.len(), "dispatching event");
        for callback in &snapshot {
            callback(&event);
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .lock()
            .get(&kind)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Lists plugin ids currently subscribed to `kind`, in subscription order.
    pub fn subscribers_for(&self, kind: EventKind) -> Vec<String> {
        self.subscribers
            .lock()
            .get(&kind)
            .map(|l| l.iter().map(|s| s.plugin_id.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
