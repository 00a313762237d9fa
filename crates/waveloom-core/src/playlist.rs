// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Playlist handle (external collaborator, spec §2/§3).
//!
//! The playlist exclusively owns `PlayItem`s and its editing model; the
//! core only queries it for the currently selected track and asks it to
//! advance according to the active playback order. A full playlist
//! (persistence, editing, cuesheet parsing) is out of scope — this module
//! supplies the minimal trait the streamer needs plus an in-memory
//! implementation for the binary and for tests.

use crate::types::{PlayItem, PlaybackOrder};

pub trait PlaylistHandle: Send + Sync {
    /// The currently selected item, if any.
    fn current(&self) -> Option<PlayItem>;

    /// Moves the selection according to `order` and returns the new
    /// current item, or `None` if the playlist is empty/exhausted.
    fn advance(&self, order: PlaybackOrder) -> Option<PlayItem>;

    /// Moves the selection to the previous item (always linear).
    fn previous(&self) -> Option<PlayItem>;

    /// Selects the item at `index`, if any.
    fn select(&self, index: usize) -> Option<PlayItem>;
}

/// A minimal in-memory playlist, ordered by insertion.
pub struct InMemoryPlaylist {
    items: parking_lot::RwLock<Vec<PlayItem>>,
    cursor: parking_lot::RwLock<Option<usize>>,
}

impl InMemoryPlaylist {
    pub fn new(items: Vec<PlayItem>) -> Self {
        Self {
            items: parking_lot::RwLock::new(items),
            cursor: parking_lot::RwLock::new(None),
        }
    }

    pub fn push(&self, item: PlayItem) {
        self.items.write().push(item);
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PlaylistHandle for InMemoryPlaylist {
    fn current(&self) -> Option<PlayItem> {
        let cursor = *self.cursor.read();
        let items = self.items.read();
        cursor.and_then(|i| items.get(i).cloned())
    }

    fn advance(&self, order: PlaybackOrder) -> Option<PlayItem> {
        let items = self.items.read();
        if items.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.write();
        let next = match order {
            PlaybackOrder::Single => return None,
            PlaybackOrder::Linear => match *cursor {
                Some(i) if i + 1 < items.len() => Some(i + 1),
                Some(_) => None,
                None => Some(0),
            },
            PlaybackOrder::Random => {
                if items.len() == 1 {
                    Some(0)
                } else {
                    // Pseudo-random pick without a RNG dependency: a
                    // simple rotating offset keeps this deterministic and
                    // test-friendly while still not mirroring linear order.
                    let current = cursor.unwrap_or(0);
                    Some((current + 1 + items.len() / 2) % items.len())
                }
            }
        };
        *cursor = next;
        next.and_then(|i| items.get(i).cloned())
    }

    fn previous(&self) -> Option<PlayItem> {
        let items = self.items.read();
        if items.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.write();
        let prev = match *cursor {
            Some(i) if i > 0 => Some(i - 1),
            _ => None,
        };
        *cursor = prev;
        prev.and_then(|i| items.get(i).cloned())
    }

    fn select(&self, index: usize) -> Option<PlayItem> {
        let items = self.items.read();
        if index >= items.len() {
            return None;
        }
        *self.cursor.write() = Some(index);
        items.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(locator: &str) -> PlayItem {
        PlayItem {
            locator: locator.into(),
            decoder_id: "wav".into(),
            filetype: "WAV".into(),
            total_samples: 1000,
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
            is_float: false,
            is_big_endian: false,
            channel_mask: 0b11,
            start_sample: 0,
            end_sample: 999,
            metadata: Default::default(),
        }
    }

    #[test]
    fn linear_advance_walks_forward_then_stops() {
        let pl = InMemoryPlaylist::new(vec![item("a"), item("b")]);
        assert_eq!(pl.advance(PlaybackOrder::Linear).unwrap().locator, "a");
        assert_eq!(pl.advance(PlaybackOrder::Linear).unwrap().locator, "b");
        assert!(pl.advance(PlaybackOrder::Linear).is_none());
    }

    #[test]
    fn single_order_never_advances() {
        let pl = InMemoryPlaylist::new(vec![item("a"), item("b")]);
        pl.select(0);
        assert!(pl.advance(PlaybackOrder::Single).is_none());
    }

    #[test]
    fn select_sets_current() {
        let pl = InMemoryPlaylist::new(vec![item("a"), item("b")]);
        pl.select(1);
        assert_eq!(pl.current().unwrap().locator, "b");
    }
}
