// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core data model (spec §3), in ordinary owned Rust types. FFI mirrors
//! live in `waveloom_plugin_api`; conversions happen at the plugin boundary.

use abi_stable::std_types::RString;
use indexmap::IndexMap;
use waveloom_plugin_api::{MetadataEntry, PlayItemFfi, WaveFormatFfi};

/// The PCM sample-rate/width/channels tuple negotiated between decoder
/// and sink. Immutable per negotiation; reissued on change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub is_float: bool,
    pub is_big_endian: bool,
    pub channel_mask: u32,
}

impl WaveFormat {
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

impl From<WaveFormatFfi> for WaveFormat {
    fn from(f: WaveFormatFfi) -> Self {
        Self {
            sample_rate: f.sample_rate,
            channels: f.channels,
            bits_per_sample: f.bits_per_sample,
            is_float: f.is_float,
            is_big_endian: f.is_big_endian,
            channel_mask: f.channel_mask,
        }
    }
}

impl From<WaveFormat> for WaveFormatFfi {
    fn from(f: WaveFormat) -> Self {
        Self {
            sample_rate: f.sample_rate,
            channels: f.channels,
            bits_per_sample: f.bits_per_sample,
            is_float: f.is_float,
            is_big_endian: f.is_big_endian,
            channel_mask: f.channel_mask,
        }
    }
}

/// A playable unit: an entire file, or a cuesheet sub-range of one.
///
/// Owned exclusively by the playlist; the streamer holds only a clone
/// (logically a weak reference — the playlist may drop the original and
/// the streamer's copy plays out to completion).
#[derive(Debug, Clone)]
pub struct PlayItem {
    pub locator: String,
    pub decoder_id: String,
    pub filetype: String,
    pub total_samples: i64,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub is_float: bool,
    pub is_big_endian: bool,
    pub channel_mask: u32,
    pub start_sample: i64,
    pub end_sample: i64,
    /// Lowercase key -> value, insertion-preserving, single-valued per key.
    pub metadata: IndexMap<String, String>,
}

impl PlayItem {
    /// Duration in seconds implied by `total_samples`/`sample_rate`.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            (self.total_samples.max(0)) as f64 / self.sample_rate as f64
        }
    }
}

impl From<PlayItemFfi> for PlayItem {
    fn from(item: PlayItemFfi) -> Self {
        let mut metadata = IndexMap::with_capacity(item.metadata.len());
        for entry in item.metadata.iter() {
            metadata.insert(entry.key.to_string(), entry.value.to_string());
        }
        Self {
            locator: item.locator.into(),
            decoder_id: item.decoder_id.into(),
            filetype: item.filetype.into(),
            total_samples: item.total_samples,
            sample_rate: item.sample_rate,
            channels: item.channels,
            bits_per_sample: item.bits_per_sample,
            is_float: item.is_float,
            is_big_endian: item.is_big_endian,
            channel_mask: item.channel_mask,
            start_sample: item.start_sample,
            end_sample: item.end_sample,
            metadata,
        }
    }
}

impl From<&PlayItem> for PlayItemFfi {
    fn from(item: &PlayItem) -> Self {
        let metadata = item
            .metadata
            .iter()
            .map(|(k, v)| MetadataEntry {
                key: RString::from(k.as_str()),
                value: RString::from(v.as_str()),
            })
            .collect();
        Self {
            locator: RString::from(item.locator.as_str()),
            decoder_id: RString::from(item.decoder_id.as_str()),
            filetype: RString::from(item.filetype.as_str()),
            total_samples: item.total_samples,
            sample_rate: item.sample_rate,
            channels: item.channels,
            bits_per_sample: item.bits_per_sample,
            is_float: item.is_float,
            is_big_endian: item.is_big_endian,
            channel_mask: item.channel_mask,
            start_sample: item.start_sample,
            end_sample: item.end_sample,
            metadata,
        }
    }
}

/// Sink state machine (spec §4.5). The audio thread exists iff
/// `state != Stopped` or it has been asked to stop and is draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Stopped,
    Paused,
    Playing,
}

/// Advance policy driving what the streamer does at end-of-track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackOrder {
    #[default]
    Linear,
    Random,
    Single,
}
