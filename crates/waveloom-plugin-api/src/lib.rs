// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stable-ABI contract between the waveloom host and out-of-tree plugins.
//!
//! A plugin is a dynamic module exporting a single symbol named
//! `<stem>_load` (where `<stem>` is the module's file name without its
//! platform suffix, e.g. a module built as `wavdecoder.so` exports
//! `wavdecoder_load`). That symbol is an `extern "C" fn(&HostFunctions) ->
//! PluginEntry`, invoked with the host façade's function table and
//! returning a small header plus exactly one typed factory, matching the
//! tagged-union descriptor convention the host understands.
//!
//! Everything that crosses the dynamic-loading boundary is built on
//! [`abi_stable`] so a plugin compiled against a different (compatible)
//! compiler version still links safely.

use abi_stable::{
    sabi_trait,
    std_types::{RBox, ROption, RSlice, RSliceMut, RStr, RString, RVec},
    StableAbi,
};
use std::fmt;
use std::os::raw::c_void;

pub const API_VERSION_MAJOR: u32 = 0;
pub const API_VERSION_MINOR: u32 = 1;

/// Which capability set a loaded module provides.
#[repr(u8)]
#[derive(StableAbi, Copy, Clone, Debug, PartialEq, Eq)]
pub enum PluginKind {
    Decoder,
    Output,
}

/// Sample format negotiated between a decoder and a sink.
#[repr(C)]
#[derive(StableAbi, Copy, Clone, Debug, PartialEq)]
pub struct WaveFormatFfi {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub is_float: bool,
    pub is_big_endian: bool,
    pub channel_mask: u32,
}

impl WaveFormatFfi {
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }
}

/// A single metadata entry (lowercase key, single value), preserving
/// insertion order across an `RVec`.
#[repr(C)]
#[derive(StableAbi, Clone, Debug)]
pub struct MetadataEntry {
    pub key: RString,
    pub value: RString,
}

/// Wire form of a playable unit, as produced by `DecoderPlugin::insert`
/// and consumed by `DecoderInstance::init`.
#[repr(C)]
#[derive(StableAbi, Clone, Debug)]
pub struct PlayItemFfi {
    pub locator: RString,
    pub decoder_id: RString,
    pub filetype: RString,
    pub total_samples: i64,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub is_float: bool,
    pub is_big_endian: bool,
    pub channel_mask: u32,
    pub start_sample: i64,
    pub end_sample: i64,
    pub metadata: RVec<MetadataEntry>,
}

/// Errors a decoder can report. Hand-written `Display`/`Error` (not
/// `thiserror`) since a derive and `#[repr(C)]` + `StableAbi` don't mix
/// across the FFI boundary.
#[repr(u8)]
#[derive(StableAbi, Clone, Debug)]
pub enum DecodeError {
    InitFailed(RString),
    SeekFailed(RString),
    Io(RString),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InitFailed(msg) => write!(f, "decoder init failed: {msg}"),
            DecodeError::SeekFailed(msg) => write!(f, "seek failed: {msg}"),
            DecodeError::Io(msg) => write!(f, "decoder I/O error: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Errors an output-sink device binding can report.
#[repr(u8)]
#[derive(StableAbi, Clone, Debug)]
pub enum SinkDeviceError {
    DeviceUnavailable(RString),
    QueueCreationFailed(RString),
    EnqueueFailed(RString),
}

impl fmt::Display for SinkDeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkDeviceError::DeviceUnavailable(msg) => write!(f, "device unavailable: {msg}"),
            SinkDeviceError::QueueCreationFailed(msg) => {
                write!(f, "queue creation failed: {msg}")
            }
            SinkDeviceError::EnqueueFailed(msg) => write!(f, "enqueue failed: {msg}"),
        }
    }
}

impl std::error::Error for SinkDeviceError {}

/// Observed running state of a device queue, mirrored from the host's
/// `SinkState` (spec data model) but queried from the plugin side.
#[repr(u8)]
#[derive(StableAbi, Copy, Clone, Debug, PartialEq, Eq)]
pub enum SinkStateFfi {
    Stopped,
    Paused,
    Playing,
}

/// Per-track decoding state. One instance is created per `DecoderPlugin::open`
/// call and lives for the duration the track is current in the streamer.
///
/// # Real-time note
/// `read` and `seek_sample` run on the streamer's decode thread. They must
/// not block on anything other than the underlying file I/O they exist to
/// perform — no locking against UI-visible state, no unbounded retries.
#[sabi_trait]
pub trait DecoderInstance: Send {
    /// Fills format/bounds from `item` and primes the cursor to `item.start_sample`.
    /// Returns the negotiated format on success.
    fn init(&mut self, item: &PlayItemFfi) -> abi_stable::std_types::RResult<WaveFormatFfi, DecodeError>;

    /// Writes up to `buf.len()` interleaved PCM bytes in the format returned
    /// by `init`. Returns bytes written; 0 means end-of-track; partial
    /// writes are allowed and are not an error.
    fn read(&mut self, buf: RSliceMut<u8>) -> i64;

    /// Seeks to sample `n` relative to the track's start sample, clamped to
    /// `[start, end]`.
    fn seek_sample(&mut self, n: i64) -> abi_stable::std_types::RResult<(), DecodeError>;

    /// Seeks to `t` seconds; equivalent to `seek_sample(round(t * sample_rate))`.
    fn seek(&mut self, t: f64) -> abi_stable::std_types::RResult<(), DecodeError>;

    /// Current read position in seconds.
    fn read_pos(&self) -> f64;
}

pub type DecoderInstanceBox = DecoderInstance_TO<'static, RBox<()>>;

/// Module-level descriptor for a decoder: stable id, supported
/// extensions/file-types, and factories for per-track instances.
#[sabi_trait]
pub trait DecoderPlugin: Send + Sync {
    fn id(&self) -> RString;
    fn extensions(&self) -> RVec<RString>;
    fn filetypes(&self) -> RVec<RString>;

    /// Allocates a fresh, zero-initialized decoder instance. No I/O.
    fn open(&self) -> DecoderInstanceBox;

    /// Probes `locator`, attaches metadata, and returns a new `PlayItem`
    /// description, or `RNone` on probe failure.
    fn insert(&self, locator: RStr) -> ROption<PlayItemFfi>;

    /// One-time plugin-lifetime init, called once after load.
    #[sabi(last_prefix_field)]
    fn plugin_start(&mut self) -> abi_stable::std_types::RResult<(), RString> {
        abi_stable::std_types::RResult::ROk(())
    }

    /// One-time plugin-lifetime teardown, called on unload for every
    /// record in reverse insertion order, before the module handle is
    /// released.
    fn plugin_stop(&mut self) -> abi_stable::std_types::RResult<(), RString> {
        abi_stable::std_types::RResult::ROk(())
    }
}

pub type DecoderPluginBox = DecoderPlugin_TO<'static, RBox<()>>;

/// Device-queue binding driven by the host's sink controller. The host
/// owns the `STOPPED/PAUSED/PLAYING` state machine and the audio-thread
/// loop (spec §4.5); this trait is the abstract capability set it drives.
#[sabi_trait]
pub trait OutputSinkPlugin: Send {
    fn id(&self) -> RString;

    /// Allocates the device queue and its buffer pool for `fmt`.
    fn init(&mut self, fmt: WaveFormatFfi) -> abi_stable::std_types::RResult<(), SinkDeviceError>;

    /// Releases the device queue. Idempotent.
    fn free(&mut self);

    /// Overwrites the negotiated format; the host recreates the queue by
    /// calling `free` then `init` again on its next audio-thread tick.
    fn setformat(&mut self, fmt: WaveFormatFfi) -> abi_stable::std_types::RResult<(), SinkDeviceError>;

    fn play(&mut self) -> abi_stable::std_types::RResult<(), SinkDeviceError>;
    fn pause(&mut self) -> abi_stable::std_types::RResult<(), SinkDeviceError>;
    fn unpause(&mut self) -> abi_stable::std_types::RResult<(), SinkDeviceError>;
    fn stop(&mut self) -> abi_stable::std_types::RResult<(), SinkDeviceError>;

    /// The device's actually-observed running state (not the host's
    /// requested state); the audio thread reconciles the two.
    fn state(&self) -> SinkStateFfi;

    /// Enqueues `data` into the device's buffer pool. Returns the number
    /// of bytes accepted, which may be less than `data.len()` (or zero) if
    /// no buffer is currently available; the caller retries on its next tick.
    fn write(&mut self, data: RSlice<u8>) -> abi_stable::std_types::RResult<u32, SinkDeviceError>;

    #[sabi(last_prefix_field)]
    fn plugin_start(&mut self) -> abi_stable::std_types::RResult<(), RString> {
        abi_stable::std_types::RResult::ROk(())
    }

    /// One-time plugin-lifetime teardown, called on unload for every
    /// record in reverse insertion order, before the module handle is
    /// released.
    fn plugin_stop(&mut self) -> abi_stable::std_types::RResult<(), RString> {
        abi_stable::std_types::RResult::ROk(())
    }
}

pub type OutputSinkPluginBox = OutputSinkPlugin_TO<'static, RBox<()>>;

/// Event kinds a plugin can subscribe to, mirroring the host's own
/// `EventKind` one-for-one.
#[repr(u8)]
#[derive(StableAbi, Copy, Clone, Debug, PartialEq, Eq)]
pub enum EventKindFfi {
    SongStarted,
    SongFinished,
    Paused,
    Unpaused,
    Stopped,
    VolumeChanged,
    PluginLoaded,
    PluginUnloaded,
}

/// Wire form of a dispatched event, handed to a plugin's callback. `item`
/// is populated for `SongStarted`/`SongFinished`; `volume_db` for
/// `VolumeChanged`; other kinds carry only `kind`.
#[repr(C)]
#[derive(StableAbi, Clone, Debug)]
pub struct EventFfi {
    pub kind: EventKindFfi,
    pub item: ROption<PlayItemFfi>,
    pub volume_db: f32,
}

/// A plugin's event callback: `data` is the opaque pointer it registered
/// with at subscribe time, passed back unexamined on every dispatch.
pub type EventCallbackFn = extern "C" fn(event: &EventFfi, data: *mut c_void);

/// Transport verbs a plugin can post onto the host's command queue,
/// mirroring the subset of `TransportCommand` spec.md §4.6 names as part
/// of the façade (next/prev/pause/stop/play/random, seek).
#[repr(u8)]
#[derive(StableAbi, Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportCommandKind {
    PlaySong,
    StopSong,
    PauseSong,
    UnpauseSong,
    NextSong,
    PrevSong,
    PlayRandom,
    Seek,
    Terminate,
}

#[repr(C)]
#[derive(StableAbi, Copy, Clone, Debug)]
pub struct TransportCommandFfi {
    pub kind: TransportCommandKind,
    /// Only meaningful when `kind == Seek`: target position in seconds.
    pub seek_seconds: f64,
}

impl TransportCommandFfi {
    pub fn simple(kind: TransportCommandKind) -> Self {
        Self {
            kind,
            seek_seconds: 0.0,
        }
    }

    pub fn seek(seconds: f64) -> Self {
        Self {
            kind: TransportCommandKind::Seek,
            seek_seconds: seconds,
        }
    }
}

pub type DecoderFactoryFn = extern "C" fn() -> DecoderPluginBox;
pub type OutputFactoryFn = extern "C" fn() -> OutputSinkPluginBox;

/// The host façade's function table (spec §2/§4.1/§4.6), passed by
/// reference to every `<stem>_load` call. `host` is an opaque pointer to
/// the host-side façade instance; every other field is a plain function
/// pointer taking it as its first argument and dispatching through it.
///
/// Not `StableAbi` itself, for the same reason `PluginEntry` isn't: the
/// function pointers are the actual ABI boundary, not a vtable the host
/// walks. Grounded on `DB_functions_t` in the original C host, a plain
/// struct of function pointers passed to `<stem>_load` the same way.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct HostFunctions {
    pub host: *const c_void,
    pub subscribe: extern "C" fn(
        host: *const c_void,
        kind: EventKindFfi,
        plugin_id: RStr,
        callback: EventCallbackFn,
        data: *mut c_void,
    ) -> u64,
    pub unsubscribe: extern "C" fn(host: *const c_void, kind: EventKindFfi, subscription_id: u64),
    pub post_transport: extern "C" fn(host: *const c_void, cmd: TransportCommandFfi) -> bool,
    pub volume_db: extern "C" fn(host: *const c_void) -> f32,
    pub set_volume_db: extern "C" fn(host: *const c_void, db: f32),
    pub md5_hex: extern "C" fn(data: RSlice<u8>) -> RString,
}

// SAFETY: `host` is only ever dereferenced by the function pointers
// alongside it, which are themselves required to be thread-safe by
// whoever builds the table (the host façade's methods are `Send + Sync`).
unsafe impl Send for HostFunctions {}
unsafe impl Sync for HostFunctions {}

impl HostFunctions {
    /// A table whose calls are all no-ops (subscribe returns id 0,
    /// post_transport reports failure). For unit-testing plugin crates in
    /// isolation, without a real host façade behind them.
    pub fn inert() -> Self {
        extern "C" fn subscribe(
            _host: *const c_void,
            _kind: EventKindFfi,
            _plugin_id: RStr,
            _callback: EventCallbackFn,
            _data: *mut c_void,
        ) -> u64 {
            0
        }
        extern "C" fn unsubscribe(_host: *const c_void, _kind: EventKindFfi, _id: u64) {}
        extern "C" fn post_transport(_host: *const c_void, _cmd: TransportCommandFfi) -> bool {
            false
        }
        extern "C" fn volume_db(_host: *const c_void) -> f32 {
            0.0
        }
        extern "C" fn set_volume_db(_host: *const c_void, _db: f32) {}
        extern "C" fn md5_hex(_data: RSlice<u8>) -> RString {
            RString::new()
        }
        Self {
            host: std::ptr::null(),
            subscribe,
            unsubscribe,
            post_transport,
            volume_db,
            set_volume_db,
            md5_hex,
        }
    }
}

/// Header returned by every `<stem>_load` symbol. Not `StableAbi` itself:
/// the function pointers are the actual ABI boundary (checked by hand at
/// load time against `API_VERSION_MAJOR`/`MINOR`), the same way a plain
/// `extern "C" fn` at a well-known symbol is the boundary rather than a
/// vtable the host walks.
#[repr(C)]
pub struct PluginEntry {
    pub api_version_major: u32,
    pub api_version_minor: u32,
    pub kind: PluginKind,
    pub create_decoder: Option<DecoderFactoryFn>,
    pub create_output: Option<OutputFactoryFn>,
}

impl PluginEntry {
    pub fn decoder(create: DecoderFactoryFn) -> Self {
        Self {
            api_version_major: API_VERSION_MAJOR,
            api_version_minor: API_VERSION_MINOR,
            kind: PluginKind::Decoder,
            create_decoder: Some(create),
            create_output: None,
        }
    }

    pub fn output(create: OutputFactoryFn) -> Self {
        Self {
            api_version_major: API_VERSION_MAJOR,
            api_version_minor: API_VERSION_MINOR,
            kind: PluginKind::Output,
            create_decoder: None,
            create_output: Some(create),
        }
    }
}

/// Signature every `<stem>_load` symbol must export.
pub type LoadFn = extern "C" fn(host: &HostFunctions) -> PluginEntry;

/// Generates the `<stem>_load` entry point for a decoder plugin. `$ctor`
/// is not handed the host table directly; plugins that need it capture it
/// themselves inside `plugin_start`/`plugin_stop` via a field set from the
/// `host` parameter below if they need to call back into the façade.
///
/// ```ignore
/// declare_decoder_plugin!(wavdecoder_load, WavDecoder, WavDecoder::new);
/// ```
#[macro_export]
macro_rules! declare_decoder_plugin {
    ($symbol:ident, $ty:ty, $ctor:expr) => {
        #[no_mangle]
        pub extern "C" fn $symbol(_host: &$crate::HostFunctions) -> $crate::PluginEntry {
            extern "C" fn create() -> $crate::DecoderPluginBox {
                $crate::DecoderPlugin_TO::from_value($ctor(), abi_stable::sabi_trait::TD_Opaque)
            }
            $crate::PluginEntry::decoder(create)
        }
    };
}

/// Generates the `<stem>_load` entry point for an output-sink plugin.
#[macro_export]
macro_rules! declare_output_plugin {
    ($symbol:ident, $ty:ty, $ctor:expr) => {
        #[no_mangle]
        pub extern "C" fn $symbol(_host: &$crate::HostFunctions) -> $crate::PluginEntry {
            extern "C" fn create() -> $crate::OutputSinkPluginBox {
                $crate::OutputSinkPlugin_TO::from_value($ctor(), abi_stable::sabi_trait::TD_Opaque)
            }
            $crate::PluginEntry::output(create)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wave_format_bytes_per_frame() {
        let fmt = WaveFormatFfi {
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
            is_float: false,
            is_big_endian: false,
            channel_mask: 0b11,
        };
        assert_eq!(fmt.bytes_per_frame(), 4);
    }

    #[test]
    fn decode_error_display() {
        let err = DecodeError::InitFailed(RString::from("bad header"));
        assert_eq!(err.to_string(), "decoder init failed: bad header");
    }

    #[test]
    fn plugin_entry_tags_kind() {
        extern "C" fn make_output() -> OutputSinkPluginBox {
            unreachable!()
        }
        let entry = PluginEntry::output(make_output);
        assert_eq!(entry.kind, PluginKind::Output);
        assert!(entry.create_output.is_some());
        assert!(entry.create_decoder.is_none());
    }

    #[test]
    fn inert_host_functions_subscribe_reports_no_subscription() {
        extern "C" fn cb(_event: &EventFfi, _data: *mut c_void) {}
        let host = HostFunctions::inert();
        let id = (host.subscribe)(
            host.host,
            EventKindFfi::Stopped,
            RStr::from("test"),
            cb,
            std::ptr::null_mut(),
        );
        assert_eq!(id, 0);
        assert!(!(host.post_transport)(host.host, TransportCommandFfi::simple(TransportCommandKind::PlaySong)));
    }
}
