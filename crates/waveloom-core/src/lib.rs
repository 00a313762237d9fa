// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plugin registry, event bus, streamer, output sink controller, and the
//! host façade that ties them together (spec §4).

pub mod bus;
pub mod error;
pub mod host;
pub mod null_sink;
pub mod playlist;
pub mod registry;
pub mod ringbuf;
pub mod sink;
pub mod streamer;
pub mod transport;
pub mod types;

pub use bus::{Event, EventBus, EventKind, SubscriptionId};
pub use error::{DecodeError, EventBusError, PluginLoadError, SinkDeviceError, TransportError};
pub use host::HostFacade;
pub use null_sink::NullOutputSink;
pub use playlist::{InMemoryPlaylist, PlaylistHandle};
pub use registry::{BuiltinPlugin, DecoderRecord, DecoderTable, OutputRecord, PluginRegistry};
pub use sink::SinkController;
pub use streamer::Streamer;
pub use transport::{channel as transport_channel, CommandLoop, TransportCommand};
pub use types::{PlayItem, PlaybackOrder, SinkState, WaveFormat};
