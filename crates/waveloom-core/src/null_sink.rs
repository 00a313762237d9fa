// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! In-process output sink that discards PCM instead of touching a device.
//!
//! Used as the fallback when no configured output plugin is found, and as
//! the reference sink for integration tests that exercise the streamer
//! without a real audio device.

use abi_stable::std_types::{RResult, RString};
use parking_lot::Mutex;
use waveloom_plugin_api::{
    OutputSinkPlugin, OutputSinkPluginBox, OutputSinkPlugin_TO, SinkDeviceError, SinkStateFfi,
    WaveFormatFfi,
};

const SINK_ID: &str = "null";

/// Counts bytes written and format (re)inits, so tests can assert playback
/// actually progressed and observe device-queue recreation on format change.
pub struct NullOutputSink {
    state: SinkStateFfi,
    bytes_written: std::sync::Arc<Mutex<u64>>,
    init_count: std::sync::Arc<Mutex<u64>>,
    last_format: std::sync::Arc<Mutex<Option<WaveFormatFfi>>>,
}

impl NullOutputSink {
    pub fn new() -> Self {
        Self {
            state: SinkStateFfi::Stopped,
            bytes_written: std::sync::Arc::new(Mutex::new(0)),
            init_count: std::sync::Arc::new(Mutex::new(0)),
            last_format: std::sync::Arc::new(Mutex::new(None)),
        }
    }

    /// A handle that keeps reading the running byte total after the sink
    /// itself has been moved into a `SinkController`.
    pub fn counter(&self) -> std::sync::Arc<Mutex<u64>> {
        self.bytes_written.clone()
    }

    /// A handle reporting how many times `init` has been called.
    pub fn init_count(&self) -> std::sync::Arc<Mutex<u64>> {
        self.init_count.clone()
    }

    /// A handle reporting the most recently negotiated format.
    pub fn last_format(&self) -> std::sync::Arc<Mutex<Option<WaveFormatFfi>>> {
        self.last_format.clone()
    }

    pub fn boxed() -> OutputSinkPluginBox {
        OutputSinkPlugin_TO::from_value(Self::new(), abi_stable::sabi_trait::TD_Opaque)
    }
}

impl Default for NullOutputSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSinkPlugin for NullOutputSink {
    fn id(&self) -> RString {
        RString::from(SINK_ID)
    }

    fn init(&mut self, fmt: WaveFormatFfi) -> RResult<(), SinkDeviceError> {
        self.state = SinkStateFfi::Paused;
        *self.init_count.lock() += 1;
        *self.last_format.lock() = Some(fmt);
        RResult::ROk(())
    }

    fn free(&mut self) {
        self.state = SinkStateFfi::Stopped;
    }

    fn setformat(&mut self, _fmt: WaveFormatFfi) -> RResult<(), SinkDeviceError> {
        RResult::ROk(())
    }

    fn play(&mut self) -> RResult<(), SinkDeviceError> {
        self.state = SinkStateFfi::Playing;
        RResult::ROk(())
    }

    fn pause(&mut self) -> RResult<(), SinkDeviceError> {
        self.state = SinkStateFfi::Paused;
        RResult::ROk(())
    }

    fn unpause(&mut self) -> RResult<(), SinkDeviceError> {
        self.play()
    }

    fn stop(&mut self) -> RResult<(), SinkDeviceError> {
        self.state = SinkStateFfi::Stopped;
        RResult::ROk(())
    }

    fn state(&self) -> SinkStateFfi {
        self.state
    }

    fn write(&mut self, data: abi_stable::std_types::RSlice<u8>) -> RResult<u32, SinkDeviceError> {
        *self.bytes_written.lock() += data.len() as u64;

        // A real device blocks a write until buffer space frees up at the
        // playback rate; without that pacing this sink would drain an
        // entire track in one scheduler tick. Sleep the equivalent
        // real-time duration so timing-sensitive callers see realistic pacing.
        if let Some(fmt) = *self.last_format.lock() {
            let bytes_per_frame = fmt.channels as usize * (fmt.bits_per_sample as usize / 8);
            if bytes_per_frame > 0 && fmt.sample_rate > 0 {
                let frames = data.len() / bytes_per_frame;
                let secs = frames as f64 / fmt.sample_rate as f64;
                std::thread::sleep(std::time::Duration::from_secs_f64(secs));
            }
        }

        RResult::ROk(data.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_counts_bytes_and_reports_accepted() {
        let mut sink = NullOutputSink::new();
        sink.init(WaveFormatFfi {
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
            is_float: false,
            is_big_endian: false,
            channel_mask: 0,
        })
        .into_result()
        .unwrap();
        let data = [0u8; 16];
        let n = sink.write(abi_stable::std_types::RSlice::from(&data[..]));
        assert_eq!(n.into_result().unwrap(), 16);
        assert_eq!(*sink.counter().lock(), 16);
    }
}
