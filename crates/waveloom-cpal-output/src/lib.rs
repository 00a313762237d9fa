// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reference output-sink plugin backed by `cpal`'s default device.
//!
//! `write` hands samples into a small `VecDeque` buffer pool, drained by
//! `cpal`'s own audio callback on its own thread; the two sides are
//! connected by a mutex rather than a lock-free ring, matching how the
//! streamer/sink split already provides the bounded-lookahead buffering
//! this plugin needs — the queue here only has to smooth over cpal's
//! callback cadence.

use abi_stable::std_types::{RResult, RSlice, RString};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use waveloom_plugin_api::{OutputSinkPlugin, SinkDeviceError, SinkStateFfi, WaveFormatFfi};

const SINK_ID: &str = "cpal";

/// Caps how far the queue can grow ahead of the device callback, so a
/// stalled device can't make `write` hold unbounded memory.
const MAX_QUEUED_BYTES: usize = 1 << 20;

struct Queue {
    bytes: VecDeque<u8>,
}

pub struct CpalOutputSink {
    format: Option<WaveFormatFfi>,
    stream: Option<cpal::Stream>,
    queue: Arc<Mutex<Queue>>,
}

impl CpalOutputSink {
    pub fn new() -> Self {
        Self {
            format: None,
            stream: None,
            queue: Arc::new(Mutex::new(Queue {
                bytes: VecDeque::new(),
            })),
        }
    }
}

impl Default for CpalOutputSink {
    fn default() -> Self {
        Self::new()
    }
}

fn build_stream(fmt: WaveFormatFfi, queue: Arc<Mutex<Queue>>) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no default output device".to_string())?;

    let stream_config = cpal::StreamConfig {
        channels: fmt.channels,
        sample_rate: cpal::SampleRate(fmt.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let err_fn = |err| tracing::warn!(error = %err, "cpal stream error");

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [i16], _| {
                let mut q = queue.lock();
                for sample in data.iter_mut() {
                    let lo = q.bytes.pop_front();
                    let hi = q.bytes.pop_front();
                    *sample = match (lo, hi) {
                        (Some(lo), Some(hi)) => i16::from_le_bytes([lo, hi]),
                        _ => 0,
                    };
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| e.to_string())?;

    Ok(stream)
}

impl OutputSinkPlugin for CpalOutputSink {
    fn id(&self) -> RString {
        RString::from(SINK_ID)
    }

    fn init(&mut self, fmt: WaveFormatFfi) -> RResult<(), SinkDeviceError> {
        let stream = match build_stream(fmt, self.queue.clone()) {
            Ok(s) => s,
            Err(e) => return RResult::RErr(SinkDeviceError::QueueCreationFailed(RString::from(e))),
        };
        if let Err(e) = stream.pause() {
            return RResult::RErr(SinkDeviceError::QueueCreationFailed(RString::from(e.to_string())));
        }
        self.format = Some(fmt);
        self.stream = Some(stream);
        self.queue.lock().bytes.clear();
        RResult::ROk(())
    }

    fn free(&mut self) {
        self.stream = None;
        self.format = None;
        self.queue.lock().bytes.clear();
    }

    fn setformat(&mut self, fmt: WaveFormatFfi) -> RResult<(), SinkDeviceError> {
        self.free();
        self.init(fmt)
    }

    fn play(&mut self) -> RResult<(), SinkDeviceError> {
        match self.stream.as_ref() {
            Some(stream) => match stream.play() {
                Ok(()) => RResult::ROk(()),
                Err(e) => RResult::RErr(SinkDeviceError::DeviceUnavailable(RString::from(e.to_string()))),
            },
            None => RResult::RErr(SinkDeviceError::DeviceUnavailable("not initialized".into())),
        }
    }

    fn pause(&mut self) -> RResult<(), SinkDeviceError> {
        match self.stream.as_ref() {
            Some(stream) => match stream.pause() {
                Ok(()) => RResult::ROk(()),
                Err(e) => RResult::RErr(SinkDeviceError::DeviceUnavailable(RString::from(e.to_string()))),
            },
            None => RResult::RErr(SinkDeviceError::DeviceUnavailable("not initialized".into())),
        }
    }

    fn unpause(&mut self) -> RResult<(), SinkDeviceError> {
        self.play()
    }

    fn stop(&mut self) -> RResult<(), SinkDeviceError> {
        let result = self.pause();
        self.queue.lock().bytes.clear();
        result
    }

    fn state(&self) -> SinkStateFfi {
        match &self.stream {
            None => SinkStateFfi::Stopped,
            Some(_) => SinkStateFfi::Playing,
        }
    }

    fn write(&mut self, data: RSlice<u8>) -> RResult<u32, SinkDeviceError> {
        if self.stream.is_none() {
            return RResult::RErr(SinkDeviceError::EnqueueFailed("not initialized".into()));
        }
        let mut q = self.queue.lock();
        let room = MAX_QUEUED_BYTES.saturating_sub(q.bytes.len());
        let n = data.len().min(room);
        q.bytes.extend(data.as_slice()[..n].iter().copied());
        RResult::ROk(n as u32)
    }
}

waveloom_plugin_api::declare_output_plugin!(cpaloutput_load, CpalOutputSink, CpalOutputSink::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_stopped_with_no_device_bound() {
        let sink = CpalOutputSink::new();
        assert_eq!(sink.state(), SinkStateFfi::Stopped);
    }

    #[test]
    fn write_before_init_fails() {
        let mut sink = CpalOutputSink::new();
        let data = [0u8; 16];
        let result = sink.write(RSlice::from(&data[..]));
        assert!(matches!(result, RResult::RErr(SinkDeviceError::EnqueueFailed(_))));
    }

    #[test]
    fn load_symbol_reports_output_kind() {
        let entry = cpaloutput_load(&waveloom_plugin_api::HostFunctions::inert());
        assert_eq!(entry.kind, waveloom_plugin_api::PluginKind::Output);
        assert!(entry.create_output.is_some());
    }
}
