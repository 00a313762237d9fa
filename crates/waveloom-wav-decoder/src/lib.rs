// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Reference WAV decoder plugin, loaded the same way any out-of-tree
//! decoder module would be: via its `<stem>_load` entry point.

use abi_stable::std_types::{RNone, ROption, RResult, RSliceMut, RSome, RString, RVec};
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use waveloom_plugin_api::{
    DecodeError, DecoderInstance, DecoderInstanceBox, DecoderInstance_TO, DecoderPlugin,
    PlayItemFfi, WaveFormatFfi,
};

const DECODER_ID: &str = "wav";

pub struct WavDecoderPlugin;

impl WavDecoderPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WavDecoderPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderPlugin for WavDecoderPlugin {
    fn id(&self) -> RString {
        RString::from(DECODER_ID)
    }

    fn extensions(&self) -> RVec<RString> {
        RVec::from(vec![RString::from("wav")])
    }

    fn filetypes(&self) -> RVec<RString> {
        RVec::from(vec![RString::from("WAV")])
    }

    fn open(&self) -> DecoderInstanceBox {
        DecoderInstance_TO::from_value(WavDecoderInstance::default(), abi_stable::sabi_trait::TD_Opaque)
    }

    fn insert(&self, locator: abi_stable::std_types::RStr<'_>) -> ROption<PlayItemFfi> {
        match probe(locator.as_str()) {
            Some(item) => RSome(item),
            None => RNone,
        }
    }
}

fn probe(locator: &str) -> Option<PlayItemFfi> {
    let reader = WavReader::open(locator).ok()?;
    let spec = reader.spec();
    let total_samples = reader.duration() as i64;
    Some(PlayItemFfi {
        locator: RString::from(locator),
        decoder_id: RString::from(DECODER_ID),
        filetype: RString::from("WAV"),
        total_samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        is_float: spec.sample_format == SampleFormat::Float,
        is_big_endian: false,
        channel_mask: 0,
        start_sample: 0,
        end_sample: (total_samples - 1).max(0),
        metadata: RVec::new(),
    })
}

/// Per-track decoding state: the open reader, its negotiated format, and
/// the current frame cursor.
#[derive(Default)]
pub struct WavDecoderInstance {
    reader: Option<WavReader<BufReader<File>>>,
    spec: Option<hound::WavSpec>,
    start_frame: i64,
    end_frame: i64,
    cursor_frame: i64,
}

impl DecoderInstance for WavDecoderInstance {
    fn init(&mut self, item: &PlayItemFfi) -> RResult<WaveFormatFfi, DecodeError> {
        let mut reader = match WavReader::open(item.locator.as_str()) {
            Ok(r) => r,
            Err(e) => return RResult::RErr(DecodeError::InitFailed(RString::from(e.to_string()))),
        };
        let spec = reader.spec();

        self.start_frame = item.start_sample.max(0);
        self.end_frame = if item.end_sample > 0 {
            item.end_sample
        } else {
            reader.duration() as i64 - 1
        };
        self.cursor_frame = self.start_frame;

        if self.start_frame > 0 {
            if let Err(e) = reader.seek(self.start_frame as u32) {
                return RResult::RErr(DecodeError::InitFailed(RString::from(e.to_string())));
            }
        }

        self.reader = Some(reader);
        self.spec = Some(spec);

        RResult::ROk(WaveFormatFfi {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            is_float: spec.sample_format == SampleFormat::Float,
            is_big_endian: false,
            channel_mask: 0,
        })
    }

    fn read(&mut self, mut buf: RSliceMut<u8>) -> i64 {
        let (Some(reader), Some(spec)) = (self.reader.as_mut(), self.spec) else {
            return 0;
        };
        if self.cursor_frame > self.end_frame {
            return 0;
        }

        let bytes_per_sample = (spec.bits_per_sample / 8) as usize;
        let channels = spec.channels as usize;
        let frame_bytes = bytes_per_sample * channels;
        if frame_bytes == 0 {
            return 0;
        }

        let remaining_frames = (self.end_frame - self.cursor_frame + 1).max(0) as usize;
        let max_frames = (buf.len() / frame_bytes).min(remaining_frames);
        let out = buf.as_mut_slice();
        let mut written = 0usize;

        match spec.sample_format {
            SampleFormat::Int => {
                let mut samples = reader.samples::<i32>();
                'frames: for _ in 0..max_frames {
                    let mut frame = Vec::with_capacity(channels);
                    for _ in 0..channels {
                        match samples.next() {
                            Some(Ok(s)) => frame.push(s),
                            _ => break 'frames,
                        }
                    }
                    if frame.len() < channels {
                        break;
                    }
                    for s in frame {
                        let bytes = s.to_le_bytes();
                        out[written..written + bytes_per_sample].copy_from_slice(&bytes[..bytes_per_sample]);
                        written += bytes_per_sample;
                    }
                    self.cursor_frame += 1;
                }
            }
            SampleFormat::Float => {
                let mut samples = reader.samples::<f32>();
                'frames_f: for _ in 0..max_frames {
                    let mut frame = Vec::with_capacity(channels);
                    for _ in 0..channels {
                        match samples.next() {
                            Some(Ok(s)) => frame.push(s),
                            _ => break 'frames_f,
                        }
                    }
                    if frame.len() < channels {
                        break;
                    }
                    for s in frame {
                        let bytes = s.to_le_bytes();
                        out[written..written + 4].copy_from_slice(&bytes);
                        written += 4;
                    }
                    self.cursor_frame += 1;
                }
            }
        }

        written as i64
    }

    fn seek_sample(&mut self, n: i64) -> RResult<(), DecodeError> {
        let Some(reader) = self.reader.as_mut() else {
            return RResult::RErr(DecodeError::SeekFailed("decoder not initialized".into()));
        };
        let clamped = (self.start_frame + n).clamp(self.start_frame, self.end_frame.max(self.start_frame));
        match reader.seek(clamped.max(0) as u32) {
            Ok(()) => {
                self.cursor_frame = clamped;
                RResult::ROk(())
            }
            Err(e) => RResult::RErr(DecodeError::SeekFailed(RString::from(e.to_string()))),
        }
    }

    fn seek(&mut self, t: f64) -> RResult<(), DecodeError> {
        let sample_rate = match self.spec {
            Some(s) if s.sample_rate > 0 => s.sample_rate,
            _ => return RResult::RErr(DecodeError::SeekFailed("no negotiated format".into())),
        };
        self.seek_sample((t * sample_rate as f64).round() as i64)
    }

    fn read_pos(&self) -> f64 {
        let sample_rate = self.spec.map(|s| s.sample_rate).unwrap_or(1).max(1);
        self.cursor_frame as f64 / sample_rate as f64
    }
}

waveloom_plugin_api::declare_decoder_plugin!(wavdecoder_load, WavDecoderPlugin, WavDecoderPlugin::new);

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &std::path::Path, frames: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            writer.write_sample((i % 100) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn insert_probes_a_real_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 800);

        let plugin = WavDecoderPlugin::new();
        let item = plugin
            .insert(abi_stable::std_types::RStr::from(path.to_str().unwrap()))
            .into_option()
            .expect("probe should succeed");
        assert_eq!(item.sample_rate, 8000);
        assert_eq!(item.channels, 1);
        assert_eq!(item.total_samples, 800);
    }

    #[test]
    fn init_then_read_yields_pcm_then_zero_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 100);

        let plugin = WavDecoderPlugin::new();
        let item = plugin
            .insert(abi_stable::std_types::RStr::from(path.to_str().unwrap()))
            .into_option()
            .unwrap();

        let mut instance = plugin.open();
        let format = instance.init(&item).into_result().unwrap();
        assert_eq!(format.sample_rate, 8000);

        let mut buf = vec![0u8; 4096];
        let n = instance.read(RSliceMut::from(&mut buf[..]));
        assert_eq!(n, 200); // 100 frames * 2 bytes/frame (mono, 16-bit)

        let n2 = instance.read(RSliceMut::from(&mut buf[..]));
        assert_eq!(n2, 0);
    }

    #[test]
    fn seek_moves_the_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 1000);

        let plugin = WavDecoderPlugin::new();
        let item = plugin
            .insert(abi_stable::std_types::RStr::from(path.to_str().unwrap()))
            .into_option()
            .unwrap();
        let mut instance = plugin.open();
        instance.init(&item).into_result().unwrap();

        instance.seek_sample(500).into_result().unwrap();
        assert!((instance.read_pos() - 500.0 / 8000.0).abs() < 1e-9);
    }

    #[test]
    fn seek_sample_is_relative_to_sub_range_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_test_wav(&path, 10_000);

        let plugin = WavDecoderPlugin::new();
        let mut item = plugin
            .insert(abi_stable::std_types::RStr::from(path.to_str().unwrap()))
            .into_option()
            .unwrap();
        item.start_sample = 5000;
        item.end_sample = 9999;

        let mut instance = plugin.open();
        instance.init(&item).into_result().unwrap();

        instance.seek_sample(200).into_result().unwrap();
        assert!((instance.read_pos() - 5200.0 / 8000.0).abs() < 1e-9);
    }

    #[test]
    fn load_symbol_reports_decoder_kind() {
        let entry = wavdecoder_load(&waveloom_plugin_api::HostFunctions::inert());
        assert_eq!(entry.kind, waveloom_plugin_api::PluginKind::Decoder);
        assert!(entry.create_decoder.is_some());
    }
}
