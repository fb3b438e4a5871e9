//! Auto-inserted format bridge.
//!
//! A [`ConverterStage`] is what [`ProcessChain::update_inter_stages`] inserts
//! between two adjacent stages whose formats differ. It performs, in order:
//! sample-encoding conversion, channel remap/broadcast/down-mix, and linear
//! resampling. The resampler is stateful (fractional position plus one
//! carried frame) so block boundaries are seamless.
//!
//! [`ProcessChain::update_inter_stages`]: crate::ProcessChain::update_inter_stages

use std::any::Any;

use brook_core::{ChannelRole, FormatDescriptor, Time, sample};

use crate::stage::{Stage, StageKind};

/// Stateful linear resampler over interleaved normalized frames.
///
/// Keeps a fractional read position and the last input frame so consecutive
/// blocks interpolate across their boundary.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    /// Input frames consumed per output frame.
    step: f64,
    /// Read position in input-frame units; `prev` sits at position 0 and the
    /// current block's frames at 1..=n.
    pos: f64,
    /// Last frame of the previous block, one sample per channel.
    prev: Vec<f64>,
    channels: usize,
}

impl LinearResampler {
    /// Create a resampler from `in_rate` to `out_rate` Hz over `channels`
    /// interleaved channels.
    pub fn new(in_rate: u32, out_rate: u32, channels: usize) -> Self {
        debug_assert!(in_rate > 0 && out_rate > 0 && channels > 0);
        Self {
            step: f64::from(in_rate) / f64::from(out_rate),
            // Start one frame in so the first output equals the first input.
            pos: 1.0,
            prev: vec![0.0; channels],
            channels,
        }
    }

    /// Input frames needed to guarantee `output_frames` output frames from
    /// the current position.
    pub fn required_input_frames(&self, output_frames: usize) -> usize {
        (self.pos + output_frames as f64 * self.step).ceil() as usize + 1
    }

    /// Resample `frames` interleaved input frames, appending output frames.
    /// Returns the number of frames appended.
    pub fn process(&mut self, input: &[f64], frames: usize, output: &mut Vec<f64>) -> usize {
        let ch = self.channels;
        debug_assert!(input.len() >= frames * ch);
        if frames == 0 {
            return 0;
        }
        let mut produced = 0;
        while self.pos < frames as f64 {
            let i = self.pos as usize;
            let t = self.pos - i as f64;
            for c in 0..ch {
                let a = if i == 0 {
                    self.prev[c]
                } else {
                    input[(i - 1) * ch + c]
                };
                let b = input[i * ch + c];
                output.push(a + (b - a) * t);
            }
            self.pos += self.step;
            produced += 1;
        }
        self.prev.copy_from_slice(&input[(frames - 1) * ch..frames * ch]);
        self.pos -= frames as f64;
        produced
    }

    /// Forget the carried frame and fractional position.
    pub fn reset(&mut self) {
        self.pos = 1.0;
        self.prev.fill(0.0);
    }
}

/// Bridges two formats: encoding, channel layout, and rate.
pub struct ConverterStage {
    input: FormatDescriptor,
    output: FormatDescriptor,
    resampler: Option<LinearResampler>,
    /// Input channel index feeding each output channel; `None` means silence
    /// (role absent) or, for a mono output, the average of all inputs.
    remap: Vec<Option<usize>>,
    mono_average: bool,
    decode_buf: Vec<f64>,
    remap_buf: Vec<f64>,
    rate_buf: Vec<f64>,
}

impl ConverterStage {
    /// Build the bridge from `input` to `output`.
    pub fn new(input: FormatDescriptor, output: FormatDescriptor) -> Self {
        let resampler = (input.rate() != output.rate()).then(|| {
            LinearResampler::new(input.rate(), output.rate(), output.channel_count())
        });
        let (remap, mono_average) = Self::build_remap(input.channels(), output.channels());
        Self {
            input,
            output,
            resampler,
            remap,
            mono_average,
            decode_buf: Vec::new(),
            remap_buf: Vec::new(),
            rate_buf: Vec::new(),
        }
    }

    /// Per-output-channel source plan. A mono front-center input broadcasts
    /// into every output channel; a multi-channel input feeding a mono output
    /// is averaged; otherwise channels match by role and unmatched outputs
    /// stay silent.
    fn build_remap(
        input: &[ChannelRole],
        output: &[ChannelRole],
    ) -> (Vec<Option<usize>>, bool) {
        let mono_broadcast = input == [ChannelRole::FrontCenter];
        let mut remap = Vec::with_capacity(output.len());
        let mut any_missing = false;
        for role in output {
            let src = input.iter().position(|r| r == role);
            if src.is_none() {
                if mono_broadcast {
                    remap.push(Some(0));
                    continue;
                }
                any_missing = true;
            }
            remap.push(src);
        }
        let mono_average = output.len() == 1 && input.len() > 1 && any_missing;
        (remap, mono_average)
    }

    fn identity_channels(&self) -> bool {
        self.input.channels() == self.output.channels()
    }
}

impl Stage for ConverterStage {
    fn name(&self) -> &str {
        "converter"
    }

    fn kind(&self) -> StageKind {
        StageKind::Converter
    }

    fn input_format(&self) -> Option<&FormatDescriptor> {
        Some(&self.input)
    }

    fn output_format(&self) -> Option<&FormatDescriptor> {
        Some(&self.output)
    }

    fn required_input_frames(&self, output_frames: usize) -> usize {
        match &self.resampler {
            Some(r) => r.required_input_frames(output_frames),
            None => output_frames,
        }
    }

    fn process(&mut self, _time: Time, input: &[u8], frames: usize, output: &mut Vec<u8>) -> usize {
        if frames == 0 {
            return 0;
        }
        let in_ch = self.input.channel_count();
        let out_ch = self.output.channel_count();

        // 1. Decode to normalized interleaved samples.
        self.decode_buf.clear();
        sample::decode_norm_buffer(
            self.input.encoding(),
            &input[..frames * self.input.frame_bytes()],
            &mut self.decode_buf,
        );

        // 2. Channel remap.
        let remapped: &[f64] = if self.identity_channels() {
            &self.decode_buf
        } else {
            self.remap_buf.clear();
            for frame in self.decode_buf.chunks_exact(in_ch) {
                if self.mono_average {
                    self.remap_buf
                        .push(frame.iter().sum::<f64>() / in_ch as f64);
                    continue;
                }
                for src in &self.remap {
                    self.remap_buf.push(src.map_or(0.0, |i| frame[i]));
                }
            }
            &self.remap_buf
        };

        // 3. Resample.
        let (resampled, out_frames): (&[f64], usize) = match &mut self.resampler {
            Some(r) => {
                self.rate_buf.clear();
                let produced = r.process(remapped, frames, &mut self.rate_buf);
                (&self.rate_buf, produced)
            }
            None => (remapped, frames),
        };

        // 4. Encode into the output encoding.
        sample::encode_norm_buffer(
            self.output.encoding(),
            &resampled[..out_frames * out_ch],
            output,
        );
        out_frames
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
