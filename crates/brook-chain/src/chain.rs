//! The ordered stage pipeline.
//!
//! A [`ProcessChain`] holds its stages in data-flow order: index 0 is where
//! data enters, the last index is where it leaves. For a playback chain the
//! application-facing endpoint sits at index 0 and the hardware side is the
//! tail; for a capture chain the hardware feeds index 0 and the endpoint is
//! the tail. Both directions are therefore the same forward walk:
//! [`pull`] asks the head endpoint to produce, [`push`] feeds the head and
//! lets the tail endpoint consume.
//!
//! [`update_inter_stages`] bridges any format mismatch between neighbors by
//! inserting [`ConverterStage`]s, so a started chain always hands each stage
//! exactly the format it declared.
//!
//! Malformed requests on this API are logged and reported by `bool`/`Option`
//! returns; nothing here panics, since these calls can run on the hardware
//! callback path.
//!
//! [`pull`]: ProcessChain::pull
//! [`push`]: ProcessChain::push
//! [`update_inter_stages`]: ProcessChain::update_inter_stages

use std::collections::VecDeque;

use brook_core::{FormatDescriptor, Time};

use crate::convert::ConverterStage;
use crate::stage::{Stage, StageKind};

/// Iteration guard for the pull loop: a converter's frame accounting should
/// satisfy a request in one pass, so more than a few passes means a stage is
/// misbehaving.
const MAX_PULL_PASSES: usize = 4;

/// An ordered list of stages between two declared boundary formats.
#[derive(Default)]
pub struct ProcessChain {
    stages: Vec<Box<dyn Stage>>,
    /// Format entering stage 0.
    input_format: Option<FormatDescriptor>,
    /// Format leaving the last stage.
    output_format: Option<FormatDescriptor>,
    /// Pull-side carry: frames produced beyond a request (resampler block
    /// jitter) wait here for the next request.
    carry: VecDeque<u8>,
    buf_a: Vec<u8>,
    buf_b: Vec<u8>,
    req_scratch: Vec<usize>,
}

impl ProcessChain {
    /// Create an empty chain with no boundary formats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the chain has no stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Declare the format entering stage 0.
    pub fn set_input_config(&mut self, format: FormatDescriptor) {
        self.input_format = Some(format);
    }

    /// Declare the format leaving the last stage.
    pub fn set_output_config(&mut self, format: FormatDescriptor) {
        self.output_format = Some(format);
    }

    /// The declared entry format.
    pub fn input_config(&self) -> Option<&FormatDescriptor> {
        self.input_format.as_ref()
    }

    /// The declared exit format.
    pub fn output_config(&self) -> Option<&FormatDescriptor> {
        self.output_format.as_ref()
    }

    /// Append a stage at the tail. Rejects a second endpoint.
    pub fn push_back(&mut self, stage: Box<dyn Stage>) -> bool {
        if stage.kind().is_endpoint() && self.has_endpoint() {
            tracing::error!(stage = stage.name(), "chain already has an endpoint");
            return false;
        }
        self.stages.push(stage);
        true
    }

    /// Insert a stage at the head. Rejects a second endpoint.
    pub fn push_front(&mut self, stage: Box<dyn Stage>) -> bool {
        if stage.kind().is_endpoint() && self.has_endpoint() {
            tracing::error!(stage = stage.name(), "chain already has an endpoint");
            return false;
        }
        self.stages.insert(0, stage);
        true
    }

    /// Remove the head stage if and only if it is of `kind`.
    pub fn remove_if_first(&mut self, kind: StageKind) -> bool {
        if self.stages.first().is_some_and(|s| s.kind() == kind) {
            self.stages.remove(0);
            return true;
        }
        false
    }

    /// Remove the tail stage if and only if it is of `kind`.
    pub fn remove_if_last(&mut self, kind: StageKind) -> bool {
        if self.stages.last().is_some_and(|s| s.kind() == kind) {
            self.stages.pop();
            return true;
        }
        false
    }

    /// Strip every auto-inserted converter so the chain can be recomputed.
    pub fn remove_converters(&mut self) {
        self.stages.retain(|s| s.kind() != StageKind::Converter);
    }

    /// Whether any stage of `kind` is present.
    pub fn has_kind(&self, kind: StageKind) -> bool {
        self.stages.iter().any(|s| s.kind() == kind)
    }

    /// Whether the chain already has its one endpoint.
    pub fn has_endpoint(&self) -> bool {
        self.stages.iter().any(|s| s.kind().is_endpoint())
    }

    /// The first stage named `name`, if present.
    pub fn get(&self, name: &str) -> Option<&dyn Stage> {
        self.stages
            .iter()
            .find(|s| s.name() == name)
            .map(AsRef::as_ref)
    }

    /// Mutable access to the first stage named `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut dyn Stage> {
        match self.stages.iter_mut().find(|s| s.name() == name) {
            Some(stage) => Some(stage.as_mut()),
            None => None,
        }
    }

    /// Mutable access to the first stage of `kind`.
    pub fn first_of_kind_mut(&mut self, kind: StageKind) -> Option<&mut dyn Stage> {
        match self.stages.iter_mut().find(|s| s.kind() == kind) {
            Some(stage) => Some(stage.as_mut()),
            None => None,
        }
    }

    /// Recompute the converter bridges between adjacent stages.
    ///
    /// Walks the stage list with the declared entry format: format-agnostic
    /// stages (gain) adopt the format flowing through them, fixed-format
    /// stages (endpoints) get a [`ConverterStage`] inserted in front when the
    /// flowing format differs, and a final converter bridges to the declared
    /// exit format. Idempotent; must be re-run after any stage mutation and
    /// before the chain is started.
    pub fn update_inter_stages(&mut self) -> bool {
        let (Some(input), Some(output)) = (self.input_format.clone(), self.output_format.clone())
        else {
            tracing::error!("chain boundary formats not declared");
            return false;
        };
        self.remove_converters();
        let mut current = input;
        let mut i = 0;
        while i < self.stages.len() {
            if self.stages[i].adopt_format(&current) {
                i += 1;
                continue;
            }
            let Some(declared) = self.stages[i].input_format().cloned() else {
                tracing::error!(stage = self.stages[i].name(), "stage declares no format");
                return false;
            };
            if declared != current {
                self.stages
                    .insert(i, Box::new(ConverterStage::new(current, declared.clone())));
                i += 1;
            }
            // A fixed-format stage always declares its output.
            current = match self.stages[i].output_format() {
                Some(f) => f.clone(),
                None => declared,
            };
            i += 1;
        }
        if current != output {
            self.stages
                .push(Box::new(ConverterStage::new(current, output)));
        }
        self.carry.clear();
        true
    }

    /// Drive `frames` frames out of the tail (playback direction).
    ///
    /// The head endpoint produces, every stage transforms, and the result
    /// lands in `out` in the declared exit format. Overproduction from
    /// resampling is carried to the next call; a shortfall after the pass
    /// guard is zero-filled and logged. Returns the frames served with real
    /// data.
    pub fn pull(&mut self, time: Time, out: &mut [u8], frames: usize) -> usize {
        let Some(out_fmt) = &self.output_format else {
            tracing::error!("pull on a chain with no output format");
            out.fill(0);
            return 0;
        };
        let out_fb = out_fmt.frame_bytes();
        debug_assert!(out.len() >= frames * out_fb);

        let mut passes = 0;
        while self.carry.len() < frames * out_fb && passes < MAX_PULL_PASSES {
            passes += 1;
            let missing = frames - self.carry.len() / out_fb;
            if !self.run_pull_pass(time, missing) {
                break;
            }
        }

        let have = (self.carry.len() / out_fb).min(frames);
        for byte in &mut out[..have * out_fb] {
            *byte = self.carry.pop_front().unwrap_or(0);
        }
        if have < frames {
            tracing::error!(requested = frames, served = have, "chain pull shortfall");
            out[have * out_fb..frames * out_fb].fill(0);
        }
        have
    }

    /// One production pass: back-walk the per-stage frame requirements, then
    /// run the stages forward, appending the tail output to the carry.
    fn run_pull_pass(&mut self, time: Time, missing: usize) -> bool {
        if self.stages.is_empty() {
            tracing::error!("pull on an empty chain");
            return false;
        }
        // req_scratch[i] = frames stage i should produce.
        self.req_scratch.clear();
        self.req_scratch.resize(self.stages.len(), 0);
        let mut need = missing;
        for i in (0..self.stages.len()).rev() {
            self.req_scratch[i] = need;
            need = self.stages[i].required_input_frames(need);
        }

        let mut input = std::mem::take(&mut self.buf_a);
        let mut output = std::mem::take(&mut self.buf_b);
        input.clear();
        let mut frames_cur = self.stages[0].process(time, &[], self.req_scratch[0], &mut input);
        for stage in &mut self.stages[1..] {
            output.clear();
            frames_cur = stage.process(time, &input, frames_cur, &mut output);
            std::mem::swap(&mut input, &mut output);
        }
        let produced = frames_cur > 0;
        self.carry.extend(input.iter().copied());
        self.buf_a = input;
        self.buf_b = output;
        produced
    }

    /// Drive `frames` frames into the head (capture direction).
    ///
    /// `data` is in the declared entry format; each stage transforms it and
    /// the tail endpoint consumes the result.
    pub fn push(&mut self, time: Time, data: &[u8], frames: usize) {
        let Some(in_fmt) = &self.input_format else {
            tracing::error!("push on a chain with no input format");
            return;
        };
        if self.stages.is_empty() {
            tracing::error!("push on an empty chain");
            return;
        }
        debug_assert!(data.len() >= frames * in_fmt.frame_bytes());

        let mut input = std::mem::take(&mut self.buf_a);
        let mut output = std::mem::take(&mut self.buf_b);
        input.clear();
        input.extend_from_slice(&data[..frames * in_fmt.frame_bytes()]);
        let mut frames_cur = frames;
        for stage in &mut self.stages {
            output.clear();
            frames_cur = stage.process(time, &input, frames_cur, &mut output);
            std::mem::swap(&mut input, &mut output);
        }
        if frames_cur > 0 {
            tracing::error!(frames = frames_cur, "push into a chain with no sink endpoint");
        }
        self.buf_a = input;
        self.buf_b = output;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{ReadEndpoint, WriteEndpoint};
    use crate::gain::GainStage;
    use brook_core::{ChannelRole, SampleEncoding};

    fn fmt(rate: u32) -> FormatDescriptor {
        FormatDescriptor::new(ChannelRole::default_map(), SampleEncoding::Int16, rate)
    }

    fn converter_count(chain: &ProcessChain) -> usize {
        chain
            .stages
            .iter()
            .filter(|s| s.kind() == StageKind::Converter)
            .count()
    }

    fn playback_chain(app_rate: u32, node_rate: u32) -> ProcessChain {
        let mut chain = ProcessChain::new();
        chain.set_input_config(fmt(app_rate));
        chain.set_output_config(fmt(node_rate));
        chain.push_back(Box::new(WriteEndpoint::new(fmt(app_rate), 1 << 16)));
        chain.push_back(Box::new(GainStage::new("volume")));
        assert!(chain.update_inter_stages());
        chain
    }

    #[test]
    fn rejects_second_endpoint() {
        let mut chain = ProcessChain::new();
        assert!(chain.push_back(Box::new(WriteEndpoint::new(fmt(48000), 64))));
        assert!(!chain.push_back(Box::new(ReadEndpoint::new(fmt(48000), 64))));
        assert!(!chain.push_front(Box::new(ReadEndpoint::new(fmt(48000), 64))));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn matched_formats_insert_no_converter() {
        let chain = playback_chain(48000, 48000);
        assert_eq!(converter_count(&chain), 0);
    }

    #[test]
    fn rate_mismatch_inserts_exactly_one_converter() {
        let chain = playback_chain(44100, 48000);
        assert_eq!(converter_count(&chain), 1);
    }

    #[test]
    fn update_inter_stages_is_idempotent() {
        let mut chain = playback_chain(44100, 48000);
        let len = chain.len();
        assert!(chain.update_inter_stages());
        assert!(chain.update_inter_stages());
        assert_eq!(chain.len(), len);
        assert_eq!(converter_count(&chain), 1);
    }

    #[test]
    fn remove_if_kind_checks_position() {
        let mut chain = ProcessChain::new();
        chain.push_back(Box::new(WriteEndpoint::new(fmt(48000), 64)));
        chain.push_back(Box::new(GainStage::new("volume")));
        assert!(!chain.remove_if_first(StageKind::Gain));
        assert!(chain.remove_if_last(StageKind::Gain));
        assert!(chain.remove_if_first(StageKind::EndpointWrite));
        assert!(chain.is_empty());
    }

    #[test]
    fn lookup_by_name() {
        let mut chain = ProcessChain::new();
        chain.push_back(Box::new(GainStage::new("volume")));
        assert!(chain.get("volume").is_some());
        assert!(chain.get("reverb").is_none());
        assert!(chain.get_mut("volume").is_some());
        assert!(chain.has_kind(StageKind::Gain));
        assert!(!chain.has_kind(StageKind::Converter));
    }

    #[test]
    fn pull_same_rate_round_trips() {
        let mut chain = playback_chain(48000, 48000);
        let data: Vec<u8> = (0..64u8).collect(); // 16 stereo int16 frames
        {
            let ep = chain
                .first_of_kind_mut(StageKind::EndpointWrite)
                .and_then(|s| s.as_any_mut().downcast_mut::<WriteEndpoint>())
                .unwrap();
            ep.write(&data, 16);
        }
        let mut out = vec![0u8; 64];
        assert_eq!(chain.pull(Time::ZERO, &mut out, 16), 16);
        assert_eq!(out, data);
    }

    #[test]
    fn pull_through_resampler_serves_full_blocks() {
        let mut chain = playback_chain(44100, 48000);
        // Feed plenty of constant signal.
        let data: Vec<u8> = [1000i16; 8192]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        {
            let ep = chain
                .first_of_kind_mut(StageKind::EndpointWrite)
                .and_then(|s| s.as_any_mut().downcast_mut::<WriteEndpoint>())
                .unwrap();
            ep.write(&data, 4096);
        }
        let mut out = vec![0u8; 512 * 4];
        for _ in 0..8 {
            assert_eq!(chain.pull(Time::ZERO, &mut out, 512), 512);
        }
        // Constant in, constant out (away from the initial edge).
        let v = i16::from_le_bytes([out[0], out[1]]);
        assert_eq!(v, 1000);
    }

    #[test]
    fn push_capture_lands_in_read_endpoint() {
        let mut chain = ProcessChain::new();
        chain.set_input_config(fmt(48000));
        chain.set_output_config(fmt(48000));
        chain.push_back(Box::new(GainStage::new("volume")));
        chain.push_back(Box::new(ReadEndpoint::new(fmt(48000), 1 << 16)));
        assert!(chain.update_inter_stages());

        let data: Vec<u8> = (0..32u8).collect(); // 8 frames
        chain.push(Time::ZERO, &data, 8);

        let ep = chain
            .first_of_kind_mut(StageKind::EndpointRead)
            .and_then(|s| s.as_any_mut().downcast_mut::<ReadEndpoint>())
            .unwrap();
        let mut out = vec![0u8; 32];
        assert_eq!(ep.read(&mut out, 8), 8);
        assert_eq!(out, data);
    }

    #[test]
    fn pull_without_data_pads_silence() {
        let mut chain = playback_chain(48000, 48000);
        let mut out = vec![0xAAu8; 32];
        // Write endpoint is empty: it pads silence itself, so the pull still
        // serves the full request.
        assert_eq!(chain.pull(Time::ZERO, &mut out, 8), 8);
        assert!(out.iter().all(|&b| b == 0));
    }
}
