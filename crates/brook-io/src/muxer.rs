//! Channel-merging capture nodes.
//!
//! A muxer node merges two capture streams into one multi-channel stream.
//! Its [`MuxerDriver`] opens a sub-interface on each source node; both feed
//! a [`StreamAligner`], and each aligned block pair is routed channel by
//! channel into the output layout. Routing matches channel roles: an output
//! channel takes the like-named input channel, a mono front-center input
//! broadcasts into every output channel, and a mono front-center output
//! averages a multi-channel input. Where both inputs route to the same
//! output channel the second input wins; unrouted channels stay silent.

use std::sync::{Arc, Weak};

use brook_core::{ChannelRole, FormatDescriptor, StreamAligner, Time, sample};
use parking_lot::Mutex;

use crate::Result;
use crate::interface::Interface;
use crate::node::Node;

/// Where one output channel takes its signal from, within one input side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// This side does not feed the channel.
    Skip,
    /// Copy the side's channel at this index.
    Channel(usize),
    /// Average every channel of the side.
    Average,
}

fn build_routes(input: &[ChannelRole], output: &[ChannelRole]) -> Vec<Route> {
    output
        .iter()
        .map(|role| {
            if matches!(input, [ChannelRole::FrontCenter]) {
                return Route::Channel(0);
            }
            if let Some(pos) = input.iter().position(|r| r == role) {
                return Route::Channel(pos);
            }
            if *role == ChannelRole::FrontCenter {
                return Route::Average;
            }
            Route::Skip
        })
        .collect()
}

/// Alignment and routing state shared by the two sub-interface callbacks.
pub(crate) struct MuxEngine {
    aligner: StreamAligner,
    node: Weak<Node>,
    input1: FormatDescriptor,
    input2: FormatDescriptor,
    /// The merged format delivered to the node, in the widened encoding.
    output: FormatDescriptor,
    routes1: Vec<Route>,
    routes2: Vec<Route>,
    block1: Vec<u8>,
    block2: Vec<u8>,
    out_block: Vec<u8>,
}

impl MuxEngine {
    /// Both inputs must share the output's rate; their channel layouts are
    /// the (possibly relabeled) role lists routing is computed from.
    pub(crate) fn new(
        input1: FormatDescriptor,
        input2: FormatDescriptor,
        output: FormatDescriptor,
        block_frames: usize,
        node: Weak<Node>,
    ) -> Self {
        debug_assert_eq!(input1.rate(), output.rate());
        debug_assert_eq!(input2.rate(), output.rate());
        let rate = output.rate();
        let routes1 = build_routes(input1.channels(), output.channels());
        let routes2 = build_routes(input2.channels(), output.channels());
        Self {
            aligner: StreamAligner::new(
                block_frames,
                input1.frame_bytes(),
                input2.frame_bytes(),
                rate,
                rate as usize,
            ),
            node,
            block1: vec![0; block_frames * input1.frame_bytes()],
            block2: vec![0; block_frames * input2.frame_bytes()],
            input1,
            input2,
            output,
            routes1,
            routes2,
            out_block: Vec::new(),
        }
    }

    pub(crate) fn push_input1(&mut self, data: &[u8], frames: usize, time: Time) {
        self.aligner.push_first(data, frames, time);
        self.drain();
    }

    pub(crate) fn push_input2(&mut self, data: &[u8], frames: usize, time: Time) {
        self.aligner.push_second(data, frames, time);
        self.drain();
    }

    pub(crate) fn reset(&mut self) {
        self.aligner.clear();
    }

    /// One side's contribution to one output sample.
    fn routed(
        route: Route,
        block: &[u8],
        format: &FormatDescriptor,
        frame: usize,
    ) -> Option<f64> {
        let step = format.encoding().bytes_per_sample();
        let channels = format.channel_count();
        match route {
            Route::Skip => None,
            Route::Channel(ch) => {
                let off = (frame * channels + ch) * step;
                Some(sample::decode_norm(format.encoding(), &block[off..]))
            }
            Route::Average => {
                let mut sum = 0.0;
                for ch in 0..channels {
                    let off = (frame * channels + ch) * step;
                    sum += sample::decode_norm(format.encoding(), &block[off..]);
                }
                Some(sum / channels as f64)
            }
        }
    }

    fn drain(&mut self) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let out_enc = self.output.encoding();
        let out_step = out_enc.bytes_per_sample();
        let out_channels = self.output.channel_count();
        let block_frames = self.aligner.block_frames();
        while let Some(time) = self.aligner.pop_pair(&mut self.block1, &mut self.block2) {
            self.out_block.clear();
            self.out_block
                .resize(block_frames * out_channels * out_step, 0);
            for frame in 0..block_frames {
                for ch in 0..out_channels {
                    let mut value = 0.0;
                    if let Some(v) = Self::routed(self.routes1[ch], &self.block1, &self.input1, frame)
                    {
                        value = v;
                    }
                    if let Some(v) = Self::routed(self.routes2[ch], &self.block2, &self.input2, frame)
                    {
                        value = v;
                    }
                    let off = (frame * out_channels + ch) * out_step;
                    sample::encode_norm(out_enc, value, &mut self.out_block[off..off + out_step]);
                }
            }
            node.on_capture(time, &self.out_block, block_frames);
        }
    }
}

/// Driver of a muxer node: the two sub-interfaces plus the shared engine.
pub struct MuxerDriver {
    input1: Interface,
    input2: Interface,
    engine: Arc<Mutex<MuxEngine>>,
}

impl MuxerDriver {
    pub(crate) fn new(input1: Interface, input2: Interface, engine: Arc<Mutex<MuxEngine>>) -> Self {
        Self {
            input1,
            input2,
            engine,
        }
    }

    /// Start both sub-interfaces; neither runs if either fails.
    pub(crate) fn start(&mut self) -> Result<()> {
        self.engine.lock().reset();
        self.input1.start()?;
        if let Err(err) = self.input2.start() {
            self.input1.stop();
            return Err(err);
        }
        tracing::info!("muxer driver started");
        Ok(())
    }

    pub(crate) fn stop(&mut self) {
        self.input2.stop();
        self.input1.stop();
        self.engine.lock().reset();
        tracing::info!("muxer driver stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::SampleEncoding;

    fn fmt(roles: Vec<ChannelRole>, encoding: SampleEncoding) -> FormatDescriptor {
        FormatDescriptor::new(roles, encoding, 48000)
    }

    #[test]
    fn routes_match_by_role() {
        let stereo = vec![ChannelRole::FrontLeft, ChannelRole::FrontRight];
        let left_only = vec![ChannelRole::FrontLeft];
        assert_eq!(
            build_routes(&left_only, &stereo),
            vec![Route::Channel(0), Route::Skip]
        );
        assert_eq!(
            build_routes(&stereo, &stereo),
            vec![Route::Channel(0), Route::Channel(1)]
        );
    }

    #[test]
    fn mono_front_center_broadcasts() {
        let stereo = vec![ChannelRole::FrontLeft, ChannelRole::FrontRight];
        let mono = vec![ChannelRole::FrontCenter];
        assert_eq!(
            build_routes(&mono, &stereo),
            vec![Route::Channel(0), Route::Channel(0)]
        );
    }

    #[test]
    fn mono_output_averages_unmatched_input() {
        let stereo = vec![ChannelRole::FrontLeft, ChannelRole::FrontRight];
        let mono = vec![ChannelRole::FrontCenter];
        assert_eq!(build_routes(&stereo, &mono), vec![Route::Average]);
    }

    #[test]
    fn pair_is_routed_into_the_output_layout() {
        use crate::node::Direction;

        let left = fmt(vec![ChannelRole::FrontLeft], SampleEncoding::Int16);
        let right = fmt(vec![ChannelRole::FrontRight], SampleEncoding::Int16);
        let merged = fmt(
            vec![ChannelRole::FrontLeft, ChannelRole::FrontRight],
            SampleEncoding::Int16On32,
        );
        // A bare capture node taps the deliveries; no interface is attached,
        // so on_capture is a no-op, but the engine math is still observable
        // through its output block.
        let node = Node::new(
            "merged",
            Direction::Capture,
            merged.clone(),
            merged.clone(),
            4,
            None,
        );
        let mut engine = MuxEngine::new(left, right, merged, 4, Arc::downgrade(&node));

        let side1: Vec<u8> = [100i16, 200, 300, 400]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let side2: Vec<u8> = [-100i16, -200, -300, -400]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        engine.push_input1(&side1, 4, Time::ZERO);
        engine.push_input2(&side2, 4, Time::ZERO);

        // One pair drained: frame 0 = (100, -100), interleaved 32-bit lanes.
        let vals: Vec<i32> = engine
            .out_block
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(vals, vec![100, -100, 200, -200, 300, -300, 400, -400]);
    }

    #[test]
    fn second_input_wins_on_collision() {
        use crate::node::Direction;

        let a = fmt(vec![ChannelRole::FrontLeft], SampleEncoding::Int16);
        let b = fmt(vec![ChannelRole::FrontLeft], SampleEncoding::Int16);
        let merged = fmt(vec![ChannelRole::FrontLeft], SampleEncoding::Int16On32);
        let node = Node::new(
            "merged",
            Direction::Capture,
            merged.clone(),
            merged.clone(),
            2,
            None,
        );
        let mut engine = MuxEngine::new(a, b, merged, 2, Arc::downgrade(&node));

        let side1: Vec<u8> = [111i16, 111].iter().flat_map(|v| v.to_le_bytes()).collect();
        let side2: Vec<u8> = [222i16, 222].iter().flat_map(|v| v.to_le_bytes()).collect();
        engine.push_input1(&side1, 2, Time::ZERO);
        engine.push_input2(&side2, 2, Time::ZERO);

        let vals: Vec<i32> = engine
            .out_block
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(vals, vec![222, 222]);
    }
}
