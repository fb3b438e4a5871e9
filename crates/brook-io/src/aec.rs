//! Echo-cancelled capture nodes.
//!
//! An AEC node has no device of its own: its [`AecDriver`] opens two
//! sub-interfaces, one capturing the microphone stream and one tapping the
//! post-mix feedback of the playback stream. Both feed a [`StreamAligner`];
//! each aligned block pair runs through the [`EchoGate`], which ducks the
//! microphone while the loudspeaker is active, and the gated block is
//! delivered to the AEC node as if a device had captured it.

use std::sync::{Arc, Weak};

use brook_core::{EchoGate, FormatDescriptor, StreamAligner, Time, sample};
use parking_lot::Mutex;

use crate::Result;
use crate::interface::Interface;
use crate::node::Node;

/// Alignment and gating state shared by the two sub-interface callbacks.
pub(crate) struct AecEngine {
    aligner: StreamAligner,
    gate: EchoGate,
    /// Format of both aligned sides and of the delivered blocks.
    format: FormatDescriptor,
    node: Weak<Node>,
    mic_block: Vec<u8>,
    fb_block: Vec<u8>,
    out_block: Vec<u8>,
}

impl AecEngine {
    /// `format` is the AEC node's hardware-side format; both sub-interfaces
    /// deliver in it. The rings hold one second per side.
    pub(crate) fn new(format: FormatDescriptor, block_frames: usize, node: Weak<Node>) -> Self {
        let rate = format.rate();
        let frame_bytes = format.frame_bytes();
        Self {
            aligner: StreamAligner::new(
                block_frames,
                frame_bytes,
                frame_bytes,
                rate,
                rate as usize,
            ),
            gate: EchoGate::new(rate),
            format,
            node,
            mic_block: vec![0; block_frames * frame_bytes],
            fb_block: vec![0; block_frames * frame_bytes],
            out_block: Vec::new(),
        }
    }

    pub(crate) fn push_microphone(&mut self, data: &[u8], frames: usize, time: Time) {
        self.aligner.push_first(data, frames, time);
        self.drain();
    }

    pub(crate) fn push_feedback(&mut self, data: &[u8], frames: usize, time: Time) {
        self.aligner.push_second(data, frames, time);
        self.drain();
    }

    pub(crate) fn reset(&mut self) {
        self.aligner.clear();
        self.gate.reset();
    }

    /// Process every aligned pair currently available.
    fn drain(&mut self) {
        let Some(node) = self.node.upgrade() else {
            return;
        };
        let encoding = self.format.encoding();
        let step = encoding.bytes_per_sample();
        let channels = self.format.channel_count();
        let block_frames = self.aligner.block_frames();
        while let Some(time) = self.aligner.pop_pair(&mut self.mic_block, &mut self.fb_block) {
            self.out_block.clear();
            for frame in 0..block_frames {
                // Gate tracks the loudest feedback channel of the frame.
                let mut activity = 0.0f32;
                for ch in 0..channels {
                    let off = (frame * channels + ch) * step;
                    let v = sample::decode_norm(encoding, &self.fb_block[off..]) as f32;
                    activity = activity.max(v.abs());
                }
                let gain = f64::from(self.gate.process(1.0, activity));
                for ch in 0..channels {
                    let off = (frame * channels + ch) * step;
                    let v = sample::decode_norm(encoding, &self.mic_block[off..]) * gain;
                    let start = self.out_block.len();
                    self.out_block.resize(start + step, 0);
                    sample::encode_norm(encoding, v, &mut self.out_block[start..]);
                }
            }
            node.on_capture(time, &self.out_block, block_frames);
        }
    }
}

/// Driver of an AEC node: the two sub-interfaces plus the shared engine.
pub struct AecDriver {
    microphone: Interface,
    feedback: Interface,
    engine: Arc<Mutex<AecEngine>>,
}

impl AecDriver {
    pub(crate) fn new(
        microphone: Interface,
        feedback: Interface,
        engine: Arc<Mutex<AecEngine>>,
    ) -> Self {
        Self {
            microphone,
            feedback,
            engine,
        }
    }

    /// Start both sub-interfaces; neither runs if either fails.
    pub(crate) fn start(&mut self) -> Result<()> {
        self.engine.lock().reset();
        self.microphone.start()?;
        if let Err(err) = self.feedback.start() {
            self.microphone.stop();
            return Err(err);
        }
        tracing::info!("aec driver started");
        Ok(())
    }

    pub(crate) fn stop(&mut self) {
        self.feedback.stop();
        self.microphone.stop();
        self.engine.lock().reset();
        tracing::info!("aec driver stopped");
    }
}
