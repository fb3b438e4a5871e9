//! Application-facing chain boundaries.
//!
//! Every chain has exactly one endpoint, at the end that faces application
//! code. Three flavors cover the access patterns:
//!
//! - [`WriteEndpoint`]: the application pushes frames in, the chain pulls
//!   them out on hardware demand (playback).
//! - [`ReadEndpoint`]: the chain pushes processed capture frames in, the
//!   application drains them at its leisure.
//! - [`CallbackEndpoint`]: the chain calls the application synchronously,
//!   either to have a buffer filled (playback) or to hand frames over
//!   (capture).
//!
//! Endpoints carry the application's requested [`FormatDescriptor`] as a
//! fixed format; the auto-inserted converter bridges from there to the node.

use std::any::Any;
use std::collections::VecDeque;

use brook_core::{FormatDescriptor, Time};

use crate::stage::{Stage, StageKind};

/// Callback filling a playback buffer: `(time, buffer, frames)`. The buffer
/// holds `frames` interleaved frames in the endpoint's format and must be
/// filled completely.
pub type PullCallback = Box<dyn FnMut(Time, &mut [u8], usize) + Send>;

/// Callback receiving capture frames: `(time, buffer, frames)`.
pub type PushCallback = Box<dyn FnMut(Time, &[u8], usize) + Send>;

/// Byte FIFO bounded in frames; drops oldest on overflow.
#[derive(Debug)]
struct FrameFifo {
    bytes: VecDeque<u8>,
    frame_bytes: usize,
    capacity_frames: usize,
}

impl FrameFifo {
    fn new(frame_bytes: usize, capacity_frames: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(frame_bytes * capacity_frames),
            frame_bytes,
            capacity_frames,
        }
    }

    fn frames(&self) -> usize {
        self.bytes.len() / self.frame_bytes
    }

    /// Push frames, dropping the oldest beyond capacity. Returns frames
    /// dropped.
    fn push(&mut self, data: &[u8]) -> usize {
        self.bytes.extend(data);
        let over = self.frames().saturating_sub(self.capacity_frames);
        if over > 0 {
            self.bytes.drain(..over * self.frame_bytes);
        }
        over
    }

    /// Pop up to `frames` frames into `out`; the shortfall is zero-filled.
    /// Returns the number of real frames copied.
    fn pop(&mut self, out: &mut [u8], frames: usize) -> usize {
        let avail = self.frames().min(frames);
        for byte in &mut out[..avail * self.frame_bytes] {
            // VecDeque keeps this O(1) amortized per byte.
            *byte = self.bytes.pop_front().unwrap_or(0);
        }
        out[avail * self.frame_bytes..frames * self.frame_bytes].fill(0);
        avail
    }
}

/// Playback boundary: the application writes frames, the chain consumes them.
///
/// The internal FIFO is bounded; a slow consumer drops the oldest frames, a
/// slow producer is papered over with silence. Both conditions are logged.
pub struct WriteEndpoint {
    format: FormatDescriptor,
    fifo: FrameFifo,
}

impl WriteEndpoint {
    /// Create a write endpoint buffering up to `capacity_frames` frames of
    /// `format` data.
    pub fn new(format: FormatDescriptor, capacity_frames: usize) -> Self {
        let fifo = FrameFifo::new(format.frame_bytes(), capacity_frames);
        Self { format, fifo }
    }

    /// Queue `frames` frames for playback. Oldest queued frames are dropped
    /// if the buffer overflows.
    pub fn write(&mut self, data: &[u8], frames: usize) {
        let dropped = self.fifo.push(&data[..frames * self.format.frame_bytes()]);
        if dropped > 0 {
            tracing::warn!(dropped, "write endpoint overflow, oldest frames dropped");
        }
    }

    /// Frames currently queued.
    pub fn buffered_frames(&self) -> usize {
        self.fifo.frames()
    }
}

impl Stage for WriteEndpoint {
    fn name(&self) -> &str {
        "write"
    }

    fn kind(&self) -> StageKind {
        StageKind::EndpointWrite
    }

    fn input_format(&self) -> Option<&FormatDescriptor> {
        Some(&self.format)
    }

    fn output_format(&self) -> Option<&FormatDescriptor> {
        Some(&self.format)
    }

    fn process(&mut self, _time: Time, _input: &[u8], frames: usize, output: &mut Vec<u8>) -> usize {
        let fb = self.format.frame_bytes();
        let start = output.len();
        output.resize(start + frames * fb, 0);
        let served = self.fifo.pop(&mut output[start..], frames);
        if served < frames {
            tracing::warn!(
                requested = frames,
                served,
                "write endpoint underflow, padding silence"
            );
        }
        frames
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Capture boundary: the chain deposits frames, the application drains them.
pub struct ReadEndpoint {
    format: FormatDescriptor,
    fifo: FrameFifo,
}

impl ReadEndpoint {
    /// Create a read endpoint buffering up to `capacity_frames` frames.
    pub fn new(format: FormatDescriptor, capacity_frames: usize) -> Self {
        let fifo = FrameFifo::new(format.frame_bytes(), capacity_frames);
        Self { format, fifo }
    }

    /// Drain up to `frames` captured frames into `out`; the shortfall is
    /// zero-filled. Returns the number of real frames copied.
    pub fn read(&mut self, out: &mut [u8], frames: usize) -> usize {
        self.fifo.pop(out, frames)
    }

    /// Frames waiting to be read.
    pub fn buffered_frames(&self) -> usize {
        self.fifo.frames()
    }
}

impl Stage for ReadEndpoint {
    fn name(&self) -> &str {
        "read"
    }

    fn kind(&self) -> StageKind {
        StageKind::EndpointRead
    }

    fn input_format(&self) -> Option<&FormatDescriptor> {
        Some(&self.format)
    }

    fn output_format(&self) -> Option<&FormatDescriptor> {
        Some(&self.format)
    }

    fn process(&mut self, _time: Time, input: &[u8], frames: usize, _output: &mut Vec<u8>) -> usize {
        let dropped = self.fifo.push(&input[..frames * self.format.frame_bytes()]);
        if dropped > 0 {
            tracing::warn!(dropped, "read endpoint overflow, oldest frames dropped");
        }
        0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Synchronous callback boundary, for either direction.
///
/// Exactly one of the two callbacks is set: a pull callback makes this a
/// producing endpoint (playback), a push callback a consuming one (capture).
pub struct CallbackEndpoint {
    format: FormatDescriptor,
    on_pull: Option<PullCallback>,
    on_push: Option<PushCallback>,
    scratch: Vec<u8>,
}

impl CallbackEndpoint {
    /// Playback: `callback` is invoked to fill each requested block.
    pub fn for_output(format: FormatDescriptor, callback: PullCallback) -> Self {
        Self {
            format,
            on_pull: Some(callback),
            on_push: None,
            scratch: Vec::new(),
        }
    }

    /// Capture: `callback` receives each processed block.
    pub fn for_input(format: FormatDescriptor, callback: PushCallback) -> Self {
        Self {
            format,
            on_pull: None,
            on_push: Some(callback),
            scratch: Vec::new(),
        }
    }
}

impl Stage for CallbackEndpoint {
    fn name(&self) -> &str {
        "callback"
    }

    fn kind(&self) -> StageKind {
        StageKind::EndpointCallback
    }

    fn input_format(&self) -> Option<&FormatDescriptor> {
        Some(&self.format)
    }

    fn output_format(&self) -> Option<&FormatDescriptor> {
        Some(&self.format)
    }

    fn process(&mut self, time: Time, input: &[u8], frames: usize, output: &mut Vec<u8>) -> usize {
        let fb = self.format.frame_bytes();
        if let Some(on_pull) = &mut self.on_pull {
            self.scratch.clear();
            self.scratch.resize(frames * fb, 0);
            on_pull(time, &mut self.scratch, frames);
            output.extend_from_slice(&self.scratch);
            return frames;
        }
        if let Some(on_push) = &mut self.on_push {
            on_push(time, &input[..frames * fb], frames);
            return 0;
        }
        tracing::error!("callback endpoint has no callback, dropping block");
        0
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
