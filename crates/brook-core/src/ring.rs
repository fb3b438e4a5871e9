//! Timestamped ring buffer.
//!
//! [`TimedRingBuffer`] decouples hardware-callback timing from consumer
//! timing. Every write carries the wall-clock time of its first frame and the
//! buffer tracks the time of the next frame to be read, so two independently
//! clocked rings can be brought back into phase by timestamp rather than by
//! frame counting alone.
//!
//! Writes are never rejected: when free space runs out the oldest unread
//! frames are overwritten and the read cursor is forced forward. Reads are
//! never short: a shortfall is zero-filled and reported as dropped frames.

use crate::time::{Time, TimeDelta};

/// Fixed-capacity ring of fixed-size frames with a read-side timestamp.
///
/// Sizes are frames throughout; only the backing storage is
/// `capacity_frames * frame_bytes` raw bytes.
#[derive(Debug, Default)]
pub struct TimedRingBuffer {
    data: Vec<u8>,
    /// Next frame slot to write.
    write_pos: usize,
    /// Next frame slot to read.
    read_pos: usize,
    /// Valid frames between the cursors.
    filled: usize,
    capacity: usize,
    frame_bytes: usize,
    rate: u32,
    /// Wall-clock time of the next frame `read` will return.
    read_time: Time,
}

impl TimedRingBuffer {
    /// Create an empty, zero-capacity buffer. Call [`set_capacity`] before use.
    ///
    /// [`set_capacity`]: TimedRingBuffer::set_capacity
    pub fn new() -> Self {
        Self::default()
    }

    /// Size the buffer for `capacity` frames of `frame_bytes` bytes at `rate` Hz.
    ///
    /// If capacity and frame width are unchanged this only clears; the
    /// backing storage is not reallocated.
    pub fn set_capacity(&mut self, capacity: usize, frame_bytes: usize, rate: u32) {
        if capacity == self.capacity && frame_bytes == self.frame_bytes {
            self.rate = rate;
            self.clear();
            return;
        }
        tracing::debug!(capacity, frame_bytes, rate, "ring set_capacity");
        self.capacity = capacity;
        self.frame_bytes = frame_bytes;
        self.rate = rate;
        self.write_pos = 0;
        self.read_pos = 0;
        self.filled = 0;
        self.read_time = Time::ZERO;
        if capacity == 0 || frame_bytes == 0 {
            self.capacity = 0;
            self.frame_bytes = 0;
            self.data.clear();
            return;
        }
        self.data.clear();
        self.data.resize(capacity * frame_bytes, 0);
    }

    /// Size the buffer to hold `duration` worth of frames at `rate` Hz.
    pub fn set_capacity_duration(&mut self, duration: TimeDelta, frame_bytes: usize, rate: u32) {
        let frames = duration.whole_frames(rate) as usize;
        self.set_capacity(frames, frame_bytes, rate);
    }

    /// Capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Valid (unread) frames currently held.
    pub fn size(&self) -> usize {
        self.filled
    }

    /// Free space in frames.
    pub fn free_size(&self) -> usize {
        self.capacity - self.filled
    }

    /// Bytes per frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Sample rate in Hz.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Wall-clock time of the next frame to be read.
    pub fn read_timestamp(&self) -> Time {
        self.read_time
    }

    /// Drop all content and rewind the cursors. Capacity is kept.
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
        self.filled = 0;
        self.data.fill(0);
    }

    /// Copy `frames` frames from `data` into the ring; `time` is the
    /// wall-clock time of the first input frame.
    ///
    /// The write is never rejected. If it would exceed free space the oldest
    /// unread frames are overwritten, the read cursor is forced to follow,
    /// and the number of frames overwritten is returned. An input larger than
    /// the whole capacity keeps only its last `capacity` frames.
    pub fn write(&mut self, data: &[u8], frames: usize, time: Time) -> usize {
        if self.capacity == 0 || frames == 0 {
            return 0;
        }
        debug_assert!(data.len() >= frames * self.frame_bytes);
        let mut src = &data[..frames * self.frame_bytes];
        let mut frames = frames;
        // Overwrite count is judged against the original request, before any
        // truncation of an oversized input.
        let overwritten = frames.saturating_sub(self.free_size());
        if frames > self.capacity {
            tracing::warn!(
                frames,
                capacity = self.capacity,
                "ring write larger than capacity, keeping last frames"
            );
            src = &src[(frames - self.capacity) * self.frame_bytes..];
            frames = self.capacity;
        }
        // First data into an empty buffer seeds the read-side clock.
        if self.filled == 0 {
            self.read_time = time;
        }
        let first = frames.min(self.capacity - self.write_pos);
        let fb = self.frame_bytes;
        self.data[self.write_pos * fb..(self.write_pos + first) * fb]
            .copy_from_slice(&src[..first * fb]);
        let rest = frames - first;
        if rest > 0 {
            self.data[..rest * fb].copy_from_slice(&src[first * fb..]);
        }
        self.write_pos = (self.write_pos + frames) % self.capacity;
        self.filled += frames;
        if overwritten > 0 {
            // Oldest unread frames are gone; reading resumes right behind the
            // write cursor.
            self.read_pos = self.write_pos;
            self.filled = self.capacity;
        }
        overwritten
    }

    /// Read `frames` frames at the buffer's own read timestamp.
    ///
    /// Returns the number of frames that could not be served and were
    /// zero-filled instead.
    pub fn read(&mut self, data: &mut [u8], frames: usize) -> usize {
        self.read_at(data, frames, self.read_time)
    }

    /// Read `frames` frames as of wall-clock time `time`.
    ///
    /// A `time` later than the buffer's read timestamp first drops the stale
    /// frames in between; an earlier `time` pads the output with silence for
    /// the gap before real data resumes. The shortfall, if any, is
    /// zero-filled and returned as dropped frames.
    pub fn read_at(&mut self, data: &mut [u8], frames: usize, time: Time) -> usize {
        let fb = self.frame_bytes;
        debug_assert!(data.len() >= frames * fb);
        if self.filled == 0 || self.capacity == 0 {
            data[..frames * fb].fill(0);
            return frames;
        }
        let mut out = &mut data[..frames * fb];
        let mut frames = frames;
        let gap = self.read_time - time; // positive: caller asked for the past
        if gap > TimeDelta::ZERO {
            let silence = (gap.whole_frames(self.rate) as usize).min(frames);
            if silence > 0 {
                tracing::warn!(silence, frames, "ring read before buffered data, padding silence");
                out[..silence * fb].fill(0);
                if silence == frames {
                    return 0;
                }
                out = &mut out[silence * fb..];
                frames -= silence;
            }
        } else if gap < TimeDelta::ZERO {
            // Caller is ahead of the buffered data: drop the stale frames.
            self.set_read_position(time);
            if self.filled == 0 {
                out.fill(0);
                return frames;
            }
        }
        let mut dropped = 0;
        if self.filled < frames {
            dropped = frames - self.filled;
            frames = self.filled;
        }
        self.read_time += TimeDelta::from_frames(frames as u64, self.rate);
        let first = frames.min(self.capacity - self.read_pos);
        out[..first * fb].copy_from_slice(&self.data[self.read_pos * fb..(self.read_pos + first) * fb]);
        let rest = frames - first;
        if rest > 0 {
            out[first * fb..frames * fb].copy_from_slice(&self.data[..rest * fb]);
        }
        self.read_pos = (self.read_pos + frames) % self.capacity;
        self.filled -= frames;
        if dropped > 0 {
            out[frames * fb..].fill(0);
        }
        dropped
    }

    /// Advance the read side to wall-clock time `time`, discarding the frames
    /// in between (clipped to what is buffered).
    ///
    /// The timestamp advances by the exact duration of the discarded whole
    /// frames, not to `time` itself, so sub-frame error never accumulates
    /// across repeated calls.
    pub fn set_read_position(&mut self, time: Time) {
        if self.filled == 0 {
            // Nothing to discard; the next write into the empty buffer
            // reseeds the clock.
            return;
        }
        let delta = time - self.read_time;
        let remove = (delta.whole_frames(self.rate) as usize).min(self.filled);
        if remove == 0 {
            return;
        }
        tracing::trace!(remove, filled = self.filled, "ring resync drop");
        self.read_pos = (self.read_pos + remove) % self.capacity;
        self.filled -= remove;
        self.read_time += TimeDelta::from_frames(remove as u64, self.rate);
    }
}
