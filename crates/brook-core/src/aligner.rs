//! Two-stream time alignment.
//!
//! [`StreamAligner`] pairs two [`TimedRingBuffer`]s fed by independently
//! clocked producers (a microphone and a loudspeaker feedback tap, or two
//! capture devices being muxed) and drains them as time-aligned block pairs.
//! When the two read timestamps drift apart by more than one sample period,
//! the stream that is behind is advanced to the other's timestamp before the
//! next pair is served.

use crate::ring::TimedRingBuffer;
use crate::time::{Time, TimeDelta};

/// Pairs two timestamped rings and yields aligned fixed-size block pairs.
///
/// Feed each side with [`push_first`] / [`push_second`], then drain with
/// [`pop_pair`] until it returns `None`:
///
/// ```rust
/// use brook_core::{StreamAligner, Time};
///
/// let mut aligner = StreamAligner::new(32, 2, 2, 48000, 4096);
/// let block = [0u8; 64];
/// aligner.push_first(&block, 32, Time::ZERO);
/// aligner.push_second(&block, 32, Time::ZERO);
///
/// let (mut a, mut b) = ([0u8; 64], [0u8; 64]);
/// while let Some(_time) = aligner.pop_pair(&mut a, &mut b) {
///     // process one aligned pair
/// }
/// ```
///
/// A cycle where resynchronization could not produce an aligned pair is
/// abandoned and counted in [`missed_cycles`]; production resumes with the
/// next push.
///
/// [`push_first`]: StreamAligner::push_first
/// [`push_second`]: StreamAligner::push_second
/// [`pop_pair`]: StreamAligner::pop_pair
/// [`missed_cycles`]: StreamAligner::missed_cycles
#[derive(Debug)]
pub struct StreamAligner {
    first: TimedRingBuffer,
    second: TimedRingBuffer,
    block_frames: usize,
    rate: u32,
    missed_cycles: u64,
}

impl StreamAligner {
    /// Create an aligner serving `block_frames`-frame pairs at `rate` Hz.
    ///
    /// The two sides may have different frame widths (`first_frame_bytes` /
    /// `second_frame_bytes`); both rings hold `capacity_frames` frames.
    pub fn new(
        block_frames: usize,
        first_frame_bytes: usize,
        second_frame_bytes: usize,
        rate: u32,
        capacity_frames: usize,
    ) -> Self {
        debug_assert!(block_frames > 0);
        let mut first = TimedRingBuffer::new();
        first.set_capacity(capacity_frames, first_frame_bytes, rate);
        let mut second = TimedRingBuffer::new();
        second.set_capacity(capacity_frames, second_frame_bytes, rate);
        Self {
            first,
            second,
            block_frames,
            rate,
            missed_cycles: 0,
        }
    }

    /// Block size in frames.
    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    /// Cycles abandoned because resynchronization could not line the two
    /// streams up.
    pub fn missed_cycles(&self) -> u64 {
        self.missed_cycles
    }

    /// Frames currently buffered on the first side.
    pub fn first_size(&self) -> usize {
        self.first.size()
    }

    /// Frames currently buffered on the second side.
    pub fn second_size(&self) -> usize {
        self.second.size()
    }

    /// Feed frames into the first side; `time` stamps the first input frame.
    /// Returns the frames overwritten on overflow.
    pub fn push_first(&mut self, data: &[u8], frames: usize, time: Time) -> usize {
        self.first.write(data, frames, time)
    }

    /// Feed frames into the second side.
    pub fn push_second(&mut self, data: &[u8], frames: usize, time: Time) -> usize {
        self.second.write(data, frames, time)
    }

    /// Drop everything buffered on both sides.
    pub fn clear(&mut self) {
        self.first.clear();
        self.second.clear();
    }

    /// Try to drain one aligned block pair into `first_out` / `second_out`.
    ///
    /// Returns the timestamp of the pair's first frame, or `None` when either
    /// side lacks a full block. If the sides have drifted by more than one
    /// sample period the one that is behind is first advanced to the other's
    /// timestamp; a cycle that still cannot be aligned afterwards is
    /// abandoned and counted as missed.
    pub fn pop_pair(&mut self, first_out: &mut [u8], second_out: &mut [u8]) -> Option<Time> {
        if self.first.size() < self.block_frames || self.second.size() < self.block_frames {
            return None;
        }
        let period = TimeDelta::sample_period(self.rate);
        let t1 = self.first.read_timestamp();
        let t2 = self.second.read_timestamp();
        let drift = t1 - t2;
        if drift.abs() > period {
            // Drop the older stream's stale frames up to the newer timestamp.
            if t1 < t2 {
                self.first.set_read_position(t2);
            } else {
                self.second.set_read_position(t1);
            }
            let t1 = self.first.read_timestamp();
            let t2 = self.second.read_timestamp();
            if self.first.size() < self.block_frames
                || self.second.size() < self.block_frames
                || (t1 - t2).abs() > period
            {
                self.missed_cycles += 1;
                tracing::warn!(
                    drift_ns = drift.as_nanos(),
                    missed = self.missed_cycles,
                    "stream alignment failed, abandoning cycle"
                );
                return None;
            }
        }
        let time = self.first.read_timestamp();
        self.first.read(first_out, self.block_frames);
        self.second.read(second_out, self.block_frames);
        Some(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FB: usize = 2;
    const RATE: u32 = 48000;
    const BLOCK: usize = 32;

    fn frames(vals: &[i16]) -> Vec<u8> {
        vals.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn to_i16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    fn aligner() -> StreamAligner {
        StreamAligner::new(BLOCK, FB, FB, RATE, 4096)
    }

    #[test]
    fn aligned_streams_pair_up() {
        let mut al = aligner();
        let t = Time::from_nanos(1_000_000);
        let a: Vec<i16> = (0..64).collect();
        let b: Vec<i16> = (100..164).collect();
        al.push_first(&frames(&a), 64, t);
        al.push_second(&frames(&b), 64, t);

        let mut out_a = vec![0u8; BLOCK * FB];
        let mut out_b = vec![0u8; BLOCK * FB];
        assert_eq!(al.pop_pair(&mut out_a, &mut out_b), Some(t));
        assert_eq!(to_i16(&out_a), (0..32).collect::<Vec<i16>>());
        assert_eq!(to_i16(&out_b), (100..132).collect::<Vec<i16>>());

        let t_next = t + TimeDelta::from_frames(BLOCK as u64, RATE);
        assert_eq!(al.pop_pair(&mut out_a, &mut out_b), Some(t_next));
        assert_eq!(al.pop_pair(&mut out_a, &mut out_b), None);
        assert_eq!(al.missed_cycles(), 0);
    }

    #[test]
    fn starved_side_yields_nothing() {
        let mut al = aligner();
        al.push_first(&vec![0u8; 64 * FB], 64, Time::ZERO);
        let mut out_a = vec![0u8; BLOCK * FB];
        let mut out_b = vec![0u8; BLOCK * FB];
        assert_eq!(al.pop_pair(&mut out_a, &mut out_b), None);
        // Starvation is not a missed cycle.
        assert_eq!(al.missed_cycles(), 0);
    }

    #[test]
    fn drifted_stream_is_advanced() {
        let mut al = aligner();
        let t = Time::from_nanos(10_000_000);
        // First side starts 16 frames earlier than the second.
        let early = t - TimeDelta::from_frames(16, RATE);
        let a: Vec<i16> = (0..64).collect();
        al.push_first(&frames(&a), 64, early);
        al.push_second(&vec![1u8; 64 * FB], 64, t);

        let mut out_a = vec![0u8; BLOCK * FB];
        let mut out_b = vec![0u8; BLOCK * FB];
        let popped = al.pop_pair(&mut out_a, &mut out_b).unwrap();
        assert_eq!(popped, t);
        // The first 16 frames of the early stream were discarded.
        assert_eq!(to_i16(&out_a), (16..48).collect::<Vec<i16>>());
        assert_eq!(al.missed_cycles(), 0);
    }

    #[test]
    fn unbridgeable_drift_counts_missed_cycle() {
        let mut al = aligner();
        let t = Time::from_nanos(50_000_000);
        // The early side has fewer frames than the drift: advancing drains it
        // below one block.
        let early = t - TimeDelta::from_frames(40, RATE);
        al.push_first(&vec![0u8; 64 * FB], 64, early);
        al.push_second(&vec![0u8; 64 * FB], 64, t);

        let mut out_a = vec![0u8; BLOCK * FB];
        let mut out_b = vec![0u8; BLOCK * FB];
        assert_eq!(al.pop_pair(&mut out_a, &mut out_b), None);
        assert_eq!(al.missed_cycles(), 1);

        // Topping the early side back up resumes production.
        let resume = t + TimeDelta::from_frames(24, RATE);
        al.push_first(&vec![0u8; 32 * FB], 32, resume);
        assert!(al.pop_pair(&mut out_a, &mut out_b).is_some());
    }

    #[test]
    fn sub_period_jitter_is_tolerated() {
        let mut al = aligner();
        let t = Time::from_nanos(1_000_000);
        // Half a sample period of skew: no resync.
        let skewed = t + TimeDelta::from_nanos(TimeDelta::sample_period(RATE).as_nanos() / 2);
        al.push_first(&vec![0u8; BLOCK * FB], BLOCK, t);
        al.push_second(&vec![0u8; BLOCK * FB], BLOCK, skewed);

        let mut out_a = vec![0u8; BLOCK * FB];
        let mut out_b = vec![0u8; BLOCK * FB];
        assert!(al.pop_pair(&mut out_a, &mut out_b).is_some());
        assert_eq!(al.missed_cycles(), 0);
    }

    #[test]
    fn drain_loop_empties_both_sides() {
        let mut al = aligner();
        let t = Time::ZERO;
        al.push_first(&vec![0u8; 128 * FB], 128, t);
        al.push_second(&vec![0u8; 128 * FB], 128, t);
        let mut out_a = vec![0u8; BLOCK * FB];
        let mut out_b = vec![0u8; BLOCK * FB];
        let mut pairs = 0;
        while al.pop_pair(&mut out_a, &mut out_b).is_some() {
            pairs += 1;
        }
        assert_eq!(pairs, 4);
        assert_eq!(al.first_size(), 0);
        assert_eq!(al.second_size(), 0);
    }
}
