//! Gain-gated echo suppression.
//!
//! [`EchoGate`] is the reference suppressor behind the AEC composite node: it
//! ducks the microphone while the loudspeaker is active and ramps it back up
//! once the speaker has been quiet for longer than the room's echo tail.
//! It is deliberately crude (a gate, not an adaptive filter) but it is cheap,
//! deterministic, and good enough for intercom-style duplex audio.

/// Echo-suppressing gate driven by a feedback (loudspeaker) signal.
///
/// Per sample pair `(microphone, feedback)`:
///
/// 1. feedback magnitude above the threshold resets the silence counter;
/// 2. once the feedback has been silent for the configured latency, the
///    microphone gain ramps up at the release rate toward 1.0;
/// 3. otherwise the gain ramps down at the attack rate toward the minimum.
///
/// The minimum gain is non-zero so the far end always hears that the channel
/// is alive. Samples are normalized `[-1, 1]`.
///
/// # Example
///
/// ```rust
/// use brook_core::EchoGate;
///
/// let mut gate = EchoGate::new(48000);
/// // Loud speaker: the microphone is ducked.
/// let out = gate.process(0.5, 0.8);
/// assert!(out.abs() < 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct EchoGate {
    rate: u32,
    attack_ms: f32,
    release_ms: f32,
    min_gain: f32,
    threshold: f32,
    latency_ms: f32,

    /// Current microphone gain in [min_gain, 1].
    gain: f32,
    /// Consecutive feedback samples below the threshold.
    silent_samples: u32,
    /// Silence run length required before the gain may recover.
    latency_samples: u32,
    /// Gain step per sample while ducking.
    attack_step: f32,
    /// Gain step per sample while recovering.
    release_step: f32,
}

impl EchoGate {
    /// Create a gate with the default tuning: attack 1 ms, release 100 ms,
    /// minimum gain 1 %, threshold 0.2 % of full scale, latency 100 ms.
    pub fn new(rate: u32) -> Self {
        let mut gate = Self {
            rate,
            attack_ms: 1.0,
            release_ms: 100.0,
            min_gain: 0.01,
            threshold: 0.002,
            latency_ms: 100.0,
            gain: 1.0,
            silent_samples: 0,
            latency_samples: 0,
            attack_step: 0.0,
            release_step: 0.0,
        };
        gate.recalculate_rates();
        gate
    }

    /// Set attack (ducking) time in ms (0.1-1000 ms).
    pub fn set_attack_ms(&mut self, attack_ms: f32) {
        self.attack_ms = attack_ms.clamp(0.1, 1000.0);
        self.recalculate_rates();
    }

    /// Current attack time in ms.
    pub fn attack_ms(&self) -> f32 {
        self.attack_ms
    }

    /// Set release (recovery) time in ms (1-10000 ms).
    pub fn set_release_ms(&mut self, release_ms: f32) {
        self.release_ms = release_ms.clamp(1.0, 10000.0);
        self.recalculate_rates();
    }

    /// Current release time in ms.
    pub fn release_ms(&self) -> f32 {
        self.release_ms
    }

    /// Set the floor the gain ducks to, as linear gain in [0, 1].
    pub fn set_min_gain(&mut self, min_gain: f32) {
        self.min_gain = min_gain.clamp(0.0, 1.0);
    }

    /// Current gain floor.
    pub fn min_gain(&self) -> f32 {
        self.min_gain
    }

    /// Set the feedback activity threshold, as a fraction of full scale.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.0, 1.0);
    }

    /// Current feedback activity threshold.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Set the echo-tail latency in ms (0-5000 ms): how long the feedback
    /// must stay silent before the microphone recovers.
    pub fn set_latency_ms(&mut self, latency_ms: f32) {
        self.latency_ms = latency_ms.clamp(0.0, 5000.0);
        self.recalculate_rates();
    }

    /// Current echo-tail latency in ms.
    pub fn latency_ms(&self) -> f32 {
        self.latency_ms
    }

    /// Update the sample rate. Counters keep their sample counts; only the
    /// per-sample steps are rescaled.
    pub fn set_rate(&mut self, rate: u32) {
        self.rate = rate;
        self.recalculate_rates();
    }

    /// The gain currently applied to the microphone.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Back to full gain with no silence history.
    pub fn reset(&mut self) {
        self.gain = 1.0;
        self.silent_samples = 0;
    }

    fn recalculate_rates(&mut self) {
        let rate = self.rate as f32;
        let attack_samples = self.attack_ms / 1000.0 * rate;
        let release_samples = self.release_ms / 1000.0 * rate;
        self.attack_step = if attack_samples > 0.0 {
            (1.0 - self.min_gain) / attack_samples
        } else {
            1.0
        };
        self.release_step = if release_samples > 0.0 {
            (1.0 - self.min_gain) / release_samples
        } else {
            1.0
        };
        self.latency_samples = (self.latency_ms / 1000.0 * rate) as u32;
    }

    /// Gate one microphone sample against one feedback sample.
    #[inline]
    pub fn process(&mut self, microphone: f32, feedback: f32) -> f32 {
        if feedback.abs() > self.threshold {
            self.silent_samples = 0;
        } else if self.silent_samples < u32::MAX {
            self.silent_samples += 1;
        }
        if self.silent_samples >= self.latency_samples {
            self.gain = (self.gain + self.release_step).min(1.0);
        } else {
            self.gain = (self.gain - self.attack_step).max(self.min_gain);
        }
        microphone * self.gain
    }

    /// Gate a microphone block in place against a feedback block.
    ///
    /// The blocks are processed pairwise up to the shorter length.
    pub fn process_block(&mut self, microphone: &mut [f32], feedback: &[f32]) {
        for (m, &f) in microphone.iter_mut().zip(feedback) {
            *m = self.process(*m, f);
        }
    }
}
