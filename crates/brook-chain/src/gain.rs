//! Gain staging and named volume groups.
//!
//! A [`GainStage`] applies one multiplier per block: its own local gain in dB
//! cascaded with every [`VolumeGroup`] it is attached to. Groups are named,
//! shared, atomically-updated gain/mute pairs: the "MASTER" group can sit on
//! every playback chain while each interface also carries its private "FLOW"
//! group. Any muted group in the cascade forces exact silence.
//!
//! Groups live in a [`VolumeRegistry`] owned by the top-level manager and
//! passed down explicitly; there is no process-global state. The reserved
//! name [`FLOW`] is the one group an interface creates for itself instead of
//! resolving through the registry.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use brook_core::{FormatDescriptor, Time, sample};
use parking_lot::Mutex;

use crate::stage::{Stage, StageKind};

/// Reserved name of the interface-local volume group.
pub const FLOW: &str = "FLOW";

/// Valid gain range in dB; values outside are rejected, not clamped.
pub const GAIN_RANGE_DB: (f32, f32) = (-300.0, 300.0);

/// Parse the `"-3dB"` wire form of a gain value.
///
/// Accepts a signed decimal followed by the literal `dB`, within
/// [`GAIN_RANGE_DB`]. Anything else is `None`.
pub fn parse_db(s: &str) -> Option<f32> {
    let number = s.trim().strip_suffix("dB")?.trim_end();
    let db: f32 = number.parse().ok()?;
    if !db.is_finite() || db < GAIN_RANGE_DB.0 || db > GAIN_RANGE_DB.1 {
        return None;
    }
    Some(db)
}

/// Format a gain value in the `"-3dB"` wire form.
pub fn format_db(db: f32) -> String {
    let mut s = String::new();
    let _ = write!(s, "{db}dB");
    s
}

/// A named, shared gain/mute value.
///
/// Gain and mute are atomics so the audio thread reads a consistent snapshot
/// without taking any lock shared with control threads.
#[derive(Debug)]
pub struct VolumeGroup {
    name: String,
    /// f32 bit pattern of the gain in dB.
    gain_db_bits: AtomicU32,
    muted: AtomicBool,
}

impl VolumeGroup {
    /// Create a group at 0 dB, unmuted.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gain_db_bits: AtomicU32::new(0.0f32.to_bits()),
            muted: AtomicBool::new(false),
        }
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current gain in dB.
    pub fn gain_db(&self) -> f32 {
        f32::from_bits(self.gain_db_bits.load(Ordering::Relaxed))
    }

    /// Set the gain in dB. Out-of-range values are rejected with `false`.
    pub fn set_gain_db(&self, db: f32) -> bool {
        if !db.is_finite() || db < GAIN_RANGE_DB.0 || db > GAIN_RANGE_DB.1 {
            tracing::error!(group = %self.name, db, "volume out of range, rejected");
            return false;
        }
        self.gain_db_bits.store(db.to_bits(), Ordering::Relaxed);
        true
    }

    /// Current mute state.
    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Set the mute state.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }
}

/// Lookup-or-create registry of named volume groups.
///
/// Constructor-injected by the manager; groups are created lazily on first
/// reference and live as long as the registry.
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    groups: Mutex<HashMap<String, Arc<VolumeGroup>>>,
}

impl VolumeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the group `name`, creating it at 0 dB on first reference.
    pub fn get_or_create(&self, name: &str) -> Arc<VolumeGroup> {
        self.groups
            .lock()
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(VolumeGroup::new(name)))
            .clone()
    }

    /// Fetch the group `name` if it already exists.
    pub fn get(&self, name: &str) -> Option<Arc<VolumeGroup>> {
        self.groups.lock().get(name).cloned()
    }
}

/// Per-chain gain stage.
///
/// Multiplies every sample by the cascade of the local gain and all attached
/// groups: `10^(ΣdB / 20)`. A muted group anywhere in the cascade forces the
/// output to exact zero. Format-agnostic; it adopts whatever format flows
/// through the chain.
pub struct GainStage {
    name: String,
    local_db: f32,
    groups: Vec<Arc<VolumeGroup>>,
    format: Option<FormatDescriptor>,
}

impl GainStage {
    /// Create a gain stage named `name` (conventionally `"volume"`) at 0 dB
    /// local gain and no groups.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_db: 0.0,
            groups: Vec::new(),
            format: None,
        }
    }

    /// Set the stage's own gain in dB. Out-of-range values are rejected.
    pub fn set_local_db(&mut self, db: f32) -> bool {
        if !db.is_finite() || db < GAIN_RANGE_DB.0 || db > GAIN_RANGE_DB.1 {
            tracing::error!(stage = %self.name, db, "local gain out of range, rejected");
            return false;
        }
        self.local_db = db;
        true
    }

    /// The stage's own gain in dB.
    pub fn local_db(&self) -> f32 {
        self.local_db
    }

    /// Attach a volume group to the cascade.
    pub fn add_group(&mut self, group: Arc<VolumeGroup>) {
        if self.groups.iter().any(|g| g.name() == group.name()) {
            tracing::warn!(stage = %self.name, group = group.name(), "group already attached");
            return;
        }
        self.groups.push(group);
    }

    /// The attached group named `name`, if any.
    pub fn group(&self, name: &str) -> Option<&Arc<VolumeGroup>> {
        self.groups.iter().find(|g| g.name() == name)
    }

    /// Effective linear multiplier right now, reading each group's atomic
    /// snapshot. Zero if any group is muted.
    pub fn effective_gain(&self) -> f64 {
        let mut db = f64::from(self.local_db);
        for group in &self.groups {
            if group.muted() {
                return 0.0;
            }
            db += f64::from(group.gain_db());
        }
        f64::from(brook_core::db_to_linear(db as f32))
    }
}

impl Stage for GainStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Gain
    }

    fn input_format(&self) -> Option<&FormatDescriptor> {
        self.format.as_ref()
    }

    fn output_format(&self) -> Option<&FormatDescriptor> {
        self.format.as_ref()
    }

    fn adopt_format(&mut self, format: &FormatDescriptor) -> bool {
        self.format = Some(format.clone());
        true
    }

    fn process(&mut self, _time: Time, input: &[u8], frames: usize, output: &mut Vec<u8>) -> usize {
        let Some(format) = &self.format else {
            tracing::error!(stage = %self.name, "gain stage has no format, dropping block");
            return 0;
        };
        let gain = self.effective_gain();
        let encoding = format.encoding();
        let bytes = frames * format.frame_bytes();
        if gain == 1.0 {
            output.extend_from_slice(&input[..bytes]);
            return frames;
        }
        if gain == 0.0 {
            output.resize(output.len() + bytes, 0);
            // Integer zero is all-zero bytes in every supported encoding.
            return frames;
        }
        let step = encoding.bytes_per_sample();
        for chunk in input[..bytes].chunks_exact(step) {
            let v = sample::decode_raw(encoding, chunk) * gain;
            let start = output.len();
            output.resize(start + step, 0);
            sample::encode_raw(encoding, v, &mut output[start..]);
        }
        frames
    }

    fn set_parameter(&mut self, parameter: &str, value: &str) -> bool {
        let Some(db) = parse_db(value) else {
            tracing::error!(stage = %self.name, parameter, value, "bad volume value");
            return false;
        };
        match self.groups.iter().find(|g| g.name() == parameter) {
            Some(group) => group.set_gain_db(db),
            None => {
                tracing::error!(stage = %self.name, parameter, "no such volume group");
                false
            }
        }
    }

    fn get_parameter(&self, parameter: &str) -> Option<String> {
        self.group(parameter).map(|g| format_db(g.gain_db()))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brook_core::{ChannelRole, SampleEncoding};

    fn stereo_int16() -> FormatDescriptor {
        FormatDescriptor::new(ChannelRole::default_map(), SampleEncoding::Int16, 48000)
    }

    #[test]
    fn db_wire_form_round_trip() {
        assert_eq!(parse_db("-3dB"), Some(-3.0));
        assert_eq!(parse_db("6.5dB"), Some(6.5));
        assert_eq!(parse_db(" 0dB "), Some(0.0));
        assert_eq!(format_db(-3.0), "-3dB");
        assert_eq!(parse_db(&format_db(-12.5)), Some(-12.5));
    }

    #[test]
    fn db_wire_form_rejects_garbage() {
        assert_eq!(parse_db("-3"), None);
        assert_eq!(parse_db("dB"), None);
        assert_eq!(parse_db("loud"), None);
        // Out of range is rejected, not clamped.
        assert_eq!(parse_db("-301dB"), None);
        assert_eq!(parse_db("301dB"), None);
        assert_eq!(parse_db("300dB"), Some(300.0));
    }

    #[test]
    fn group_rejects_out_of_range() {
        let group = VolumeGroup::new("MASTER");
        assert!(!group.set_gain_db(-400.0));
        assert_eq!(group.gain_db(), 0.0);
        assert!(group.set_gain_db(-6.0));
        assert_eq!(group.gain_db(), -6.0);
    }

    #[test]
    fn registry_creates_lazily_and_shares() {
        let registry = VolumeRegistry::new();
        let a = registry.get_or_create("MASTER");
        let b = registry.get_or_create("MASTER");
        assert!(Arc::ptr_eq(&a, &b));
        a.set_gain_db(-6.0);
        assert_eq!(b.gain_db(), -6.0);
        assert!(registry.get("NOPE").is_none());
    }

    #[test]
    fn gain_cascade() {
        let mut stage = GainStage::new("volume");
        stage.set_local_db(-3.0);
        let zero = Arc::new(VolumeGroup::new("MASTER"));
        let minus_six = Arc::new(VolumeGroup::new("FLOW"));
        minus_six.set_gain_db(-6.0);
        stage.add_group(zero.clone());
        stage.add_group(minus_six);

        // 0 dB + -6 dB + -3 dB local = 10^(-9/20).
        let expected = 10f64.powf(-9.0 / 20.0);
        assert!((stage.effective_gain() - expected).abs() < 1e-4);

        // Any muted group forces exact silence.
        zero.set_muted(true);
        assert_eq!(stage.effective_gain(), 0.0);
    }

    #[test]
    fn muted_group_silences_samples() {
        let mut stage = GainStage::new("volume");
        stage.adopt_format(&stereo_int16());
        let group = Arc::new(VolumeGroup::new("FLOW"));
        group.set_muted(true);
        stage.add_group(group);

        let input: Vec<u8> = [1000i16, -1000, 32767, -32768]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut out = Vec::new();
        assert_eq!(stage.process(Time::ZERO, &input, 2, &mut out), 2);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn unity_gain_is_bit_exact() {
        let mut stage = GainStage::new("volume");
        stage.adopt_format(&stereo_int16());
        let input: Vec<u8> = [12345i16, -32768, 32767, 1]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut out = Vec::new();
        stage.process(Time::ZERO, &input, 2, &mut out);
        assert_eq!(out, input);
    }

    #[test]
    fn half_gain_scales_samples() {
        let mut stage = GainStage::new("volume");
        stage.adopt_format(&stereo_int16());
        stage.set_local_db(-6.0206); // 0.5 linear

        let input: Vec<u8> = [10000i16, -20000, 0, 400]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut out = Vec::new();
        stage.process(Time::ZERO, &input, 2, &mut out);
        let vals: Vec<i16> = out
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert!((vals[0] - 5000).abs() <= 1);
        assert!((vals[1] + 10000).abs() <= 1);
        assert_eq!(vals[2], 0);
        assert!((vals[3] - 200).abs() <= 1);
    }

    #[test]
    fn parameter_addressing_by_group_name() {
        let mut stage = GainStage::new("volume");
        stage.add_group(Arc::new(VolumeGroup::new(FLOW)));
        assert!(stage.set_parameter(FLOW, "-3dB"));
        assert_eq!(stage.get_parameter(FLOW).as_deref(), Some("-3dB"));
        assert!(!stage.set_parameter(FLOW, "-999dB"));
        assert!(!stage.set_parameter("MASTER", "-3dB"));
        assert!(stage.get_parameter("MASTER").is_none());
    }
}
