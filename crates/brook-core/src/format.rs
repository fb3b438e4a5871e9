//! Stream shape descriptors.
//!
//! A [`FormatDescriptor`] is the immutable (channel layout, sample encoding,
//! sample rate) triple that describes a chunk stream at a chain boundary. Two
//! descriptors are compatible only when all three fields match exactly; any
//! difference is bridged by an auto-inserted converter stage.

use std::fmt;

/// Logical role of one channel in an ordered layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    /// Front left.
    FrontLeft,
    /// Front right.
    FrontRight,
    /// Front center (also the mono source role; a mono front-center stream
    /// broadcasts into every destination channel).
    FrontCenter,
    /// Rear left.
    RearLeft,
    /// Rear right.
    RearRight,
    /// Surround left.
    SurroundLeft,
    /// Surround right.
    SurroundRight,
    /// Low-frequency effects.
    Lfe,
}

impl ChannelRole {
    /// Parse the configuration-file spelling (`"front-left"`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "front-left" => Self::FrontLeft,
            "front-right" => Self::FrontRight,
            "front-center" => Self::FrontCenter,
            "rear-left" => Self::RearLeft,
            "rear-right" => Self::RearRight,
            "surround-left" => Self::SurroundLeft,
            "surround-right" => Self::SurroundRight,
            "lfe" => Self::Lfe,
            _ => return None,
        })
    }

    /// The configuration-file spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FrontLeft => "front-left",
            Self::FrontRight => "front-right",
            Self::FrontCenter => "front-center",
            Self::RearLeft => "rear-left",
            Self::RearRight => "rear-right",
            Self::SurroundLeft => "surround-left",
            Self::SurroundRight => "surround-right",
            Self::Lfe => "lfe",
        }
    }

    /// The default stereo layout.
    pub fn default_map() -> Vec<ChannelRole> {
        vec![Self::FrontLeft, Self::FrontRight]
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire encoding of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    /// Signed 8-bit.
    Int8,
    /// Signed 16-bit little-endian.
    Int16,
    /// Signed 16-bit range carried in a 32-bit lane; the mixer's wide
    /// intermediate for int16 hardware.
    Int16On32,
    /// Signed 24-bit range carried sign-extended in a 32-bit lane.
    Int24,
    /// Signed 32-bit little-endian.
    Int32,
    /// IEEE 754 single precision, nominal range [-1, 1].
    Float32,
    /// IEEE 754 double precision, nominal range [-1, 1].
    Float64,
}

impl SampleEncoding {
    /// Bytes occupied by one sample on the wire.
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int16On32 | Self::Int24 | Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Parse the configuration-file spelling.
    ///
    /// Accepts the canonical names plus `"float"`/`"double"` aliases.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int16-on-int32" => Self::Int16On32,
            "int24" => Self::Int24,
            "int32" => Self::Int32,
            "float" | "float32" => Self::Float32,
            "double" | "float64" => Self::Float64,
            _ => return None,
        })
    }

    /// The configuration-file spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int16On32 => "int16-on-int32",
            Self::Int24 => "int24",
            Self::Int32 => "int32",
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }

    /// The wide lane this encoding mixes in: summing interfaces into one
    /// hardware buffer needs headroom beyond the encoding itself.
    pub const fn widened(self) -> Self {
        match self {
            Self::Int8 | Self::Int16 => Self::Int16On32,
            Self::Int16On32 | Self::Int24 | Self::Int32 => Self::Int32,
            Self::Float32 | Self::Float64 => Self::Float64,
        }
    }
}

impl fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable shape of a chunk stream: ordered channel layout, sample
/// encoding, and sample rate in Hz.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormatDescriptor {
    channels: Vec<ChannelRole>,
    encoding: SampleEncoding,
    rate: u32,
}

impl FormatDescriptor {
    /// Build a descriptor. `rate` must be positive and `channels` non-empty.
    pub fn new(channels: Vec<ChannelRole>, encoding: SampleEncoding, rate: u32) -> Self {
        debug_assert!(!channels.is_empty(), "channel layout must not be empty");
        debug_assert!(rate > 0, "sample rate must be positive");
        Self {
            channels,
            encoding,
            rate,
        }
    }

    /// Ordered channel layout.
    pub fn channels(&self) -> &[ChannelRole] {
        &self.channels
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Sample encoding.
    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    /// Sample rate in Hz.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Bytes occupied by one frame (one sample per channel).
    pub fn frame_bytes(&self) -> usize {
        self.channels.len() * self.encoding.bytes_per_sample()
    }

    /// Same descriptor with a different encoding.
    pub fn with_encoding(&self, encoding: SampleEncoding) -> Self {
        Self {
            channels: self.channels.clone(),
            encoding,
            rate: self.rate,
        }
    }

    /// Same descriptor with a different channel layout.
    pub fn with_channels(&self, channels: Vec<ChannelRole>) -> Self {
        Self {
            channels,
            encoding: self.encoding,
            rate: self.rate,
        }
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ch/{}/{}Hz", self.channels.len(), self.encoding, self.rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_role_round_trip() {
        for s in [
            "front-left",
            "front-right",
            "front-center",
            "rear-left",
            "rear-right",
            "surround-left",
            "surround-right",
            "lfe",
        ] {
            let role = ChannelRole::parse(s).unwrap();
            assert_eq!(role.as_str(), s);
        }
        assert!(ChannelRole::parse("middle-out").is_none());
    }

    #[test]
    fn encoding_sizes() {
        assert_eq!(SampleEncoding::Int8.bytes_per_sample(), 1);
        assert_eq!(SampleEncoding::Int16.bytes_per_sample(), 2);
        assert_eq!(SampleEncoding::Int16On32.bytes_per_sample(), 4);
        assert_eq!(SampleEncoding::Int24.bytes_per_sample(), 4);
        assert_eq!(SampleEncoding::Int32.bytes_per_sample(), 4);
        assert_eq!(SampleEncoding::Float32.bytes_per_sample(), 4);
        assert_eq!(SampleEncoding::Float64.bytes_per_sample(), 8);
    }

    #[test]
    fn encoding_aliases() {
        assert_eq!(SampleEncoding::parse("float"), Some(SampleEncoding::Float32));
        assert_eq!(SampleEncoding::parse("float32"), Some(SampleEncoding::Float32));
        assert_eq!(SampleEncoding::parse("double"), Some(SampleEncoding::Float64));
    }

    #[test]
    fn widened_has_headroom() {
        assert_eq!(SampleEncoding::Int16.widened(), SampleEncoding::Int16On32);
        assert_eq!(SampleEncoding::Float32.widened(), SampleEncoding::Float64);
    }

    #[test]
    fn descriptor_equality_is_exact() {
        let a = FormatDescriptor::new(ChannelRole::default_map(), SampleEncoding::Int16, 48000);
        let b = FormatDescriptor::new(ChannelRole::default_map(), SampleEncoding::Int16, 44100);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.frame_bytes(), 4);
    }
}
