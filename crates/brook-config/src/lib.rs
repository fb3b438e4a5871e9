//! Brook Config - the JSON configuration surface of the brook runtime.
//!
//! A configuration maps logical stream names to [`StreamSettings`]: which
//! device or virtual node the stream sits on, its format, block size, and the
//! volume group it participates in. Composite streams (`"aec"`, `"muxer"`)
//! reference other logical streams through [`VirtualLink`]s instead of a
//! device.
//!
//! ```json
//! {
//!     "speaker": {
//!         "io": "output",
//!         "map-on": { "interface": "auto", "name": "default" },
//!         "frequency": 48000,
//!         "channel-map": ["front-left", "front-right"],
//!         "type": "int16",
//!         "nb-chunk": 1024,
//!         "volume-name": "MASTER"
//!     },
//!     "microphone-clean": {
//!         "io": "aec",
//!         "map-on-microphone": { "map-on": "microphone" },
//!         "map-on-feedback": { "map-on": "speaker-feedback" },
//!         "frequency": 48000,
//!         "nb-chunk": 1024
//!     }
//! }
//! ```
//!
//! Absent fields fall back to documented defaults: 48000 Hz, stereo
//! front-left/front-right, int16, 1024-frame blocks.

use std::collections::HashMap;

use brook_core::{ChannelRole, FormatDescriptor, SampleEncoding};
use serde::{Deserialize, Serialize};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A referenced logical stream is not declared.
    #[error("unknown stream '{0}'")]
    UnknownStream(String),

    /// A field value is not one of the accepted spellings.
    #[error("invalid value '{value}' for field '{field}'")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// Role of a logical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StreamKind {
    /// Capture from a hardware device.
    Input,
    /// Playback to a hardware device.
    Output,
    /// Echo-cancelled capture: a microphone stream gated by a feedback
    /// stream.
    Aec,
    /// Two capture streams merged by channel map.
    Muxer,
}

/// Device binding of a hardware stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLink {
    /// Backend selector (`"auto"` picks the compiled-in default).
    #[serde(default = "defaults::auto")]
    pub interface: String,
    /// Device name within the backend (`"default"` for the system default).
    #[serde(default = "defaults::default_device")]
    pub name: String,
}

impl Default for DeviceLink {
    fn default() -> Self {
        Self {
            interface: defaults::auto(),
            name: defaults::default_device(),
        }
    }
}

/// Reference from a composite stream to another logical stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualLink {
    /// Name of the referenced logical stream.
    #[serde(rename = "map-on")]
    pub map_on: String,
}

/// Settings of one logical stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StreamSettings {
    /// Stream role.
    pub io: StreamKind,

    /// Device binding, for hardware streams.
    #[serde(default)]
    pub map_on: Option<DeviceLink>,

    /// Sample rate in Hz; `0` negotiates with the device.
    #[serde(default = "defaults::frequency")]
    pub frequency: u32,

    /// Ordered channel role names.
    #[serde(default = "defaults::channel_map")]
    pub channel_map: Vec<String>,

    /// Sample encoding name; `"auto"` negotiates with the device.
    #[serde(rename = "type", default = "defaults::sample_type")]
    pub sample_type: String,

    /// Processing block size in frames.
    #[serde(default = "defaults::nb_chunk")]
    pub nb_chunk: usize,

    /// Volume group every interface on this stream attaches to.
    #[serde(default)]
    pub volume_name: Option<String>,

    /// Encoding pair used by the muxer between its inputs and its output:
    /// inputs default to int16, the widened output to int16-on-int32.
    #[serde(default)]
    pub mux_demux_type: Option<String>,

    /// Microphone side of an `"aec"` stream.
    #[serde(default)]
    pub map_on_microphone: Option<VirtualLink>,

    /// Feedback side of an `"aec"` stream.
    #[serde(default)]
    pub map_on_feedback: Option<VirtualLink>,

    /// First input of a `"muxer"` stream.
    #[serde(default)]
    pub map_on_input_1: Option<VirtualLink>,

    /// Second input of a `"muxer"` stream.
    #[serde(default)]
    pub map_on_input_2: Option<VirtualLink>,

    /// Channel roles the first muxer input is relabeled to.
    #[serde(default)]
    pub input_1_remap: Option<Vec<String>>,

    /// Channel roles the second muxer input is relabeled to.
    #[serde(default)]
    pub input_2_remap: Option<Vec<String>>,
}

mod defaults {
    pub fn auto() -> String {
        "auto".to_owned()
    }
    pub fn default_device() -> String {
        "default".to_owned()
    }
    pub fn frequency() -> u32 {
        48000
    }
    pub fn channel_map() -> Vec<String> {
        vec!["front-left".to_owned(), "front-right".to_owned()]
    }
    pub fn sample_type() -> String {
        "int16".to_owned()
    }
    pub fn nb_chunk() -> usize {
        1024
    }
}

fn parse_roles(field: &'static str, names: &[String]) -> Result<Vec<ChannelRole>, ConfigError> {
    names
        .iter()
        .map(|name| {
            ChannelRole::parse(name).ok_or_else(|| ConfigError::InvalidValue {
                field,
                value: name.clone(),
            })
        })
        .collect()
}

impl StreamSettings {
    /// The declared channel layout as parsed roles.
    pub fn channel_roles(&self) -> Result<Vec<ChannelRole>, ConfigError> {
        parse_roles("channel-map", &self.channel_map)
    }

    /// The declared encoding; `None` means `"auto"` (negotiate).
    pub fn encoding(&self) -> Result<Option<SampleEncoding>, ConfigError> {
        if self.sample_type == "auto" {
            return Ok(None);
        }
        SampleEncoding::parse(&self.sample_type)
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "type",
                value: self.sample_type.clone(),
            })
    }

    /// The declared rate; `None` means `0` (negotiate).
    pub fn rate(&self) -> Option<u32> {
        (self.frequency > 0).then_some(self.frequency)
    }

    /// Full descriptor once negotiation filled the gaps.
    pub fn format(&self, rate: u32, encoding: SampleEncoding) -> Result<FormatDescriptor, ConfigError> {
        Ok(FormatDescriptor::new(self.channel_roles()?, encoding, rate))
    }

    /// The muxer's input/output encoding pair: the configured type for
    /// inputs and its widened lane for the muxed output.
    pub fn mux_demux_encodings(&self) -> Result<(SampleEncoding, SampleEncoding), ConfigError> {
        let input = match &self.mux_demux_type {
            Some(name) => {
                SampleEncoding::parse(name).ok_or_else(|| ConfigError::InvalidValue {
                    field: "mux-demux-type",
                    value: name.clone(),
                })?
            }
            None => SampleEncoding::Int16,
        };
        Ok((input, input.widened()))
    }

    /// Relabeled roles for a muxer input, if configured.
    pub fn input_remap(&self, which: usize) -> Result<Option<Vec<ChannelRole>>, ConfigError> {
        let (field, names): (&'static str, _) = match which {
            1 => ("input-1-remap", self.input_1_remap.as_ref()),
            _ => ("input-2-remap", self.input_2_remap.as_ref()),
        };
        names.map(|n| parse_roles(field, n)).transpose()
    }
}

/// A parsed configuration: logical stream name to settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    streams: HashMap<String, StreamSettings>,
}

impl Config {
    /// An empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Settings of stream `name`.
    pub fn stream(&self, name: &str) -> Result<&StreamSettings, ConfigError> {
        self.streams
            .get(name)
            .ok_or_else(|| ConfigError::UnknownStream(name.to_owned()))
    }

    /// Declared stream names.
    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// Add or replace a stream programmatically.
    pub fn insert(&mut self, name: impl Into<String>, settings: StreamSettings) {
        self.streams.insert(name.into(), settings);
    }
}
