//! Brook IO - nodes, interfaces, and device backends of the brook runtime.
//!
//! This crate assembles the routing engine: a [`Manager`] reads a JSON
//! configuration, lazily builds a [`Node`] per logical stream, and hands out
//! [`Interface`]s that applications read from or write to. Playback nodes
//! sum their interfaces with saturating headroom; capture nodes broadcast;
//! composite nodes (echo-cancelled capture, channel muxing) derive their
//! signal from other nodes through time-aligned sub-interfaces.
//!
//! Device access goes through the [`AudioBackend`] trait. The default
//! implementation wraps cpal (feature `"cpal-backend"`, on by default);
//! [`MockBackend`] provides deterministic hardware-free streams for tests.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use brook_core::{ChannelRole, SampleEncoding};
//! use brook_io::{CpalBackend, Manager};
//!
//! # fn main() -> brook_io::Result<()> {
//! let config = r#"{
//!     "speaker": { "io": "output", "volume-name": "MASTER" }
//! }"#;
//! let manager = Manager::from_json(Arc::new(CpalBackend::new()), config)?;
//!
//! let out = manager.create_output(
//!     48000,
//!     ChannelRole::default_map(),
//!     SampleEncoding::Int16,
//!     "speaker",
//! )?;
//! out.start()?;
//! // out.write(&frames, n) feeds the mix; drop stops the stream.
//! # Ok(())
//! # }
//! ```

pub mod aec;
pub mod backend;
pub mod interface;
pub mod manager;
pub mod mock;
pub mod muxer;
pub mod node;

#[cfg(feature = "cpal-backend")]
pub mod cpal_backend;

pub use aec::AecDriver;
pub use backend::{
    AudioBackend, ENCODING_PREFERENCE, InputCallback, OutputCallback, RATE_PREFERENCE,
    StreamControl, StreamHandle, StreamSpec, negotiate_encoding, negotiate_rate,
};
pub use interface::{Interface, InterfaceRole};
pub use manager::Manager;
pub use mock::MockBackend;
pub use muxer::MuxerDriver;
pub use node::{Direction, Node, NodeDriver};

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalBackend;

/// Errors of the routing runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backend stream setup or runtime error.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("no audio device available")]
    NoDevice,

    /// No device matched the configured name.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// A format could not be negotiated or bridged.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A composite stream's configuration lacks a required reference.
    #[error("stream '{stream}' is missing field '{field}'")]
    MissingField {
        /// The logical stream.
        stream: String,
        /// The absent configuration field.
        field: &'static str,
    },

    /// A volume outside the accepted dB range was rejected.
    #[error("volume {0} dB out of range")]
    VolumeRange(f32),

    /// The operation does not apply to this interface or its current state.
    #[error("invalid access: {0}")]
    BadAccess(&'static str),

    /// Configuration parse or lookup error.
    #[error(transparent)]
    Config(#[from] brook_config::ConfigError),
}

/// Convenience result type for the routing runtime.
pub type Result<T> = std::result::Result<T, Error>;
