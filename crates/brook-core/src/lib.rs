//! Brook Core - primitives for the brook audio routing runtime.
//!
//! This crate provides the leaf building blocks the routing engine is made of,
//! designed for real-time use with zero allocation in the audio path once a
//! buffer is sized.
//!
//! # Core Abstractions
//!
//! ## Stream shape
//!
//! - [`FormatDescriptor`] - immutable (channel layout, sample encoding, rate)
//!   triple describing a chunk stream at a chain boundary
//! - [`ChannelRole`] / [`SampleEncoding`] - the two enumerated axes
//! - [`sample`] - safe byte-level decode/encode per encoding, with saturating
//!   (clip, never wrap) integer encodes
//!
//! ## Timing
//!
//! - [`Time`] / [`TimeDelta`] - integer-nanosecond audio clock with exact
//!   frames-to-duration conversion
//!
//! ## Buffering & alignment
//!
//! - [`TimedRingBuffer`] - fixed-capacity byte ring where every write carries
//!   a timestamp; absorbs drift between a hardware callback and a consumer
//! - [`StreamAligner`] - pairs two timestamped rings and drains time-aligned
//!   block pairs, resynchronizing by timestamp when the streams drift apart
//!
//! ## Reference DSP
//!
//! - [`EchoGate`] - gain-gated echo suppressor used by the AEC composite node
//! - Math helpers: [`db_to_linear`], [`linear_to_db`]
//!
//! # Design Principles
//!
//! - **Real-time safe**: no allocation in processing paths after setup
//! - **Byte-exact semantics**: all sizes are frames; only the ring buffer
//!   deals in `frames * frame_bytes` raw bytes
//! - **No `unsafe`**: sample conversion is explicit little-endian coding

pub mod aligner;
pub mod envelope;
pub mod format;
pub mod math;
pub mod ring;
pub mod sample;
pub mod time;

pub use aligner::StreamAligner;
pub use envelope::EchoGate;
pub use format::{ChannelRole, FormatDescriptor, SampleEncoding};
pub use math::{db_to_linear, linear_to_db};
pub use ring::TimedRingBuffer;
pub use time::{Time, TimeDelta};
