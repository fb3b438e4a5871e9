//! Brook Chain - the stage-based processing pipeline of the brook runtime.
//!
//! Every logical audio interface owns one [`ProcessChain`]: an ordered list
//! of [`Stage`]s between the application's requested format and the node's
//! format, driven forward on each hardware callback.
//!
//! # Core Abstractions
//!
//! - [`Stage`] / [`StageKind`] - the object-safe unit of processing
//! - [`ProcessChain`] - ordered stage list with automatic format bridging
//!   ([`ProcessChain::update_inter_stages`]) and pull/push block transport
//! - [`GainStage`] / [`VolumeGroup`] / [`VolumeRegistry`] - gain staging with
//!   named shared volume groups read as atomic snapshots on the audio thread
//! - [`ConverterStage`] / [`LinearResampler`] - the auto-inserted bridge for
//!   encoding, channel layout, and rate mismatches
//! - [`WriteEndpoint`] / [`ReadEndpoint`] / [`CallbackEndpoint`] - the
//!   application-facing chain boundary (exactly one per chain)
//!
//! # Error Handling
//!
//! Chain APIs report misuse through `bool`/`Option` returns plus a `tracing`
//! error record. Nothing in this crate panics on the processing path.

pub mod chain;
pub mod convert;
pub mod endpoint;
pub mod gain;
pub mod stage;

pub use chain::ProcessChain;
pub use convert::{ConverterStage, LinearResampler};
pub use endpoint::{CallbackEndpoint, PullCallback, PushCallback, ReadEndpoint, WriteEndpoint};
pub use gain::{FLOW, GAIN_RANGE_DB, GainStage, VolumeGroup, VolumeRegistry, format_db, parse_db};
pub use stage::{Stage, StageKind};
