//! The stage abstraction of the processing chain.
//!
//! A [`Stage`] is one unit in a [`ProcessChain`]: it consumes interleaved
//! frames in its input [`FormatDescriptor`] and produces frames in its output
//! descriptor. Data moves through the chain as raw bytes because encodings
//! vary mid-chain; each stage knows its own frame widths.
//!
//! The trait is object-safe; chains hold `Box<dyn Stage>` and look stages
//! back up by [`StageKind`] and name, downcasting through [`Stage::as_any`]
//! when concrete access is needed.
//!
//! [`ProcessChain`]: crate::ProcessChain

use std::any::Any;

use brook_core::{FormatDescriptor, Time};

/// Capability class of a stage, used for lookup and endpoint-exclusivity
/// checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Gain staging ([`GainStage`]).
    ///
    /// [`GainStage`]: crate::GainStage
    Gain,
    /// Auto-inserted format bridge ([`ConverterStage`]).
    ///
    /// [`ConverterStage`]: crate::ConverterStage
    Converter,
    /// Application-facing write boundary (app pushes, chain pulls).
    EndpointWrite,
    /// Application-facing read boundary (chain pushes, app drains).
    EndpointRead,
    /// Application-facing callback boundary.
    EndpointCallback,
}

impl StageKind {
    /// Whether this kind is a chain boundary endpoint. A chain holds at most
    /// one endpoint, at the application-facing end.
    pub const fn is_endpoint(self) -> bool {
        matches!(
            self,
            Self::EndpointWrite | Self::EndpointRead | Self::EndpointCallback
        )
    }
}

/// One unit of a processing chain.
///
/// Stages are driven in data-flow order. In the pull (playback) direction the
/// first stage is a source endpoint asked to *produce* frames (its `input` is
/// empty); in the push (capture) direction the last stage is a sink endpoint
/// that consumes frames and produces none. Every other stage maps input
/// frames to output frames.
pub trait Stage: Send {
    /// Stage name, used for parameter addressing (`"volume"`, ...).
    fn name(&self) -> &str;

    /// Capability class.
    fn kind(&self) -> StageKind;

    /// Format consumed, when declared.
    fn input_format(&self) -> Option<&FormatDescriptor>;

    /// Format produced, when declared.
    fn output_format(&self) -> Option<&FormatDescriptor>;

    /// Offer a pass-through format to a format-agnostic stage.
    ///
    /// Returns `true` if the stage adopted it for both sides. Stages with a
    /// fixed format (endpoints carry the application's requested format,
    /// converters their bridge formats) return `false`.
    fn adopt_format(&mut self, _format: &FormatDescriptor) -> bool {
        false
    }

    /// Frames of input this stage needs to produce `output_frames` frames.
    ///
    /// Identity for every stage except the resampling converter.
    fn required_input_frames(&self, output_frames: usize) -> usize {
        output_frames
    }

    /// Process one block.
    ///
    /// `input` holds `frames` interleaved frames in the stage's input format
    /// (empty for a producing endpoint, where `frames` is the requested
    /// count). Output frames are appended to `output` in the stage's output
    /// format; the return value is the number of frames appended. `time`
    /// stamps the first input frame.
    fn process(&mut self, time: Time, input: &[u8], frames: usize, output: &mut Vec<u8>) -> usize;

    /// Set a named parameter from its string form. Returns `false` for an
    /// unknown parameter or a rejected value.
    fn set_parameter(&mut self, _parameter: &str, _value: &str) -> bool {
        false
    }

    /// Read a named parameter in its string form.
    fn get_parameter(&self, _parameter: &str) -> Option<String> {
        None
    }

    /// Downcast hook.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast hook.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
