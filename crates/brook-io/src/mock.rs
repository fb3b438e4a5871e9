//! Deterministic in-process backend for tests.
//!
//! [`MockBackend`] implements [`AudioBackend`] without any hardware: opened
//! streams are recorded and the test drives their callbacks explicitly with
//! [`drive_output`] / [`drive_input`], choosing the timestamps itself. Stream
//! stop is synchronous with driving, so a stopped stream is never driven.
//!
//! [`drive_output`]: MockBackend::drive_output
//! [`drive_input`]: MockBackend::drive_input

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use brook_core::{FormatDescriptor, SampleEncoding, Time};
use parking_lot::Mutex;

use crate::backend::{
    AudioBackend, ENCODING_PREFERENCE, InputCallback, OutputCallback, RATE_PREFERENCE, StreamControl,
    StreamHandle, StreamSpec,
};
use crate::Result;

struct MockStream<C> {
    callback: C,
    format: FormatDescriptor,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct MockState {
    outputs: Mutex<Vec<MockStream<OutputCallback>>>,
    inputs: Mutex<Vec<MockStream<InputCallback>>>,
}

enum ListKind {
    Output,
    Input,
}

/// Stops a mock stream by flipping its active flag under the list lock, so
/// a concurrent drive either completes before the stop or sees it.
struct MockControl {
    state: Arc<MockState>,
    kind: ListKind,
    active: Arc<AtomicBool>,
}

impl StreamControl for MockControl {
    fn stop(&mut self) {
        match self.kind {
            ListKind::Output => {
                let _guard = self.state.outputs.lock();
                self.active.store(false, Ordering::SeqCst);
            }
            ListKind::Input => {
                let _guard = self.state.inputs.lock();
                self.active.store(false, Ordering::SeqCst);
            }
        }
    }
}

/// Hardware-free backend driven explicitly by the test.
///
/// Streams are indexed in open order and stay indexed after stopping, so a
/// test can open, stop, and reopen without index churn.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<MockState>,
    rates: Vec<u32>,
    encodings: Vec<SampleEncoding>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A backend supporting every preferred rate and encoding.
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState::default()),
            rates: RATE_PREFERENCE.to_vec(),
            encodings: ENCODING_PREFERENCE.to_vec(),
        }
    }

    /// Restrict the rates the fake device advertises.
    #[must_use]
    pub fn with_rates(mut self, rates: &[u32]) -> Self {
        self.rates = rates.to_vec();
        self
    }

    /// Restrict the encodings the fake device advertises.
    #[must_use]
    pub fn with_encodings(mut self, encodings: &[SampleEncoding]) -> Self {
        self.encodings = encodings.to_vec();
        self
    }

    /// Number of output streams ever opened.
    pub fn output_count(&self) -> usize {
        self.state.outputs.lock().len()
    }

    /// Number of input streams ever opened.
    pub fn input_count(&self) -> usize {
        self.state.inputs.lock().len()
    }

    /// Number of output streams still running.
    pub fn active_output_count(&self) -> usize {
        self.state
            .outputs
            .lock()
            .iter()
            .filter(|s| s.active.load(Ordering::SeqCst))
            .count()
    }

    /// Number of input streams still running.
    pub fn active_input_count(&self) -> usize {
        self.state
            .inputs
            .lock()
            .iter()
            .filter(|s| s.active.load(Ordering::SeqCst))
            .count()
    }

    /// Format the `index`-th output stream was opened with.
    pub fn output_format(&self, index: usize) -> Option<FormatDescriptor> {
        self.state.outputs.lock().get(index).map(|s| s.format.clone())
    }

    /// Format the `index`-th input stream was opened with.
    pub fn input_format(&self, index: usize) -> Option<FormatDescriptor> {
        self.state.inputs.lock().get(index).map(|s| s.format.clone())
    }

    /// Run one playback callback on the `index`-th output stream, asking it
    /// to fill `frames` frames stamped `time`. Returns the produced bytes,
    /// or `None` if the stream does not exist or is stopped.
    pub fn drive_output(&self, index: usize, time: Time, frames: usize) -> Option<Vec<u8>> {
        let mut outputs = self.state.outputs.lock();
        let stream = outputs.get_mut(index)?;
        if !stream.active.load(Ordering::SeqCst) {
            return None;
        }
        let mut buffer = vec![0u8; frames * stream.format.frame_bytes()];
        (stream.callback)(time, &mut buffer, frames);
        Some(buffer)
    }

    /// Run one capture callback on the `index`-th input stream, handing it
    /// `frames` frames of `data` stamped `time`. Returns whether the stream
    /// exists and is running.
    pub fn drive_input(&self, index: usize, time: Time, data: &[u8], frames: usize) -> bool {
        let mut inputs = self.state.inputs.lock();
        let Some(stream) = inputs.get_mut(index) else {
            return false;
        };
        if !stream.active.load(Ordering::SeqCst) {
            return false;
        }
        debug_assert!(data.len() >= frames * stream.format.frame_bytes());
        (stream.callback)(time, data, frames);
        true
    }
}

impl AudioBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn supported_rates(&self, _device: Option<&str>) -> Vec<u32> {
        self.rates.clone()
    }

    fn supported_encodings(&self, _device: Option<&str>) -> Vec<SampleEncoding> {
        self.encodings.clone()
    }

    fn open_output(&self, spec: &StreamSpec, callback: OutputCallback) -> Result<StreamHandle> {
        let active = Arc::new(AtomicBool::new(true));
        self.state.outputs.lock().push(MockStream {
            callback,
            format: spec.format.clone(),
            active: active.clone(),
        });
        tracing::debug!(format = %spec.format, "mock output stream opened");
        Ok(StreamHandle::new(MockControl {
            state: self.state.clone(),
            kind: ListKind::Output,
            active,
        }))
    }

    fn open_input(&self, spec: &StreamSpec, callback: InputCallback) -> Result<StreamHandle> {
        let active = Arc::new(AtomicBool::new(true));
        self.state.inputs.lock().push(MockStream {
            callback,
            format: spec.format.clone(),
            active: active.clone(),
        });
        tracing::debug!(format = %spec.format, "mock input stream opened");
        Ok(StreamHandle::new(MockControl {
            state: self.state.clone(),
            kind: ListKind::Input,
            active,
        }))
    }
}
