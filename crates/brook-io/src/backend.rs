//! Pluggable audio backend abstraction.
//!
//! [`AudioBackend`] decouples the routing engine from any specific platform
//! audio API. The default implementation wraps cpal (feature
//! `"cpal-backend"`); tests use the deterministic [`MockBackend`].
//!
//! The trait is object-safe: callbacks are boxed closures carrying a
//! timestamp, a raw byte buffer in the stream's declared format, and a frame
//! count. All format and rate negotiation happens here, outside the
//! real-time callback.
//!
//! [`MockBackend`]: crate::MockBackend

use brook_core::{FormatDescriptor, SampleEncoding, Time};

use crate::Result;

/// Rates tried during `"auto"` negotiation, best first.
pub const RATE_PREFERENCE: [u32; 5] = [48000, 44100, 32000, 16000, 8000];

/// Encodings tried during `"auto"` negotiation, best first.
pub const ENCODING_PREFERENCE: [SampleEncoding; 4] = [
    SampleEncoding::Int16,
    SampleEncoding::Float32,
    SampleEncoding::Int16On32,
    SampleEncoding::Int24,
];

/// Pick the most preferred rate a device supports. Falls back to the
/// device's first offer when no preference matches.
pub fn negotiate_rate(supported: &[u32]) -> Option<u32> {
    RATE_PREFERENCE
        .iter()
        .find(|r| supported.contains(r))
        .or_else(|| supported.first())
        .copied()
}

/// Pick the most preferred encoding a device supports. Falls back to the
/// device's first offer when no preference matches.
pub fn negotiate_encoding(supported: &[SampleEncoding]) -> Option<SampleEncoding> {
    ENCODING_PREFERENCE
        .iter()
        .find(|e| supported.contains(e))
        .or_else(|| supported.first())
        .copied()
}

/// Everything a backend needs to open one stream.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    /// Wire format of the callback buffers.
    pub format: FormatDescriptor,
    /// Preferred callback block size in frames.
    pub block_frames: usize,
    /// Device name, `None` for the system default.
    pub device: Option<String>,
}

/// Playback callback: fill `buffer` with `frames` interleaved frames in the
/// stream's format. `time` is the wall-clock time the first frame will hit
/// the hardware.
///
/// Runs on the backend's real-time thread; it must not block indefinitely.
pub type OutputCallback = Box<dyn FnMut(Time, &mut [u8], usize) + Send>;

/// Capture callback: `buffer` holds `frames` captured frames; `time` is the
/// wall-clock time of the first one.
pub type InputCallback = Box<dyn FnMut(Time, &[u8], usize) + Send>;

/// Backend-side control of one open stream.
pub trait StreamControl: Send {
    /// Stop the stream. Must return only once no further callback can be in
    /// flight, so the caller may free buffers immediately after.
    fn stop(&mut self);
}

/// Handle keeping one stream alive.
///
/// [`stop`] is synchronous; dropping the handle stops the stream too.
///
/// [`stop`]: StreamHandle::stop
pub struct StreamHandle {
    inner: Option<Box<dyn StreamControl>>,
}

impl StreamHandle {
    /// Wrap a backend-specific control object.
    pub fn new(control: impl StreamControl + 'static) -> Self {
        Self {
            inner: Some(Box::new(control)),
        }
    }

    /// Stop the stream and wait for the last callback to drain.
    pub fn stop(&mut self) {
        if let Some(mut control) = self.inner.take() {
            control.stop();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("stopped", &self.inner.is_none())
            .finish()
    }
}

/// Object-safe audio backend.
///
/// Implementations exist per platform API; nodes hold one as
/// `Arc<dyn AudioBackend>` so the backend outlives every stream it opened.
pub trait AudioBackend: Send + Sync {
    /// Backend name (`"cpal"`, `"mock"`).
    fn name(&self) -> &str;

    /// Rates the device supports, used by `"auto"` negotiation.
    fn supported_rates(&self, device: Option<&str>) -> Vec<u32>;

    /// Encodings the device supports, used by `"auto"` negotiation.
    fn supported_encodings(&self, device: Option<&str>) -> Vec<SampleEncoding>;

    /// Open a playback stream; `callback` fills each hardware block.
    fn open_output(&self, spec: &StreamSpec, callback: OutputCallback) -> Result<StreamHandle>;

    /// Open a capture stream; `callback` receives each captured block.
    fn open_input(&self, spec: &StreamSpec, callback: InputCallback) -> Result<StreamHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_prefers_order() {
        assert_eq!(negotiate_rate(&[8000, 44100, 96000]), Some(44100));
        assert_eq!(negotiate_rate(&[96000, 192000]), Some(96000));
        assert_eq!(negotiate_rate(&[]), None);
        assert_eq!(
            negotiate_encoding(&[SampleEncoding::Int24, SampleEncoding::Float32]),
            Some(SampleEncoding::Float32)
        );
        assert_eq!(
            negotiate_encoding(&[SampleEncoding::Float64]),
            Some(SampleEncoding::Float64)
        );
    }

    #[test]
    fn handle_stop_is_idempotent() {
        struct Counter(std::sync::Arc<std::sync::atomic::AtomicUsize>);
        impl StreamControl for Counter {
            fn stop(&mut self) {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        }
        let stops = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut handle = StreamHandle::new(Counter(stops.clone()));
        handle.stop();
        handle.stop();
        drop(handle);
        assert_eq!(stops.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
