//! cpal-based audio backend implementation.
//!
//! [`CpalBackend`] is the default [`AudioBackend`] implementation, wrapping
//! [cpal](https://crates.io/crates/cpal) for cross-platform audio I/O:
//! ALSA (Linux), CoreAudio (macOS/iOS), WASAPI (Windows).
//!
//! cpal streams run in interleaved `f32`; this module bridges between that
//! and the byte format the node declared, so integer hardware formats cost
//! one sample conversion per block. Buffers are stamped with the process
//! monotonic clock, as cpal exposes no shared stream clock.

use brook_core::{SampleEncoding, Time, sample};
use cpal::Host;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::backend::{
    AudioBackend, ENCODING_PREFERENCE, InputCallback, OutputCallback, RATE_PREFERENCE,
    StreamControl, StreamHandle, StreamSpec,
};
use crate::{Error, Result};

/// cpal-based audio backend.
///
/// Holds a cpal [`Host`], the connection to the platform's audio system.
pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    /// Create a backend on the platform's default audio host.
    pub fn new() -> Self {
        let host = cpal::default_host();
        tracing::info!(host = host.id().name(), "cpal backend initialized");
        Self { host }
    }

    /// Find a cpal output device by case-insensitive name fragment, or the
    /// default device.
    fn find_output_device(&self, name: Option<&str>) -> Result<cpal::Device> {
        match name {
            Some(search) => {
                let search_lower = search.to_lowercase();
                let devices = self
                    .host
                    .output_devices()
                    .map_err(|e| Error::Stream(e.to_string()))?;
                for device in devices {
                    if let Ok(dev_name) = device.name()
                        && dev_name.to_lowercase().contains(&search_lower)
                    {
                        return Ok(device);
                    }
                }
                Err(Error::DeviceNotFound(format!(
                    "no output device matching '{search}'"
                )))
            }
            None => self.host.default_output_device().ok_or(Error::NoDevice),
        }
    }

    /// Find a cpal input device by case-insensitive name fragment, or the
    /// default device.
    fn find_input_device(&self, name: Option<&str>) -> Result<cpal::Device> {
        match name {
            Some(search) => {
                let search_lower = search.to_lowercase();
                let devices = self
                    .host
                    .input_devices()
                    .map_err(|e| Error::Stream(e.to_string()))?;
                for device in devices {
                    if let Ok(dev_name) = device.name()
                        && dev_name.to_lowercase().contains(&search_lower)
                    {
                        return Ok(device);
                    }
                }
                Err(Error::DeviceNotFound(format!(
                    "no input device matching '{search}'"
                )))
            }
            None => self.host.default_input_device().ok_or(Error::NoDevice),
        }
    }

    fn stream_config(spec: &StreamSpec) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: spec.format.channel_count() as u16,
            sample_rate: cpal::SampleRate(spec.format.rate()),
            buffer_size: cpal::BufferSize::Fixed(spec.block_frames as u32),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Pauses and drops the cpal stream on stop.
struct CpalControl {
    stream: Option<cpal::Stream>,
}

impl StreamControl for CpalControl {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                tracing::warn!(error = %err, "pausing cpal stream failed");
            }
        }
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn supported_rates(&self, device: Option<&str>) -> Vec<u32> {
        let mut rates = Vec::new();
        let mut collect = |min: u32, max: u32| {
            for &rate in &RATE_PREFERENCE {
                if rate >= min && rate <= max && !rates.contains(&rate) {
                    rates.push(rate);
                }
            }
        };
        if let Ok(device) = self.find_output_device(device)
            && let Ok(configs) = device.supported_output_configs()
        {
            for config in configs {
                collect(config.min_sample_rate().0, config.max_sample_rate().0);
            }
        }
        if let Ok(device) = self.find_input_device(device)
            && let Ok(configs) = device.supported_input_configs()
        {
            for config in configs {
                collect(config.min_sample_rate().0, config.max_sample_rate().0);
            }
        }
        if rates.is_empty() {
            // No device reachable; negotiation still needs something to try.
            RATE_PREFERENCE.to_vec()
        } else {
            rates
        }
    }

    fn supported_encodings(&self, _device: Option<&str>) -> Vec<SampleEncoding> {
        // Streams run in f32 and are bridged, so every encoding is fine.
        ENCODING_PREFERENCE.to_vec()
    }

    fn open_output(&self, spec: &StreamSpec, mut callback: OutputCallback) -> Result<StreamHandle> {
        let device = self.find_output_device(spec.device.as_deref())?;
        let config = Self::stream_config(spec);
        let encoding = spec.format.encoding();
        let step = encoding.bytes_per_sample();
        let channels = spec.format.channel_count();
        let mut scratch: Vec<u8> = Vec::new();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    scratch.clear();
                    scratch.resize(data.len() * step, 0);
                    callback(Time::now(), &mut scratch, frames);
                    for (out, chunk) in data.iter_mut().zip(scratch.chunks_exact(step)) {
                        *out = sample::decode_norm(encoding, chunk) as f32;
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "output stream error");
                },
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))?;

        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        tracing::info!(format = %spec.format, block = spec.block_frames, "output stream started");
        Ok(StreamHandle::new(CpalControl {
            stream: Some(stream),
        }))
    }

    fn open_input(&self, spec: &StreamSpec, mut callback: InputCallback) -> Result<StreamHandle> {
        let device = self.find_input_device(spec.device.as_deref())?;
        let config = Self::stream_config(spec);
        let encoding = spec.format.encoding();
        let step = encoding.bytes_per_sample();
        let channels = spec.format.channel_count();
        let mut scratch: Vec<u8> = Vec::new();

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let frames = data.len() / channels;
                    scratch.clear();
                    scratch.resize(data.len() * step, 0);
                    for (chunk, &v) in scratch.chunks_exact_mut(step).zip(data) {
                        sample::encode_norm(encoding, f64::from(v), chunk);
                    }
                    callback(Time::now(), &scratch, frames);
                },
                move |err| {
                    tracing::error!(error = %err, "input stream error");
                },
                None,
            )
            .map_err(|e| Error::Stream(e.to_string()))?;

        stream.play().map_err(|e| Error::Stream(e.to_string()))?;
        tracing::info!(format = %spec.format, block = spec.block_frames, "input stream started");
        Ok(StreamHandle::new(CpalControl {
            stream: Some(stream),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_name() {
        let backend = CpalBackend::new();
        assert_eq!(backend.name(), "cpal");
    }

    #[test]
    fn negotiation_inputs_never_empty() {
        let backend = CpalBackend::new();
        // Device availability depends on the system; the negotiation inputs
        // must be non-empty either way.
        assert!(!backend.supported_rates(None).is_empty());
        assert!(!backend.supported_encodings(None).is_empty());
    }
}
