//! Hardware-facing mixing points.
//!
//! A [`Node`] is the junction between one physical (or composite) audio
//! stream and any number of application [`Interface`]s. A playback node sums
//! every attached output interface into the hardware buffer, saturating in
//! the hardware encoding, then offers the post-mix signal to feedback
//! interfaces. A capture node broadcasts each hardware block to every
//! attached input interface.
//!
//! What actually produces the hardware clock is the node's [`NodeDriver`]:
//! a backend stream for real devices, or an AEC / muxer engine for composite
//! nodes that derive their signal from other nodes. The driver starts when
//! the first interface attaches and stops when the last one detaches.
//!
//! [`Interface`]: crate::Interface

use std::sync::{Arc, Weak};

use brook_chain::VolumeGroup;
use brook_core::{FormatDescriptor, Time, sample};
use parking_lot::Mutex;

use crate::Result;
use crate::aec::AecDriver;
use crate::backend::{AudioBackend, StreamHandle, StreamSpec};
use crate::interface::{InterfaceCore, InterfaceRole};
use crate::muxer::MuxerDriver;

/// Which way audio flows through a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Hardware produces frames; interfaces consume them.
    Capture,
    /// Interfaces produce frames; hardware consumes the mix.
    Playback,
}

/// The signal source or sink behind a node.
pub enum NodeDriver {
    /// No driver yet; a node under construction.
    Idle,
    /// A real device stream on an [`AudioBackend`].
    Backend {
        /// The backend the stream is opened on.
        backend: Arc<dyn AudioBackend>,
        /// Device name, `None` for the system default.
        device: Option<String>,
        /// The open stream while the node is running.
        stream: Option<StreamHandle>,
    },
    /// Echo-cancelled capture derived from two other nodes.
    Aec(AecDriver),
    /// Two capture streams merged by channel map.
    Muxer(MuxerDriver),
}

struct NodeInner {
    /// Interfaces currently started on this node.
    attached: Vec<Arc<InterfaceCore>>,
    /// Every interface ever created on this node, for volume notification.
    registered: Vec<Weak<InterfaceCore>>,
    /// Normalized mix accumulator, one slot per sample of the current block.
    mix_norm: Vec<f64>,
    /// Per-interface pull buffer in the interface format.
    scratch: Vec<u8>,
    /// Encoding-conversion buffer for capture broadcast.
    convert: Vec<u8>,
}

/// One mixing point, shared by its interfaces via `Arc`.
pub struct Node {
    name: String,
    direction: Direction,
    /// Format on the driver side.
    hardware_format: FormatDescriptor,
    /// Format interfaces mix in; same layout and rate as the hardware side,
    /// with a widened encoding for summing headroom.
    interface_format: FormatDescriptor,
    block_frames: usize,
    /// The stream-level volume group every interface on this node joins.
    volume: Option<Arc<VolumeGroup>>,
    inner: Mutex<NodeInner>,
    driver: Mutex<NodeDriver>,
}

impl Node {
    /// Create a stopped node with an [`Idle`] driver.
    ///
    /// `hardware_format` and `interface_format` must agree on channel layout
    /// and rate; only the encoding may differ.
    ///
    /// [`Idle`]: NodeDriver::Idle
    pub fn new(
        name: impl Into<String>,
        direction: Direction,
        hardware_format: FormatDescriptor,
        interface_format: FormatDescriptor,
        block_frames: usize,
        volume: Option<Arc<VolumeGroup>>,
    ) -> Arc<Self> {
        debug_assert_eq!(hardware_format.channels(), interface_format.channels());
        debug_assert_eq!(hardware_format.rate(), interface_format.rate());
        Arc::new(Self {
            name: name.into(),
            direction,
            hardware_format,
            interface_format,
            block_frames,
            volume,
            inner: Mutex::new(NodeInner {
                attached: Vec::new(),
                registered: Vec::new(),
                mix_norm: Vec::new(),
                scratch: Vec::new(),
                convert: Vec::new(),
            }),
            driver: Mutex::new(NodeDriver::Idle),
        })
    }

    /// Node name (the logical stream name from the configuration).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Audio flow direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Format on the driver side.
    pub fn hardware_format(&self) -> &FormatDescriptor {
        &self.hardware_format
    }

    /// Format interfaces exchange with this node.
    pub fn interface_format(&self) -> &FormatDescriptor {
        &self.interface_format
    }

    /// Block size in frames.
    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    /// The stream-level volume group, if the configuration names one.
    pub fn volume_group(&self) -> Option<&Arc<VolumeGroup>> {
        self.volume.as_ref()
    }

    /// Replace the driver. Meant for node construction, before any
    /// interface attaches.
    pub fn set_driver(&self, driver: NodeDriver) {
        *self.driver.lock() = driver;
    }

    /// Record an interface created on this node, so it receives volume
    /// notifications for its lifetime.
    pub(crate) fn register_interface(&self, iface: &Arc<InterfaceCore>) {
        self.inner.lock().registered.push(Arc::downgrade(iface));
    }

    /// Attach a started interface. Starts the driver when this is the first
    /// one; a driver that fails to start rolls the attach back.
    pub(crate) fn attach(self: &Arc<Self>, iface: Arc<InterfaceCore>) -> Result<()> {
        let first = {
            let mut inner = self.inner.lock();
            inner.attached.push(iface);
            inner.attached.len() == 1
        };
        if first {
            if let Err(err) = self.start_driver() {
                self.inner.lock().attached.pop();
                return Err(err);
            }
            tracing::info!(node = %self.name, format = %self.hardware_format, "node started");
        }
        Ok(())
    }

    /// Detach a stopped interface. Stops the driver synchronously when this
    /// was the last one.
    pub(crate) fn detach(&self, iface: &Arc<InterfaceCore>) {
        let empty = {
            let mut inner = self.inner.lock();
            inner.attached.retain(|a| !Arc::ptr_eq(a, iface));
            inner.attached.is_empty()
        };
        if empty {
            self.stop_driver();
            tracing::info!(node = %self.name, "node stopped");
        }
    }

    fn start_driver(self: &Arc<Self>) -> Result<()> {
        let mut driver = self.driver.lock();
        match &mut *driver {
            NodeDriver::Idle => {
                tracing::warn!(node = %self.name, "node started with no driver");
                Ok(())
            }
            NodeDriver::Backend {
                backend,
                device,
                stream,
            } => {
                if stream.is_some() {
                    return Ok(());
                }
                let spec = StreamSpec {
                    format: self.hardware_format.clone(),
                    block_frames: self.block_frames,
                    device: device.clone(),
                };
                let weak = Arc::downgrade(self);
                let handle = match self.direction {
                    Direction::Playback => backend.open_output(
                        &spec,
                        Box::new(move |time, buffer, frames| {
                            if let Some(node) = weak.upgrade() {
                                node.on_playback(time, buffer, frames);
                            }
                        }),
                    )?,
                    Direction::Capture => backend.open_input(
                        &spec,
                        Box::new(move |time, data, frames| {
                            if let Some(node) = weak.upgrade() {
                                node.on_capture(time, data, frames);
                            }
                        }),
                    )?,
                };
                *stream = Some(handle);
                Ok(())
            }
            NodeDriver::Aec(aec) => aec.start(),
            NodeDriver::Muxer(muxer) => muxer.start(),
        }
    }

    fn stop_driver(&self) {
        let mut driver = self.driver.lock();
        match &mut *driver {
            NodeDriver::Idle => {}
            NodeDriver::Backend { stream, .. } => {
                // Dropping the handle stops the stream synchronously.
                stream.take();
            }
            NodeDriver::Aec(aec) => aec.stop(),
            NodeDriver::Muxer(muxer) => muxer.stop(),
        }
    }

    /// Fill one hardware playback block: sum every output interface in the
    /// normalized domain, encode with saturation, then offer the post-mix
    /// signal to feedback interfaces.
    pub(crate) fn on_playback(&self, time: Time, buffer: &mut [u8], frames: usize) {
        let if_enc = self.interface_format.encoding();
        let hw_enc = self.hardware_format.encoding();
        let samples = frames * self.hardware_format.channel_count();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.mix_norm.clear();
        inner.mix_norm.resize(samples, 0.0);
        inner
            .scratch
            .resize(frames * self.interface_format.frame_bytes(), 0);
        let step = if_enc.bytes_per_sample();
        for iface in &inner.attached {
            if iface.role() != InterfaceRole::Output {
                continue;
            }
            iface.pull_into(time, &mut inner.scratch, frames);
            for (acc, chunk) in inner
                .mix_norm
                .iter_mut()
                .zip(inner.scratch.chunks_exact(step))
            {
                *acc += sample::decode_norm(if_enc, chunk);
            }
        }
        let hw_step = hw_enc.bytes_per_sample();
        for (i, &v) in inner.mix_norm.iter().enumerate() {
            sample::encode_norm(hw_enc, v, &mut buffer[i * hw_step..(i + 1) * hw_step]);
        }
        for iface in &inner.attached {
            if iface.role() == InterfaceRole::Feedback {
                iface.push_from(time, buffer, frames);
            }
        }
    }

    /// Broadcast one hardware capture block to every input interface,
    /// bridging the encoding to the interface format when it differs.
    pub(crate) fn on_capture(&self, time: Time, data: &[u8], frames: usize) {
        let hw_enc = self.hardware_format.encoding();
        let if_enc = self.interface_format.encoding();
        let bytes = frames * self.hardware_format.frame_bytes();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let payload: &[u8] = if hw_enc == if_enc {
            &data[..bytes]
        } else {
            inner.mix_norm.clear();
            sample::decode_norm_buffer(hw_enc, &data[..bytes], &mut inner.mix_norm);
            inner.convert.clear();
            sample::encode_norm_buffer(if_enc, &inner.mix_norm, &mut inner.convert);
            &inner.convert
        };
        for iface in &inner.attached {
            if iface.role() == InterfaceRole::Input {
                iface.push_from(time, payload, frames);
            }
        }
    }

    /// Forward a volume group change to every live interface, pruning dead
    /// registrations on the way.
    pub(crate) fn volume_changed(&self) {
        let targets: Vec<Arc<InterfaceCore>> = {
            let mut inner = self.inner.lock();
            inner.registered.retain(|w| w.strong_count() > 0);
            inner.registered.iter().filter_map(Weak::upgrade).collect()
        };
        for iface in targets {
            iface.volume_changed();
        }
    }
}
