//! Application access points.
//!
//! An [`Interface`] is one application's view of a [`Node`]: a processing
//! chain between the application's requested format and the node's mixing
//! format, plus the start/stop lifecycle that attaches the chain to the
//! node. Several interfaces can sit on the same node; a playback node sums
//! them, a capture node broadcasts to them.
//!
//! The chain is guarded by a re-entrant lock so that an application callback
//! invoked from inside chain processing can still call cheap interface
//! methods; an operation that would re-enter chain processing itself is
//! refused and logged instead of deadlocking.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use brook_chain::{
    CallbackEndpoint, FLOW, GainStage, ProcessChain, PullCallback, PushCallback, ReadEndpoint,
    StageKind, VolumeGroup, VolumeRegistry, WriteEndpoint,
};
use brook_core::{FormatDescriptor, Time};
use parking_lot::ReentrantMutex;

use crate::node::Node;
use crate::{Error, Result};

/// How an interface exchanges data with its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceRole {
    /// Receives capture frames from the node.
    Input,
    /// Feeds playback frames into the node's mix.
    Output,
    /// Receives the node's post-mix playback signal.
    Feedback,
}

/// Shared state between an [`Interface`] and its node.
pub(crate) struct InterfaceCore {
    name: String,
    role: InterfaceRole,
    /// The application-side format at the chain's far end.
    format: FormatDescriptor,
    node: Arc<Node>,
    registry: Arc<VolumeRegistry>,
    chain: ReentrantMutex<RefCell<ProcessChain>>,
    started: AtomicBool,
}

impl InterfaceCore {
    pub(crate) fn role(&self) -> InterfaceRole {
        self.role
    }

    /// Produce `frames` frames into `out` (node mixing format). Called from
    /// the node's driver callback.
    pub(crate) fn pull_into(&self, time: Time, out: &mut [u8], frames: usize) {
        let guard = self.chain.lock();
        match guard.try_borrow_mut() {
            Ok(mut chain) => {
                chain.pull(time, out, frames);
            }
            Err(_) => {
                tracing::error!(interface = %self.name, "chain busy during pull, serving silence");
                out.fill(0);
            }
        }
    }

    /// Deliver `frames` frames of `data` into the chain. Called from the
    /// node's driver callback.
    pub(crate) fn push_from(&self, time: Time, data: &[u8], frames: usize) {
        let guard = self.chain.lock();
        match guard.try_borrow_mut() {
            Ok(mut chain) => chain.push(time, data, frames),
            Err(_) => {
                tracing::error!(interface = %self.name, "chain busy during push, dropping block");
            }
        }
    }

    /// A volume group this interface participates in changed. Gain stages
    /// read the group atomics on every block, so nothing needs recomputing;
    /// the notification exists for observability.
    pub(crate) fn volume_changed(&self) {
        tracing::trace!(interface = %self.name, "volume changed");
    }
}

/// One application stream on a node.
///
/// Dropping the interface stops it and releases its chain.
pub struct Interface {
    core: Arc<InterfaceCore>,
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.core.name)
            .field("role", &self.core.role)
            .field("format", &self.core.format)
            .finish_non_exhaustive()
    }
}

impl Interface {
    /// Wrap a fully built chain. The chain's boundary formats must already
    /// be declared; `format` is the application-side one.
    pub(crate) fn new(
        name: impl Into<String>,
        role: InterfaceRole,
        format: FormatDescriptor,
        node: Arc<Node>,
        registry: Arc<VolumeRegistry>,
        chain: ProcessChain,
    ) -> Self {
        let core = Arc::new(InterfaceCore {
            name: name.into(),
            role,
            format,
            node,
            registry,
            chain: ReentrantMutex::new(RefCell::new(chain)),
            started: AtomicBool::new(false),
        });
        core.node.register_interface(&core);
        Self { core }
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Data-exchange role.
    pub fn role(&self) -> InterfaceRole {
        self.core.role
    }

    /// The application-side format.
    pub fn format(&self) -> &FormatDescriptor {
        &self.core.format
    }

    /// Whether the interface is currently started.
    pub fn is_started(&self) -> bool {
        self.core.started.load(Ordering::SeqCst)
    }

    /// Recompute the chain's converter bridges and attach to the node,
    /// starting the node's driver if this is its first interface.
    /// Idempotent.
    pub fn start(&self) -> Result<()> {
        if self.core.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let bridged = {
            let guard = self.core.chain.lock();
            match guard.try_borrow_mut() {
                Ok(mut chain) => chain.update_inter_stages(),
                Err(_) => false,
            }
        };
        if !bridged {
            self.core.started.store(false, Ordering::SeqCst);
            return Err(Error::UnsupportedFormat(format!(
                "interface '{}' chain cannot be bridged",
                self.core.name
            )));
        }
        if let Err(err) = self.core.node.attach(self.core.clone()) {
            self.core.started.store(false, Ordering::SeqCst);
            return Err(err);
        }
        tracing::info!(interface = %self.core.name, "interface started");
        Ok(())
    }

    /// Detach from the node, stopping its driver if this was the last
    /// interface. Idempotent.
    pub fn stop(&self) {
        if self.core.started.swap(false, Ordering::SeqCst) {
            self.core.node.detach(&self.core);
            tracing::info!(interface = %self.core.name, "interface stopped");
        }
    }

    /// Queue `frames` frames for playback on an output interface with a
    /// write endpoint.
    pub fn write(&self, data: &[u8], frames: usize) -> Result<()> {
        let guard = self.core.chain.lock();
        let mut chain = guard
            .try_borrow_mut()
            .map_err(|_| Error::BadAccess("chain busy"))?;
        let ep = chain
            .first_of_kind_mut(StageKind::EndpointWrite)
            .and_then(|s| s.as_any_mut().downcast_mut::<WriteEndpoint>())
            .ok_or(Error::BadAccess("interface has no write endpoint"))?;
        ep.write(data, frames);
        Ok(())
    }

    /// Drain up to `frames` captured frames into `out` on an input or
    /// feedback interface with a read endpoint. The shortfall is
    /// zero-filled; returns the real frames copied.
    pub fn read(&self, out: &mut [u8], frames: usize) -> Result<usize> {
        let guard = self.core.chain.lock();
        let mut chain = guard
            .try_borrow_mut()
            .map_err(|_| Error::BadAccess("chain busy"))?;
        let ep = chain
            .first_of_kind_mut(StageKind::EndpointRead)
            .and_then(|s| s.as_any_mut().downcast_mut::<ReadEndpoint>())
            .ok_or(Error::BadAccess("interface has no read endpoint"))?;
        Ok(ep.read(out, frames))
    }

    /// Replace the endpoint with a synchronous fill callback. Output
    /// interfaces only, and only before the first start.
    pub fn set_output_callback(&self, callback: PullCallback) -> Result<()> {
        if self.core.role != InterfaceRole::Output {
            return Err(Error::BadAccess("output callback on a capture interface"));
        }
        if self.is_started() {
            return Err(Error::BadAccess("cannot replace endpoint while started"));
        }
        let guard = self.core.chain.lock();
        let mut chain = guard
            .try_borrow_mut()
            .map_err(|_| Error::BadAccess("chain busy"))?;
        if !chain.remove_if_first(StageKind::EndpointWrite) {
            chain.remove_if_first(StageKind::EndpointCallback);
        }
        chain.push_front(Box::new(CallbackEndpoint::for_output(
            self.core.format.clone(),
            callback,
        )));
        Ok(())
    }

    /// Replace the endpoint with a synchronous delivery callback. Input and
    /// feedback interfaces only, and only before the first start.
    pub fn set_input_callback(&self, callback: PushCallback) -> Result<()> {
        if self.core.role == InterfaceRole::Output {
            return Err(Error::BadAccess("input callback on a playback interface"));
        }
        if self.is_started() {
            return Err(Error::BadAccess("cannot replace endpoint while started"));
        }
        let guard = self.core.chain.lock();
        let mut chain = guard
            .try_borrow_mut()
            .map_err(|_| Error::BadAccess("chain busy"))?;
        if !chain.remove_if_last(StageKind::EndpointRead) {
            chain.remove_if_last(StageKind::EndpointCallback);
        }
        chain.push_back(Box::new(CallbackEndpoint::for_input(
            self.core.format.clone(),
            callback,
        )));
        Ok(())
    }

    /// Set a parameter on the chain stage named `stage` (for the gain stage,
    /// the parameter is a group name and the value its `"-3dB"` form).
    pub fn set_parameter(&self, stage: &str, parameter: &str, value: &str) -> bool {
        let guard = self.core.chain.lock();
        let Ok(mut chain) = guard.try_borrow_mut() else {
            tracing::error!(interface = %self.core.name, "chain busy, parameter dropped");
            return false;
        };
        match chain.get_mut(stage) {
            Some(s) => s.set_parameter(parameter, value),
            None => {
                tracing::error!(interface = %self.core.name, stage, "no such stage");
                false
            }
        }
    }

    /// Read a parameter from the chain stage named `stage`.
    pub fn get_parameter(&self, stage: &str, parameter: &str) -> Option<String> {
        let guard = self.core.chain.lock();
        let mut chain = guard.try_borrow_mut().ok()?;
        chain.get_mut(stage).and_then(|s| s.get_parameter(parameter))
    }

    /// Attach the chain's gain stage to the volume group `name`. [`FLOW`]
    /// is reserved for the interface's private group; any other name
    /// resolves through the shared registry.
    pub fn add_volume_group(&self, name: &str) -> Result<()> {
        let group = if name == FLOW {
            Arc::new(VolumeGroup::new(FLOW))
        } else {
            self.core.registry.get_or_create(name)
        };
        let guard = self.core.chain.lock();
        let mut chain = guard
            .try_borrow_mut()
            .map_err(|_| Error::BadAccess("chain busy"))?;
        let stage = chain
            .first_of_kind_mut(StageKind::Gain)
            .and_then(|s| s.as_any_mut().downcast_mut::<GainStage>())
            .ok_or(Error::BadAccess("interface has no gain stage"))?;
        stage.add_group(group);
        Ok(())
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use crate::node::{Direction, NodeDriver};
    use brook_core::{ChannelRole, SampleEncoding};

    fn int16_stereo(rate: u32) -> FormatDescriptor {
        FormatDescriptor::new(ChannelRole::default_map(), SampleEncoding::Int16, rate)
    }

    fn playback_node(backend: &MockBackend) -> Arc<Node> {
        let hardware = int16_stereo(48000);
        let mixing = hardware.with_encoding(SampleEncoding::Int16On32);
        let node = Node::new("speaker", Direction::Playback, hardware, mixing, 32, None);
        node.set_driver(NodeDriver::Backend {
            backend: Arc::new(backend.clone()),
            device: None,
            stream: None,
        });
        node
    }

    fn output_interface(node: &Arc<Node>, registry: &Arc<VolumeRegistry>) -> Interface {
        let app = int16_stereo(48000);
        let mut chain = ProcessChain::new();
        chain.set_input_config(app.clone());
        chain.set_output_config(node.interface_format().clone());
        chain.push_back(Box::new(WriteEndpoint::new(app.clone(), 1 << 16)));
        chain.push_back(Box::new(GainStage::new("volume")));
        Interface::new(
            "speaker:0",
            InterfaceRole::Output,
            app,
            node.clone(),
            registry.clone(),
            chain,
        )
    }

    #[test]
    fn start_attaches_and_stop_detaches() {
        let backend = MockBackend::new();
        let node = playback_node(&backend);
        let registry = Arc::new(VolumeRegistry::new());
        let iface = output_interface(&node, &registry);

        assert_eq!(backend.active_output_count(), 0);
        iface.start().unwrap();
        assert!(iface.is_started());
        assert_eq!(backend.active_output_count(), 1);
        // Idempotent.
        iface.start().unwrap();
        assert_eq!(backend.output_count(), 1);

        iface.stop();
        assert_eq!(backend.active_output_count(), 0);
    }

    #[test]
    fn written_frames_reach_the_hardware_block() {
        let backend = MockBackend::new();
        let node = playback_node(&backend);
        let registry = Arc::new(VolumeRegistry::new());
        let iface = output_interface(&node, &registry);
        iface.start().unwrap();

        let samples = [1000i16, -1000, 2000, -2000, 3000, -3000, 4000, -4000];
        let data: Vec<u8> = samples.iter().flat_map(|v| v.to_le_bytes()).collect();
        iface.write(&data, 4).unwrap();

        let block = backend.drive_output(0, Time::ZERO, 4).unwrap();
        let heard: Vec<i16> = block
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(heard, samples);
    }

    #[test]
    fn drop_stops_the_node() {
        let backend = MockBackend::new();
        let node = playback_node(&backend);
        let registry = Arc::new(VolumeRegistry::new());
        let iface = output_interface(&node, &registry);
        iface.start().unwrap();
        assert_eq!(backend.active_output_count(), 1);
        drop(iface);
        assert_eq!(backend.active_output_count(), 0);
    }

    #[test]
    fn callback_endpoint_feeds_playback() {
        let backend = MockBackend::new();
        let node = playback_node(&backend);
        let registry = Arc::new(VolumeRegistry::new());
        let iface = output_interface(&node, &registry);
        iface
            .set_output_callback(Box::new(|_, buffer, _| {
                for chunk in buffer.chunks_exact_mut(2) {
                    chunk.copy_from_slice(&500i16.to_le_bytes());
                }
            }))
            .unwrap();
        iface.start().unwrap();

        let block = backend.drive_output(0, Time::ZERO, 8).unwrap();
        let v = i16::from_le_bytes([block[0], block[1]]);
        assert_eq!(v, 500);
    }

    #[test]
    fn volume_group_parameter_round_trip() {
        let backend = MockBackend::new();
        let node = playback_node(&backend);
        let registry = Arc::new(VolumeRegistry::new());
        let iface = output_interface(&node, &registry);
        iface.add_volume_group(FLOW).unwrap();
        assert!(iface.set_parameter("volume", FLOW, "-6dB"));
        assert_eq!(iface.get_parameter("volume", FLOW).as_deref(), Some("-6dB"));
        // Unknown stage and group are refused.
        assert!(!iface.set_parameter("reverb", FLOW, "-6dB"));
        assert!(!iface.set_parameter("volume", "MASTER", "-6dB"));
    }
}
