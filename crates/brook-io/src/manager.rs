//! The routing runtime's entry point.
//!
//! A [`Manager`] owns one parsed [`Config`], one [`AudioBackend`], the shared
//! [`VolumeRegistry`], and the node table. Nodes are built lazily on first
//! reference: asking for an interface on the logical stream `"speaker"`
//! materializes its node from the configuration, and a composite stream
//! (AEC, muxer) recursively materializes the streams it maps onto.
//!
//! All cross-cutting state is constructor-injected from here; nothing in the
//! runtime is process-global, so several managers with different
//! configurations can coexist in one process.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use brook_chain::{
    CallbackEndpoint, FLOW, GAIN_RANGE_DB, GainStage, ProcessChain, ReadEndpoint, Stage,
    VolumeGroup, VolumeRegistry, WriteEndpoint,
};
use brook_config::{Config, StreamKind, StreamSettings};
use brook_core::{ChannelRole, FormatDescriptor, SampleEncoding};
use parking_lot::Mutex;

use crate::aec::{AecDriver, AecEngine};
use crate::backend::{AudioBackend, negotiate_encoding, negotiate_rate};
use crate::interface::{Interface, InterfaceRole};
use crate::muxer::{MuxEngine, MuxerDriver};
use crate::node::{Direction, Node, NodeDriver};
use crate::{Error, Result};

/// Seconds of application-side buffering in write/read endpoints.
const ENDPOINT_BUFFER_SECONDS: usize = 2;

/// Owns the configuration, the backend, and every node built from them.
pub struct Manager {
    backend: Arc<dyn AudioBackend>,
    config: Config,
    volumes: Arc<VolumeRegistry>,
    nodes: Mutex<HashMap<String, Arc<Node>>>,
    interface_seq: AtomicUsize,
}

impl Manager {
    /// Create a manager over `backend` with a parsed configuration.
    pub fn new(backend: Arc<dyn AudioBackend>, config: Config) -> Self {
        Self {
            backend,
            config,
            volumes: Arc::new(VolumeRegistry::new()),
            nodes: Mutex::new(HashMap::new()),
            interface_seq: AtomicUsize::new(0),
        }
    }

    /// Create a manager from a JSON configuration document.
    pub fn from_json(backend: Arc<dyn AudioBackend>, json: &str) -> Result<Self> {
        Ok(Self::new(backend, Config::from_json(json)?))
    }

    /// The shared volume registry.
    pub fn volumes(&self) -> &Arc<VolumeRegistry> {
        &self.volumes
    }

    /// The node for logical stream `name`, building it (and, for composite
    /// streams, the streams it maps onto) on first reference.
    pub fn node(&self, name: &str) -> Result<Arc<Node>> {
        if let Some(node) = self.nodes.lock().get(name) {
            return Ok(node.clone());
        }
        let settings = self.config.stream(name)?.clone();
        // Built outside the table lock: composite nodes recurse into node().
        let node = match settings.io {
            StreamKind::Input | StreamKind::Output => self.build_backend_node(name, &settings)?,
            StreamKind::Aec => self.build_aec_node(name, &settings)?,
            StreamKind::Muxer => self.build_muxer_node(name, &settings)?,
        };
        Ok(self
            .nodes
            .lock()
            .entry(name.to_owned())
            .or_insert(node)
            .clone())
    }

    /// Open a playback interface on the output stream `stream`. The
    /// application writes frames in the given format; the chain bridges to
    /// the node.
    pub fn create_output(
        &self,
        rate: u32,
        channels: Vec<ChannelRole>,
        encoding: SampleEncoding,
        stream: &str,
    ) -> Result<Interface> {
        let node = self.node(stream)?;
        if node.direction() != Direction::Playback {
            return Err(Error::BadAccess("output interface on a capture stream"));
        }
        let app = FormatDescriptor::new(channels, encoding, rate);
        let endpoint = Box::new(WriteEndpoint::new(
            app.clone(),
            rate as usize * ENDPOINT_BUFFER_SECONDS,
        ));
        self.build_interface(&node, InterfaceRole::Output, app, endpoint)
    }

    /// Open a capture interface on the input (or composite) stream `stream`.
    pub fn create_input(
        &self,
        rate: u32,
        channels: Vec<ChannelRole>,
        encoding: SampleEncoding,
        stream: &str,
    ) -> Result<Interface> {
        let node = self.node(stream)?;
        if node.direction() != Direction::Capture {
            return Err(Error::BadAccess("input interface on a playback stream"));
        }
        let app = FormatDescriptor::new(channels, encoding, rate);
        let endpoint = Box::new(ReadEndpoint::new(
            app.clone(),
            rate as usize * ENDPOINT_BUFFER_SECONDS,
        ));
        self.build_interface(&node, InterfaceRole::Input, app, endpoint)
    }

    /// Open a feedback interface on the output stream `stream`, receiving
    /// its post-mix signal.
    pub fn create_feedback(
        &self,
        rate: u32,
        channels: Vec<ChannelRole>,
        encoding: SampleEncoding,
        stream: &str,
    ) -> Result<Interface> {
        let node = self.node(stream)?;
        if node.direction() != Direction::Playback {
            return Err(Error::BadAccess("feedback interface on a capture stream"));
        }
        let app = FormatDescriptor::new(channels, encoding, rate);
        let endpoint = Box::new(ReadEndpoint::new(
            app.clone(),
            rate as usize * ENDPOINT_BUFFER_SECONDS,
        ));
        self.build_interface(&node, InterfaceRole::Feedback, app, endpoint)
    }

    /// Set a named volume group's gain. Out-of-range values are rejected.
    pub fn set_volume(&self, group: &str, db: f32) -> Result<()> {
        if !db.is_finite() || !(GAIN_RANGE_DB.0..=GAIN_RANGE_DB.1).contains(&db) {
            return Err(Error::VolumeRange(db));
        }
        self.volumes.get_or_create(group).set_gain_db(db);
        self.notify_volume();
        Ok(())
    }

    /// A named volume group's gain, if the group exists.
    pub fn get_volume(&self, group: &str) -> Option<f32> {
        self.volumes.get(group).map(|g| g.gain_db())
    }

    /// Mute or unmute a named volume group.
    pub fn set_mute(&self, group: &str, muted: bool) {
        self.volumes.get_or_create(group).set_muted(muted);
        self.notify_volume();
    }

    /// A named volume group's mute state.
    pub fn get_mute(&self, group: &str) -> bool {
        self.volumes.get(group).is_some_and(|g| g.muted())
    }

    fn notify_volume(&self) {
        let nodes: Vec<Arc<Node>> = self.nodes.lock().values().cloned().collect();
        for node in nodes {
            node.volume_changed();
        }
    }

    /// Build a chain of the shape the role demands and wrap it in an
    /// interface registered on the node.
    fn build_interface(
        &self,
        node: &Arc<Node>,
        role: InterfaceRole,
        app: FormatDescriptor,
        endpoint: Box<dyn Stage>,
    ) -> Result<Interface> {
        let mut gain = GainStage::new("volume");
        gain.add_group(Arc::new(VolumeGroup::new(FLOW)));
        if let Some(group) = node.volume_group() {
            gain.add_group(group.clone());
        }

        let mut chain = ProcessChain::new();
        match role {
            InterfaceRole::Output => {
                chain.set_input_config(app.clone());
                chain.set_output_config(node.interface_format().clone());
                chain.push_back(endpoint);
                chain.push_back(Box::new(gain));
            }
            InterfaceRole::Input => {
                chain.set_input_config(node.interface_format().clone());
                chain.set_output_config(app.clone());
                chain.push_back(Box::new(gain));
                chain.push_back(endpoint);
            }
            InterfaceRole::Feedback => {
                chain.set_input_config(node.hardware_format().clone());
                chain.set_output_config(app.clone());
                chain.push_back(Box::new(gain));
                chain.push_back(endpoint);
            }
        }

        let seq = self.interface_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}:{}", node.name(), seq);
        Ok(Interface::new(
            name,
            role,
            app,
            node.clone(),
            self.volumes.clone(),
            chain,
        ))
    }

    /// Sub-interface of a composite node on one of its source nodes,
    /// delivering processed blocks through `deliver`.
    fn build_tap_interface(
        &self,
        source: &Arc<Node>,
        format: FormatDescriptor,
        deliver: brook_chain::PushCallback,
    ) -> Result<Interface> {
        let role = match source.direction() {
            Direction::Capture => InterfaceRole::Input,
            Direction::Playback => InterfaceRole::Feedback,
        };
        let endpoint = Box::new(CallbackEndpoint::for_input(format.clone(), deliver));
        self.build_interface(source, role, format, endpoint)
    }

    fn build_backend_node(&self, name: &str, settings: &StreamSettings) -> Result<Arc<Node>> {
        let device = settings.map_on.clone().unwrap_or_default();
        let device_name = (device.name != "default").then_some(device.name);

        let rate = match settings.rate() {
            Some(rate) => rate,
            None => negotiate_rate(&self.backend.supported_rates(device_name.as_deref()))
                .ok_or_else(|| Error::UnsupportedFormat(format!("no usable rate for '{name}'")))?,
        };
        let encoding = match settings.encoding()? {
            Some(encoding) => encoding,
            None => {
                negotiate_encoding(&self.backend.supported_encodings(device_name.as_deref()))
                    .ok_or_else(|| {
                        Error::UnsupportedFormat(format!("no usable encoding for '{name}'"))
                    })?
            }
        };
        let hardware = FormatDescriptor::new(settings.channel_roles()?, encoding, rate);
        let mixing = hardware.with_encoding(encoding.widened());
        let direction = match settings.io {
            StreamKind::Output => Direction::Playback,
            _ => Direction::Capture,
        };
        let volume = settings
            .volume_name
            .as_deref()
            .map(|n| self.volumes.get_or_create(n));

        let node = Node::new(
            name,
            direction,
            hardware,
            mixing,
            settings.nb_chunk,
            volume,
        );
        node.set_driver(NodeDriver::Backend {
            backend: self.backend.clone(),
            device: device_name,
            stream: None,
        });
        Ok(node)
    }

    /// Concrete stream format of a composite node; composites cannot
    /// negotiate, so `"auto"` fields are errors here.
    fn composite_format(name: &str, settings: &StreamSettings) -> Result<FormatDescriptor> {
        let rate = settings.rate().ok_or_else(|| {
            Error::UnsupportedFormat(format!("composite stream '{name}' cannot negotiate a rate"))
        })?;
        let encoding = settings.encoding()?.ok_or_else(|| {
            Error::UnsupportedFormat(format!(
                "composite stream '{name}' cannot negotiate an encoding"
            ))
        })?;
        Ok(FormatDescriptor::new(
            settings.channel_roles()?,
            encoding,
            rate,
        ))
    }

    fn build_aec_node(&self, name: &str, settings: &StreamSettings) -> Result<Arc<Node>> {
        let microphone = settings.map_on_microphone.as_ref().ok_or(Error::MissingField {
            stream: name.to_owned(),
            field: "map-on-microphone",
        })?;
        let feedback = settings.map_on_feedback.as_ref().ok_or(Error::MissingField {
            stream: name.to_owned(),
            field: "map-on-feedback",
        })?;

        let hardware = Self::composite_format(name, settings)?;
        let mixing = hardware.with_encoding(hardware.encoding().widened());
        let volume = settings
            .volume_name
            .as_deref()
            .map(|n| self.volumes.get_or_create(n));
        let node = Node::new(
            name,
            Direction::Capture,
            hardware.clone(),
            mixing,
            settings.nb_chunk,
            volume,
        );

        let engine = Arc::new(Mutex::new(AecEngine::new(
            hardware.clone(),
            settings.nb_chunk,
            Arc::downgrade(&node),
        )));

        let mic_node = self.node(&microphone.map_on)?;
        let mic_engine = engine.clone();
        let mic_iface = self.build_tap_interface(
            &mic_node,
            hardware.clone(),
            Box::new(move |time, data, frames| {
                mic_engine.lock().push_microphone(data, frames, time);
            }),
        )?;

        let fb_node = self.node(&feedback.map_on)?;
        let fb_engine = engine.clone();
        let fb_iface = self.build_tap_interface(
            &fb_node,
            hardware,
            Box::new(move |time, data, frames| {
                fb_engine.lock().push_feedback(data, frames, time);
            }),
        )?;

        node.set_driver(NodeDriver::Aec(AecDriver::new(mic_iface, fb_iface, engine)));
        Ok(node)
    }

    fn build_muxer_node(&self, name: &str, settings: &StreamSettings) -> Result<Arc<Node>> {
        let link1 = settings.map_on_input_1.as_ref().ok_or(Error::MissingField {
            stream: name.to_owned(),
            field: "map-on-input-1",
        })?;
        let link2 = settings.map_on_input_2.as_ref().ok_or(Error::MissingField {
            stream: name.to_owned(),
            field: "map-on-input-2",
        })?;

        let roles = settings.channel_roles()?;
        let rate = settings.rate().ok_or_else(|| {
            Error::UnsupportedFormat(format!("composite stream '{name}' cannot negotiate a rate"))
        })?;
        let (input_encoding, output_encoding) = settings.mux_demux_encodings()?;
        // The muxed output is already in the widened lane; interfaces mix in
        // the same encoding.
        let hardware = FormatDescriptor::new(roles.clone(), output_encoding, rate);
        let volume = settings
            .volume_name
            .as_deref()
            .map(|n| self.volumes.get_or_create(n));
        let node = Node::new(
            name,
            Direction::Capture,
            hardware.clone(),
            hardware.clone(),
            settings.nb_chunk,
            volume,
        );

        let roles1 = settings.input_remap(1)?.unwrap_or_else(|| roles.clone());
        let roles2 = settings.input_remap(2)?.unwrap_or_else(|| roles.clone());
        let format1 = FormatDescriptor::new(roles1, input_encoding, rate);
        let format2 = FormatDescriptor::new(roles2, input_encoding, rate);

        let engine = Arc::new(Mutex::new(MuxEngine::new(
            format1.clone(),
            format2.clone(),
            hardware,
            settings.nb_chunk,
            Arc::downgrade(&node),
        )));

        let node1 = self.node(&link1.map_on)?;
        let engine1 = engine.clone();
        let iface1 = self.build_tap_interface(
            &node1,
            format1,
            Box::new(move |time, data, frames| {
                engine1.lock().push_input1(data, frames, time);
            }),
        )?;

        let node2 = self.node(&link2.map_on)?;
        let engine2 = engine.clone();
        let iface2 = self.build_tap_interface(
            &node2,
            format2,
            Box::new(move |time, data, frames| {
                engine2.lock().push_input2(data, frames, time);
            }),
        )?;

        node.set_driver(NodeDriver::Muxer(MuxerDriver::new(iface1, iface2, engine)));
        Ok(node)
    }
}
