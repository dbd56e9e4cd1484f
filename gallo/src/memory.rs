//! In-process boards.
//!
//! [`MemoryBackend`] lists boards whose transport is built by a closure, such
//! as a simulated board served from a tokio task. It lets everything above
//! the transport, discovery and claims included, run without hardware.

use crate::device::{Backend, DeviceInfo};
use crate::error::{Result, TransportError};
use crate::link::Link;
use crate::options::Options;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Factory = Arc<dyn Fn() -> Result<Link, TransportError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct MemoryBackend {
    devices: Vec<(DeviceInfo, Factory)>,
    connections: Arc<AtomicUsize>,
    options: Options,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Adds a board reporting `serial`, connected by calling `factory`.
    pub fn with_device<F>(mut self, serial: &str, factory: F) -> Self
    where
        F: Fn() -> Result<Link, TransportError> + Send + Sync + 'static,
    {
        let info = DeviceInfo {
            serial_number: serial.to_owned(),
            product: Some("Gallo (in-process)".to_owned()),
        };
        self.devices.push((info, Arc::new(factory)));
        self
    }

    /// Number of transports opened so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Backend for MemoryBackend {
    type Port = Factory;

    fn options(&self) -> &Options {
        &self.options
    }

    fn enumerate(&self) -> Result<impl Iterator<Item = (DeviceInfo, Factory)>> {
        Ok(self.devices.clone().into_iter())
    }

    fn connect(&self, factory: Factory) -> Result<Link> {
        let link = factory()?;
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(link)
    }
}
