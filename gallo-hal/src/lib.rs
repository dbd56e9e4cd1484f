//! `embedded-hal` implementations via a Gallo board
//!
//! [`embedded-hal`](https://crates.io/crates/embedded-hal) is a hardware
//! abstraction layer for embedded systems. Device drivers written against it
//! normally run on a microcontroller wired to the device.
//!
//! This library implements the I2C, SPI, digital I/O and delay traits, both
//! blocking and async, in terms of a Gallo bridge board, so a driver can be
//! run and tested from a workstation with the real device attached to the
//! board.
//!
//! The blocking traits wait on the board from the calling thread. Called
//! from async code they need a multi-threaded tokio runtime; the async
//! traits work anywhere.

use gallo::{Backend, BusConfig, Gallo, UsbBackend};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};

mod delay;
mod gpio;
mod i2c;
mod spi;

pub use delay::Delay;
pub use gpio::Gpio;
pub use i2c::I2c;
pub use spi::Spi;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A board operation failed.
    #[error(transparent)]
    Board(#[from] gallo::Error),

    /// The I2C transaction writes after reading. The board only issues a
    /// repeated start between a write and the read that follows it.
    #[error("I2C transaction cannot write after reading")]
    UnsupportedTransaction,
}

impl Error {
    /// The library error behind this one, if the board reported it.
    pub fn inner(&self) -> Option<&gallo::Error> {
        match self {
            Error::Board(e) => Some(e),
            Error::UnsupportedTransaction => None,
        }
    }
}

/// Runs board futures to completion for the blocking traits.
#[derive(Clone)]
pub(crate) struct Blocking {
    handle: Handle,
    // Present when no runtime was running at construction.
    _runtime: Option<Arc<Runtime>>,
}

impl Blocking {
    fn new() -> std::io::Result<Self> {
        match Handle::try_current() {
            Ok(handle) => Ok(Self {
                handle,
                _runtime: None,
            }),
            Err(_) => {
                let runtime = Runtime::new()?;
                Ok(Self {
                    handle: runtime.handle().clone(),
                    _runtime: Some(Arc::new(runtime)),
                })
            }
        }
    }

    pub(crate) fn run<F: Future>(&self, future: F) -> F::Output {
        if Handle::try_current().is_ok() {
            tokio::task::block_in_place(|| self.handle.block_on(future))
        } else {
            self.handle.block_on(future)
        }
    }
}

/// An open board, from which bus and pin handles are taken.
///
/// Handles are independent of each other and of the `Hal`; they may be
/// moved to other threads and used concurrently.
pub struct Hal {
    gallo: Gallo,
    blocking: Blocking,
}

impl Hal {
    /// Opens the first Gallo board attached over USB.
    pub fn open() -> Result<Self, Error> {
        Self::open_with(&UsbBackend::default(), None)
    }

    /// Opens the USB-attached board with the given serial number.
    pub fn open_with_serial(serial_number: &str) -> Result<Self, Error> {
        Self::open_with(&UsbBackend::default(), Some(serial_number))
    }

    /// Opens a board through `backend`, choosing it by serial number if one
    /// is given.
    ///
    /// Uses the current tokio runtime if there is one and otherwise starts a
    /// private one, which lives as long as the `Hal` or any of its handles.
    pub fn open_with<B: Backend>(backend: &B, serial_number: Option<&str>) -> Result<Self, Error> {
        let blocking = Blocking::new()
            .map_err(|e| gallo::Error::from(gallo::TransportError::Usb(e.to_string())))?;
        let gallo = blocking.run(async {
            match serial_number {
                Some(serial) => gallo::open_with_serial(backend, serial).await,
                None => gallo::open(backend).await,
            }
        })?;
        Ok(Self { gallo, blocking })
    }

    /// Wraps an already open board. `handle` is the runtime its transport
    /// runs on.
    pub fn new(gallo: Gallo, handle: Handle) -> Self {
        Self {
            gallo,
            blocking: Blocking {
                handle,
                _runtime: None,
            },
        }
    }

    pub fn gallo(&self) -> &Gallo {
        &self.gallo
    }

    /// Replaces the board's bus configuration.
    pub fn set_config(&self, config: BusConfig) -> Result<(), Error> {
        Ok(self.blocking.run(self.gallo.set_config(config))?)
    }

    pub fn i2c(&self) -> I2c {
        I2c::new(self.gallo.clone(), self.blocking.clone())
    }

    pub fn spi(&self) -> Spi {
        Spi::new(self.gallo.clone(), self.blocking.clone())
    }

    /// Pin `pin`, numbered 0 through 7.
    pub fn gpio(&self, pin: u8) -> Gpio {
        Gpio::new(pin, self.gallo.clone(), self.blocking.clone())
    }

    pub fn delay(&self) -> Delay {
        Delay
    }
}

/// Copies a read response into the caller's buffer.
pub(crate) fn fill(buf: &mut [u8], data: &[u8]) -> Result<(), Error> {
    if data.len() != buf.len() {
        return Err(gallo::Error::from(gallo::ProtocolError::MalformedResponse).into());
    }
    buf.copy_from_slice(data);
    Ok(())
}

/// Length of `buf` as a request count.
pub(crate) fn count(buf: &[u8]) -> Result<u16, Error> {
    length(buf.len())
}

pub(crate) fn length(len: usize) -> Result<u16, Error> {
    u16::try_from(len)
        .map_err(|_| gallo::Error::from(gallo::ProtocolError::RequestTooLarge { max: u16::MAX }).into())
}

#[cfg(test)]
pub(crate) mod testing {
    use gallo::{Link, MemoryBackend};
    use gallo_firmware::sim::{serve, Sim, SimBoard};
    use std::sync::Mutex;

    pub fn simulated(serial: &str) -> (MemoryBackend, Sim) {
        let (board, sim) = SimBoard::new();
        let board = Mutex::new(Some(board));
        let backend = MemoryBackend::new().with_device(serial, move || {
            let board = board
                .lock()
                .unwrap()
                .take()
                .ok_or(gallo::TransportError::Disconnected)?;
            let (tx, rx) = serve(board);
            Ok(Link::new(tx, rx))
        });
        (backend, sim)
    }
}
