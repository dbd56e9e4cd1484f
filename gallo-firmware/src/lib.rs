//! Gallo board firmware core
//!
//! This crate contains the board side of the Gallo protocol: a
//! [`Dispatcher`](dispatch::Dispatcher) that decodes request frames, routes
//! each one to the I2C, SPI or GPIO driver, and encodes the reply, plus the
//! table of GPIO waits that are still outstanding.
//!
//! The dispatcher never touches peripherals directly. A board support
//! package implements the small capability traits in [`bus`] for its I2C
//! controller, SPI controller and GPIO pins (or wraps existing
//! `embedded-hal` 1.0 drivers with [`bus::Hal`]) and hands them over as a
//! [`Board`](bus::Board):
//!
//! ```rust,ignore
//! let mut server = Server::new(usb_tx, usb_rx, MyBoard::new(peripherals));
//! loop {
//!     if let Err(e) = server.poll() {
//!         // The host went away. Forget its waits and start over.
//!         server.disconnected();
//!     }
//! }
//! ```
//!
//! [`Server`](server::Server) drives the dispatcher over a serial-style
//! channel whose reads never block. Between frames it samples the pins that
//! have a wait armed, so a wait never holds up unrelated requests.
//!
//! With the `sim` feature the same dispatcher can be run inside a tokio task
//! against a simulated board; see [`sim`].

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod bus;
pub mod dispatch;
pub mod gpio;
pub mod i2c;
mod low;
pub mod server;
#[cfg(feature = "sim")]
pub mod sim;
pub mod spi;

pub use low::Error;

use gallo_proto::wire::{VersionInfo, PROTOCOL_VERSION};

/// Number of GPIO pins exposed on the header, numbered from 0.
pub const NUM_GPIOS: usize = 8;

/// Largest I2C or SPI read, in bytes, that a single request may ask for.
pub const BUFFER_SIZE: usize = 512;

/// Firmware version reported by the `version` endpoint.
pub const VERSION: VersionInfo = VersionInfo {
    major: parse_version(env!("CARGO_PKG_VERSION_MAJOR")) as u16,
    minor: parse_version(env!("CARGO_PKG_VERSION_MINOR")) as u16,
    patch: parse_version(env!("CARGO_PKG_VERSION_PATCH")),
    protocol: PROTOCOL_VERSION,
};

const fn parse_version(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut value = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    value
}
