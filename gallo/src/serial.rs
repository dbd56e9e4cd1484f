//! Serial transport.
//!
//! Some boards enumerate as a CDC-ACM serial port instead of a vendor USB
//! interface. Such a port is named by path rather than discovered. Any
//! `embedded-hal` 0.2 serial pair works, which is also how the transport is
//! tested.

use crate::device::{Backend, DeviceInfo};
use crate::error::{Result, TransportError};
use crate::link::Link;
use crate::options::Options;
use embedded_hal::serial;
use serial_embedded_hal::{BaudRate, CharSize, FlowControl, Parity, PortSettings, Serial, StopBits};
use std::fmt::Debug;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const IDLE_POLL: Duration = Duration::from_millis(1);

/// The one board behind a serial port.
///
/// The port path stands in for the serial number, so
/// [`open_with_serial`](crate::open_with_serial) takes the path.
#[derive(Debug, Clone)]
pub struct SerialBackend {
    path: String,
    options: Options,
}

impl SerialBackend {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            options: Options::default(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

impl Backend for SerialBackend {
    type Port = String;

    fn options(&self) -> &Options {
        &self.options
    }

    fn enumerate(&self) -> Result<impl Iterator<Item = (DeviceInfo, String)>> {
        let info = DeviceInfo {
            serial_number: self.path.clone(),
            product: None,
        };
        Ok(std::iter::once((info, self.path.clone())))
    }

    fn connect(&self, path: String) -> Result<Link> {
        open_port(&path, self.options.channel_depth)
    }
}

/// Opens the serial port at `path`, for example `/dev/ttyACM0` or `COM3`.
pub fn open_port(path: &str, channel_depth: usize) -> Result<Link> {
    // A CDC-ACM port ignores the line settings, but the OS wants some.
    let port = Serial::new(
        path,
        &PortSettings {
            baud_rate: BaudRate::Baud115200,
            char_size: CharSize::Bits8,
            parity: Parity::ParityNone,
            stop_bits: StopBits::Stop1,
            flow_control: FlowControl::FlowNone,
        },
    )
    .map_err(|e| TransportError::Serial(format!("{}: {}", path, e)))?;
    let (tx, rx) = port.split();
    Ok(pump(tx, rx, channel_depth))
}

/// Moves bytes between a blocking serial pair and a [`Link`] on two threads.
///
/// The reader hands over what it has whenever a frame terminator arrives or
/// the line goes quiet. Both threads exit once the link is dropped or the
/// port fails.
pub fn pump<TX, RX>(tx: TX, rx: RX, channel_depth: usize) -> Link
where
    TX: serial::Write<u8> + Send + 'static,
    TX::Error: Debug,
    RX: serial::Read<u8> + Send + 'static,
    RX::Error: Debug,
{
    let (to_board, outgoing) = mpsc::channel::<Vec<u8>>(channel_depth);
    let (incoming, from_board) = mpsc::channel::<Vec<u8>>(channel_depth);
    thread::spawn(move || write_loop(tx, outgoing));
    thread::spawn(move || read_loop(rx, incoming));
    Link::new(to_board, from_board)
}

fn write_loop<TX>(mut tx: TX, mut outgoing: mpsc::Receiver<Vec<u8>>)
where
    TX: serial::Write<u8>,
    TX::Error: Debug,
{
    while let Some(chunk) = outgoing.blocking_recv() {
        for &b in &chunk {
            if let Err(e) = nb::block!(tx.write(b)) {
                warn!("serial write failed: {:?}", e);
                return;
            }
        }
        if let Err(e) = nb::block!(tx.flush()) {
            warn!("serial flush failed: {:?}", e);
            return;
        }
    }
    debug!("serial writer finished");
}

fn read_loop<RX>(mut rx: RX, incoming: mpsc::Sender<Vec<u8>>)
where
    RX: serial::Read<u8>,
    RX::Error: Debug,
{
    let mut chunk = Vec::new();
    loop {
        match rx.read() {
            Ok(b) => {
                chunk.push(b);
                if b == 0x00 && incoming.blocking_send(std::mem::take(&mut chunk)).is_err() {
                    break;
                }
            }
            Err(nb::Error::WouldBlock) => {
                if !chunk.is_empty() && incoming.blocking_send(std::mem::take(&mut chunk)).is_err() {
                    break;
                }
                if incoming.is_closed() {
                    break;
                }
                thread::sleep(IDLE_POLL);
            }
            Err(nb::Error::Other(e)) => {
                warn!("serial read failed: {:?}", e);
                break;
            }
        }
    }
    debug!("serial reader finished");
}
