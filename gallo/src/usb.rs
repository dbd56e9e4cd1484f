//! USB transport.
//!
//! The board exposes one vendor-specific interface with a bulk OUT endpoint
//! for requests and a bulk IN endpoint for responses. Two tasks shuttle
//! chunks between those endpoints and the [`Link`] channels.

use crate::device::{Backend, DeviceInfo};
use crate::error::{DeviceSelectionError, Error, Result, TransportError};
use crate::link::Link;
use crate::options::Options;
use nusb::transfer::RequestBuffer;
use std::io;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const INTERFACE: u8 = 0;
const EP_OUT: u8 = 0x01;
const EP_IN: u8 = 0x81;

/// Boards attached over USB, matched by vendor and product id.
#[derive(Debug, Clone, Default)]
pub struct UsbBackend {
    options: Options,
}

impl UsbBackend {
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

fn usb(e: impl std::fmt::Display) -> Error {
    TransportError::Usb(e.to_string()).into()
}

impl Backend for UsbBackend {
    type Port = nusb::DeviceInfo;

    fn options(&self) -> &Options {
        &self.options
    }

    fn enumerate(&self) -> Result<impl Iterator<Item = (DeviceInfo, nusb::DeviceInfo)>> {
        let vendor_id = self.options.vendor_id;
        let product_id = self.options.product_id;
        let devices = nusb::list_devices().map_err(usb)?;
        Ok(devices
            .filter(move |d| d.vendor_id() == vendor_id && d.product_id() == product_id)
            .map(|d| {
                let info = DeviceInfo {
                    serial_number: d.serial_number().unwrap_or_default().to_owned(),
                    product: d.product_string().map(str::to_owned),
                };
                (info, d)
            }))
    }

    fn connect(&self, port: nusb::DeviceInfo) -> Result<Link> {
        let serial = port.serial_number().unwrap_or_default().to_owned();
        let device = port.open().map_err(usb)?;
        let interface = device.claim_interface(INTERFACE).map_err(|e| {
            if e.kind() == io::ErrorKind::ResourceBusy {
                Error::from(DeviceSelectionError::AlreadyInUse(serial.clone()))
            } else {
                usb(e)
            }
        })?;

        let depth = self.options.channel_depth;
        let transfer_size = self.options.transfer_size;
        let (to_board, mut outgoing) = mpsc::channel::<Vec<u8>>(depth);
        let (incoming, from_board) = mpsc::channel::<Vec<u8>>(depth);

        let out = interface.clone();
        tokio::spawn(async move {
            while let Some(chunk) = outgoing.recv().await {
                if let Err(e) = out.bulk_out(EP_OUT, chunk).await.into_result() {
                    warn!("USB OUT transfer failed: {}", e);
                    break;
                }
            }
        });

        tokio::spawn(async move {
            loop {
                let transfer = interface.bulk_in(EP_IN, RequestBuffer::new(transfer_size));
                let completion = tokio::select! {
                    completion = transfer => completion,
                    _ = incoming.closed() => break,
                };
                match completion.into_result() {
                    Ok(data) => {
                        if incoming.send(data).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("USB IN stopped: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Link::new(to_board, from_board))
    }
}
