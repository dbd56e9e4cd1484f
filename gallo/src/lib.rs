//! Gallo host library
//!
//! This library drives a Gallo bridge board, which exposes an I2C bus, an SPI
//! bus and eight GPIOs to a host computer over USB. Every operation is a
//! request to one of the board's endpoints; any number of them may be in
//! flight at once, from any number of tasks.
//!
//! Boards are found through a [`Backend`]. [`UsbBackend`] finds real boards
//! and [`SerialBackend`] reaches one behind a serial port. [`MemoryBackend`]
//! hosts boards in-process, which is how the test suites run without
//! hardware.
//!
//! ```rust,no_run
//! # async fn demo() -> gallo::Result<()> {
//! let backend = gallo::UsbBackend::default();
//! let board = gallo::open(&backend).await?;
//! let temperature = board.i2c_write_read(0x48, &[0x00], 2).await?;
//! println!("{} says {:02x?}", board.serial_number(), temperature);
//! # Ok(())
//! # }
//! ```
//!
//! The handle is cheap to clone. Dropping the last clone closes the
//! transport and releases the board for another [`open`].

mod client;
mod device;
pub mod error;
mod link;
mod memory;
mod options;
mod scan;
pub mod serial;
mod usb;

pub use client::Client;
pub use device::{discover, open, open_with_serial, Backend, DeviceInfo};
pub use error::{
    BusError, ConfigError, DeviceSelectionError, Error, ProtocolError, Result, TransportError,
};
pub use gallo_proto::wire::{
    BusConfig, GpioState, SpiPhase, SpiPolarity, VersionInfo, DEFAULT_CONFIG,
};
pub use link::Link;
pub use memory::MemoryBackend;
pub use options::Options;
pub use scan::{is_reserved, AddressStatus, ScanResult, ADDRESS_COUNT};
pub use serial::SerialBackend;
pub use usb::UsbBackend;

use device::Claim;
use gallo_proto::wire::{
    Endpoint, GpioPinRequest, GpioPutRequest, I2cReadRequest, I2cWriteReadRequest,
    I2cWriteRequest, SpiReadRequest, SpiWriteReadRequest, SpiWriteRequest, PROTOCOL_VERSION,
};
use std::sync::Arc;
use tracing::{debug, info};

struct Inner {
    client: Client,
    version: VersionInfo,
    // Dropped after `client`, so the serial number stays claimed until the
    // transport is down.
    claim: Claim,
}

/// An open board.
#[derive(Clone)]
pub struct Gallo {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Gallo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gallo")
            .field("serial_number", &self.serial_number())
            .field("version", &self.inner.version)
            .finish()
    }
}

impl Gallo {
    pub(crate) async fn connect<B: Backend>(
        backend: &B,
        info: DeviceInfo,
        port: B::Port,
    ) -> Result<Self> {
        let claim = Claim::acquire(&info.serial_number)?;
        let link = backend.connect(port)?;
        let client = Client::new(link);

        let timeout = backend.options().handshake_timeout;
        let version: VersionInfo = tokio::time::timeout(timeout, client.call(Endpoint::Version, &()))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        if version.protocol != PROTOCOL_VERSION {
            return Err(ProtocolError::Incompatible {
                expected: PROTOCOL_VERSION,
                found: version.protocol,
            }
            .into());
        }
        info!(serial = %info.serial_number, %version, "opened");

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                version,
                claim,
            }),
        })
    }

    /// Serial number the board reported during discovery.
    pub fn serial_number(&self) -> &str {
        self.inner.claim.serial()
    }

    /// Firmware version read during the open handshake.
    pub fn firmware_version(&self) -> VersionInfo {
        self.inner.version
    }

    /// Resolves once the transport has closed, for example because the board
    /// was unplugged.
    pub async fn wait_closed(&self) {
        self.inner.client.wait_closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.client.is_closed()
    }

    /// Sends `id` and returns what the board echoes.
    pub async fn ping(&self, id: u32) -> Result<u32> {
        self.inner.client.call(Endpoint::Ping, &id).await
    }

    /// Asks the board for its firmware version.
    pub async fn version(&self) -> Result<VersionInfo> {
        self.inner.client.call(Endpoint::Version, &()).await
    }

    /// Replaces the bus configuration.
    ///
    /// The configuration is checked here first, so an out-of-range value
    /// fails without a round trip. The board applies it whole or not at
    /// all.
    pub async fn set_config(&self, config: BusConfig) -> Result<()> {
        config.validate()?;
        self.inner.client.call(Endpoint::SetConfig, &config).await
    }

    /// Reads `count` bytes from the I2C device at `address`.
    pub async fn i2c_read(&self, address: u8, count: u16) -> Result<Vec<u8>> {
        self.inner
            .client
            .call(Endpoint::I2cRead, &I2cReadRequest { address, count })
            .await
    }

    /// Writes `contents` to the I2C device at `address`.
    pub async fn i2c_write(&self, address: u8, contents: &[u8]) -> Result<()> {
        self.inner
            .client
            .call(Endpoint::I2cWrite, &I2cWriteRequest { address, contents })
            .await
    }

    /// Writes `contents` to the device at `address`, then reads `count` bytes
    /// back after a repeated start, as one transaction.
    pub async fn i2c_write_read(&self, address: u8, contents: &[u8], count: u16) -> Result<Vec<u8>> {
        self.inner
            .client
            .call(
                Endpoint::I2cWriteRead,
                &I2cWriteReadRequest {
                    address,
                    contents,
                    count,
                },
            )
            .await
    }

    /// Probes every 7-bit address with a one-byte read.
    ///
    /// Reserved addresses are only probed when `include_reserved` is set.
    /// An unacknowledged probe marks the address absent; any other bus
    /// error ends the scan with that error.
    pub async fn i2c_scan(&self, include_reserved: bool) -> Result<ScanResult> {
        let mut statuses = [AddressStatus::Absent; ADDRESS_COUNT];
        for (address, status) in (0u8..).zip(statuses.iter_mut()) {
            if is_reserved(address) && !include_reserved {
                *status = AddressStatus::Reserved;
                continue;
            }
            *status = match self.i2c_read(address, 1).await {
                Ok(_) => AddressStatus::Present,
                Err(Error::Bus(BusError::AddressNack)) => AddressStatus::Absent,
                Err(e) => {
                    debug!(address, "scan aborted: {}", e);
                    return Err(e);
                }
            };
        }
        Ok(ScanResult::new(statuses))
    }

    /// Reads `count` bytes from SPI.
    pub async fn spi_read(&self, count: u16) -> Result<Vec<u8>> {
        self.inner
            .client
            .call(Endpoint::SpiRead, &SpiReadRequest { count })
            .await
    }

    pub async fn spi_write(&self, contents: &[u8]) -> Result<()> {
        self.inner
            .client
            .call(Endpoint::SpiWrite, &SpiWriteRequest { contents })
            .await
    }

    /// Writes `contents`, then reads `count` bytes.
    pub async fn spi_write_read(&self, contents: &[u8], count: u16) -> Result<Vec<u8>> {
        self.inner
            .client
            .call(Endpoint::SpiWriteRead, &SpiWriteReadRequest { contents, count })
            .await
    }

    /// Waits until all written SPI data has left the board.
    pub async fn spi_flush(&self) -> Result<()> {
        self.inner.client.call(Endpoint::SpiFlush, &()).await
    }

    /// Reads `pin` as an input. Pins are numbered 0 through 7.
    pub async fn gpio_get(&self, pin: u8) -> Result<GpioState> {
        self.inner
            .client
            .call(Endpoint::GpioGet, &GpioPinRequest { pin })
            .await
    }

    /// Drives `pin` as an output.
    pub async fn gpio_put(&self, pin: u8, state: GpioState) -> Result<()> {
        self.inner
            .client
            .call(Endpoint::GpioPut, &GpioPutRequest { pin, state })
            .await
    }

    // Dropping the future before it resolves withdraws the wait with a
    // `gpio_get` on the same pin.
    async fn gpio_wait(&self, endpoint: Endpoint, pin: u8) -> Result<()> {
        let req = GpioPinRequest { pin };
        self.inner
            .client
            .call_withdrawable(endpoint, &req, Endpoint::GpioGet, &req)
            .await
    }

    /// Waits for `pin` to read high. Returns at once if it already does.
    ///
    /// Waits have no timeout of their own. Dropping the returned future, for
    /// example from `tokio::time::timeout`, withdraws the wait on the board
    /// and leaves `pin` as an input. Only one wait may be pending per pin: a
    /// second wait on the same pin fails with [`ProtocolError::WaitConflict`]
    /// and the first then fails with [`Error::Cancelled`].
    pub async fn gpio_wait_for_high(&self, pin: u8) -> Result<()> {
        self.gpio_wait(Endpoint::GpioWaitForHigh, pin).await
    }

    /// Waits for `pin` to read low. Returns at once if it already does.
    pub async fn gpio_wait_for_low(&self, pin: u8) -> Result<()> {
        self.gpio_wait(Endpoint::GpioWaitForLow, pin).await
    }

    pub async fn gpio_wait_for_rising_edge(&self, pin: u8) -> Result<()> {
        self.gpio_wait(Endpoint::GpioWaitForRising, pin).await
    }

    pub async fn gpio_wait_for_falling_edge(&self, pin: u8) -> Result<()> {
        self.gpio_wait(Endpoint::GpioWaitForFalling, pin).await
    }

    pub async fn gpio_wait_for_any_edge(&self, pin: u8) -> Result<()> {
        self.gpio_wait(Endpoint::GpioWaitForAny, pin).await
    }

    /// Ends any wait pending on `pin`, which then fails with
    /// [`Error::Cancelled`].
    ///
    /// This is a [`gpio_get`](Self::gpio_get): any request on a pin
    /// supersedes its wait. The returned level is the pin's, read as an
    /// input, and says nothing about whether a wait was pending.
    pub async fn gpio_cancel_wait(&self, pin: u8) -> Result<GpioState> {
        self.gpio_get(pin).await
    }
}
