//! Capability traits for the peripherals behind each endpoint.
//!
//! Every bus operation receives the [`BusConfig`] currently in effect. The
//! dispatcher owns that value and replaces it whole in `set-config`, so an
//! implementation never sees a half-applied configuration.

use embedded_hal::digital::{InputPin, OutputPin, PinState};
use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
use gallo_proto::wire::{BusConfig, BusFault, GpioState};

/// An I2C controller using 7-bit addressing.
pub trait I2cBus {
    fn read(&mut self, config: &BusConfig, address: u8, buf: &mut [u8]) -> Result<(), BusFault>;

    fn write(&mut self, config: &BusConfig, address: u8, bytes: &[u8]) -> Result<(), BusFault>;

    /// Writes `bytes` and then fills `buf` after a repeated start, without
    /// releasing the bus in between.
    fn write_read(
        &mut self,
        config: &BusConfig,
        address: u8,
        bytes: &[u8],
        buf: &mut [u8],
    ) -> Result<(), BusFault>;
}

/// An SPI controller. Chip select is left to the host, usually on a GPIO.
pub trait SpiBus {
    fn read(&mut self, config: &BusConfig, buf: &mut [u8]) -> Result<(), BusFault>;

    fn write(&mut self, config: &BusConfig, bytes: &[u8]) -> Result<(), BusFault>;

    /// Returns once every byte queued by earlier writes has been clocked out.
    fn flush(&mut self, config: &BusConfig) -> Result<(), BusFault>;
}

/// A GPIO that can be switched between input and output at run time.
pub trait FlexPin {
    fn set_as_input(&mut self);

    fn set_as_output(&mut self);

    fn level(&mut self) -> Result<GpioState, BusFault>;

    fn set_level(&mut self, state: GpioState) -> Result<(), BusFault>;
}

/// The peripherals the dispatcher routes requests to.
pub trait Board {
    type I2c: I2cBus;
    type Spi: SpiBus;
    type Pin: FlexPin;

    fn i2c(&mut self) -> &mut Self::I2c;

    fn spi(&mut self) -> &mut Self::Spi;

    /// Returns the pin with the given index, or `None` past the last pin.
    fn pin(&mut self, index: u8) -> Option<&mut Self::Pin>;

    /// Reprograms the controllers. Only called with a configuration that
    /// passed [`BusConfig::validate`].
    fn configure(&mut self, config: &BusConfig);
}

/// `Hal` adapts `embedded-hal` 1.0 drivers to the traits above.
///
/// `embedded-hal` has no notion of a run-time clock change, so a board built
/// from `Hal` wrappers still applies [`Board::configure`] itself.
#[derive(Debug, Clone)]
pub struct Hal<T>(pub T);

/// Maps an `embedded-hal` I2C error kind to the protocol's classification.
///
/// A NACK of unknown origin is reported as an address NACK: a controller
/// that cannot tell the two apart almost always failed on the address byte.
pub fn classify_i2c(kind: ErrorKind) -> BusFault {
    match kind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data) => BusFault::DataNack,
        ErrorKind::NoAcknowledge(_) => BusFault::AddressNack,
        ErrorKind::ArbitrationLoss => BusFault::ArbitrationLoss,
        ErrorKind::Bus => BusFault::Bus,
        _ => BusFault::Other,
    }
}

impl<T: embedded_hal::i2c::I2c> I2cBus for Hal<T> {
    fn read(&mut self, _config: &BusConfig, address: u8, buf: &mut [u8]) -> Result<(), BusFault> {
        use embedded_hal::i2c::Error;
        self.0.read(address, buf).map_err(|e| classify_i2c(e.kind()))
    }

    fn write(&mut self, _config: &BusConfig, address: u8, bytes: &[u8]) -> Result<(), BusFault> {
        use embedded_hal::i2c::Error;
        self.0.write(address, bytes).map_err(|e| classify_i2c(e.kind()))
    }

    fn write_read(
        &mut self,
        _config: &BusConfig,
        address: u8,
        bytes: &[u8],
        buf: &mut [u8],
    ) -> Result<(), BusFault> {
        use embedded_hal::i2c::Error;
        self.0
            .write_read(address, bytes, buf)
            .map_err(|e| classify_i2c(e.kind()))
    }
}

impl<T: embedded_hal::spi::SpiBus> SpiBus for Hal<T> {
    fn read(&mut self, _config: &BusConfig, buf: &mut [u8]) -> Result<(), BusFault> {
        self.0.read(buf).map_err(|_| BusFault::Other)
    }

    fn write(&mut self, _config: &BusConfig, bytes: &[u8]) -> Result<(), BusFault> {
        self.0.write(bytes).map_err(|_| BusFault::Other)
    }

    fn flush(&mut self, _config: &BusConfig) -> Result<(), BusFault> {
        self.0.flush().map_err(|_| BusFault::Other)
    }
}

/// Pins that are readable and writable at once, such as open-drain pins,
/// need no direction switch.
impl<T: InputPin + OutputPin> FlexPin for Hal<T> {
    fn set_as_input(&mut self) {}

    fn set_as_output(&mut self) {}

    fn level(&mut self) -> Result<GpioState, BusFault> {
        self.0
            .is_high()
            .map(GpioState::from)
            .map_err(|_| BusFault::Other)
    }

    fn set_level(&mut self, state: GpioState) -> Result<(), BusFault> {
        self.0
            .set_state(PinState::from(state.is_high()))
            .map_err(|_| BusFault::Other)
    }
}
