//! Endpoint registry and payload layouts.
//!
//! Every operation the board offers is an [`Endpoint`]. The numeric ids are
//! part of the protocol and must never be renumbered; new endpoints take
//! fresh ids and bump [`PROTOCOL_VERSION`].

use core::fmt;
use serde::{Deserialize, Serialize};

/// Revision of the endpoint table, reported in [`VersionInfo`].
pub const PROTOCOL_VERSION: u8 = 1;

/// USB vendor id the board enumerates with.
pub const VENDOR_ID: u16 = 0x045e;

/// USB product id the board enumerates with.
pub const PRODUCT_ID: u16 = 0x067d;

/// Highest valid 7-bit I2C address.
pub const MAX_I2C_ADDRESS: u8 = 0x7f;

/// Highest I2C clock the board's controller can drive, in Hz.
pub const MAX_I2C_FREQUENCY: u32 = 1_000_000;

/// Highest SPI clock the board's controller can drive, in Hz.
pub const MAX_SPI_FREQUENCY: u32 = 62_500_000;

/// Every response body is the postcard encoding of a `Reply`.
pub type Reply<T> = Result<T, Failure>;

/// `Endpoint` enumerates the operations understood by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Endpoint {
    Ping = 0x00,
    Version = 0x01,
    SetConfig = 0x02,
    I2cRead = 0x10,
    I2cWrite = 0x11,
    I2cWriteRead = 0x12,
    SpiRead = 0x20,
    SpiWrite = 0x21,
    SpiWriteRead = 0x22,
    SpiFlush = 0x23,
    GpioGet = 0x30,
    GpioPut = 0x31,
    GpioWaitForHigh = 0x32,
    GpioWaitForLow = 0x33,
    GpioWaitForRising = 0x34,
    GpioWaitForFalling = 0x35,
    GpioWaitForAny = 0x36,
}

/// Whether an endpoint completes within a bus-specific bound or only when
/// some external event happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    Bounded,
    Unbounded,
}

impl Endpoint {
    pub const ALL: [Endpoint; 17] = [
        Endpoint::Ping,
        Endpoint::Version,
        Endpoint::SetConfig,
        Endpoint::I2cRead,
        Endpoint::I2cWrite,
        Endpoint::I2cWriteRead,
        Endpoint::SpiRead,
        Endpoint::SpiWrite,
        Endpoint::SpiWriteRead,
        Endpoint::SpiFlush,
        Endpoint::GpioGet,
        Endpoint::GpioPut,
        Endpoint::GpioWaitForHigh,
        Endpoint::GpioWaitForLow,
        Endpoint::GpioWaitForRising,
        Endpoint::GpioWaitForFalling,
        Endpoint::GpioWaitForAny,
    ];

    /// The id carried in the `endpoint` field of a frame.
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Looks up the endpoint with the given wire id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|ep| ep.id() == id)
    }

    pub const fn latency(self) -> Latency {
        match self.wait_condition() {
            Some(_) => Latency::Unbounded,
            None => Latency::Bounded,
        }
    }

    /// The condition a `gpio_wait_for_*` endpoint waits on, or `None` for
    /// every other endpoint.
    pub const fn wait_condition(self) -> Option<WaitCondition> {
        match self {
            Endpoint::GpioWaitForHigh => Some(WaitCondition::High),
            Endpoint::GpioWaitForLow => Some(WaitCondition::Low),
            Endpoint::GpioWaitForRising => Some(WaitCondition::RisingEdge),
            Endpoint::GpioWaitForFalling => Some(WaitCondition::FallingEdge),
            Endpoint::GpioWaitForAny => Some(WaitCondition::AnyEdge),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Endpoint::Ping => "ping",
            Endpoint::Version => "version",
            Endpoint::SetConfig => "set-config",
            Endpoint::I2cRead => "i2c/read",
            Endpoint::I2cWrite => "i2c/write",
            Endpoint::I2cWriteRead => "i2c/write-read",
            Endpoint::SpiRead => "spi/read",
            Endpoint::SpiWrite => "spi/write",
            Endpoint::SpiWriteRead => "spi/write-read",
            Endpoint::SpiFlush => "spi/flush",
            Endpoint::GpioGet => "gpio/get",
            Endpoint::GpioPut => "gpio/put",
            Endpoint::GpioWaitForHigh => "gpio/wait-high",
            Endpoint::GpioWaitForLow => "gpio/wait-low",
            Endpoint::GpioWaitForRising => "gpio/wait-rising",
            Endpoint::GpioWaitForFalling => "gpio/wait-falling",
            Endpoint::GpioWaitForAny => "gpio/wait-any",
        }
    }
}

impl TryFrom<u8> for Endpoint {
    type Error = u8;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::from_id(id).ok_or(id)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// --- I2C

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cReadRequest {
    pub address: u8,
    pub count: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cWriteRequest<'a> {
    pub address: u8,
    pub contents: &'a [u8],
}

/// Write `contents`, then read `count` bytes after a repeated start.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cWriteReadRequest<'a> {
    pub address: u8,
    pub contents: &'a [u8],
    pub count: u16,
}

// --- SPI

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiReadRequest {
    pub count: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiWriteRequest<'a> {
    pub contents: &'a [u8],
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiWriteReadRequest<'a> {
    pub contents: &'a [u8],
    pub count: u16,
}

// --- GPIO

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioState {
    Low,
    High,
}

impl GpioState {
    pub fn is_high(self) -> bool {
        self == GpioState::High
    }
}

impl From<bool> for GpioState {
    fn from(high: bool) -> Self {
        if high {
            GpioState::High
        } else {
            GpioState::Low
        }
    }
}

/// Request body of `gpio/get` and of every `gpio/wait-*` endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioPinRequest {
    pub pin: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioPutRequest {
    pub pin: u8,
    pub state: GpioState,
}

/// What a pending GPIO wait is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    High,
    Low,
    RisingEdge,
    FallingEdge,
    AnyEdge,
}

impl WaitCondition {
    /// Reports whether a pin that read `previous` on the last sample and
    /// `current` now satisfies the condition. Level conditions are satisfied
    /// by the current level alone.
    pub fn satisfied(self, previous: GpioState, current: GpioState) -> bool {
        match self {
            WaitCondition::High => current == GpioState::High,
            WaitCondition::Low => current == GpioState::Low,
            WaitCondition::RisingEdge => previous == GpioState::Low && current == GpioState::High,
            WaitCondition::FallingEdge => previous == GpioState::High && current == GpioState::Low,
            WaitCondition::AnyEdge => previous != current,
        }
    }
}

// --- Configuration

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiPhase {
    CaptureOnFirstTransition = 0,
    CaptureOnSecondTransition = 1,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiPolarity {
    IdleLow = 0,
    IdleHigh = 1,
}

/// Bus parameters applied by `set-config`.
///
/// The board holds exactly one `BusConfig` at a time and replaces it as a
/// whole, so a bus operation sees either the previous value or the new one.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub i2c_frequency: u32,
    pub spi_frequency: u32,
    pub spi_phase: SpiPhase,
    pub spi_polarity: SpiPolarity,
}

/// Configuration in effect after power-up: 100 kHz I2C, 1 MHz SPI mode 0.
pub const DEFAULT_CONFIG: BusConfig = BusConfig {
    i2c_frequency: 100_000,
    spi_frequency: 1_000_000,
    spi_phase: SpiPhase::CaptureOnFirstTransition,
    spi_polarity: SpiPolarity::IdleLow,
};

impl Default for BusConfig {
    fn default() -> Self {
        DEFAULT_CONFIG
    }
}

impl BusConfig {
    /// Checks every field, so that a configuration is either applied whole
    /// or rejected whole.
    pub fn validate(&self) -> Result<(), ConfigFault> {
        if !(1..=MAX_I2C_FREQUENCY).contains(&self.i2c_frequency) {
            return Err(ConfigFault::I2cFrequency(self.i2c_frequency));
        }
        if !(1..=MAX_SPI_FREQUENCY).contains(&self.spi_frequency) {
            return Err(ConfigFault::SpiFrequency(self.spi_frequency));
        }
        Ok(())
    }

    /// The conventional SPI mode number (0-3): polarity in bit 1, phase in
    /// bit 0.
    pub fn spi_mode(&self) -> u8 {
        ((self.spi_polarity as u8) << 1) | (self.spi_phase as u8)
    }
}

// --- Version

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    pub major: u16,
    pub minor: u16,
    pub patch: u32,
    pub protocol: u8,
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

// --- Failures

/// Reason a request was not carried out.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The endpoint id in the request frame is not in the board's table.
    UnsupportedEndpoint(u8),
    /// The request body does not decode as the endpoint's request type.
    MalformedRequest,
    /// The request asks for more bytes than the board can buffer.
    RequestTooLarge { max: u16 },
    InvalidAddress(u8),
    InvalidPin(u8),
    Bus(BusFault),
    Config(ConfigFault),
    /// A wait was requested on a pin that already had one armed.
    WaitConflict(u8),
    /// The wait was displaced by a later request on the same pin.
    WaitSuperseded,
    /// The wait was dropped because the board was reset.
    WaitCancelled,
}

/// Electrical outcome of a failed bus transaction.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    /// Nobody acknowledged the address byte.
    AddressNack,
    /// The target acknowledged its address but refused a data byte.
    DataNack,
    ArbitrationLoss,
    Timeout,
    /// Misplaced START or STOP condition.
    Bus,
    Other,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFault {
    I2cFrequency(u32),
    SpiFrequency(u32),
}

impl fmt::Display for BusFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusFault::AddressNack => "address not acknowledged",
            BusFault::DataNack => "data not acknowledged",
            BusFault::ArbitrationLoss => "arbitration lost",
            BusFault::Timeout => "transaction timed out",
            BusFault::Bus => "bus error",
            BusFault::Other => "unclassified bus failure",
        })
    }
}

impl fmt::Display for ConfigFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFault::I2cFrequency(hz) => {
                write!(f, "I2C frequency {} Hz outside 1..={}", hz, MAX_I2C_FREQUENCY)
            }
            ConfigFault::SpiFrequency(hz) => {
                write!(f, "SPI frequency {} Hz outside 1..={}", hz, MAX_SPI_FREQUENCY)
            }
        }
    }
}
