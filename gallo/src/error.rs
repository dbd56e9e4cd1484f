//! Error taxonomy.
//!
//! Every failure a caller can see is an [`Error`], classified by where it
//! came from. A [`TransportError`] means the link to the board is gone and
//! the handle is no longer usable. The others concern one request only.

use gallo_proto::wire::{BusFault, ConfigFault, Failure};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("device selection error: {0}")]
    DeviceSelection(#[from] DeviceSelectionError),

    /// A GPIO wait was superseded by a later request on its pin, or dropped
    /// by a board reset.
    #[error("wait cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("device disconnected")]
    Disconnected,

    #[error("malformed frame")]
    Malformed,

    #[error("no answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("USB: {0}")]
    Usb(String),

    #[error("serial port: {0}")]
    Serial(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("endpoint {0:#04x} not supported by the firmware")]
    UnsupportedEndpoint(u8),

    #[error("firmware could not decode the request")]
    MalformedRequest,

    #[error("response could not be decoded")]
    MalformedResponse,

    #[error("response names a different endpoint than its request")]
    EndpointMismatch,

    #[error("a wait is already pending on pin {pin}")]
    WaitConflict { pin: u8 },

    #[error("no pin {0}")]
    InvalidPin(u8),

    #[error("I2C address {0:#04x} is not a 7-bit address")]
    InvalidAddress(u8),

    #[error("request exceeds the {max} byte limit")]
    RequestTooLarge { max: u16 },

    #[error("all correlation ids are in use")]
    IdsExhausted,

    #[error("firmware speaks protocol {found}, expected {expected}")]
    Incompatible { expected: u8, found: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("address not acknowledged")]
    AddressNack,

    #[error("data not acknowledged")]
    DataNack,

    #[error("arbitration lost")]
    ArbitrationLoss,

    #[error("timed out")]
    Timeout,

    #[error("bus fault")]
    Bus,

    #[error("unclassified failure")]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("I2C frequency {0} Hz out of range")]
    I2cFrequency(u32),

    #[error("SPI frequency {0} Hz out of range")]
    SpiFrequency(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceSelectionError {
    #[error("no matching device found")]
    NotFound,

    #[error("more than one device has serial number {0:?}")]
    Ambiguous(String),

    #[error("device {0:?} is already open")]
    AlreadyInUse(String),
}

impl From<BusFault> for BusError {
    fn from(fault: BusFault) -> Self {
        match fault {
            BusFault::AddressNack => BusError::AddressNack,
            BusFault::DataNack => BusError::DataNack,
            BusFault::ArbitrationLoss => BusError::ArbitrationLoss,
            BusFault::Timeout => BusError::Timeout,
            BusFault::Bus => BusError::Bus,
            BusFault::Other => BusError::Other,
        }
    }
}

impl From<ConfigFault> for ConfigError {
    fn from(fault: ConfigFault) -> Self {
        match fault {
            ConfigFault::I2cFrequency(hz) => ConfigError::I2cFrequency(hz),
            ConfigFault::SpiFrequency(hz) => ConfigError::SpiFrequency(hz),
        }
    }
}

impl From<Failure> for Error {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::UnsupportedEndpoint(id) => ProtocolError::UnsupportedEndpoint(id).into(),
            Failure::MalformedRequest => ProtocolError::MalformedRequest.into(),
            Failure::RequestTooLarge { max } => ProtocolError::RequestTooLarge { max }.into(),
            Failure::InvalidAddress(address) => ProtocolError::InvalidAddress(address).into(),
            Failure::InvalidPin(pin) => ProtocolError::InvalidPin(pin).into(),
            Failure::WaitConflict(pin) => ProtocolError::WaitConflict { pin }.into(),
            Failure::Bus(fault) => Error::Bus(fault.into()),
            Failure::Config(fault) => Error::Config(fault.into()),
            Failure::WaitSuperseded | Failure::WaitCancelled => Error::Cancelled,
        }
    }
}

impl From<ConfigFault> for Error {
    fn from(fault: ConfigFault) -> Self {
        Error::Config(fault.into())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Usb(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
